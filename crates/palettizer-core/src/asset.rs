use crate::error::{PalettizerError, Result};
use crate::model::{AssetId, GroupId, GroupSet, PlacementId, TextureId, UvBounds, WrapMode};
use crate::session::Session;
use crate::texture::{SourceImage, source_key};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One texture use inside an asset file, as produced by an [`AssetScanner`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannedReference {
    pub texture_name: String,
    pub source: PathBuf,
    #[serde(default)]
    pub alpha_source: Option<PathBuf>,
    /// Texture coordinates actually used; `None` if the asset never samples it.
    #[serde(default)]
    pub uv: Option<UvBounds>,
    #[serde(default)]
    pub wrap_u: WrapMode,
    #[serde(default)]
    pub wrap_v: WrapMode,
}

/// Result of scanning one asset file.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedAsset {
    pub name: String,
    pub path: PathBuf,
    pub modified: Option<u64>,
    pub references: Vec<ScannedReference>,
}

/// Reads asset files. The engine only calls back to rescan assets it has
/// marked stale.
pub trait AssetScanner {
    fn scan(&mut self, name: &str, path: &Path) -> Result<ScannedAsset>;
}

/// A texture use recorded against an asset, linked to the chosen placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextureReference {
    pub texture_name: String,
    pub texture: TextureId,
    pub source_key: String,
    pub uv: Option<UvBounds>,
    pub wrap_u: WrapMode,
    pub wrap_v: WrapMode,
    pub placement: Option<PlacementId>,
}

impl TextureReference {
    fn sort_key(&self) -> (&str, &str) {
        (&self.texture_name, &self.source_key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetFile {
    pub name: String,
    pub path: PathBuf,
    /// Groups the asset is deployed to, before dependency closure.
    pub groups: GroupSet,
    /// Sorted by texture name, then source.
    pub references: Vec<TextureReference>,
    /// Output for this asset must be rewritten (its remaps changed).
    pub stale: bool,
    #[serde(default)]
    pub modified: Option<u64>,
    /// Scanned since the last `clear_stale`; such assets are not rescanned.
    #[serde(skip)]
    pub(crate) fresh: bool,
}

impl AssetFile {
    pub fn new(name: &str, path: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            path,
            groups: GroupSet::new(),
            references: Vec::new(),
            stale: true,
            modified: None,
            fresh: false,
        }
    }
}

fn scanned_key(r: &ScannedReference) -> (String, String) {
    (
        r.texture_name.clone(),
        source_key(&r.source, r.alpha_source.as_deref()),
    )
}

impl Session {
    pub fn asset_by_name(&self, name: &str) -> Option<AssetId> {
        self.asset_names.get(name).copied()
    }

    /// The groups an asset is deployed to, from the asset directives or the
    /// default group.
    fn asset_groups_for(&mut self, name: &str) -> GroupSet {
        let names: Vec<String> = match self.directives.asset(name) {
            Some(d) => d.groups.clone(),
            None => vec![self.config.default_group.clone()],
        };
        names.iter().map(|g| self.make_group(g)).collect()
    }

    /// Merges a fresh scan into the stored asset. References present in both
    /// keep their placement link and take the new UV and wrap data.
    pub fn update_asset(&mut self, scanned: ScannedAsset) -> AssetId {
        let aid = match self.asset_names.get(&scanned.name) {
            Some(&id) => id,
            None => {
                let id = self.assets.insert(AssetFile::new(&scanned.name, scanned.path.clone()));
                self.asset_names.insert(scanned.name.clone(), id);
                id
            }
        };
        let groups = self.asset_groups_for(&scanned.name);

        let mut incoming = scanned.references;
        incoming.sort_by_key(scanned_key);

        let old = std::mem::take(&mut self.assets[aid].references);
        for pid in old.iter().filter_map(|r| r.placement) {
            if let Some(p) = self.placements.get_mut(pid) {
                p.references.remove(&aid);
            }
        }
        let mut merged: Vec<TextureReference> = Vec::with_capacity(incoming.len());
        let (mut added, mut released, mut kept) = (0usize, 0usize, 0usize);

        let mut old_iter = old.into_iter().peekable();
        let mut new_iter = incoming.into_iter().peekable();
        loop {
            let order = match (old_iter.peek(), new_iter.peek()) {
                (None, None) => break,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(o), Some(n)) => {
                    let (name, key) = scanned_key(n);
                    o.sort_key().cmp(&(name.as_str(), key.as_str()))
                }
            };
            match order {
                Ordering::Less => {
                    old_iter.next();
                    released += 1;
                }
                Ordering::Greater => {
                    if let Some(n) = new_iter.next() {
                        merged.push(self.new_reference(n));
                        added += 1;
                    }
                }
                Ordering::Equal => {
                    if let (Some(mut o), Some(n)) = (old_iter.next(), new_iter.next()) {
                        o.uv = n.uv;
                        o.wrap_u = n.wrap_u;
                        o.wrap_v = n.wrap_v;
                        merged.push(o);
                        kept += 1;
                    }
                }
            }
        }

        for pid in merged.iter().filter_map(|r| r.placement) {
            if let Some(p) = self.placements.get_mut(pid) {
                p.references.insert(aid);
            }
        }
        let asset = &mut self.assets[aid];
        asset.references = merged;
        asset.path = scanned.path;
        asset.modified = scanned.modified;
        asset.groups = groups;
        asset.stale = true;
        asset.fresh = true;
        debug!(asset = %asset.name, added, released, kept, "merged asset references");
        aid
    }

    fn new_reference(&mut self, scanned: ScannedReference) -> TextureReference {
        let tid = self.make_texture(&scanned.texture_name);
        let key = source_key(&scanned.source, scanned.alpha_source.as_deref());
        self.textures[tid]
            .sources
            .entry(key.clone())
            .or_insert_with(|| SourceImage::new(scanned.source.clone(), scanned.alpha_source.clone()));
        TextureReference {
            texture_name: scanned.texture_name,
            texture: tid,
            source_key: key,
            uv: scanned.uv,
            wrap_u: scanned.wrap_u,
            wrap_v: scanned.wrap_v,
            placement: None,
        }
    }

    /// Drops an asset file and all of its texture references.
    pub fn remove_asset(&mut self, aid: AssetId) {
        if let Some(asset) = self.assets.remove(aid) {
            self.asset_names.remove(&asset.name);
            for r in &asset.references {
                if let Some(p) = r.placement.and_then(|pid| self.placements.get_mut(pid)) {
                    p.references.remove(&aid);
                }
            }
            debug!(asset = %asset.name, "removed asset");
        }
    }

    /// Recomputes which assets reference each texture and which sources are
    /// named by a live reference.
    pub(crate) fn rebuild_texture_links(&mut self) {
        for (_, tex) in self.textures.iter_mut() {
            tex.referencing_assets.clear();
            for src in tex.sources.values_mut() {
                src.referenced = false;
            }
        }
        for (aid, asset) in self.assets.iter() {
            for r in &asset.references {
                if let Some(tex) = self.textures.get_mut(r.texture) {
                    tex.referencing_assets.insert(aid);
                    if let Some(src) = tex.sources.get_mut(&r.source_key) {
                        src.referenced = true;
                    }
                }
            }
        }
    }

    /// Points each of the asset's references at the texture's placement in a
    /// group the asset is deployed with. A still-valid placement is kept;
    /// otherwise the most preferred candidate is taken.
    pub fn choose_placements(&mut self, aid: AssetId) {
        let complete = self.complete_group_set(&self.assets[aid].groups);
        let mut changed = false;
        for idx in 0..self.assets[aid].references.len() {
            let (tid, current) = {
                let r = &self.assets[aid].references[idx];
                (r.texture, r.placement)
            };
            let tex = &self.textures[tid];

            let keep = current.filter(|&pid| {
                self.placements
                    .get(pid)
                    .is_some_and(|p| p.texture == tid && complete.contains(&p.group))
                    && tex.placements.values().any(|&q| q == pid)
            });
            let chosen = keep.or_else(|| {
                let candidates: Vec<GroupId> = tex
                    .placements
                    .keys()
                    .copied()
                    .filter(|g| complete.contains(g))
                    .collect();
                let asset_groups: Vec<GroupSet> = tex
                    .referencing_assets
                    .iter()
                    .filter_map(|&a| self.assets.get(a))
                    .map(|a| self.complete_group_set(&a.groups))
                    .collect();
                let mut best: Option<GroupId> = None;
                for g in candidates {
                    best = match best {
                        Some(b) if !self.is_preferred_over(g, b, &asset_groups) => Some(b),
                        _ => Some(g),
                    };
                }
                best.and_then(|g| tex.placements.get(&g).copied())
            });

            if chosen != current {
                changed = true;
                if let Some(p) = current.and_then(|pid| self.placements.get_mut(pid)) {
                    p.references.remove(&aid);
                }
                self.assets[aid].references[idx].placement = chosen;
            }
            if let Some(p) = chosen.and_then(|pid| self.placements.get_mut(pid)) {
                p.references.insert(aid);
            }
        }
        if changed {
            self.assets[aid].stale = true;
        }
    }

    /// Scans `name` and merges the result. If the scan fails, an asset
    /// already known under that name is removed from the session.
    pub fn rescan_asset(&mut self, scanner: &mut dyn AssetScanner, name: &str, path: &Path) -> Result<AssetId> {
        match scanner.scan(name, path) {
            Ok(scanned) => Ok(self.update_asset(scanned)),
            Err(e) => {
                if let Some(aid) = self.asset_by_name(name) {
                    warn!(asset = %name, error = %e, "dropping asset that failed to rescan");
                    self.remove_asset(aid);
                }
                Err(e)
            }
        }
    }

    /// Rescans every stale asset that was not scanned since the last
    /// `clear_stale`. Assets that fail to scan are removed from the session;
    /// their names and errors are returned.
    pub fn read_stale_assets(&mut self, scanner: &mut dyn AssetScanner) -> Vec<(String, String)> {
        let mut failed = Vec::new();
        let mut rescanned = Vec::new();
        let stale: Vec<AssetId> = self
            .assets
            .iter()
            .filter(|(_, a)| a.stale && !a.fresh)
            .map(|(id, _)| id)
            .collect();
        for aid in stale {
            let (name, path) = {
                let a = &self.assets[aid];
                (a.name.clone(), a.path.clone())
            };
            match self.rescan_asset(scanner, &name, &path) {
                Ok(id) => rescanned.push(id),
                Err(e) => failed.push((name, scan_failure_reason(e))),
            }
        }
        self.rebuild_texture_links();
        for aid in rescanned {
            self.choose_placements(aid);
        }
        failed
    }

    /// Marks every asset as written.
    pub fn clear_stale(&mut self) {
        for (_, a) in self.assets.iter_mut() {
            a.stale = false;
            a.fresh = false;
        }
    }
}

/// The scanner's own message for `AssetScan` errors, the full error otherwise.
pub fn scan_failure_reason(e: PalettizerError) -> String {
    match e {
        PalettizerError::AssetScan { reason, .. } => reason,
        other => other.to_string(),
    }
}
