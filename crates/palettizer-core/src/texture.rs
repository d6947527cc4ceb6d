use crate::model::{
    AssetId, GroupId, GroupSet, OmitReason, PlacementId, TextureId, TextureProperties, WrapMode,
};
use crate::raster::RasterIo;
use crate::session::Session;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One file (optionally with a separate alpha file) a texture can be read from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceImage {
    pub path: PathBuf,
    #[serde(default)]
    pub alpha_path: Option<PathBuf>,
    #[serde(default)]
    pub size: Option<(u32, u32)>,
    #[serde(default)]
    pub num_channels: Option<u8>,
    /// Modification stamp seen when the header was last read.
    #[serde(default)]
    pub modified: Option<u64>,
    /// Some live asset reference names this source.
    #[serde(skip)]
    pub(crate) referenced: bool,
}

impl SourceImage {
    pub fn new(path: PathBuf, alpha_path: Option<PathBuf>) -> Self {
        Self {
            path,
            alpha_path,
            size: None,
            num_channels: None,
            modified: None,
            referenced: false,
        }
    }

    pub fn key(&self) -> String {
        source_key(&self.path, self.alpha_path.as_deref())
    }

    /// Re-reads the header if the file changed or was never read.
    /// Returns whether the size is known afterwards.
    pub fn refresh(&mut self, raster: &dyn RasterIo) -> bool {
        let modified = raster.modified(&self.path);
        if modified.is_none() {
            self.size = None;
            self.modified = None;
            return false;
        }
        if self.size.is_some() && modified == self.modified {
            return true;
        }
        match raster.read_header(&self.path) {
            Ok(header) => {
                self.size = Some((header.width, header.height));
                self.num_channels = Some(header.channels);
                if self.alpha_path.is_some() && !matches!(header.channels, 2 | 4) {
                    self.num_channels = Some(header.channels + 1);
                }
                self.modified = modified;
                true
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cannot read texture header");
                self.size = None;
                self.modified = None;
                false
            }
        }
    }
}

/// Map key of a source within its texture.
pub fn source_key(path: &Path, alpha: Option<&Path>) -> String {
    match alpha {
        Some(a) => format!("{}|{}", path.display(), a.display()),
        None => path.display().to_string(),
    }
}

/// A distinct source texture and the groups it has been assigned to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextureRecord {
    pub name: String,
    pub properties: TextureProperties,
    /// Pixel size after directives, `None` while unknown.
    pub size: Option<(u32, u32)>,
    pub margin: u32,
    pub omit: bool,
    pub coverage_threshold: f64,
    /// Directive wrap modes; `Unspecified` defers to the references.
    pub wrap_u: WrapMode,
    pub wrap_v: WrapMode,
    pub explicit_groups: GroupSet,
    pub sources: BTreeMap<String, SourceImage>,
    pub preferred_source: Option<String>,
    #[serde(default)]
    pub swaps: Vec<SourceImage>,

    /// Always equal to the keys of `placements`.
    #[serde(skip)]
    pub(crate) actual_groups: GroupSet,
    #[serde(skip)]
    pub(crate) placements: BTreeMap<GroupId, PlacementId>,
    #[serde(skip)]
    pub(crate) referencing_assets: BTreeSet<AssetId>,
}

impl TextureRecord {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            properties: TextureProperties::default(),
            size: None,
            margin: 0,
            omit: false,
            coverage_threshold: 0.0,
            wrap_u: WrapMode::Unspecified,
            wrap_v: WrapMode::Unspecified,
            explicit_groups: GroupSet::new(),
            sources: BTreeMap::new(),
            preferred_source: None,
            swaps: Vec::new(),
            actual_groups: GroupSet::new(),
            placements: BTreeMap::new(),
            referencing_assets: BTreeSet::new(),
        }
    }

    pub fn actual_groups(&self) -> &GroupSet {
        &self.actual_groups
    }

    pub fn placement(&self, group: GroupId) -> Option<PlacementId> {
        self.placements.get(&group).copied()
    }

    pub fn placements(&self) -> impl Iterator<Item = (GroupId, PlacementId)> + '_ {
        self.placements.iter().map(|(g, p)| (*g, *p))
    }

    pub fn referencing_assets(&self) -> impl Iterator<Item = AssetId> + '_ {
        self.referencing_assets.iter().copied()
    }

    pub fn preferred(&self) -> Option<&SourceImage> {
        self.preferred_source.as_ref().and_then(|k| self.sources.get(k))
    }

    /// Picks the source to read pixels from: one referenced by an asset if
    /// any is, then the largest readable one, then the newest of equal size.
    pub fn choose_preferred_source(&self) -> Option<String> {
        let any_referenced = self.sources.values().any(|s| s.referenced);
        let mut best: Option<(&String, &SourceImage)> = None;
        for (key, src) in &self.sources {
            if any_referenced && !src.referenced {
                continue;
            }
            let Some((w, h)) = src.size else {
                continue;
            };
            let better = match best {
                None => true,
                Some((_, b)) => {
                    let (bw, bh) = b.size.unwrap_or((0, 0));
                    let (area, barea) = (w as u64 * h as u64, bw as u64 * bh as u64);
                    area > barea || (area == barea && src.modified > b.modified)
                }
            };
            if better {
                best = Some((key, src));
            }
        }
        best.map(|(k, _)| k.clone()).or_else(|| {
            self.sources
                .iter()
                .find(|(_, s)| s.referenced)
                .map(|(k, _)| k.clone())
        })
    }
}

impl Session {
    pub fn texture_by_name(&self, name: &str) -> Option<TextureId> {
        self.texture_names.get(name).copied()
    }

    /// Returns the texture called `name`, creating it if needed.
    pub fn make_texture(&mut self, name: &str) -> TextureId {
        if let Some(id) = self.texture_names.get(name) {
            return *id;
        }
        let id = self.textures.insert(TextureRecord::new(name));
        self.texture_names.insert(name.to_string(), id);
        id
    }

    /// Reads headers of new or changed source files. Returns the number of
    /// sources whose size is known.
    pub fn refresh_sources(&mut self, tid: TextureId, raster: &dyn RasterIo) -> usize {
        let tex = &mut self.textures[tid];
        let mut known = 0;
        for src in tex.sources.values_mut() {
            if src.refresh(raster) {
                known += 1;
            }
        }
        for swap in tex.swaps.iter_mut() {
            swap.refresh(raster);
        }
        known
    }

    /// Retries textures whose size could not be determined so far, then
    /// re-sizes their placements. Returns how many became known.
    pub fn update_unknown_textures(&mut self, raster: &dyn RasterIo) -> usize {
        let unknown: Vec<TextureId> = self
            .textures
            .iter()
            .filter(|(_, t)| t.size.is_none())
            .map(|(id, _)| id)
            .collect();
        let mut resolved = 0;
        for tid in unknown {
            if self.refresh_sources(tid, raster) == 0 {
                continue;
            }
            self.post_txa(tid);
            if self.textures[tid].size.is_some() {
                resolved += 1;
                let placements: Vec<PlacementId> = self.textures[tid].placements.values().copied().collect();
                for pid in placements {
                    self.determine_size(pid);
                }
            }
        }
        resolved
    }

    /// Applies the texture directives on top of what the preferred source
    /// says. Changed properties send every placement back for packing.
    pub fn post_txa(&mut self, tid: TextureId) {
        let name = self.textures[tid].name.clone();
        let directive = self.directives.texture(&name).cloned();
        let default_margin = self.config.margin;
        let default_coverage = self.config.coverage_threshold;

        let mut explicit = GroupSet::new();
        let mut swaps: Vec<PathBuf> = Vec::new();
        if let Some(d) = &directive {
            for g in &d.groups {
                explicit.insert(self.make_group(g));
            }
            swaps = d.swaps.clone();
        }

        let tex = &mut self.textures[tid];
        tex.preferred_source = tex.choose_preferred_source();
        let source = tex.preferred().cloned();

        let old_properties = tex.properties;
        let old_wrap = (tex.wrap_u, tex.wrap_v);

        let mut properties = TextureProperties::default();
        let mut size = None;
        if let Some(src) = &source {
            size = src.size;
            properties.num_channels = src.num_channels;
        }

        let mut wrap = (WrapMode::Unspecified, WrapMode::Unspecified);
        tex.margin = default_margin;
        tex.coverage_threshold = default_coverage;
        tex.omit = false;
        if let Some(d) = &directive {
            if let Some(s) = d.size {
                size = Some(s);
            } else if let (Some(scale), Some((w, h))) = (d.scale, size) {
                let f = scale / 100.0;
                size = Some((
                    ((w as f64 * f) + 0.5).floor().max(1.0) as u32,
                    ((h as f64 * f) + 0.5).floor().max(1.0) as u32,
                ));
            }
            if let Some(c) = d.channels {
                properties.num_channels = Some(c);
            }
            if let Some(f) = d.format {
                properties.format = f;
            }
            if let Some(f) = d.minfilter {
                properties.minfilter = f;
            }
            if let Some(f) = d.magfilter {
                properties.magfilter = f;
            }
            if let Some(m) = d.margin {
                tex.margin = m;
            }
            if let Some(c) = d.coverage_threshold {
                tex.coverage_threshold = c;
            }
            tex.omit = d.omit;
            wrap = (d.wrap_u.unwrap_or_default(), d.wrap_v.unwrap_or_default());
        }
        properties.fully_define();

        tex.size = size;
        tex.properties = properties;
        tex.wrap_u = wrap.0;
        tex.wrap_v = wrap.1;
        tex.explicit_groups = explicit;

        let current_swaps: Vec<PathBuf> = tex.swaps.iter().map(|s| s.path.clone()).collect();
        if current_swaps != swaps {
            tex.swaps = swaps.into_iter().map(|p| SourceImage::new(p, None)).collect();
        }

        let placements: Vec<PlacementId> = tex.placements.values().copied().collect();
        if properties != old_properties {
            let asset_visible = !properties.asset_properties_match(&old_properties);
            debug!(texture = %name, "texture properties changed");
            for &pid in &placements {
                self.force_replace(pid);
                if asset_visible {
                    self.mark_assets_stale(pid);
                }
            }
        }
        if wrap != old_wrap {
            for &pid in &placements {
                self.mark_assets_stale(pid);
                self.placements[pid].is_filled = false;
            }
        }
    }

    /// Chooses the smallest set of groups that satisfies every asset
    /// referencing the texture, then reconciles the texture's placements
    /// with it.
    pub fn assign_groups(&mut self, tid: TextureId) {
        let tex = &self.textures[tid];
        let asset_groups: Vec<GroupSet> = tex
            .referencing_assets
            .iter()
            .filter_map(|&aid| self.assets.get(aid))
            .map(|a| self.complete_group_set(&a.groups))
            .collect();

        let mut definitely_in = GroupSet::new();
        let mut needed: Vec<&GroupSet> = Vec::new();
        if tex.explicit_groups.is_empty() {
            needed.extend(asset_groups.iter());
        } else {
            for groups in &asset_groups {
                match groups.intersection(&tex.explicit_groups).next() {
                    Some(&g) => {
                        definitely_in.insert(g);
                    }
                    None => needed.push(groups),
                }
            }
        }

        while !needed.is_empty() {
            let mut total: GroupSet = needed.iter().flat_map(|s| s.iter().copied()).collect();
            total.retain(|&g| !self.groups[g].is_null());
            let mut candidates = total.into_iter();
            let Some(first) = candidates.next() else {
                break;
            };

            let covered = |g: GroupId| needed.iter().filter(|s| s.contains(&g)).count();
            let mut best = first;
            let mut best_count = covered(first);
            for g in candidates {
                let count = covered(g);
                if count > best_count
                    || (count == best_count && self.is_preferred_over(g, best, &asset_groups))
                {
                    best = g;
                    best_count = count;
                }
            }

            definitely_in.insert(best);
            needed.retain(|s| !s.contains(&best));
        }

        self.assign_to_groups(tid, definitely_in);
    }

    /// Brings the texture's placements in line with `groups`: kept groups
    /// keep their placement, new groups get one, dropped groups lose theirs.
    pub fn assign_to_groups(&mut self, tid: TextureId, groups: GroupSet) {
        let current = self.textures[tid].actual_groups.clone();
        for &g in current.difference(&groups) {
            if let Some(pid) = self.textures[tid].placements.get(&g).copied() {
                self.unplace(pid);
            }
        }
        for &g in groups.difference(&current) {
            self.prepare(g, tid);
        }
    }

    /// True if any placement of `tid` is packed on an image.
    pub fn is_texture_placed(&self, tid: TextureId) -> bool {
        self.textures[tid]
            .placements
            .values()
            .any(|&pid| self.placements[pid].omit_reason == OmitReason::None)
    }
}
