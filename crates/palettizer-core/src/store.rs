use crate::arena::Arena;
use crate::asset::AssetFile;
use crate::config::{PackingParams, PaletteConfig};
use crate::directives::DirectiveSet;
use crate::error::{PalettizerError, Result};
use crate::group::Group;
use crate::model::{AssetId, GroupId, ImageId, PageId, PlacementId, TextureId};
use crate::page::Page;
use crate::palette_image::PaletteImage;
use crate::placement::Placement;
use crate::session::Session;
use crate::texture::TextureRecord;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Version written by this build.
pub const STORE_VERSION: u32 = 1;
/// Oldest version this build can read.
pub const MIN_STORE_VERSION: u32 = 1;

#[derive(Serialize)]
struct StoreOut<'a> {
    version: u32,
    packing: &'a PackingParams,
    groups: &'a Arena<GroupId, Group>,
    textures: &'a Arena<TextureId, TextureRecord>,
    placements: &'a Arena<PlacementId, Placement>,
    pages: &'a Arena<PageId, Page>,
    images: &'a Arena<ImageId, PaletteImage>,
    assets: &'a Arena<AssetId, AssetFile>,
}

#[derive(Deserialize)]
struct StoreIn {
    version: u32,
    packing: PackingParams,
    groups: Arena<GroupId, Group>,
    textures: Arena<TextureId, TextureRecord>,
    placements: Arena<PlacementId, Placement>,
    pages: Arena<PageId, Page>,
    images: Arena<ImageId, PaletteImage>,
    assets: Arena<AssetId, AssetFile>,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

/// How `load_or_new` obtained its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    /// No store file yet.
    Fresh,
    /// The store could not be used; a fresh session was started instead.
    Discarded(String),
}

/// Writes the session graph to `path` through a temporary file and an
/// atomic rename.
pub fn save(session: &Session, path: &Path) -> Result<()> {
    let out = StoreOut {
        version: STORE_VERSION,
        packing: &session.packing,
        groups: &session.groups,
        textures: &session.textures,
        placements: &session.placements,
        pages: &session.pages,
        images: &session.images,
        assets: &session.assets,
    };
    let bytes = serde_json::to_vec(&out)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = temp_path(path);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    info!(path = %path.display(), "session saved");
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Reads a stored session and attaches `config` to it.
///
/// Loading is two-phase: every record is decoded first, then all cross
/// references are resolved and checked and the derived indices rebuilt. Any
/// version outside the supported range refuses the whole load.
pub fn load(path: &Path, config: PaletteConfig) -> Result<Session> {
    let text = fs::read_to_string(path)?;
    let probe: VersionProbe = serde_json::from_str(&text)?;
    if !(MIN_STORE_VERSION..=STORE_VERSION).contains(&probe.version) {
        return Err(PalettizerError::StoreVersion {
            found: probe.version,
            min: MIN_STORE_VERSION,
            max: STORE_VERSION,
        });
    }
    let stored: StoreIn = serde_json::from_str(&text)?;
    debug_assert_eq!(stored.version, probe.version);

    config.validate()?;
    let directives = DirectiveSet::compile(&config)?;
    let mut session = Session {
        config: config.clone(),
        directives,
        packing: stored.packing,
        groups: stored.groups,
        textures: stored.textures,
        placements: stored.placements,
        pages: stored.pages,
        images: stored.images,
        assets: stored.assets,
        group_names: BTreeMap::new(),
        texture_names: BTreeMap::new(),
        asset_names: BTreeMap::new(),
        retired_images: Vec::new(),
    };
    session.resolve()?;
    session.apply_config(config)?;
    info!(
        path = %path.display(),
        textures = session.textures.len(),
        images = session.images.len(),
        assets = session.assets.len(),
        "session loaded"
    );
    Ok(session)
}

/// `load`, falling back to a fresh session when the file is missing or
/// unusable.
pub fn load_or_new(path: &Path, config: PaletteConfig) -> Result<(Session, LoadOutcome)> {
    if !path.exists() {
        return Ok((Session::new(config)?, LoadOutcome::Fresh));
    }
    match load(path, config.clone()) {
        Ok(s) => Ok((s, LoadOutcome::Loaded)),
        Err(e @ (PalettizerError::StoreVersion { .. }
        | PalettizerError::CorruptStore(_)
        | PalettizerError::Json(_))) => {
            warn!(path = %path.display(), error = %e, "discarding session store");
            Ok((Session::new(config)?, LoadOutcome::Discarded(e.to_string())))
        }
        Err(e) => Err(e),
    }
}

fn corrupt(what: String) -> PalettizerError {
    PalettizerError::CorruptStore(what)
}

/// Old id to new id, as returned by [`Arena::compact`].
struct IdMap<I>(Vec<Option<I>>);

impl<I> IdMap<I>
where
    I: Copy + Ord + Into<usize> + fmt::Display,
{
    fn get(&self, old: I) -> Result<I> {
        self.0
            .get(old.into())
            .copied()
            .flatten()
            .ok_or_else(|| corrupt(format!("dangling {old}")))
    }

    fn set(&self, old: &BTreeSet<I>) -> Result<BTreeSet<I>> {
        old.iter().map(|&id| self.get(id)).collect()
    }

    fn list(&self, old: &[I]) -> Result<Vec<I>> {
        old.iter().map(|&id| self.get(id)).collect()
    }
}

impl Session {
    /// Second load phase: checks every id stored in a record and rebuilds
    /// the indices that are not persisted.
    fn resolve(&mut self) -> Result<()> {
        for (gid, g) in self.groups.iter() {
            if let Some(d) = g.depends_on.iter().find(|d| !self.groups.contains(**d)) {
                return Err(corrupt(format!("{gid} depends on missing {d}")));
            }
            if self.group_names.insert(g.name.clone(), gid).is_some() {
                return Err(corrupt(format!("duplicate group name '{}'", g.name)));
            }
        }
        for (tid, t) in self.textures.iter() {
            if let Some(g) = t.explicit_groups.iter().find(|g| !self.groups.contains(**g)) {
                return Err(corrupt(format!("{tid} names missing {g}")));
            }
            if let Some(key) = &t.preferred_source {
                if !t.sources.contains_key(key) {
                    return Err(corrupt(format!("{tid} prefers unknown source '{key}'")));
                }
            }
            if self.texture_names.insert(t.name.clone(), tid).is_some() {
                return Err(corrupt(format!("duplicate texture name '{}'", t.name)));
            }
        }
        for (pid, p) in self.placements.iter() {
            if !self.textures.contains(p.texture) || !self.groups.contains(p.group) {
                return Err(corrupt(format!("{pid} has a dangling texture or group")));
            }
            if p.placed.is_some() != p.image.is_some() {
                return Err(corrupt(format!("{pid} has a rectangle without an image")));
            }
            match p.image.map(|iid| self.images.get(iid)) {
                Some(None) => return Err(corrupt(format!("{pid} is on a missing image"))),
                Some(Some(img)) if !img.placements.contains(&pid) => {
                    return Err(corrupt(format!("{pid} is not listed by its image")));
                }
                _ => {}
            }
        }
        for (page_id, page) in self.pages.iter() {
            if !self.groups.contains(page.group) {
                return Err(corrupt(format!("{page_id} belongs to a missing group")));
            }
            for &iid in &page.images {
                if self.images.get(iid).is_none_or(|img| img.page != page_id) {
                    return Err(corrupt(format!("{page_id} lists foreign image {iid}")));
                }
            }
        }
        for (iid, img) in self.images.iter() {
            if !self.pages.contains(img.page) || !self.groups.contains(img.group) {
                return Err(corrupt(format!("{iid} has a dangling page or group")));
            }
            for &pid in &img.placements {
                if self.placements.get(pid).is_none_or(|p| p.image != Some(iid)) {
                    return Err(corrupt(format!("{iid} lists foreign placement {pid}")));
                }
            }
        }
        for (aid, a) in self.assets.iter() {
            if let Some(g) = a.groups.iter().find(|g| !self.groups.contains(**g)) {
                return Err(corrupt(format!("{aid} is deployed to missing {g}")));
            }
            for r in &a.references {
                if !self.textures.contains(r.texture) {
                    return Err(corrupt(format!("{aid} references missing {}", r.texture)));
                }
                if let Some(pid) = r.placement {
                    if self.placements.get(pid).is_none_or(|p| p.texture != r.texture) {
                        return Err(corrupt(format!("{aid} links foreign placement {pid}")));
                    }
                }
            }
            if self.asset_names.insert(a.name.clone(), aid).is_some() {
                return Err(corrupt(format!("duplicate asset name '{}'", a.name)));
            }
        }

        self.compact_ids()?;
        self.rebuild_indices()
    }

    /// Renumbers every arena densely so holes left by removed objects are
    /// not carried from run to run, rewriting each stored id.
    fn compact_ids(&mut self) -> Result<()> {
        let groups = IdMap(self.groups.compact());
        let textures = IdMap(self.textures.compact());
        let placements = IdMap(self.placements.compact());
        let pages = IdMap(self.pages.compact());
        let images = IdMap(self.images.compact());
        self.assets.compact();

        for (_, g) in self.groups.iter_mut() {
            g.depends_on = groups.set(&g.depends_on)?;
        }
        for (_, t) in self.textures.iter_mut() {
            t.explicit_groups = groups.set(&t.explicit_groups)?;
        }
        for (_, p) in self.placements.iter_mut() {
            p.texture = textures.get(p.texture)?;
            p.group = groups.get(p.group)?;
            p.image = p.image.map(|iid| images.get(iid)).transpose()?;
        }
        for (_, page) in self.pages.iter_mut() {
            page.group = groups.get(page.group)?;
            page.images = images.list(&page.images)?;
        }
        for (_, img) in self.images.iter_mut() {
            img.group = groups.get(img.group)?;
            img.page = pages.get(img.page)?;
            img.placements = placements.list(&img.placements)?;
        }
        for (_, a) in self.assets.iter_mut() {
            a.groups = groups.set(&a.groups)?;
            for r in a.references.iter_mut() {
                r.texture = textures.get(r.texture)?;
                r.placement = r.placement.map(|pid| placements.get(pid)).transpose()?;
            }
        }

        self.group_names = self.groups.iter().map(|(id, g)| (g.name.clone(), id)).collect();
        self.texture_names = self.textures.iter().map(|(id, t)| (t.name.clone(), id)).collect();
        self.asset_names = self.assets.iter().map(|(id, a)| (a.name.clone(), id)).collect();
        Ok(())
    }

    fn rebuild_indices(&mut self) -> Result<()> {
        let edges: Vec<(GroupId, GroupId)> = self
            .groups
            .iter()
            .flat_map(|(g, grp)| grp.depends_on.iter().map(move |&d| (g, d)))
            .collect();
        for (g, d) in edges {
            self.groups[d].dependents.insert(g);
        }

        for (pid, p) in self.placements.iter() {
            self.groups[p.group].placements.insert(pid);
            let tex = &mut self.textures[p.texture];
            if tex.placements.insert(p.group, pid).is_some() {
                return Err(corrupt(format!(
                    "texture '{}' has two placements in one group",
                    tex.name
                )));
            }
            tex.actual_groups.insert(p.group);
        }

        for (page_id, page) in self.pages.iter() {
            if self.groups[page.group]
                .pages
                .insert(page.properties, page_id)
                .is_some()
            {
                return Err(corrupt(format!("two pages with the same properties in {}", page.group)));
            }
        }

        for (aid, a) in self.assets.iter() {
            for pid in a.references.iter().filter_map(|r| r.placement) {
                self.placements[pid].references.insert(aid);
            }
        }
        self.rebuild_texture_links();
        Ok(())
    }
}
