use crate::arena::Arena;
use crate::asset::{AssetFile, AssetScanner};
use crate::config::{PackingParams, PaletteConfig};
use crate::directives::DirectiveSet;
use crate::error::Result;
use crate::generate::GenerateSummary;
use crate::group::Group;
use crate::model::{
    AssetId, GroupId, ImageId, OmitReason, PageId, PlacementId, TextureId,
};
use crate::page::Page;
use crate::palette_image::PaletteImage;
use crate::placement::Placement;
use crate::raster::RasterIo;
use crate::texture::TextureRecord;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// The whole palettizing state: the object graph plus the configuration
/// every operation consults.
#[derive(Debug, Clone)]
pub struct Session {
    pub(crate) config: PaletteConfig,
    pub(crate) directives: DirectiveSet,
    /// Packing parameters the current layouts were built with.
    pub(crate) packing: PackingParams,

    pub(crate) groups: Arena<GroupId, Group>,
    pub(crate) textures: Arena<TextureId, TextureRecord>,
    pub(crate) placements: Arena<PlacementId, Placement>,
    pub(crate) pages: Arena<PageId, Page>,
    pub(crate) images: Arena<ImageId, PaletteImage>,
    pub(crate) assets: Arena<AssetId, AssetFile>,

    pub(crate) group_names: BTreeMap<String, GroupId>,
    pub(crate) texture_names: BTreeMap<String, TextureId>,
    pub(crate) asset_names: BTreeMap<String, AssetId>,

    /// Output files of images that were renamed or dropped, deleted on the
    /// next generation pass.
    pub(crate) retired_images: Vec<PathBuf>,
}

/// Knobs for one `process` pass.
#[derive(Debug, Clone, Copy)]
pub struct ProcessOptions {
    /// Shrink palette images after packing.
    pub optimal_resize: bool,
    /// Throw away every layout and repack from scratch.
    pub redo_all: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            optimal_resize: true,
            redo_all: false,
        }
    }
}

/// Counts after one `process` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    pub textures: usize,
    pub placements: usize,
    pub placed: usize,
    pub images: usize,
    pub resized_images: usize,
    pub resolved_unknown: usize,
}

/// Outcome of a full run: packing, stale rescans and image generation.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub process: ProcessSummary,
    pub generated: Option<GenerateSummary>,
    /// Assets whose remaps must be rewritten.
    pub stale_assets: Vec<String>,
    /// Assets dropped because they could no longer be scanned, with the reason.
    pub failed_assets: Vec<(String, String)>,
}

impl Session {
    /// Creates an empty session for `config`.
    pub fn new(config: PaletteConfig) -> Result<Self> {
        config.validate()?;
        let directives = DirectiveSet::compile(&config)?;
        let packing = config.packing_params();
        let mut session = Self {
            config,
            directives,
            packing,
            groups: Arena::new(),
            textures: Arena::new(),
            placements: Arena::new(),
            pages: Arena::new(),
            images: Arena::new(),
            assets: Arena::new(),
            group_names: BTreeMap::new(),
            texture_names: BTreeMap::new(),
            asset_names: BTreeMap::new(),
            retired_images: Vec::new(),
        };
        session.apply_group_directives()?;
        Ok(session)
    }

    /// Switches to a new configuration. Returns true if the packing
    /// parameters changed, in which case every image was reset.
    pub fn apply_config(&mut self, config: PaletteConfig) -> Result<bool> {
        config.validate()?;
        let directives = DirectiveSet::compile(&config)?;
        let previous = std::mem::replace(&mut self.config, config);
        if let Err(e) = self.apply_group_directives() {
            self.config = previous;
            self.apply_group_directives()?;
            return Err(e);
        }
        self.directives = directives;

        let params = self.config.packing_params();
        if params == self.packing {
            return Ok(false);
        }
        info!("packing parameters changed; resetting all palette images");
        self.reset_all();
        self.packing = params;
        Ok(true)
    }

    /// Rebuilds the dependency edges and group attributes from the
    /// configuration, then recomputes the ordering.
    fn apply_group_directives(&mut self) -> Result<()> {
        for (_, g) in self.groups.iter_mut() {
            g.depends_on.clear();
            g.dependents.clear();
        }
        let default_group = self.config.default_group.clone();
        self.make_group(&default_group);

        let directives = self.config.groups.clone();
        for d in &directives {
            let id = self.make_group(&d.name);
            let g = &mut self.groups[id];
            g.dirname = d.dirname.clone().unwrap_or_else(|| d.name.clone());
            g.margin_override = d.margin;
        }
        for d in &directives {
            let id = self.make_group(&d.name);
            for dep in &d.depends_on {
                let dep_id = self.make_group(dep);
                self.group_with(id, dep_id)?;
            }
        }
        self.update_group_ordering();
        Ok(())
    }

    /// Unpacks everything; the next `process` repacks from scratch.
    pub fn reset_all(&mut self) {
        for g in self.groups.ids() {
            self.reset_group(g);
        }
    }

    /// Runs the packing pipeline: source headers, texture directives, group
    /// cover, placement choice, sizing, packing and shrinking.
    #[instrument(skip_all)]
    pub fn process(&mut self, raster: &dyn RasterIo, opts: ProcessOptions) -> Result<ProcessSummary> {
        let mut summary = ProcessSummary::default();
        if opts.redo_all {
            self.reset_all();
        }

        self.rebuild_texture_links();
        summary.resolved_unknown = self.update_unknown_textures(raster);
        let textures = self.textures.ids();
        for &tid in &textures {
            self.refresh_sources(tid, raster);
            self.post_txa(tid);
        }
        for &tid in &textures {
            self.assign_groups(tid);
        }
        for aid in self.assets.ids() {
            self.choose_placements(aid);
        }
        for pid in self.placements.ids() {
            self.determine_size(pid);
        }
        for g in self.groups.ids() {
            self.group_place_all(g);
        }
        if opts.optimal_resize {
            for iid in self.images.ids() {
                if self.optimal_resize(iid) {
                    summary.resized_images += 1;
                }
            }
        }
        for iid in self.images.ids() {
            self.setup_filename(iid);
        }

        summary.textures = self.textures.len();
        summary.placements = self.placements.len();
        summary.placed = self
            .placements
            .iter()
            .filter(|(_, p)| p.omit_reason == OmitReason::None)
            .count();
        summary.images = self.images.len();
        info!(
            textures = summary.textures,
            placements = summary.placements,
            placed = summary.placed,
            images = summary.images,
            "packing pass complete"
        );
        Ok(summary)
    }

    /// `process`, then rescan stale assets (repacking if that changed
    /// anything) and, unless `out_dir` is `None`, write the palette images.
    #[instrument(skip_all)]
    pub fn run(
        &mut self,
        scanner: &mut dyn AssetScanner,
        raster: &mut dyn RasterIo,
        out_dir: Option<&Path>,
        opts: ProcessOptions,
        on_image: impl FnMut(&str),
    ) -> Result<RunReport> {
        let mut report = RunReport {
            process: self.process(raster, opts)?,
            ..Default::default()
        };
        report.failed_assets = self.read_stale_assets(scanner);
        if !report.failed_assets.is_empty() {
            debug!(failed = report.failed_assets.len(), "repacking after dropped assets");
            let again = ProcessOptions {
                redo_all: false,
                ..opts
            };
            report.process = self.process(raster, again)?;
        }
        if let Some(dir) = out_dir {
            report.generated = Some(self.generate_images(raster, dir, opts.redo_all, on_image)?);
        }
        report.stale_assets = self
            .assets
            .iter()
            .filter(|(_, a)| a.stale)
            .map(|(_, a)| a.name.clone())
            .collect();
        Ok(report)
    }

    pub fn config(&self) -> &PaletteConfig {
        &self.config
    }

    pub fn packing_params(&self) -> &PackingParams {
        &self.packing
    }

    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(id)
    }

    pub fn groups(&self) -> impl Iterator<Item = (GroupId, &Group)> + '_ {
        self.groups.iter()
    }

    pub fn texture(&self, id: TextureId) -> Option<&TextureRecord> {
        self.textures.get(id)
    }

    pub fn textures(&self) -> impl Iterator<Item = (TextureId, &TextureRecord)> + '_ {
        self.textures.iter()
    }

    pub fn placement(&self, id: PlacementId) -> Option<&Placement> {
        self.placements.get(id)
    }

    pub fn placements(&self) -> impl Iterator<Item = (PlacementId, &Placement)> + '_ {
        self.placements.iter()
    }

    pub fn page(&self, id: PageId) -> Option<&Page> {
        self.pages.get(id)
    }

    pub fn image(&self, id: ImageId) -> Option<&PaletteImage> {
        self.images.get(id)
    }

    pub fn images(&self) -> impl Iterator<Item = (ImageId, &PaletteImage)> + '_ {
        self.images.iter()
    }

    pub fn asset(&self, id: AssetId) -> Option<&AssetFile> {
        self.assets.get(id)
    }

    pub fn assets(&self) -> impl Iterator<Item = (AssetId, &AssetFile)> + '_ {
        self.assets.iter()
    }
}
