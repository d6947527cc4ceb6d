use crate::compositing::{blank_canvas, clear_region, fill_placement, flag_error};
use crate::error::Result;
use crate::model::{ImageId, PlacementId};
use crate::raster::RasterIo;
use crate::session::Session;
use crate::texture::SourceImage;
use image::RgbaImage;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

/// What `update_image` did with one palette image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageUpdate {
    /// Nothing to write; any stale file was deleted.
    Removed,
    UpToDate,
    Written,
}

/// Totals of one `generate_images` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateSummary {
    pub written: usize,
    pub up_to_date: usize,
    pub removed: usize,
}

impl Session {
    /// Writes every palette image that changed since the last run, plus its
    /// swap variants, and deletes files of images that are gone or empty.
    #[instrument(skip_all)]
    pub fn generate_images(
        &mut self,
        raster: &mut dyn RasterIo,
        out_dir: &Path,
        redo_all: bool,
        mut on_image: impl FnMut(&str),
    ) -> Result<GenerateSummary> {
        let mut summary = GenerateSummary::default();
        for iid in self.images.ids() {
            self.setup_filename(iid);
        }
        for path in std::mem::take(&mut self.retired_images) {
            raster.remove(&out_dir.join(path))?;
        }
        for iid in self.images.ids() {
            on_image(&self.images[iid].basename);
            match self.update_image(iid, raster, out_dir, redo_all)? {
                ImageUpdate::Written => summary.written += 1,
                ImageUpdate::UpToDate => summary.up_to_date += 1,
                ImageUpdate::Removed => summary.removed += 1,
            }
        }
        info!(
            written = summary.written,
            up_to_date = summary.up_to_date,
            removed = summary.removed,
            "palette images generated"
        );
        Ok(summary)
    }

    /// Brings one palette image on disk up to date.
    pub fn update_image(
        &mut self,
        iid: ImageId,
        raster: &mut dyn RasterIo,
        out_dir: &Path,
        redo_all: bool,
    ) -> Result<ImageUpdate> {
        self.setup_filename(iid);
        let Some(rel) = self.images[iid].filename.clone() else {
            return Ok(ImageUpdate::Removed);
        };
        let path = out_dir.join(&rel);

        if self.image_is_empty(iid) {
            self.remove_image_files(iid, raster, out_dir)?;
            return Ok(ImageUpdate::Removed);
        }
        if redo_all {
            self.images[iid].is_new = true;
        }

        let palette_time = raster.modified(&path);
        let img = &self.images[iid];
        let mut needs_update = img.is_new || palette_time.is_none() || !img.cleared_regions.is_empty();
        let placements = img.placements.clone();
        for &pid in &placements {
            let p = &self.placements[pid];
            if !p.is_filled {
                needs_update = true;
                continue;
            }
            let tex = &self.textures[p.texture];
            let newer = |s: &SourceImage| s.modified.is_some() && s.modified > palette_time;
            if tex.preferred().is_some_and(newer) || tex.swaps.iter().any(newer) {
                self.placements[pid].is_filled = false;
                needs_update = true;
            }
        }
        if !needs_update {
            return Ok(ImageUpdate::UpToDate);
        }

        let (width, height) = (self.images[iid].width, self.images[iid].height);
        let background = self.config.background_color;
        let existing = if self.images[iid].is_new || palette_time.is_none() {
            None
        } else {
            match raster.read(&path, None) {
                Ok(c) if c.dimensions() == (width, height) => Some(c),
                Ok(_) => None,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot reread palette image; regenerating");
                    None
                }
            }
        };
        let mut canvas = match existing {
            Some(mut c) => {
                for r in &self.images[iid].cleared_regions {
                    clear_region(&mut c, r, background);
                }
                c
            }
            None => {
                debug!(image = %rel.display(), "generating new palette image");
                for &pid in &placements {
                    self.placements[pid].is_filled = false;
                }
                blank_canvas(width, height, background)
            }
        };
        self.images[iid].cleared_regions.clear();

        let swap_count = placements
            .iter()
            .map(|&pid| self.textures[self.placements[pid].texture].swaps.len())
            .max()
            .unwrap_or(0);
        let mut swap_canvases: Vec<RgbaImage> = (0..swap_count)
            .map(|_| blank_canvas(width, height, background))
            .collect();

        for &pid in &placements {
            if !self.placements[pid].is_filled {
                self.fill_from_source(&mut canvas, pid, None, raster);
                self.placements[pid].is_filled = true;
            }
            for (k, swap_canvas) in swap_canvases.iter_mut().enumerate() {
                self.fill_from_source(swap_canvas, pid, Some(k), raster);
            }
        }

        let channels = self.images[iid].properties.channels();
        let image_type = self.config.image_type;
        raster.write(&path, &canvas, channels, image_type)?;
        let old_swaps = self.images[iid].swap_count;
        for (k, swap_canvas) in swap_canvases.iter().enumerate() {
            if let Some(swap_path) = self.images[iid].swap_filename(k + 1) {
                raster.write(&out_dir.join(swap_path), swap_canvas, channels, image_type)?;
            }
        }
        for k in swap_count..old_swaps {
            if let Some(swap_path) = self.images[iid].swap_filename(k + 1) {
                raster.remove(&out_dir.join(swap_path))?;
            }
        }

        let img = &mut self.images[iid];
        img.swap_count = swap_count;
        img.is_new = false;
        info!(image = %rel.display(), placements = placements.len(), swaps = swap_count, "wrote palette image");
        Ok(ImageUpdate::Written)
    }

    /// Paints one placement from its primary source, or from swap `swap`
    /// when the texture has that many swaps (falling back to the primary).
    fn fill_from_source(
        &self,
        canvas: &mut RgbaImage,
        pid: PlacementId,
        swap: Option<usize>,
        raster: &dyn RasterIo,
    ) {
        let p = &self.placements[pid];
        let Some(placed) = p.placed else {
            return;
        };
        let tex = &self.textures[p.texture];
        let source = swap
            .and_then(|k| tex.swaps.get(k))
            .or_else(|| tex.preferred());
        let pixels = source.map(|s| raster.read(&s.path, s.alpha_path.as_deref()));
        match pixels {
            Some(Ok(src)) => fill_placement(canvas, &src, &placed),
            Some(Err(e)) => {
                warn!(texture = %tex.name, error = %e, "cannot read source image");
                flag_error(canvas, &placed.rect());
            }
            None => {
                warn!(texture = %tex.name, "texture has no readable source");
                flag_error(canvas, &placed.rect());
            }
        }
    }

    fn remove_image_files(&mut self, iid: ImageId, raster: &mut dyn RasterIo, out_dir: &Path) -> Result<()> {
        let img = &self.images[iid];
        if let Some(rel) = &img.filename {
            raster.remove(&out_dir.join(rel))?;
        }
        for k in 0..img.swap_count {
            if let Some(swap_path) = img.swap_filename(k + 1) {
                raster.remove(&out_dir.join(swap_path))?;
            }
        }
        let img = &mut self.images[iid];
        img.swap_count = 0;
        img.is_new = true;
        Ok(())
    }
}
