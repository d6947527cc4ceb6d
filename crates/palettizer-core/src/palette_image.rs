use crate::model::{GroupId, ImageId, OmitReason, PageId, PlacementId, Rect, TextureProperties};
use crate::placement::Placement;
use crate::session::Session;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::PathBuf;
use tracing::{debug, info};

/// A single composite raster holding the packed textures of one page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaletteImage {
    pub group: GroupId,
    pub page: PageId,
    pub properties: TextureProperties,
    /// Position within the page, used for the `%i` naming token.
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub placements: Vec<PlacementId>,
    /// Rectangles vacated since the image was last written.
    pub cleared_regions: Vec<Rect>,
    /// The image must be generated from scratch on the next update.
    pub is_new: bool,
    #[serde(default)]
    pub basename: String,
    /// Output path relative to the output directory.
    #[serde(default)]
    pub filename: Option<PathBuf>,
    /// Number of swap variants generated alongside the image.
    #[serde(default)]
    pub swap_count: usize,
}

impl PaletteImage {
    pub fn new(group: GroupId, page: PageId, properties: TextureProperties, index: u32, width: u32, height: u32) -> Self {
        Self {
            group,
            page,
            properties,
            index,
            width,
            height,
            placements: Vec::new(),
            cleared_regions: Vec::new(),
            is_new: true,
            basename: String::new(),
            filename: None,
            swap_count: 0,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Path of swap variant `n` (1-based), next to the primary image.
    pub fn swap_filename(&self, n: usize) -> Option<PathBuf> {
        let primary = self.filename.as_ref()?;
        let ext = primary.extension()?.to_string_lossy().into_owned();
        let stem = primary.file_stem()?.to_string_lossy().into_owned();
        Some(primary.with_file_name(format!("{stem}_swp_{n}.{ext}")))
    }
}

/// Finds the top-left corner of a free `w` x `h` spot in a `width` x `height`
/// image, given the rectangles already taken.
///
/// Rows are scanned top to bottom and each row left to right. On a collision
/// the scan jumps past the blocking rectangle; the next row starts at the
/// nearest bottom edge met in the current one.
pub fn find_hole(width: u32, height: u32, occupied: &[Rect], w: u32, h: u32) -> Option<(u32, u32)> {
    if w == 0 || h == 0 {
        return None;
    }
    let mut y = 0u32;
    while y + h <= height {
        let mut next_y = height;
        let mut x = 0u32;
        while x + w <= width {
            let candidate = Rect::new(x, y, w, h);
            match find_overlap(occupied, &candidate) {
                None => return Some((x, y)),
                Some(r) => {
                    next_y = next_y.min(r.bottom());
                    x = r.right();
                }
            }
        }
        if next_y <= y {
            return None;
        }
        y = next_y;
    }
    None
}

/// First occupied rectangle sharing a pixel with `candidate`.
pub fn find_overlap<'a>(occupied: &'a [Rect], candidate: &Rect) -> Option<&'a Rect> {
    occupied.iter().find(|r| r.intersects(candidate))
}

/// Biggest first: area, then height, then texture name.
pub(crate) fn compare_by_size(a: &(PlacementId, u32, u32, String), b: &(PlacementId, u32, u32, String)) -> Ordering {
    let area = |e: &(PlacementId, u32, u32, String)| e.1 as u64 * e.2 as u64;
    area(b)
        .cmp(&area(a))
        .then(b.2.cmp(&a.2))
        .then_with(|| a.3.cmp(&b.3))
}

impl Session {
    fn occupied_rects(&self, iid: ImageId) -> Vec<Rect> {
        self.images[iid]
            .placements
            .iter()
            .filter_map(|&pid| self.placements.get(pid).and_then(Placement::placed_rect))
            .collect()
    }

    /// Sorts placements biggest first, ties broken by texture name.
    pub(crate) fn sort_by_size(&self, pids: &mut Vec<PlacementId>) {
        let mut keyed: Vec<(PlacementId, u32, u32, String)> = pids
            .iter()
            .map(|&pid| {
                let p = &self.placements[pid];
                let (w, h) = p.size();
                (pid, w, h, self.textures[p.texture].name.clone())
            })
            .collect();
        keyed.sort_by(compare_by_size);
        *pids = keyed.into_iter().map(|e| e.0).collect();
    }

    /// Packs `pid` into `iid` if there is room. Returns whether it fit.
    pub fn place_in_image(&mut self, iid: ImageId, pid: PlacementId) -> bool {
        let p = &self.placements[pid];
        if !p.size_known || p.is_placed() {
            return false;
        }
        let (w, h) = p.size();
        let occupied = self.occupied_rects(iid);
        let img = &self.images[iid];
        match find_hole(img.width, img.height, &occupied, w, h) {
            Some((x, y)) => {
                self.place_at(pid, iid, x, y);
                self.images[iid].placements.push(pid);
                true
            }
            None => false,
        }
    }

    /// Tries to repack every placement of `iid` into a `width` x `height`
    /// image. On failure the image and all of its placements are restored
    /// exactly as they were.
    pub fn resize_image(&mut self, iid: ImageId, width: u32, height: u32) -> bool {
        if width == 0 || height == 0 {
            return false;
        }
        let saved_image = self.images[iid].clone();
        let saved: Vec<(PlacementId, Placement)> = saved_image
            .placements
            .iter()
            .map(|&pid| (pid, self.placements[pid].clone()))
            .collect();

        let mut order: Vec<PlacementId> = saved.iter().map(|(pid, _)| *pid).collect();
        self.sort_by_size(&mut order);

        {
            let img = &mut self.images[iid];
            img.placements.clear();
            img.cleared_regions.clear();
            img.width = width;
            img.height = height;
        }
        for &pid in &order {
            let p = &mut self.placements[pid];
            p.image = None;
            p.placed = None;
            p.omit_reason = OmitReason::Working;
        }

        let packed = order.iter().all(|&pid| self.place_in_image(iid, pid));

        if !packed {
            self.images[iid] = saved_image;
            for (pid, p) in saved {
                self.placements[pid] = p;
            }
            return false;
        }

        self.images[iid].is_new = true;
        for (pid, old) in saved {
            if old.placed_rect() != self.placements[pid].placed_rect() {
                self.mark_assets_stale(pid);
            }
        }
        true
    }

    /// Halves the image width, then its height, for as long as either
    /// succeeds. Images holding zero or one placement are left alone.
    pub fn optimal_resize(&mut self, iid: ImageId) -> bool {
        if self.images[iid].placements.len() <= 1 {
            return false;
        }
        let mut resized_any = false;
        loop {
            let mut success = false;
            let (w, h) = (self.images[iid].width, self.images[iid].height);
            if w > 1 && self.resize_image(iid, w / 2, h) {
                success = true;
            }
            let (w, h) = (self.images[iid].width, self.images[iid].height);
            if h > 1 && self.resize_image(iid, w, h / 2) {
                success = true;
            }
            if !success {
                break;
            }
            resized_any = true;
        }
        if resized_any {
            let img = &self.images[iid];
            info!(image = %img.basename, width = img.width, height = img.height, "resized palette image");
        }
        resized_any
    }

    /// Flags a lone placement as solitary when configured to (or when it
    /// already was); otherwise clears any solitary flag.
    pub fn check_solitary(&mut self, iid: ImageId) {
        let placements = self.images[iid].placements.clone();
        if placements.len() == 1 {
            let pid = placements[0];
            if self.config.omit_solitary || self.placements[pid].omit_reason == OmitReason::Solitary {
                self.omit_solitary(pid);
            }
        } else {
            for pid in placements {
                self.not_solitary(pid);
            }
        }
    }

    /// Empty images have nothing to write: no placements, or a single solitary one.
    pub fn image_is_empty(&self, iid: ImageId) -> bool {
        let img = &self.images[iid];
        match img.placements.as_slice() {
            [] => true,
            [only] => self.placements[*only].omit_reason == OmitReason::Solitary,
            _ => false,
        }
    }

    /// Share of the image covered by placed footprints.
    pub fn count_utilization(&self, iid: ImageId) -> f64 {
        let img = &self.images[iid];
        let used: u64 = self.occupied_rects(iid).iter().map(Rect::area).sum();
        if img.area() == 0 {
            0.0
        } else {
            used as f64 / img.area() as f64
        }
    }

    /// Pixels spent on repeats or margins beyond the source textures' own
    /// size, as a share of the image.
    pub fn count_coverage(&self, iid: ImageId) -> f64 {
        let img = &self.images[iid];
        let mut extra: i64 = 0;
        for &pid in &img.placements {
            let p = &self.placements[pid];
            let Some(r) = p.placed_rect() else {
                continue;
            };
            let (tw, th) = self.textures[p.texture].size.unwrap_or((0, 0));
            extra += r.area() as i64 - (tw as i64 * th as i64);
        }
        if img.area() == 0 {
            0.0
        } else {
            extra as f64 / img.area() as f64
        }
    }

    /// Unpacks every placement and forgets the image contents.
    pub fn reset_image(&mut self, iid: ImageId) {
        let placements = self.images[iid].placements.clone();
        for pid in placements {
            self.force_replace(pid);
        }
        let img = &mut self.images[iid];
        img.placements.clear();
        img.cleared_regions.clear();
        img.is_new = true;
    }

    /// Recomputes the image's basename and output path from the configured
    /// patterns. A change marks every asset using the image stale.
    pub fn setup_filename(&mut self, iid: ImageId) -> bool {
        let img = &self.images[iid];
        let group = &self.groups[img.group];
        let basename = expand_image_pattern(
            &self.config.generated_image_pattern,
            &group.name,
            &img.properties.page_name(),
            img.index,
        );
        let dir = self.config.map_dirname.replace("%g", &group.dirname);
        let file = format!("{basename}.{}", self.config.image_type.extension());
        let filename = if dir.is_empty() {
            PathBuf::from(file)
        } else {
            PathBuf::from(dir).join(file)
        };

        let img = &self.images[iid];
        if img.basename == basename && img.filename.as_ref() == Some(&filename) {
            return false;
        }
        let renamed = img.filename.is_some();
        debug!(from = ?img.filename, to = ?filename, "palette image named");
        let img = &mut self.images[iid];
        img.basename = basename;
        let previous = img.filename.replace(filename);
        if renamed {
            img.is_new = true;
            self.retired_images.extend(previous);
            for pid in img.placements.clone() {
                self.mark_assets_stale(pid);
            }
        }
        true
    }
}

/// Expands `%g`, `%p`, `%i` (1-based) and `%%` in an image name pattern.
/// Unknown escapes are kept verbatim.
pub fn expand_image_pattern(pattern: &str, group: &str, page: &str, index: u32) -> String {
    let mut out = String::with_capacity(pattern.len() + group.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('g') => out.push_str(group),
            Some('p') => out.push_str(page),
            Some('i') => out.push_str(&(index + 1).to_string()),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}
