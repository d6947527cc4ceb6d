use crate::model::{OmitReason, PlacementId};
use crate::session::Session;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Statistics about the current palette layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PaletteStats {
    /// Number of palette images, empty ones included.
    pub num_images: usize,
    pub num_textures: usize,
    pub num_placements: usize,
    /// Placements per omit reason; reasons with no placements are left out.
    pub by_reason: BTreeMap<OmitReason, usize>,
    /// Total area of all palette images.
    pub total_image_area: u64,
    /// Area of all placed rectangles, margins included.
    pub used_area: u64,
    /// used_area / total_image_area (0.0 to 1.0).
    pub utilization: f64,
    /// Mean share of image area spent beyond the source textures' own size
    /// (repeats and margins), over non-empty images.
    pub avg_coverage: f64,
    pub num_stale_assets: usize,
}

impl PaletteStats {
    pub fn count(&self, reason: OmitReason) -> usize {
        self.by_reason.get(&reason).copied().unwrap_or(0)
    }

    /// Returns a human-readable summary of the statistics.
    pub fn summary(&self) -> String {
        let mut omitted = String::new();
        for (reason, n) in &self.by_reason {
            if *reason != OmitReason::None {
                let _ = write!(omitted, ", {reason}: {n}");
            }
        }
        format!(
            "Images: {}, Textures: {}, Placed: {}/{}{}, Utilization: {:.2}%, Coverage: {:.2}, Stale assets: {}",
            self.num_images,
            self.num_textures,
            self.count(OmitReason::None),
            self.num_placements,
            omitted,
            self.utilization * 100.0,
            self.avg_coverage,
            self.num_stale_assets,
        )
    }
}

impl Session {
    /// Computes layout statistics over the whole session.
    pub fn stats(&self) -> PaletteStats {
        let mut by_reason = BTreeMap::new();
        for (_, p) in self.placements.iter() {
            *by_reason.entry(p.omit_reason).or_insert(0) += 1;
        }

        let mut total_image_area = 0u64;
        let mut used_area = 0u64;
        let mut coverage_sum = 0.0;
        let mut coverage_images = 0usize;
        for (iid, img) in self.images.iter() {
            total_image_area += img.area();
            used_area += self.placements_area(&img.placements);
            if !img.placements.is_empty() {
                coverage_sum += self.count_coverage(iid);
                coverage_images += 1;
            }
        }

        PaletteStats {
            num_images: self.images.len(),
            num_textures: self.textures.len(),
            num_placements: self.placements.len(),
            by_reason,
            total_image_area,
            used_area,
            utilization: if total_image_area > 0 {
                used_area as f64 / total_image_area as f64
            } else {
                0.0
            },
            avg_coverage: if coverage_images > 0 {
                coverage_sum / coverage_images as f64
            } else {
                0.0
            },
            num_stale_assets: self.assets.iter().filter(|(_, a)| a.stale).count(),
        }
    }

    fn placements_area(&self, pids: &[PlacementId]) -> u64 {
        pids.iter()
            .filter_map(|&pid| self.placements[pid].placed_rect())
            .map(|r| r.area())
            .sum()
    }

    /// Renders every group, page and image with their placements, followed by
    /// the placements that are not on any image.
    pub fn placement_listing(&self) -> String {
        let mut out = String::new();
        let mut groups: Vec<_> = self.groups.iter().collect();
        groups.sort_by(|a, b| {
            a.1.dirname_order
                .cmp(&b.1.dirname_order)
                .then_with(|| a.1.name.cmp(&b.1.name))
        });

        for (_, group) in groups {
            if group.placements.is_empty() {
                continue;
            }
            let _ = writeln!(
                out,
                "group {} (dir {}, level {}, order {})",
                group.name, group.dirname, group.dependency_level, group.dependency_order
            );
            for (props, page_id) in group.pages() {
                let page = &self.pages[page_id];
                let _ = writeln!(out, "  page {}", props.page_name());
                for &iid in &page.images {
                    let img = &self.images[iid];
                    let _ = writeln!(
                        out,
                        "    image {} {}x{} ({:.1}% used)",
                        img.basename,
                        img.width,
                        img.height,
                        self.count_utilization(iid) * 100.0
                    );
                    let mut pids = img.placements.clone();
                    pids.sort_by_key(|&pid| {
                        let r = self.placements[pid].placed_rect();
                        r.map(|r| (r.y, r.x))
                    });
                    for pid in pids {
                        let p = &self.placements[pid];
                        if let Some(r) = p.placed_rect() {
                            let _ = writeln!(
                                out,
                                "      {} at {},{} size {}x{}{}",
                                self.textures[p.texture].name,
                                r.x,
                                r.y,
                                r.w,
                                r.h,
                                if p.omit_reason == OmitReason::Solitary { " (solitary)" } else { "" }
                            );
                        }
                    }
                }
            }
            let mut unplaced: Vec<_> = group
                .placements()
                .map(|pid| &self.placements[pid])
                .filter(|p| !p.is_placed())
                .map(|p| (self.textures[p.texture].name.as_str(), p.omit_reason))
                .collect();
            unplaced.sort();
            for (name, reason) in unplaced {
                let _ = writeln!(out, "  omitted {name}: {reason}");
            }
        }
        out
    }
}
