use crate::model::{
    AssetId, GroupId, ImageId, OmitReason, PlacementId, Rect, TextureId, TexturePosition,
    UvBounds, UvTransform, WrapMode,
};
use crate::session::Session;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::trace;

/// Textures smaller than this (per axis) are padded up to it.
const MIN_PLACED_SIZE: u32 = 4;

/// Share of the texture size above which the margin is added outside the
/// texture instead of eating into it.
const EXTERIOR_MARGIN_RATIO: f64 = 0.10;

/// One texture's assignment to one group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Placement {
    pub texture: TextureId,
    pub group: GroupId,
    pub image: Option<ImageId>,
    /// Requested size, margin, UV range and wrap, recomputed every pass.
    pub position: TexturePosition,
    /// Where the texture actually sits on `image`.
    pub placed: Option<TexturePosition>,
    pub omit_reason: OmitReason,
    pub size_known: bool,
    pub has_uvs: bool,
    pub is_filled: bool,

    /// Assets whose references resolved to this placement.
    #[serde(skip)]
    pub(crate) references: BTreeSet<AssetId>,
}

impl Placement {
    pub fn new(texture: TextureId, group: GroupId) -> Self {
        Self {
            texture,
            group,
            image: None,
            position: TexturePosition::default(),
            placed: None,
            omit_reason: OmitReason::Working,
            size_known: false,
            has_uvs: false,
            is_filled: false,
            references: BTreeSet::new(),
        }
    }

    pub fn is_placed(&self) -> bool {
        self.image.is_some()
    }

    /// Requested footprint, margin included.
    pub fn size(&self) -> (u32, u32) {
        (self.position.x_size, self.position.y_size)
    }

    pub fn placed_rect(&self) -> Option<Rect> {
        self.placed.as_ref().map(TexturePosition::rect)
    }

    pub fn uv_area(&self) -> f64 {
        if self.has_uvs {
            self.position.uv.area()
        } else {
            0.0
        }
    }

    pub fn references(&self) -> impl Iterator<Item = AssetId> + '_ {
        self.references.iter().copied()
    }

    /// True if the placed footprint overlaps `rect`.
    pub fn intersects(&self, rect: &Rect) -> bool {
        self.placed_rect().is_some_and(|r| r.intersects(rect))
    }
}

/// Map from a texture's UV space into the UV space of a `pal_w` x `pal_h`
/// palette image, given where the texture was placed.
pub fn uv_transform_for(placed: &TexturePosition, pal_w: u32, pal_h: u32) -> UvTransform {
    let inner_w = placed.x_size.saturating_sub(placed.margin * 2) as f64;
    let inner_h = placed.y_size.saturating_sub(placed.margin * 2) as f64;
    let left = (placed.x + placed.margin) as f64;
    let top = (placed.y + placed.margin) as f64;
    let bottom = top + inner_h;
    let (pw, ph) = (pal_w as f64, pal_h as f64);

    let t = [left / pw, (ph - bottom) / ph];
    let s = [inner_w / pw, inner_h / ph];

    let range = placed.uv.range();
    if range[0] != 0.0 && range[1] != 0.0 {
        let scale = [s[0] / range[0], s[1] / range[1]];
        UvTransform {
            scale,
            offset: [
                t[0] - placed.uv.min[0] * scale[0],
                t[1] - placed.uv.min[1] * scale[1],
            ],
        }
    } else {
        UvTransform {
            scale: s,
            offset: t,
        }
    }
}

impl Session {
    fn size_from_uvs(&self, pid: PlacementId, uv: UvBounds) -> TexturePosition {
        let p = &self.placements[pid];
        let tex = &self.textures[p.texture];
        let (tw, th) = tex.size.unwrap_or((0, 0));
        let range = uv.range();

        let mut x_size = ((tw as f64 * range[0]) + 0.5).floor().max(0.0) as u32;
        let mut y_size = ((th as f64 * range[1]) + 0.5).floor().max(0.0) as u32;
        x_size = x_size.max(MIN_PLACED_SIZE);
        y_size = y_size.max(MIN_PLACED_SIZE);

        let margin = self.groups[p.group]
            .margin_override
            .unwrap_or(tex.margin);
        if margin as f64 / x_size as f64 > EXTERIOR_MARGIN_RATIO {
            x_size += margin * 2;
        }
        if margin as f64 / y_size as f64 > EXTERIOR_MARGIN_RATIO {
            y_size += margin * 2;
        }

        TexturePosition {
            x: p.position.x,
            y: p.position.y,
            x_size,
            y_size,
            margin,
            uv,
            wrap_u: p.position.wrap_u,
            wrap_v: p.position.wrap_v,
        }
    }

    /// Works out how large the placement must be from the UVs of every
    /// reference to it, then decides whether it can (still) be packed.
    ///
    /// Returns false when the size cannot be determined (unknown texture
    /// size, or no reference with UVs).
    pub fn determine_size(&mut self, pid: PlacementId) -> bool {
        let texture = self.placements[pid].texture;
        let (size_known, omit, coverage_threshold, wrap_u, wrap_v) = {
            let tex = &self.textures[texture];
            (
                tex.size.is_some(),
                tex.omit,
                tex.coverage_threshold,
                tex.wrap_u,
                tex.wrap_v,
            )
        };
        if !size_known {
            self.force_replace(pid);
            self.placements[pid].omit_reason = OmitReason::Unknown;
            return false;
        }

        let mut uv: Option<UvBounds> = None;
        let mut pos_wrap_u = WrapMode::Clamp;
        let mut pos_wrap_v = WrapMode::Clamp;
        for &aid in &self.placements[pid].references {
            let Some(asset) = self.assets.get(aid) else {
                continue;
            };
            for r in asset.references.iter().filter(|r| r.placement == Some(pid)) {
                if let Some(b) = r.uv {
                    uv = Some(uv.map_or(b, |u| u.union(&b)));
                }
                if r.wrap_u == WrapMode::Repeat {
                    pos_wrap_u = WrapMode::Repeat;
                }
                if r.wrap_v == WrapMode::Repeat {
                    pos_wrap_v = WrapMode::Repeat;
                }
            }
        }
        if wrap_u != WrapMode::Unspecified {
            pos_wrap_u = wrap_u;
        }
        if wrap_v != WrapMode::Unspecified {
            pos_wrap_v = wrap_v;
        }
        {
            let p = &mut self.placements[pid];
            p.position.wrap_u = pos_wrap_u;
            p.position.wrap_v = pos_wrap_v;
            p.has_uvs = uv.is_some();
        }

        let Some(raw_uv) = uv else {
            self.force_replace(pid);
            self.placements[pid].omit_reason = OmitReason::Unused;
            return false;
        };

        let rounded_uv = if self.config.round_uvs {
            let unit = self.config.round_unit;
            let fuzz = self.config.round_fuzz;
            UvBounds::new(
                [
                    ((raw_uv.min[0] + fuzz) / unit).floor() * unit,
                    ((raw_uv.min[1] + fuzz) / unit).floor() * unit,
                ],
                [
                    ((raw_uv.max[0] - fuzz) / unit).ceil() * unit,
                    ((raw_uv.max[1] - fuzz) / unit).ceil() * unit,
                ],
            )
        } else {
            raw_uv
        };

        let position = self.size_from_uvs(pid, rounded_uv);
        self.placements[pid].position = position;
        self.placements[pid].size_known = true;

        let (pal_w, pal_h) = (self.config.palette_width, self.config.palette_height);
        let (xs, ys) = (position.x_size, position.y_size);
        let previous = self.placements[pid].omit_reason;

        if omit {
            self.force_replace(pid);
            self.placements[pid].omit_reason = OmitReason::Omitted;
        } else if self.placements[pid].uv_area() > coverage_threshold {
            self.force_replace(pid);
            self.placements[pid].omit_reason = OmitReason::Coverage;
        } else if xs > pal_w || ys > pal_h || (xs == pal_w && ys == pal_h) {
            self.force_replace(pid);
            self.placements[pid].omit_reason = OmitReason::Size;
        } else if self.config.omit_everything {
            self.force_replace(pid);
            self.placements[pid].omit_reason = OmitReason::DefaultOmit;
        } else if matches!(
            previous,
            OmitReason::Omitted
                | OmitReason::DefaultOmit
                | OmitReason::Size
                | OmitReason::Coverage
                | OmitReason::Unknown
        ) {
            self.force_replace(pid);
            self.mark_assets_stale(pid);
            self.placements[pid].omit_reason = OmitReason::Working;
        } else if let Some(placed) = self.placements[pid].placed {
            let needs_move = position.x_size != placed.x_size
                || position.y_size != placed.y_size
                || !placed.uv.covers(&position.uv);
            if needs_move {
                let grew = position.x_size > placed.x_size || position.y_size > placed.y_size;
                if grew && self.config.round_uvs {
                    let unrounded = self.size_from_uvs(pid, raw_uv);
                    let fits = unrounded.x_size <= placed.x_size
                        && unrounded.y_size <= placed.y_size
                        && placed.uv.covers(&unrounded.uv);
                    if fits {
                        self.placements[pid].position = unrounded;
                    } else {
                        self.force_replace(pid);
                    }
                } else {
                    self.force_replace(pid);
                }
            }

            let p = &mut self.placements[pid];
            if let Some(placed) = p.placed.as_mut() {
                if placed.wrap_u != p.position.wrap_u || placed.wrap_v != p.position.wrap_v {
                    placed.wrap_u = p.position.wrap_u;
                    placed.wrap_v = p.position.wrap_v;
                    p.is_filled = false;
                }
            }
        } else if previous == OmitReason::Unused {
            self.placements[pid].omit_reason = OmitReason::Working;
        }

        trace!(placement = %pid, x_size = xs, y_size = ys, omit = %self.placements[pid].omit_reason, "determined size");
        true
    }

    /// Records the placement at `(x, y)` of `image`. The caller owns the
    /// image's placement list.
    pub(crate) fn place_at(&mut self, pid: PlacementId, image: ImageId, x: u32, y: u32) {
        let p = &mut self.placements[pid];
        debug_assert!(!p.is_placed());
        p.image = Some(image);
        p.is_filled = false;
        p.position.x = x;
        p.position.y = y;
        p.placed = Some(p.position);
        p.omit_reason = OmitReason::None;
    }

    /// Takes the placement off its image (leaving a cleared region) and
    /// queues it for packing again.
    pub fn force_replace(&mut self, pid: PlacementId) {
        let Some(p) = self.placements.get_mut(pid) else {
            return;
        };
        if let Some(iid) = p.image.take() {
            let rect = p.placed.take().map(|pos| pos.rect());
            p.is_filled = false;
            if let Some(img) = self.images.get_mut(iid) {
                img.placements.retain(|&q| q != pid);
                if let Some(r) = rect {
                    img.cleared_regions.push(r);
                }
            }
        }
        // Solitary placements are referenced as standalone textures, so
        // their assets must be rewritten too.
        if matches!(
            self.placements[pid].omit_reason,
            OmitReason::None | OmitReason::Solitary
        ) {
            self.mark_assets_stale(pid);
        }
        self.placements[pid].omit_reason = OmitReason::Working;
    }

    pub fn mark_assets_stale(&mut self, pid: PlacementId) {
        let Some(p) = self.placements.get(pid) else {
            return;
        };
        for &aid in &p.references {
            if let Some(asset) = self.assets.get_mut(aid) {
                asset.stale = true;
            }
        }
    }

    pub(crate) fn omit_solitary(&mut self, pid: PlacementId) {
        if self.placements[pid].omit_reason != OmitReason::Solitary {
            self.mark_assets_stale(pid);
            self.placements[pid].omit_reason = OmitReason::Solitary;
        }
    }

    pub(crate) fn not_solitary(&mut self, pid: PlacementId) {
        if self.placements[pid].omit_reason != OmitReason::None {
            self.mark_assets_stale(pid);
            self.placements[pid].omit_reason = OmitReason::None;
        }
    }

    /// UV remap for a packed placement, `None` if it is not on an image.
    pub fn uv_transform(&self, pid: PlacementId) -> Option<UvTransform> {
        let p = self.placements.get(pid)?;
        let placed = p.placed.as_ref()?;
        let img = self.images.get(p.image?)?;
        Some(uv_transform_for(placed, img.width, img.height))
    }
}
