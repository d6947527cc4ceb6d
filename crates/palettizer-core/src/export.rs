use crate::model::{OmitReason, UvTransform, WrapMode};
use crate::session::Session;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::PathBuf;

/// How one texture reference of an asset must be rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemapEntry {
    pub texture: String,
    /// Palette image (relative to the output directory) holding the texture,
    /// `None` when the texture is emitted standalone.
    pub image: Option<PathBuf>,
    /// Maps the reference's source UVs into palette UVs; identity for
    /// standalone textures.
    pub uv_transform: UvTransform,
    pub wrap_u: WrapMode,
    pub wrap_v: WrapMode,
}

/// Remap records for one asset file, in reference order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRemap {
    pub asset: String,
    pub path: PathBuf,
    pub entries: Vec<RemapEntry>,
}

impl Session {
    /// Remap records for every asset, or only the stale ones.
    pub fn asset_remaps(&self, stale_only: bool) -> Vec<AssetRemap> {
        self.assets
            .iter()
            .filter(|(_, a)| a.stale || !stale_only)
            .map(|(_, asset)| {
                let entries = asset
                    .references
                    .iter()
                    .map(|r| {
                        let packed = r
                            .placement
                            .and_then(|pid| self.placements.get(pid).map(|p| (pid, p)))
                            .filter(|(_, p)| p.omit_reason == OmitReason::None);
                        match packed {
                            Some((pid, p)) => {
                                let placed = p.placed.unwrap_or_default();
                                RemapEntry {
                                    texture: r.texture_name.clone(),
                                    image: p.image.and_then(|iid| self.images[iid].filename.clone()),
                                    uv_transform: self
                                        .uv_transform(pid)
                                        .unwrap_or_else(UvTransform::identity),
                                    wrap_u: placed.wrap_u,
                                    wrap_v: placed.wrap_v,
                                }
                            }
                            None => RemapEntry {
                                texture: r.texture_name.clone(),
                                image: None,
                                uv_transform: UvTransform::identity(),
                                wrap_u: r.wrap_u,
                                wrap_v: r.wrap_v,
                            },
                        }
                    })
                    .collect();
                AssetRemap {
                    asset: asset.name.clone(),
                    path: asset.path.clone(),
                    entries,
                }
            })
            .collect()
    }
}

/// Serialize the palette layout as `{ images, omitted, meta }`.
///
/// Each image lists its placed textures with their pixel rectangle, margin
/// and UV transform; `omitted` lists every placement that is not packed,
/// keyed by group, with its reason.
pub fn to_json_layout(session: &Session) -> Value {
    let images: Vec<Value> = session
        .images()
        .map(|(iid, img)| {
            let frames: Vec<Value> = img
                .placements
                .iter()
                .filter_map(|&pid| {
                    let p = session.placement(pid)?;
                    let placed = p.placed.as_ref()?;
                    let tex = session.texture(p.texture)?;
                    let t = session.uv_transform(pid)?;
                    Some(json!({
                        "texture": tex.name,
                        "frame": {"x": placed.x, "y": placed.y, "w": placed.x_size, "h": placed.y_size},
                        "margin": placed.margin,
                        "uv": {"min": placed.uv.min, "max": placed.uv.max},
                        "uvTransform": {"scale": t.scale, "offset": t.offset},
                        "wrap": [placed.wrap_u, placed.wrap_v],
                        "solitary": p.omit_reason == OmitReason::Solitary,
                    }))
                })
                .collect();
            let group = session.group(img.group).map(|g| g.name.as_str()).unwrap_or_default();
            json!({
                "id": iid.0,
                "group": group,
                "page": img.properties.page_name(),
                "file": img.filename,
                "width": img.width,
                "height": img.height,
                "frames": frames,
            })
        })
        .collect();

    let omitted: Vec<Value> = session
        .placements()
        .filter(|(_, p)| !p.is_placed())
        .filter_map(|(_, p)| {
            let tex = session.texture(p.texture)?;
            let group = session.group(p.group)?;
            Some(json!({
                "texture": tex.name,
                "group": group.name,
                "reason": p.omit_reason,
            }))
        })
        .collect();

    let params = session.packing_params();
    let meta = json!({
        "app": "palettizer",
        "version": env!("CARGO_PKG_VERSION"),
        "paletteSize": {"w": params.palette_width, "h": params.palette_height},
        "margin": params.margin,
        "imageType": params.image_type,
    });
    json!({ "images": images, "omitted": omitted, "meta": meta })
}

/// Serialize remap records as `{ assets: [...] }`.
pub fn to_json_remaps(remaps: &[AssetRemap]) -> Value {
    json!({ "assets": remaps })
}
