#![allow(dead_code)]

use image::{Rgba, RgbaImage};
use palettizer_core::prelude::*;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

/// In-memory raster store with a manual clock for modification stamps.
#[derive(Debug, Default)]
pub struct MemRaster {
    pub files: BTreeMap<PathBuf, (RgbaImage, u64)>,
    pub clock: u64,
    pub writes: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

impl MemRaster {
    pub fn new() -> Self {
        Self {
            clock: 1,
            ..Default::default()
        }
    }

    /// Adds (or replaces) a solid `w` x `h` texture.
    pub fn add(&mut self, path: impl Into<PathBuf>, w: u32, h: u32, color: [u8; 4]) {
        self.clock += 1;
        self.files
            .insert(path.into(), (RgbaImage::from_pixel(w, h, Rgba(color)), self.clock));
    }

    pub fn add_texture(&mut self, name: &str, w: u32, h: u32) {
        self.add(texture_path(name), w, h, [200, 100, 50, 255]);
    }

    pub fn get(&self, path: &Path) -> Option<&RgbaImage> {
        self.files.get(path).map(|(img, _)| img)
    }
}

fn not_found(path: &Path) -> PalettizerError {
    PalettizerError::Io(io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} not found", path.display()),
    ))
}

impl RasterIo for MemRaster {
    fn read(&self, path: &Path, alpha: Option<&Path>) -> palettizer_core::Result<RgbaImage> {
        let mut img = self.get(path).cloned().ok_or_else(|| not_found(path))?;
        if let Some(a) = alpha {
            let mask = self.get(a).ok_or_else(|| not_found(a))?;
            for (px, m) in img.pixels_mut().zip(mask.pixels()) {
                px.0[3] = m.0[0];
            }
        }
        Ok(img)
    }

    fn read_header(&self, path: &Path) -> palettizer_core::Result<ImageHeader> {
        let img = self.get(path).ok_or_else(|| not_found(path))?;
        Ok(ImageHeader {
            width: img.width(),
            height: img.height(),
            channels: 4,
        })
    }

    fn write(
        &mut self,
        path: &Path,
        image: &RgbaImage,
        _channels: u8,
        _image_type: ImageType,
    ) -> palettizer_core::Result<()> {
        self.clock += 1;
        self.files
            .insert(path.to_path_buf(), (image.clone(), self.clock));
        self.writes.push(path.to_path_buf());
        Ok(())
    }

    fn modified(&self, path: &Path) -> Option<u64> {
        self.files.get(path).map(|(_, t)| *t)
    }

    fn remove(&mut self, path: &Path) -> palettizer_core::Result<()> {
        if self.files.remove(path).is_some() {
            self.removed.push(path.to_path_buf());
        }
        Ok(())
    }
}

/// Scanner answering from a fixed table of assets.
#[derive(Debug, Default)]
pub struct MemScanner {
    pub assets: BTreeMap<String, ScannedAsset>,
    /// Names passed to `scan`, in call order.
    pub scans: Vec<String>,
}

impl MemScanner {
    pub fn put(&mut self, asset: ScannedAsset) {
        self.assets.insert(asset.name.clone(), asset);
    }
}

impl AssetScanner for MemScanner {
    fn scan(&mut self, name: &str, _path: &Path) -> palettizer_core::Result<ScannedAsset> {
        self.scans.push(name.to_string());
        self.assets
            .get(name)
            .cloned()
            .ok_or_else(|| PalettizerError::AssetScan {
                name: name.to_string(),
                reason: "gone".into(),
            })
    }
}

pub fn texture_path(name: &str) -> PathBuf {
    PathBuf::from(format!("textures/{name}.png"))
}

/// A reference using the whole texture once.
pub fn full(name: &str) -> ScannedReference {
    with_uv(name, UvBounds::unit())
}

pub fn with_uv(name: &str, uv: UvBounds) -> ScannedReference {
    ScannedReference {
        texture_name: name.to_string(),
        source: texture_path(name),
        alpha_source: None,
        uv: Some(uv),
        wrap_u: WrapMode::Unspecified,
        wrap_v: WrapMode::Unspecified,
    }
}

pub fn asset(name: &str, references: Vec<ScannedReference>) -> ScannedAsset {
    ScannedAsset {
        name: name.to_string(),
        path: PathBuf::from(name),
        modified: Some(1),
        references,
    }
}

/// Placements of a texture by group name.
pub fn placements_of(session: &Session, texture: &str) -> BTreeMap<String, Placement> {
    let mut out = BTreeMap::new();
    for (_, p) in session.placements() {
        let tex = session.texture(p.texture).expect("texture");
        if tex.name == texture {
            let group = session.group(p.group).expect("group");
            out.insert(group.name.clone(), p.clone());
        }
    }
    out
}

/// Panics if two placements on one image overlap or one leaves its image.
pub fn assert_layout_valid(session: &Session) {
    for (iid, img) in session.images() {
        let rects: Vec<Rect> = img
            .placements
            .iter()
            .map(|&pid| {
                let p = session.placement(pid).expect("placement");
                assert_eq!(p.image, Some(iid), "{pid} back-link");
                p.placed_rect().expect("placed rect")
            })
            .collect();
        for (i, a) in rects.iter().enumerate() {
            assert!(
                a.right() <= img.width && a.bottom() <= img.height,
                "{a:?} outside {}x{}",
                img.width,
                img.height
            );
            for b in &rects[i + 1..] {
                assert!(!a.intersects(b), "{a:?} overlaps {b:?}");
            }
        }
    }
}
