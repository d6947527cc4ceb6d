use crate::config::ImageType;
use crate::error::Result;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader, RgbaImage};
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Size and channel count of an image file, read without decoding pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
}

/// Raster file access used by size determination and image generation.
pub trait RasterIo {
    /// Decodes `path` as RGBA. With `alpha`, that file's luminance replaces the alpha channel.
    fn read(&self, path: &Path, alpha: Option<&Path>) -> Result<RgbaImage>;
    fn read_header(&self, path: &Path) -> Result<ImageHeader>;
    /// Encodes `image` keeping `channels` channels (1..=4).
    fn write(&mut self, path: &Path, image: &RgbaImage, channels: u8, image_type: ImageType) -> Result<()>;
    /// Modification stamp (milliseconds since the epoch), `None` if the file is missing.
    fn modified(&self, path: &Path) -> Option<u64>;
    fn remove(&mut self, path: &Path) -> Result<()>;
}

/// [`RasterIo`] over the local filesystem with the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsRaster;

impl RasterIo for FsRaster {
    fn read(&self, path: &Path, alpha: Option<&Path>) -> Result<RgbaImage> {
        let mut rgba = ImageReader::open(path)?.with_guessed_format()?.decode()?.to_rgba8();
        if let Some(alpha_path) = alpha {
            let mask = ImageReader::open(alpha_path)?
                .with_guessed_format()?
                .decode()?
                .to_luma8();
            let mask = if mask.dimensions() != rgba.dimensions() {
                image::imageops::resize(
                    &mask,
                    rgba.width(),
                    rgba.height(),
                    image::imageops::FilterType::Triangle,
                )
            } else {
                mask
            };
            for (px, m) in rgba.pixels_mut().zip(mask.pixels()) {
                px.0[3] = m.0[0];
            }
        }
        Ok(rgba)
    }

    fn read_header(&self, path: &Path) -> Result<ImageHeader> {
        let decoder = ImageReader::open(path)?.with_guessed_format()?.into_decoder()?;
        let (width, height) = decoder.dimensions();
        Ok(ImageHeader {
            width,
            height,
            channels: decoder.color_type().channel_count(),
        })
    }

    fn write(&mut self, path: &Path, image: &RgbaImage, channels: u8, image_type: ImageType) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let keep_alpha = image_type.supports_alpha();
        let dynamic = DynamicImage::ImageRgba8(image.clone());
        let out = match (channels, keep_alpha) {
            (1, _) | (2, false) => DynamicImage::ImageLuma8(dynamic.to_luma8()),
            (2, true) => DynamicImage::ImageLumaA8(dynamic.to_luma_alpha8()),
            (3, _) | (_, false) => DynamicImage::ImageRgb8(dynamic.to_rgb8()),
            _ => dynamic,
        };
        out.save_with_format(path, image_format(image_type))?;
        Ok(())
    }

    fn modified(&self, path: &Path) -> Option<u64> {
        let meta = fs::metadata(path).ok()?;
        let time = meta.modified().ok()?;
        let since = time.duration_since(UNIX_EPOCH).ok()?;
        Some(since.as_millis() as u64)
    }

    fn remove(&mut self, path: &Path) -> Result<()> {
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

fn image_format(t: ImageType) -> ImageFormat {
    match t {
        ImageType::Png => ImageFormat::Png,
        ImageType::Jpeg => ImageFormat::Jpeg,
        ImageType::Bmp => ImageFormat::Bmp,
        ImageType::Tga => ImageFormat::Tga,
    }
}
