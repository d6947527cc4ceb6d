//! Core library for palettizing textures.
//!
//! - Groups: a dependency graph of deployment targets; each texture is assigned to a minimal set of groups covering every asset that uses it
//! - Packing: placements are sized from the UV range their assets use, then packed first-fit into palette images that shrink afterwards
//! - Incremental: a `Session` persists through the `store` module, so unchanged layouts survive between runs and only affected assets go stale
//!
//! Quick example:
//! ```ignore
//! use palettizer_core::prelude::*;
//! # fn main() -> anyhow::Result<()> {
//! let cfg = PaletteConfig::builder()
//!     .with_palette_size(1024, 1024)
//!     .group("shared", "shared", &[])
//!     .group("chars", "chars", &["shared"])
//!     .asset("chars/**", &["chars"])
//!     .build();
//! let mut session = Session::new(cfg)?;
//! session.update_asset(scanned_asset);
//! let summary = session.process(&FsRaster, ProcessOptions::default())?;
//! println!("placed {} of {}", summary.placed, summary.placements);
//! # Ok(()) }
//! ```

pub mod arena;
pub mod asset;
pub mod compositing;
pub mod config;
pub mod directives;
pub mod error;
pub mod export;
pub mod generate;
pub mod group;
pub mod model;
pub mod page;
pub mod palette_image;
pub mod placement;
pub mod raster;
pub mod report;
pub mod session;
pub mod store;
pub mod texture;

pub use config::*;
pub use error::*;
pub use export::*;
pub use model::*;
pub use session::*;

/// Convenience prelude for common types and functions.
/// Importing `palettizer_core::prelude::*` brings the primary APIs into scope.
pub mod prelude {
    pub use crate::asset::{
        AssetFile, AssetScanner, ScannedAsset, ScannedReference, TextureReference, scan_failure_reason,
    };
    pub use crate::config::{
        AssetDirective, GroupDirective, ImageType, PackingParams, PaletteConfig,
        PaletteConfigBuilder, TextureDirective,
    };
    pub use crate::error::PalettizerError;
    pub use crate::export::{AssetRemap, RemapEntry, to_json_layout, to_json_remaps};
    pub use crate::generate::{GenerateSummary, ImageUpdate};
    pub use crate::group::{Group, NULL_GROUP};
    pub use crate::model::{
        AssetId, FilterMode, GroupId, GroupSet, ImageId, OmitReason, PageId, PixelFormat,
        PlacementId, Rect, TextureId, TextureProperties, TexturePosition, UvBounds, UvTransform,
        WrapMode,
    };
    pub use crate::page::Page;
    pub use crate::palette_image::{PaletteImage, expand_image_pattern};
    pub use crate::placement::Placement;
    pub use crate::raster::{FsRaster, ImageHeader, RasterIo};
    pub use crate::report::PaletteStats;
    pub use crate::session::{ProcessOptions, ProcessSummary, RunReport, Session};
    pub use crate::store::{LoadOutcome, STORE_VERSION};
    pub use crate::texture::{SourceImage, TextureRecord};
}
