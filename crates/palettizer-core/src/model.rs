use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl From<usize> for $name {
            fn from(i: usize) -> Self {
                Self(i as u32)
            }
        }

        impl From<$name> for usize {
            fn from(id: $name) -> usize {
                id.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

define_id!(
    /// Index of a [`crate::group::Group`] in the session.
    GroupId
);
define_id!(
    /// Index of a [`crate::texture::TextureRecord`] in the session.
    TextureId
);
define_id!(
    /// Index of a [`crate::placement::Placement`] in the session.
    PlacementId
);
define_id!(
    /// Index of a [`crate::page::Page`] in the session.
    PageId
);
define_id!(
    /// Index of a [`crate::palette_image::PaletteImage`] in the session.
    ImageId
);
define_id!(
    /// Index of a [`crate::asset::AssetFile`] in the session.
    AssetId
);

/// Ordered set of groups; ordering is by id so iteration is deterministic.
pub type GroupSet = std::collections::BTreeSet<GroupId>;

/// Axis-aligned rectangle (pixels). `x,y` is top-left; `w,h` are sizes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }
    /// Exclusive right edge (`x + w`).
    pub fn right(&self) -> u32 {
        self.x + self.w
    }
    /// Exclusive bottom edge (`y + h`).
    pub fn bottom(&self) -> u32 {
        self.y + self.h
    }
    pub fn area(&self) -> u64 {
        (self.w as u64) * (self.h as u64)
    }
    /// Returns true if `r` is fully inside `self`.
    pub fn contains(&self, r: &Rect) -> bool {
        r.x >= self.x && r.y >= self.y && r.right() <= self.right() && r.bottom() <= self.bottom()
    }
    /// Returns true if the two rectangles share at least one pixel.
    pub fn intersects(&self, r: &Rect) -> bool {
        !(r.x >= self.right() || r.right() <= self.x || r.y >= self.bottom() || r.bottom() <= self.y)
    }
}

/// Why a placement is not (or not usefully) packed into a palette image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OmitReason {
    /// Placed on a palette image.
    None,
    /// Assignment pending; the next packing pass will place it.
    Working,
    /// The directives explicitly omit this texture.
    Omitted,
    /// Too large for any palette image.
    Size,
    /// The only occupant of its image.
    Solitary,
    /// UV usage repeats the texture more than the coverage threshold allows.
    Coverage,
    /// The source image could not be read, so its size is unknown.
    Unknown,
    /// No asset file references this placement any more.
    Unused,
    /// Global omit-everything mode.
    DefaultOmit,
}

impl OmitReason {
    pub const ALL: [OmitReason; 9] = [
        OmitReason::None,
        OmitReason::Working,
        OmitReason::Omitted,
        OmitReason::Size,
        OmitReason::Solitary,
        OmitReason::Coverage,
        OmitReason::Unknown,
        OmitReason::Unused,
        OmitReason::DefaultOmit,
    ];
}

impl fmt::Display for OmitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OmitReason::None => "none",
            OmitReason::Working => "working",
            OmitReason::Omitted => "omitted",
            OmitReason::Size => "size",
            OmitReason::Solitary => "solitary",
            OmitReason::Coverage => "coverage",
            OmitReason::Unknown => "unknown",
            OmitReason::Unused => "unused",
            OmitReason::DefaultOmit => "default_omit",
        };
        f.write_str(s)
    }
}

/// Texture addressing mode along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WrapMode {
    #[default]
    Unspecified,
    Clamp,
    Repeat,
    Mirror,
    MirrorOnce,
    BorderColor,
}

impl FromStr for WrapMode {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unspecified" => Ok(Self::Unspecified),
            "clamp" => Ok(Self::Clamp),
            "repeat" | "wrap" => Ok(Self::Repeat),
            "mirror" => Ok(Self::Mirror),
            "mirror_once" | "mirroronce" => Ok(Self::MirrorOnce),
            "border_color" | "bordercolor" => Ok(Self::BorderColor),
            _ => Err(()),
        }
    }
}

/// Pixel layout of a palette image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    #[default]
    Unspecified,
    Rgba,
    Rgb,
    LuminanceAlpha,
    Luminance,
    Alpha,
}

impl PixelFormat {
    pub fn from_channels(channels: u8) -> Self {
        match channels {
            1 => Self::Luminance,
            2 => Self::LuminanceAlpha,
            3 => Self::Rgb,
            _ => Self::Rgba,
        }
    }
}

impl FromStr for PixelFormat {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unspecified" => Ok(Self::Unspecified),
            "rgba" => Ok(Self::Rgba),
            "rgb" => Ok(Self::Rgb),
            "la" | "luminance_alpha" => Ok(Self::LuminanceAlpha),
            "l" | "luminance" => Ok(Self::Luminance),
            "a" | "alpha" => Ok(Self::Alpha),
            _ => Err(()),
        }
    }
}

/// Sampling filter requested for a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    #[default]
    Unspecified,
    Nearest,
    Linear,
    Mipmap,
}

impl FromStr for FilterMode {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unspecified" => Ok(Self::Unspecified),
            "nearest" => Ok(Self::Nearest),
            "linear" => Ok(Self::Linear),
            "mipmap" => Ok(Self::Mipmap),
            _ => Err(()),
        }
    }
}

/// Properties that decide which textures may share a palette image.
///
/// Used as the page key within a group, so it must be totally ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct TextureProperties {
    pub num_channels: Option<u8>,
    pub format: PixelFormat,
    pub minfilter: FilterMode,
    pub magfilter: FilterMode,
}

impl TextureProperties {
    /// Fills in anything left unspecified so two equivalent textures compare equal.
    pub fn fully_define(&mut self) {
        let channels = self.num_channels.unwrap_or(4).clamp(1, 4);
        self.num_channels = Some(channels);
        if self.format == PixelFormat::Unspecified {
            self.format = PixelFormat::from_channels(channels);
        }
        if self.minfilter == FilterMode::Unspecified {
            self.minfilter = FilterMode::Linear;
        }
        if self.magfilter == FilterMode::Unspecified {
            self.magfilter = FilterMode::Linear;
        }
    }

    pub fn channels(&self) -> u8 {
        self.num_channels.unwrap_or(4)
    }

    pub fn has_alpha(&self) -> bool {
        matches!(self.channels(), 2 | 4)
    }

    /// Short name used for the `%p` token of generated image names.
    pub fn page_name(&self) -> String {
        let format = match self.format {
            PixelFormat::Unspecified | PixelFormat::Rgba => "rgba",
            PixelFormat::Rgb => "rgb",
            PixelFormat::LuminanceAlpha => "la",
            PixelFormat::Luminance => "l",
            PixelFormat::Alpha => "a",
        };
        match self.minfilter {
            FilterMode::Nearest => format!("{format}_n"),
            FilterMode::Mipmap => format!("{format}_m"),
            _ => format.to_string(),
        }
    }

    /// True if the differences between `self` and `other` change what an asset
    /// file has to say about the texture (format or filtering).
    pub fn asset_properties_match(&self, other: &TextureProperties) -> bool {
        self.format == other.format
            && self.minfilter == other.minfilter
            && self.magfilter == other.magfilter
    }
}

/// Range of texture coordinates used by a reference, `v` pointing up.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UvBounds {
    pub min: [f64; 2],
    pub max: [f64; 2],
}

impl UvBounds {
    pub fn new(min: [f64; 2], max: [f64; 2]) -> Self {
        Self { min, max }
    }

    /// The full texture, `(0,0)..(1,1)`.
    pub fn unit() -> Self {
        Self::new([0.0, 0.0], [1.0, 1.0])
    }

    pub fn union(&self, other: &UvBounds) -> UvBounds {
        UvBounds {
            min: [self.min[0].min(other.min[0]), self.min[1].min(other.min[1])],
            max: [self.max[0].max(other.max[0]), self.max[1].max(other.max[1])],
        }
    }

    pub fn range(&self) -> [f64; 2] {
        [self.max[0] - self.min[0], self.max[1] - self.min[1]]
    }

    pub fn area(&self) -> f64 {
        let r = self.range();
        r[0] * r[1]
    }

    /// True if `other` lies entirely within `self`.
    pub fn covers(&self, other: &UvBounds) -> bool {
        other.min[0] >= self.min[0]
            && other.min[1] >= self.min[1]
            && other.max[0] <= self.max[0]
            && other.max[1] <= self.max[1]
    }
}

impl Default for UvBounds {
    fn default() -> Self {
        Self::unit()
    }
}

/// Where (and how large) a texture wants to be, or has been, placed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct TexturePosition {
    pub x: u32,
    pub y: u32,
    pub x_size: u32,
    pub y_size: u32,
    pub margin: u32,
    pub uv: UvBounds,
    pub wrap_u: WrapMode,
    pub wrap_v: WrapMode,
}

impl TexturePosition {
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.x_size, self.y_size)
    }
}

/// Affine map from a texture's own UV space into palette UV space:
/// `u' = u * scale[0] + offset[0]`, `v' = v * scale[1] + offset[1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UvTransform {
    pub scale: [f64; 2],
    pub offset: [f64; 2],
}

impl UvTransform {
    pub fn identity() -> Self {
        Self {
            scale: [1.0, 1.0],
            offset: [0.0, 0.0],
        }
    }

    pub fn apply(&self, uv: [f64; 2]) -> [f64; 2] {
        [
            uv[0] * self.scale[0] + self.offset[0],
            uv[1] * self.scale[1] + self.offset[1],
        ]
    }
}
