use crate::model::{FilterMode, PixelFormat, WrapMode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

/// File formats for generated palette images.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    Png,
    Jpeg,
    Bmp,
    Tga,
}

impl ImageType {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageType::Png => "png",
            ImageType::Jpeg => "jpg",
            ImageType::Bmp => "bmp",
            ImageType::Tga => "tga",
        }
    }

    /// Formats that can store an alpha channel.
    pub fn supports_alpha(&self) -> bool {
        matches!(self, ImageType::Png | ImageType::Tga)
    }
}

impl FromStr for ImageType {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            "bmp" => Ok(Self::Bmp),
            "tga" => Ok(Self::Tga),
            _ => Err(()),
        }
    }
}

/// Declares a group and the groups it depends on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupDirective {
    pub name: String,
    /// Deployment directory tag; defaults to the group name.
    #[serde(default)]
    pub dirname: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Overrides the texture margin for everything placed in this group.
    #[serde(default)]
    pub margin: Option<u32>,
}

/// Per-texture overrides, matched by glob against the texture name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TextureDirective {
    pub pattern: String,
    /// Explicit size in pixels, replacing the source image size.
    #[serde(default)]
    pub size: Option<(u32, u32)>,
    /// Scale of the source image size, in percent.
    #[serde(default)]
    pub scale: Option<f64>,
    #[serde(default)]
    pub channels: Option<u8>,
    #[serde(default)]
    pub format: Option<PixelFormat>,
    #[serde(default)]
    pub minfilter: Option<FilterMode>,
    #[serde(default)]
    pub magfilter: Option<FilterMode>,
    #[serde(default)]
    pub wrap_u: Option<WrapMode>,
    #[serde(default)]
    pub wrap_v: Option<WrapMode>,
    #[serde(default)]
    pub omit: bool,
    #[serde(default)]
    pub margin: Option<u32>,
    #[serde(default)]
    pub coverage_threshold: Option<f64>,
    /// Groups the texture is explicitly assigned to.
    #[serde(default)]
    pub groups: Vec<String>,
    /// Alternate source images painted at the same location in swap palettes.
    #[serde(default)]
    pub swaps: Vec<PathBuf>,
}

/// Per-asset group requirements, matched by glob against the asset name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetDirective {
    pub pattern: String,
    pub groups: Vec<String>,
}

/// Palette and directive configuration for a palettizing run.
/// Key notes:
///   - `palette_width`/`palette_height` is the size of a fresh palette image; images may shrink from there
///   - `groups` declares the group dependency graph; `assets` decides which groups each asset file needs
///   - `textures` holds per-texture overrides; the first matching pattern wins
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaletteConfig {
    /// Width of a freshly allocated palette image.
    #[serde(default = "default_palette_dim")]
    pub palette_width: u32,
    /// Height of a freshly allocated palette image.
    #[serde(default = "default_palette_dim")]
    pub palette_height: u32,
    /// Default pixels reserved around each packed texture.
    #[serde(default = "default_margin")]
    pub margin: u32,
    /// RGBA fill for unused palette pixels.
    #[serde(default)]
    pub background_color: [u8; 4],
    /// Largest UV area a texture may cover before it is left out of the palette.
    #[serde(default = "default_coverage_threshold")]
    pub coverage_threshold: f64,
    #[serde(default = "default_image_type")]
    pub image_type: ImageType,

    /// Flag textures that end up alone on an image as solitary.
    #[serde(default)]
    pub omit_solitary: bool,
    /// Leave every texture out of the palettes.
    #[serde(default)]
    pub omit_everything: bool,

    /// Round UV ranges outward so small edits don't force a repack.
    #[serde(default = "default_true")]
    pub round_uvs: bool,
    #[serde(default = "default_round_unit")]
    pub round_unit: f64,
    #[serde(default = "default_round_fuzz")]
    pub round_fuzz: f64,

    /// Image basename pattern: `%g` group, `%p` page, `%i` image index, `%%` literal.
    #[serde(default = "default_image_pattern")]
    pub generated_image_pattern: String,
    /// Output subdirectory per group: `%g` expands to the group dirname.
    #[serde(default = "default_map_dirname")]
    pub map_dirname: String,
    /// Group for asset files no directive assigns.
    #[serde(default = "default_group_name")]
    pub default_group: String,

    #[serde(default)]
    pub groups: Vec<GroupDirective>,
    #[serde(default)]
    pub textures: Vec<TextureDirective>,
    #[serde(default)]
    pub assets: Vec<AssetDirective>,
}

impl Default for PaletteConfig {
    fn default() -> Self {
        Self {
            palette_width: default_palette_dim(),
            palette_height: default_palette_dim(),
            margin: default_margin(),
            background_color: [0, 0, 0, 0],
            coverage_threshold: default_coverage_threshold(),
            image_type: default_image_type(),
            omit_solitary: false,
            omit_everything: false,
            round_uvs: default_true(),
            round_unit: default_round_unit(),
            round_fuzz: default_round_fuzz(),
            generated_image_pattern: default_image_pattern(),
            map_dirname: default_map_dirname(),
            default_group: default_group_name(),
            groups: Vec::new(),
            textures: Vec::new(),
            assets: Vec::new(),
        }
    }
}

/// The subset of the configuration that invalidates existing palette layouts
/// when it changes between runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PackingParams {
    pub palette_width: u32,
    pub palette_height: u32,
    pub margin: u32,
    pub image_type: ImageType,
    pub background_color: [u8; 4],
}

impl PaletteConfig {
    /// Validates the configuration parameters.
    ///
    /// Returns an error if:
    /// - Palette dimensions are zero
    /// - The margin leaves no usable space
    /// - UV rounding or coverage settings are not positive
    /// - A group depends on an undeclared group
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::PalettizerError;

        if self.palette_width == 0 || self.palette_height == 0 {
            return Err(PalettizerError::InvalidDimensions {
                width: self.palette_width,
                height: self.palette_height,
            });
        }

        let total_margin = self.margin.saturating_mul(2);
        if total_margin >= self.palette_width || total_margin >= self.palette_height {
            return Err(PalettizerError::InvalidConfig(format!(
                "margin ({}) * 2 exceeds palette dimensions ({}x{})",
                self.margin, self.palette_width, self.palette_height
            )));
        }

        if self.round_uvs && !(self.round_unit > 0.0) {
            return Err(PalettizerError::InvalidConfig(format!(
                "round_unit must be positive, got {}",
                self.round_unit
            )));
        }
        if !(self.coverage_threshold > 0.0) {
            return Err(PalettizerError::InvalidConfig(format!(
                "coverage_threshold must be positive, got {}",
                self.coverage_threshold
            )));
        }

        for g in &self.groups {
            if g.name.is_empty() {
                return Err(PalettizerError::InvalidConfig("group with empty name".into()));
            }
            for dep in &g.depends_on {
                if !self.groups.iter().any(|other| &other.name == dep) {
                    return Err(PalettizerError::UnknownGroup(dep.clone()));
                }
            }
        }
        if let Some((group, dependency)) = self.find_dependency_cycle() {
            return Err(PalettizerError::DependencyCycle { group, dependency });
        }

        for t in &self.textures {
            if let Some(c) = t.channels {
                if !(1..=4).contains(&c) {
                    return Err(PalettizerError::InvalidConfig(format!(
                        "texture directive '{}': channels must be 1..=4, got {}",
                        t.pattern, c
                    )));
                }
            }
            if let Some(s) = t.scale {
                if !(s > 0.0) {
                    return Err(PalettizerError::InvalidConfig(format!(
                        "texture directive '{}': scale must be positive",
                        t.pattern
                    )));
                }
            }
        }

        Ok(())
    }

    /// The first declared dependency edge that closes a cycle, as
    /// `(group, dependency)`.
    fn find_dependency_cycle(&self) -> Option<(String, String)> {
        let mut edges: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for g in &self.groups {
            edges
                .entry(g.name.as_str())
                .or_default()
                .extend(g.depends_on.iter().map(String::as_str));
        }

        #[derive(PartialEq)]
        enum Mark {
            OnPath,
            Done,
        }
        fn visit<'a>(
            node: &'a str,
            edges: &BTreeMap<&'a str, Vec<&'a str>>,
            marks: &mut BTreeMap<&'a str, Mark>,
        ) -> Option<(String, String)> {
            marks.insert(node, Mark::OnPath);
            for &dep in edges.get(node).into_iter().flatten() {
                match marks.get(dep) {
                    Some(Mark::OnPath) => return Some((node.to_string(), dep.to_string())),
                    Some(Mark::Done) => {}
                    None => {
                        if let Some(cycle) = visit(dep, edges, marks) {
                            return Some(cycle);
                        }
                    }
                }
            }
            marks.insert(node, Mark::Done);
            None
        }

        let mut marks = BTreeMap::new();
        for &name in edges.keys() {
            if !marks.contains_key(name) {
                if let Some(cycle) = visit(name, &edges, &mut marks) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    pub fn packing_params(&self) -> PackingParams {
        PackingParams {
            palette_width: self.palette_width,
            palette_height: self.palette_height,
            margin: self.margin,
            image_type: self.image_type,
            background_color: self.background_color,
        }
    }
}

fn default_palette_dim() -> u32 {
    512
}
fn default_margin() -> u32 {
    2
}
fn default_coverage_threshold() -> f64 {
    2.5
}
fn default_image_type() -> ImageType {
    ImageType::Png
}
fn default_true() -> bool {
    true
}
fn default_round_unit() -> f64 {
    0.1
}
fn default_round_fuzz() -> f64 {
    0.01
}
fn default_image_pattern() -> String {
    "%g_palette_%p_%i".into()
}
fn default_map_dirname() -> String {
    "%g".into()
}
fn default_group_name() -> String {
    "default".into()
}

/// Builder for `PaletteConfig` for ergonomic construction.
#[derive(Debug, Default, Clone)]
pub struct PaletteConfigBuilder {
    cfg: PaletteConfig,
}

impl PaletteConfigBuilder {
    pub fn new() -> Self {
        Self {
            cfg: PaletteConfig::default(),
        }
    }
    pub fn with_palette_size(mut self, w: u32, h: u32) -> Self {
        self.cfg.palette_width = w;
        self.cfg.palette_height = h;
        self
    }
    pub fn margin(mut self, v: u32) -> Self {
        self.cfg.margin = v;
        self
    }
    pub fn background_color(mut self, v: [u8; 4]) -> Self {
        self.cfg.background_color = v;
        self
    }
    pub fn coverage_threshold(mut self, v: f64) -> Self {
        self.cfg.coverage_threshold = v;
        self
    }
    pub fn image_type(mut self, v: ImageType) -> Self {
        self.cfg.image_type = v;
        self
    }
    pub fn omit_solitary(mut self, v: bool) -> Self {
        self.cfg.omit_solitary = v;
        self
    }
    pub fn omit_everything(mut self, v: bool) -> Self {
        self.cfg.omit_everything = v;
        self
    }
    pub fn round_uvs(mut self, v: bool) -> Self {
        self.cfg.round_uvs = v;
        self
    }
    pub fn generated_image_pattern(mut self, v: impl Into<String>) -> Self {
        self.cfg.generated_image_pattern = v.into();
        self
    }
    pub fn map_dirname(mut self, v: impl Into<String>) -> Self {
        self.cfg.map_dirname = v.into();
        self
    }
    pub fn default_group(mut self, v: impl Into<String>) -> Self {
        self.cfg.default_group = v.into();
        self
    }
    /// Declares `name` (with `dirname`) depending on each of `depends_on`.
    pub fn group(mut self, name: &str, dirname: &str, depends_on: &[&str]) -> Self {
        self.cfg.groups.push(GroupDirective {
            name: name.to_string(),
            dirname: Some(dirname.to_string()),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            margin: None,
        });
        self
    }
    pub fn texture(mut self, directive: TextureDirective) -> Self {
        self.cfg.textures.push(directive);
        self
    }
    pub fn asset(mut self, pattern: &str, groups: &[&str]) -> Self {
        self.cfg.assets.push(AssetDirective {
            pattern: pattern.to_string(),
            groups: groups.iter().map(|s| s.to_string()).collect(),
        });
        self
    }
    pub fn build(self) -> PaletteConfig {
        self.cfg
    }
}

impl PaletteConfig {
    /// Create a fluent builder for `PaletteConfig`.
    pub fn builder() -> PaletteConfigBuilder {
        PaletteConfigBuilder::new()
    }
}
