use crate::config::{AssetDirective, PaletteConfig, TextureDirective};
use crate::error::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};

/// Glob-matched texture and asset directives, compiled once per session.
///
/// When several patterns match a name, the one listed first in the
/// configuration wins.
#[derive(Debug, Clone)]
pub struct DirectiveSet {
    texture_globs: GlobSet,
    textures: Vec<TextureDirective>,
    asset_globs: GlobSet,
    assets: Vec<AssetDirective>,
}

impl DirectiveSet {
    pub fn compile(config: &PaletteConfig) -> Result<Self> {
        let mut tb = GlobSetBuilder::new();
        for t in &config.textures {
            tb.add(Glob::new(&t.pattern)?);
        }
        let mut ab = GlobSetBuilder::new();
        for a in &config.assets {
            ab.add(Glob::new(&a.pattern)?);
        }
        Ok(Self {
            texture_globs: tb.build()?,
            textures: config.textures.clone(),
            asset_globs: ab.build()?,
            assets: config.assets.clone(),
        })
    }

    pub fn texture(&self, name: &str) -> Option<&TextureDirective> {
        first_match(&self.texture_globs, name).map(|i| &self.textures[i])
    }

    pub fn asset(&self, name: &str) -> Option<&AssetDirective> {
        first_match(&self.asset_globs, name).map(|i| &self.assets[i])
    }
}

impl Default for DirectiveSet {
    fn default() -> Self {
        Self {
            texture_globs: GlobSet::empty(),
            textures: Vec::new(),
            asset_globs: GlobSet::empty(),
            assets: Vec::new(),
        }
    }
}

fn first_match(set: &GlobSet, name: &str) -> Option<usize> {
    set.matches(name).into_iter().min()
}
