use thiserror::Error;

#[derive(Debug, Error)]
pub enum PalettizerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid glob pattern: {0}")]
    Glob(#[from] globset::Error),
    #[error("Invalid palette dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Group '{group}' cannot depend on '{dependency}': dependency cycle")]
    DependencyCycle { group: String, dependency: String },
    #[error("Unknown group: {0}")]
    UnknownGroup(String),
    #[error("Session store version {found} is not supported (expected {min}..={max})")]
    StoreVersion { found: u32, min: u32, max: u32 },
    #[error("Corrupt session store: {0}")]
    CorruptStore(String),
    #[error("Failed to scan asset '{name}': {reason}")]
    AssetScan { name: String, reason: String },
}

pub type Result<T> = std::result::Result<T, PalettizerError>;
