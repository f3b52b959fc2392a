//! Error type shared by both rendering backends.

use thiserror::Error;

/// Errors surfaced by renderers, the texture cache and atlas parsing.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Texture cache overflow: requested unit {requested}, but only {available} texture units are available on this device")]
    TextureCacheOverflow { requested: usize, available: usize },

    #[error("Invalid surface size {width}x{height}")]
    InvalidSurfaceSize { width: u32, height: u32 },

    #[error("Unknown texture atlas format: '{app}'")]
    UnknownAtlasFormat { app: String },

    #[error("Malformed texture atlas: {0}")]
    InvalidAtlas(#[from] serde_json::Error),

    #[error("Texture atlas has no backing image")]
    EmptyAtlas,

    #[error("Region '{region}' not found in atlas '{atlas}'")]
    RegionNotFound { region: String, atlas: String },

    #[error("Image codec error: {0}")]
    Codec(#[from] image::ImageError),

    #[error("SVG parsing failed: {0}")]
    Svg(String),

    #[error("Graphics device creation failed: {0}")]
    DeviceCreation(String),

    #[error("Graphics context lost")]
    ContextLost,

    #[error("Frame readback failed: {0}")]
    Readback(String),
}

pub type Result<T> = std::result::Result<T, RenderError>;
