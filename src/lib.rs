pub mod color;
pub mod config;
pub mod error;
pub mod geometry;
pub mod image;
pub mod pool;
pub mod surface;
pub mod text;
pub mod texture;
pub mod transform;

// Backends
pub mod gpu;
pub mod renderer;
pub mod software;

use log::{info, warn};

use config::{RendererConfig, RendererKind};
use error::Result;
use gpu::{GpuRenderer, WgpuDevice};
use renderer::Renderer;
use software::SoftwareRenderer;

pub mod prelude {
    pub use crate::color::Color;
    pub use crate::config::{RendererConfig, RendererKind};
    pub use crate::error::{RenderError, Result};
    pub use crate::geometry::{Ellipse, Line, Polygon, Rect, Shape, Vec2};
    pub use crate::image::Image;
    pub use crate::pool::{ObjectPool, Pool};
    pub use crate::renderer::{BlendMode, ImageDraw, Pattern, Renderer};
    pub use crate::text::TextStyle;
    pub use crate::texture::{RepeatMode, SpriteSheet, TextureAtlas, TextureCache};
    pub use crate::transform::Transform;
    pub use crate::{create_renderer, init_logging};
}

/// Install the `env_logger` backend, honoring `RUST_LOG`.
///
/// Safe to call more than once; only the first call has an effect.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

/// Build the backend `config.kind` asks for.
///
/// `Auto` tries the GPU first and falls back to the software renderer when
/// no adapter or device is available. An explicit `Gpu` request surfaces
/// the failure instead.
pub fn create_renderer(config: RendererConfig) -> Result<Box<dyn Renderer>> {
    match config.kind {
        RendererKind::Software => software(config),
        RendererKind::Gpu => gpu(config),
        RendererKind::Auto => match gpu(config.clone()) {
            Ok(renderer) => Ok(renderer),
            Err(err) => {
                warn!("GPU renderer unavailable ({}), falling back to software", err);
                software(config)
            }
        },
    }
}

fn gpu(config: RendererConfig) -> Result<Box<dyn Renderer>> {
    let device = WgpuDevice::new(config.width, config.height)?;
    let renderer = GpuRenderer::new(device, config)?;
    info!(
        "Using GPU renderer ({}x{})",
        renderer.width(),
        renderer.height()
    );
    Ok(Box::new(renderer))
}

fn software(config: RendererConfig) -> Result<Box<dyn Renderer>> {
    let renderer = SoftwareRenderer::new(config)?;
    info!(
        "Using software renderer ({}x{})",
        renderer.width(),
        renderer.height()
    );
    Ok(Box::new(renderer))
}
