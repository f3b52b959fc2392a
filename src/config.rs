use crate::color::Color;
use crate::renderer::BlendMode;

/// Default number of quads a compositor buffers before it must flush.
///
/// Bounded by the 16-bit index buffer: `4 * 16000` vertices fit in a `u16`.
pub const DEFAULT_MAX_BATCH: usize = 16000;

/// Which backend [`create_renderer`](crate::create_renderer) should build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RendererKind {
    /// Try the GPU backend first and fall back to software.
    #[default]
    Auto,
    Gpu,
    Software,
}

/// Settings shared by both backends.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    pub width: u32,
    pub height: u32,
    pub kind: RendererKind,
    /// Draw into a back buffer and blit it to the front on `flush()`.
    pub double_buffering: bool,
    pub anti_alias: bool,
    /// The front surface has an alpha channel.
    pub transparent: bool,
    /// When false, image destinations are snapped to whole pixels.
    pub sub_pixel: bool,
    /// Inset texture regions by half a texel when anti-aliasing is off.
    pub texture_seam_fix: bool,
    pub blend_mode: BlendMode,
    pub max_batch: usize,
    /// Restrict repeat wrapping to power-of-two textures.
    pub legacy_pot: bool,
    /// Log per-frame batch statistics at info level.
    pub verbose: bool,
    pub background: Color,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            kind: RendererKind::Auto,
            double_buffering: false,
            anti_alias: false,
            transparent: false,
            sub_pixel: false,
            texture_seam_fix: true,
            blend_mode: BlendMode::Normal,
            max_batch: DEFAULT_MAX_BATCH,
            legacy_pot: false,
            verbose: false,
            background: Color::BLACK,
        }
    }
}

impl RendererConfig {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    pub fn kind(mut self, kind: RendererKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn double_buffering(mut self, enabled: bool) -> Self {
        self.double_buffering = enabled;
        self
    }

    pub fn anti_alias(mut self, enabled: bool) -> Self {
        self.anti_alias = enabled;
        self
    }

    pub fn transparent(mut self, enabled: bool) -> Self {
        self.transparent = enabled;
        self
    }

    pub fn sub_pixel(mut self, enabled: bool) -> Self {
        self.sub_pixel = enabled;
        self
    }

    pub fn texture_seam_fix(mut self, enabled: bool) -> Self {
        self.texture_seam_fix = enabled;
        self
    }

    pub fn blend_mode(mut self, mode: BlendMode) -> Self {
        self.blend_mode = mode;
        self
    }

    pub fn max_batch(mut self, quads: usize) -> Self {
        self.max_batch = quads.clamp(1, DEFAULT_MAX_BATCH);
        self
    }

    pub fn legacy_pot(mut self, enabled: bool) -> Self {
        self.legacy_pot = enabled;
        self
    }

    pub fn verbose(mut self, enabled: bool) -> Self {
        self.verbose = enabled;
        self
    }

    pub fn background(mut self, color: Color) -> Self {
        self.background = color;
        self
    }

    /// Texel inset applied to atlas regions.
    pub fn uv_offset(&self) -> f32 {
        if self.texture_seam_fix && !self.anti_alias {
            1.0
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uv_offset_only_without_antialias() {
        let config = RendererConfig::default();
        assert_eq!(config.uv_offset(), 1.0);
        assert_eq!(config.clone().anti_alias(true).uv_offset(), 0.0);
        assert_eq!(config.texture_seam_fix(false).uv_offset(), 0.0);
    }

    #[test]
    fn test_max_batch_is_clamped_to_index_range() {
        assert_eq!(RendererConfig::default().max_batch(0).max_batch, 1);
        assert_eq!(
            RendererConfig::default().max_batch(1_000_000).max_batch,
            DEFAULT_MAX_BATCH
        );
    }
}
