//! The low-level boundary the compositor drives.
//!
//! `GraphicsDevice` mirrors the handful of GL-style calls batching needs:
//! program selection, fixed-function state, texture units, vertex upload
//! and draws. The compositor owns all policy (when to flush, which unit a
//! texture lives in); a device only executes.

use bitflags::bitflags;

use crate::color::Color;
use crate::error::Result;
use crate::image::Image;
use crate::renderer::BlendMode;
use crate::texture::RepeatMode;

/// The two fixed shader programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Program {
    /// Textured, tinted quads read from the vertex stream.
    Quad,
    /// Flat-colored lines and triangles.
    Primitive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topology {
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
}

/// Opaque handle to a device texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Wrap {
    Clamp,
    Repeat,
}

/// Sampling state a texture is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureOptions {
    pub filter: Filter,
    pub wrap_u: Wrap,
    pub wrap_v: Wrap,
}

impl TextureOptions {
    pub fn new(anti_alias: bool, repeat: RepeatMode) -> Self {
        let wrap = |on: bool| if on { Wrap::Repeat } else { Wrap::Clamp };
        Self {
            filter: if anti_alias {
                Filter::Linear
            } else {
                Filter::Nearest
            },
            wrap_u: wrap(repeat.repeats_x()),
            wrap_v: wrap(repeat.repeats_y()),
        }
    }
}

impl Default for TextureOptions {
    fn default() -> Self {
        Self::new(false, RepeatMode::NoRepeat)
    }
}

/// What draws do with the stencil buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StencilMode {
    #[default]
    Disabled,
    /// Color writes are off; covered pixels set the stencil to 1.
    Write,
    /// Only pixels whose stencil is 1 are drawn.
    Test,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClearFlags: u8 {
        const COLOR = 0b01;
        const STENCIL = 0b10;
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait GraphicsDevice {
    /// Number of texture units the device can bind at once.
    fn max_texture_units(&self) -> usize;

    /// Whether the underlying context has been lost.
    fn is_lost(&self) -> bool;

    /// Compile the fixed programs. Called again on context restore, where
    /// every previously created texture is gone.
    fn init_programs(&mut self) -> Result<()>;

    /// Upload the static quad index buffer.
    fn upload_indices(&mut self, indices: &[u16]) -> Result<()>;

    fn set_viewport(&mut self, width: u32, height: u32);

    fn use_program(&mut self, program: Program);

    fn set_blend_mode(&mut self, mode: BlendMode);

    /// `[x, y, width, height]` in surface pixels, or `None` to disable.
    fn set_scissor(&mut self, rect: Option<[u32; 4]>);

    fn set_stencil(&mut self, mode: StencilMode);

    fn create_texture(&mut self, image: &Image, options: TextureOptions) -> Result<TextureHandle>;

    /// Replace a texture's pixels with `image`, which must match its size.
    fn update_texture(&mut self, texture: TextureHandle, image: &Image) -> Result<()>;

    /// Bind `texture` to `unit` and make that unit active.
    fn bind_texture(&mut self, unit: usize, texture: TextureHandle);

    fn delete_texture(&mut self, texture: TextureHandle);

    /// Replace the vertex buffer contents with `data`.
    fn upload_vertices(&mut self, data: &[u8]);

    /// Draw `index_count` indices from the static index buffer.
    fn draw_indexed(&mut self, topology: Topology, index_count: usize);

    /// Draw `vertex_count` vertices from the vertex buffer, unindexed.
    fn draw_arrays(&mut self, topology: Topology, vertex_count: usize);

    /// Clear the buffers in `flags`, limited to the scissor when one is set.
    fn clear(&mut self, color: Color, flags: ClearFlags);

    /// Submit everything recorded since the last call.
    fn end_frame(&mut self) -> Result<()>;

    /// Read the presented frame back into an image.
    fn read_pixels(&mut self) -> Result<Image>;
}
