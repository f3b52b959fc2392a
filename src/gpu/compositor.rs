//! The batching engine behind the GPU renderer.
//!
//! Quads accumulate in a vertex stream and go out as one indexed draw per
//! batch. A batch ends whenever anything the draw depends on changes:
//! program, blend mode, scissor, stencil mode, the active texture unit or
//! the texture bound to it. Primitives are never batched.

use std::collections::HashMap;

use log::debug;

use crate::color::Color;
use crate::config::{RendererConfig, DEFAULT_MAX_BATCH};
use crate::error::Result;
use crate::geometry::{Rect, Vec2};
use crate::image::{Image, ImageId};
use crate::renderer::{BlendMode, ALPHA_THRESHOLD};
use crate::texture::TextureCache;
use crate::transform::Transform;

use super::device::{
    ClearFlags, GraphicsDevice, Program, StencilMode, TextureHandle, TextureOptions, Topology,
};
use super::stream::{build_quad_indices, PrimitiveVertex, QuadVertex, VertexStream};

/// Quads the stream holds before its first growth.
const INITIAL_QUADS: usize = 256;

/// Counters accumulated between two [`Compositor::take_stats`] calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub draw_calls: usize,
    pub quads: usize,
    pub primitives: usize,
}

/// Blend modes the GPU pipeline can express; the rest draw as `Normal`.
pub fn supported_blend(mode: BlendMode) -> BlendMode {
    match mode {
        BlendMode::Screen => BlendMode::Normal,
        other => other,
    }
}

pub struct Compositor<D: GraphicsDevice> {
    device: D,
    max_batch: usize,
    anti_alias: bool,
    default_blend: BlendMode,
    width: u32,
    height: u32,
    quads: VertexStream<QuadVertex>,
    primitives: VertexStream<PrimitiveVertex>,
    /// Quads currently buffered.
    count: usize,
    program: Option<Program>,
    blend: BlendMode,
    scissor: Option<[u32; 4]>,
    stencil: StencilMode,
    active_unit: Option<usize>,
    bound: Vec<Option<TextureHandle>>,
    textures: HashMap<ImageId, TextureHandle>,
    stats: BatchStats,
}

impl<D: GraphicsDevice> Compositor<D> {
    pub fn new(device: D, settings: &RendererConfig) -> Result<Self> {
        // one quad at least, and every vertex must stay addressable by a u16 index
        let max_batch = settings.max_batch.clamp(1, DEFAULT_MAX_BATCH);
        let mut compositor = Self {
            device,
            max_batch,
            anti_alias: settings.anti_alias,
            default_blend: supported_blend(settings.blend_mode),
            width: settings.width,
            height: settings.height,
            quads: VertexStream::with_capacity(INITIAL_QUADS.min(max_batch) * 4),
            primitives: VertexStream::with_capacity(64),
            count: 0,
            program: None,
            blend: BlendMode::Normal,
            scissor: None,
            stencil: StencilMode::Disabled,
            active_unit: None,
            bound: Vec::new(),
            textures: HashMap::new(),
            stats: BatchStats::default(),
        };
        compositor.init()?;
        Ok(compositor)
    }

    /// Bring the device and every cached binding to a known initial state.
    fn init(&mut self) -> Result<()> {
        self.device.init_programs()?;
        self.device
            .upload_indices(&build_quad_indices(self.max_batch))?;
        self.device.set_viewport(self.width, self.height);
        self.device.set_blend_mode(self.default_blend);

        self.quads.reset();
        self.primitives.reset();
        self.count = 0;
        self.program = None;
        self.blend = self.default_blend;
        self.scissor = None;
        self.stencil = StencilMode::Disabled;
        self.active_unit = None;
        self.bound = vec![None; self.device.max_texture_units()];
        self.textures.clear();
        debug!(
            "Compositor initialized: {} quads per batch, {} texture units",
            self.max_batch,
            self.bound.len()
        );
        Ok(())
    }

    /// Rebuild programs, index buffer and stream after a context restore.
    ///
    /// Device textures are gone at this point; they are recreated lazily on
    /// their next use.
    pub fn reinitialize(&mut self) -> Result<()> {
        self.init()
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Quads waiting for the next flush.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn max_batch(&self) -> usize {
        self.max_batch
    }

    pub fn blend_mode(&self) -> BlendMode {
        self.blend
    }

    pub fn stats(&self) -> BatchStats {
        self.stats
    }

    pub fn take_stats(&mut self) -> BatchStats {
        std::mem::take(&mut self.stats)
    }

    /// Draw every buffered quad with a single indexed call.
    pub fn flush(&mut self) {
        if self.count == 0 {
            return;
        }
        self.device.upload_vertices(self.quads.as_bytes());
        self.device
            .draw_indexed(Topology::TriangleList, self.count * 6);
        self.stats.draw_calls += 1;
        self.stats.quads += self.count;
        self.count = 0;
        self.quads.reset();
    }

    pub fn use_program(&mut self, program: Program) {
        if self.program == Some(program) {
            return;
        }
        self.flush();
        self.device.use_program(program);
        self.program = Some(program);
    }

    /// Switch blending, returning the mode actually in effect.
    pub fn set_blend_mode(&mut self, mode: BlendMode) -> BlendMode {
        let mode = supported_blend(mode);
        if mode != self.blend {
            self.flush();
            self.device.set_blend_mode(mode);
            self.blend = mode;
        }
        mode
    }

    pub fn set_scissor(&mut self, rect: Option<[u32; 4]>) {
        if rect == self.scissor {
            return;
        }
        self.flush();
        self.device.set_scissor(rect);
        self.scissor = rect;
    }

    pub fn scissor(&self) -> Option<[u32; 4]> {
        self.scissor
    }

    pub fn stencil(&self) -> StencilMode {
        self.stencil
    }

    pub fn set_stencil(&mut self, mode: StencilMode) {
        if mode == self.stencil {
            return;
        }
        self.flush();
        self.device.set_stencil(mode);
        self.stencil = mode;
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.flush();
        self.width = width;
        self.height = height;
        self.device.set_viewport(width, height);
    }

    /// Clear the buffers in `flags` after drawing whatever is pending.
    pub fn clear(&mut self, color: Color, flags: ClearFlags) {
        self.flush();
        self.device.clear(color, flags);
    }

    fn bind(&mut self, unit: usize, texture: TextureHandle) {
        if unit >= self.bound.len() {
            self.bound.resize(unit + 1, None);
        }
        if self.bound[unit] != Some(texture) {
            self.flush();
            self.device.bind_texture(unit, texture);
            self.bound[unit] = Some(texture);
            self.active_unit = Some(unit);
        } else if self.active_unit != Some(unit) {
            self.flush();
            self.device.bind_texture(unit, texture);
            self.active_unit = Some(unit);
        }
    }

    /// Make `image` resident on its texture unit and active.
    ///
    /// `force` re-uploads the pixels of an already resident texture; quads
    /// buffered against the old contents are drawn first.
    pub fn upload_texture(
        &mut self,
        cache: &mut TextureCache,
        image: &Image,
        force: bool,
    ) -> Result<usize> {
        let repeat = cache.get(image)?.repeat();
        let unit = cache.unit(image)?;
        let texture = match self.textures.get(&image.id()).copied() {
            Some(texture) => {
                if force {
                    self.flush();
                    self.device.update_texture(texture, image)?;
                }
                texture
            }
            None => {
                let options =
                    TextureOptions::new(self.anti_alias, cache.effective_repeat(image, repeat));
                let texture = self.device.create_texture(image, options)?;
                debug!(
                    "Uploaded {} ({}x{}) to unit {}",
                    image.label(),
                    image.width(),
                    image.height(),
                    unit
                );
                self.textures.insert(image.id(), texture);
                texture
            }
        };
        self.bind(unit, texture);
        Ok(unit)
    }

    /// Delete every device texture; the next use uploads again.
    pub fn release_textures(&mut self) {
        self.flush();
        for (_, texture) in self.textures.drain() {
            self.device.delete_texture(texture);
        }
        self.bound.iter_mut().for_each(|slot| *slot = None);
        self.active_unit = None;
    }

    /// Buffer one textured quad covering `dest`.
    ///
    /// `key` names a region of the atlas holding `image`, or is a literal
    /// `"x,y,w,h"` sub-rectangle.
    pub fn add_quad(
        &mut self,
        cache: &mut TextureCache,
        image: &Image,
        key: &str,
        dest: Rect,
        tint: Color,
        view: &Transform,
    ) -> Result<()> {
        if tint.a < ALPHA_THRESHOLD {
            return Ok(());
        }
        let (uvs, page) = {
            let atlas = cache.get(image)?;
            let region = atlas.resolve(key)?.clone();
            let page = atlas
                .texture_for(&region)
                .cloned()
                .unwrap_or_else(|| image.clone());
            (region.uvs, page)
        };
        self.add_quad_uvs(cache, &page, uvs, dest, tint, view)
    }

    /// Buffer one quad sampling `uvs` of `image` directly, without going
    /// through a named region.
    pub fn add_quad_uvs(
        &mut self,
        cache: &mut TextureCache,
        image: &Image,
        uvs: [f32; 4],
        dest: Rect,
        tint: Color,
        view: &Transform,
    ) -> Result<()> {
        if tint.a < ALPHA_THRESHOLD {
            return Ok(());
        }

        self.use_program(Program::Quad);
        if self.count >= self.max_batch {
            self.flush();
        }
        self.upload_texture(cache, image, false)?;

        let [u0, v0, u1, v1] = uvs;
        let color = tint.premultiplied();
        let corners = [
            (dest.left(), dest.top(), u0, v0),
            (dest.right(), dest.top(), u1, v0),
            (dest.left(), dest.bottom(), u0, v1),
            (dest.right(), dest.bottom(), u1, v1),
        ];
        let identity = view.is_identity();
        for (x, y, u, v) in corners {
            let (x, y) = if identity { (x, y) } else { view.apply(x, y) };
            self.quads.push(QuadVertex {
                position: [x, y],
                uv: [u, v],
                color,
            });
        }
        self.count += 1;
        Ok(())
    }

    /// Draw flat-colored geometry immediately.
    pub fn draw_vertices(
        &mut self,
        topology: Topology,
        points: &[Vec2],
        color: Color,
        view: &Transform,
    ) {
        if points.is_empty() {
            return;
        }
        self.use_program(Program::Primitive);

        let color = color.premultiplied();
        let identity = view.is_identity();
        self.primitives.reset();
        for p in points {
            let (x, y) = if identity {
                (p.x, p.y)
            } else {
                view.apply(p.x, p.y)
            };
            self.primitives.push(PrimitiveVertex {
                position: [x, y],
                color,
            });
        }
        self.device.upload_vertices(self.primitives.as_bytes());
        self.device.draw_arrays(topology, points.len());
        self.stats.draw_calls += 1;
        self.stats.primitives += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::device::MockGraphicsDevice;
    use crate::gpu::recording::{DeviceCall, RecordingDevice};
    use mockall::predicate::eq;

    fn image(size: u32) -> Image {
        Image::new(size, size).unwrap()
    }

    fn compositor(max_batch: usize) -> (Compositor<RecordingDevice>, TextureCache) {
        let device = RecordingDevice::new(4);
        let config = RendererConfig::new(100, 100).max_batch(max_batch);
        let compositor = Compositor::new(device, &config).unwrap();
        (compositor, TextureCache::new(4))
    }

    fn quad(c: &mut Compositor<RecordingDevice>, cache: &mut TextureCache, img: &Image) {
        c.add_quad(
            cache,
            img,
            "default",
            Rect::new(0.0, 0.0, 4.0, 4.0),
            Color::WHITE,
            &Transform::IDENTITY,
        )
        .unwrap();
    }

    fn draws(c: &Compositor<RecordingDevice>) -> usize {
        c.device().log().borrow().iter().filter(|call| call.is_draw()).count()
    }

    #[test]
    fn test_init_sequence() {
        let (c, _) = compositor(10);
        assert_eq!(
            *c.device().log().borrow(),
            vec![
                DeviceCall::InitPrograms,
                DeviceCall::UploadIndices(60),
                DeviceCall::SetViewport(100, 100),
                DeviceCall::SetBlendMode(BlendMode::Normal),
            ]
        );
    }

    #[test]
    fn test_batch_size_is_clamped_when_set_directly() {
        let mut config = RendererConfig::new(100, 100);
        config.max_batch = 0;
        let mut c = Compositor::new(RecordingDevice::new(4), &config).unwrap();
        let mut cache = TextureCache::new(4);
        let img = image(4);
        assert_eq!(c.max_batch(), 1);
        quad(&mut c, &mut cache, &img);
        quad(&mut c, &mut cache, &img);
        assert_eq!(c.count(), 1);
        assert_eq!(draws(&c), 1);

        config.max_batch = 20_000;
        let c = Compositor::new(RecordingDevice::new(4), &config).unwrap();
        assert_eq!(c.max_batch(), DEFAULT_MAX_BATCH);
        assert_eq!(
            c.device().log().borrow()[1],
            DeviceCall::UploadIndices(DEFAULT_MAX_BATCH * 6)
        );
    }

    #[test]
    fn test_full_batch_flushes_before_next_quad() {
        let (mut c, mut cache) = compositor(2);
        let img = image(4);
        quad(&mut c, &mut cache, &img);
        quad(&mut c, &mut cache, &img);
        assert_eq!(c.count(), 2);
        assert_eq!(draws(&c), 0);

        quad(&mut c, &mut cache, &img);
        assert_eq!(c.count(), 1);
        assert_eq!(draws(&c), 1);
    }

    #[test]
    fn test_flush_is_idempotent() {
        let (mut c, mut cache) = compositor(8);
        quad(&mut c, &mut cache, &image(4));
        c.flush();
        c.flush();
        assert_eq!(draws(&c), 1);
        assert_eq!(c.count(), 0);
    }

    #[test]
    fn test_texture_switch_flushes() {
        let (mut c, mut cache) = compositor(8);
        quad(&mut c, &mut cache, &image(4));
        quad(&mut c, &mut cache, &image(4));
        assert_eq!(draws(&c), 1);
        assert_eq!(c.count(), 1);
    }

    #[test]
    fn test_transparent_quads_are_skipped() {
        let (mut c, mut cache) = compositor(8);
        c.add_quad(
            &mut cache,
            &image(4),
            "default",
            Rect::new(0.0, 0.0, 4.0, 4.0),
            Color::rgba(1.0, 1.0, 1.0, 0.001),
            &Transform::IDENTITY,
        )
        .unwrap();
        assert_eq!(c.count(), 0);
        assert_eq!(cache.units_in_use(), 0);
    }

    #[test]
    fn test_quad_corners_follow_view() {
        let (mut c, mut cache) = compositor(8);
        c.add_quad(
            &mut cache,
            &image(4),
            "default",
            Rect::new(0.0, 0.0, 2.0, 3.0),
            Color::WHITE,
            &Transform::translate(10.0, 20.0),
        )
        .unwrap();
        c.flush();
        let log = c.device().log();
        let floats = log
            .borrow()
            .iter()
            .find_map(|call| match call {
                DeviceCall::UploadVertices(f) => Some(f.clone()),
                _ => None,
            })
            .unwrap();
        let positions: Vec<(f32, f32)> = floats.chunks(8).map(|v| (v[0], v[1])).collect();
        assert_eq!(
            positions,
            vec![(10.0, 20.0), (12.0, 20.0), (10.0, 23.0), (12.0, 23.0)]
        );
    }

    #[test]
    fn test_redundant_state_is_not_sent() {
        let (mut c, _) = compositor(8);
        let before = c.device().log().borrow().len();
        c.set_blend_mode(BlendMode::Normal);
        c.set_scissor(None);
        c.set_stencil(StencilMode::Disabled);
        assert_eq!(c.device().log().borrow().len(), before);
        assert_eq!(c.set_blend_mode(BlendMode::Screen), BlendMode::Normal);
    }

    #[test]
    fn test_primitives_draw_immediately() {
        let mut device = MockGraphicsDevice::new();
        device.expect_init_programs().times(1).returning(|| Ok(()));
        device.expect_upload_indices().times(1).returning(|_| Ok(()));
        device.expect_set_viewport().return_const(());
        device.expect_set_blend_mode().return_const(());
        device.expect_max_texture_units().return_const(8usize);
        device
            .expect_use_program()
            .with(eq(Program::Primitive))
            .times(1)
            .return_const(());
        device.expect_upload_vertices().times(2).return_const(());
        device
            .expect_draw_arrays()
            .with(eq(Topology::LineList), eq(2))
            .times(2)
            .return_const(());

        let mut c = Compositor::new(device, &RendererConfig::new(10, 10)).unwrap();
        let points = [Vec2::new(0.0, 0.0), Vec2::new(5.0, 5.0)];
        c.draw_vertices(Topology::LineList, &points, Color::WHITE, &Transform::IDENTITY);
        c.draw_vertices(Topology::LineList, &points, Color::WHITE, &Transform::IDENTITY);
        assert_eq!(c.stats().primitives, 2);
    }
}
