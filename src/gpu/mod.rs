//! Batched GPU backend.
//!
//! [`GpuRenderer`] turns the drawing contract into compositor calls: images,
//! patterns and text become textured quads that batch together, shapes
//! become immediate primitive draws. The device underneath is any
//! [`GraphicsDevice`], so the whole stack runs headless on a
//! [`RecordingDevice`] in tests.

pub mod compositor;
pub mod context;
pub mod device;
pub mod recording;
pub mod stream;
pub mod wgpu_device;

use log::{debug, info, warn};
use resvg::tiny_skia::{self, Paint, PixmapPaint};

use crate::color::Color;
use crate::config::{RendererConfig, RendererKind};
use crate::error::{RenderError, Result};
use crate::geometry::{triangulate, Line, Polygon, Rect, Shape, Vec2};
use crate::image::Image;
use crate::pool::{ObjectPool, Pool};
use crate::renderer::{
    arc_points, ellipse_points, place_region, BlendMode, ClipChange, ImageDraw, Pattern,
    RenderState, Renderer, ALPHA_THRESHOLD,
};
use crate::text::{TextRasterizer, TextStyle};
use crate::texture::atlas::DEFAULT_REGION;
use crate::texture::{compute_uvs, region_key, RepeatMode, TextureAtlas, TextureCache};
use crate::transform::Transform;

pub use compositor::{BatchStats, Compositor};
pub use context::ContextState;
pub use device::{
    ClearFlags, Filter, GraphicsDevice, Program, StencilMode, TextureHandle, TextureOptions,
    Topology, Wrap,
};
pub use recording::{CallLog, DeviceCall, RecordingDevice};
pub use stream::{PrimitiveVertex, QuadVertex, VertexStream};
pub use wgpu_device::WgpuDevice;

pub struct GpuRenderer<D: GraphicsDevice, P: ObjectPool = Pool> {
    settings: RendererConfig,
    state: RenderState,
    compositor: Compositor<D>,
    cache: TextureCache,
    pool: P,
    context: ContextState,
    /// Staging image text is rasterized into before upload. Sized to the
    /// canvas at construction; larger text blocks are cropped to it.
    font: Image,
    text: Option<TextRasterizer>,
    mask_active: bool,
}

impl<D: GraphicsDevice> GpuRenderer<D, Pool> {
    pub fn new(device: D, settings: RendererConfig) -> Result<Self> {
        Self::with_pool(device, settings, Pool::new())
    }
}

impl<D: GraphicsDevice, P: ObjectPool> GpuRenderer<D, P> {
    pub fn with_pool(device: D, settings: RendererConfig, pool: P) -> Result<Self> {
        if settings.width == 0 || settings.height == 0 {
            return Err(RenderError::InvalidSurfaceSize {
                width: settings.width,
                height: settings.height,
            });
        }
        let cache = TextureCache::new(device.max_texture_units())
            .with_uv_offset(settings.uv_offset())
            .with_legacy_pot(settings.legacy_pot);
        let compositor = Compositor::new(device, &settings)?;
        let font = Image::new(settings.width, settings.height)?.with_name("font");

        let mut state = RenderState::new(settings.width, settings.height);
        state.blend_mode = compositor.blend_mode();

        debug!(
            "GPU renderer {}x{} ({} texture units, {} quads per batch)",
            settings.width,
            settings.height,
            cache.max_units(),
            settings.max_batch
        );

        Ok(Self {
            settings,
            state,
            compositor,
            cache,
            pool,
            context: ContextState::Active,
            font,
            text: None,
            mask_active: false,
        })
    }

    pub fn device(&self) -> &D {
        self.compositor.device()
    }

    pub fn compositor(&self) -> &Compositor<D> {
        &self.compositor
    }

    pub fn cache(&self) -> &TextureCache {
        &self.cache
    }

    pub fn context_state(&self) -> ContextState {
        self.context
    }

    /// Counters accumulated since the last `flush()`.
    pub fn stats(&self) -> BatchStats {
        self.compositor.stats()
    }

    /// Mark the context as lost; every draw fails until it is restored.
    pub fn lose_context(&mut self) {
        self.context.lose();
    }

    /// Rebuild every GPU resource after a context loss.
    ///
    /// Atlases survive on the CPU side and are uploaded again on their next
    /// use. The logical state goes back to its defaults. Does nothing unless
    /// the context is lost.
    pub fn restore_context(&mut self) -> Result<()> {
        if self.device().is_lost() {
            self.context.lose();
        }
        if !self.context.begin_restore() {
            return Ok(());
        }
        if let Err(err) = self.compositor.reinitialize() {
            self.context.lose();
            return Err(err);
        }
        self.cache.reinitialize();
        self.font.pixmap_mut().fill(tiny_skia::Color::TRANSPARENT);
        self.state.reset();
        self.state.blend_mode = self.compositor.blend_mode();
        self.mask_active = false;
        self.context.finish_restore();
        Ok(())
    }

    fn ensure_active(&mut self) -> Result<()> {
        if self.device().is_lost() {
            self.context.lose();
        }
        self.context.check()
    }

    fn visible(&self) -> bool {
        self.state.color.a >= ALPHA_THRESHOLD
    }

    /// Build geometry into a pooled scratch vector and draw it right away.
    fn primitive(&mut self, color: Color, build: impl FnOnce(&mut Vec<Vec2>) -> Topology) {
        let mut points: Vec<Vec2> = self.pool.acquire();
        let topology = build(&mut points);
        let view = self.state.transform;
        self.compositor
            .draw_vertices(topology, &points, color, &view);
        self.pool.release(points);
    }

    fn fill_shape(&mut self, shape: &Shape, color: Color) {
        match shape {
            Shape::Rect(r) => {
                let (x, y, w, h) = (r.x, r.y, r.width, r.height);
                self.primitive(color, |out| rect_vertices(x, y, w, h, true, out));
            }
            Shape::Polygon(p) => {
                self.primitive(color, |out| polygon_vertices(p.world_points(), true, out))
            }
            Shape::Line(l) => {
                self.primitive(color, |out| polygon_vertices(l.world_points(), true, out))
            }
            Shape::Ellipse(e) => {
                let (x, y, w, h) = (e.center.x, e.center.y, e.radius_x, e.radius_y);
                self.primitive(color, |out| ellipse_vertices(x, y, w, h, true, out));
            }
        }
    }

    fn apply_scissor(&mut self) {
        let rect = self
            .state
            .scissor
            .map(|s| s.pixels(self.state.width(), self.state.height()));
        self.compositor.set_scissor(rect);
    }

    /// Region key covering `src` of `image`, naming the default region when
    /// the whole image is drawn.
    fn image_key(&mut self, image: &Image, src: Rect) -> Result<String> {
        let whole = src == Rect::new(0.0, 0.0, image.width() as f32, image.height() as f32);
        if whole && self.cache.get(image)?.region(DEFAULT_REGION).is_some() {
            return Ok(DEFAULT_REGION.to_string());
        }
        Ok(region_key(src.x, src.y, src.width, src.height))
    }

    fn text_rasterizer(&mut self) -> &mut TextRasterizer {
        self.text.get_or_insert_with(TextRasterizer::new)
    }
}

fn rect_vertices(x: f32, y: f32, w: f32, h: f32, fill: bool, out: &mut Vec<Vec2>) -> Topology {
    if fill {
        out.extend([
            Vec2::new(x + w, y),
            Vec2::new(x, y),
            Vec2::new(x + w, y + h),
            Vec2::new(x, y + h),
        ]);
        Topology::TriangleStrip
    } else {
        out.extend([
            Vec2::new(x, y),
            Vec2::new(x + w, y),
            Vec2::new(x + w, y + h),
            Vec2::new(x, y + h),
            Vec2::new(x, y),
        ]);
        Topology::LineStrip
    }
}

fn polygon_vertices(
    points: impl IntoIterator<Item = Vec2>,
    fill: bool,
    out: &mut Vec<Vec2>,
) -> Topology {
    let points: Vec<Vec2> = points.into_iter().collect();
    if fill {
        out.extend(triangulate(&points).into_iter().map(|i| points[i]));
        Topology::TriangleList
    } else {
        out.extend_from_slice(&points);
        if let Some(first) = points.first() {
            out.push(*first);
        }
        Topology::LineStrip
    }
}

/// A triangle fan around `hub`, expanded into a triangle list.
fn fan(hub: Vec2, rim: &[Vec2], closed: bool, out: &mut Vec<Vec2>) {
    for pair in rim.windows(2) {
        out.extend([hub, pair[0], pair[1]]);
    }
    if closed {
        if let (Some(last), Some(first)) = (rim.last(), rim.first()) {
            out.extend([hub, *last, *first]);
        }
    }
}

fn ellipse_vertices(x: f32, y: f32, w: f32, h: f32, fill: bool, out: &mut Vec<Vec2>) -> Topology {
    let points = ellipse_points(x, y, w, h);
    if fill {
        fan(Vec2::new(x, y), &points, true, out);
        Topology::TriangleList
    } else {
        out.extend_from_slice(&points);
        out.push(points[0]);
        Topology::LineStrip
    }
}

impl<D: GraphicsDevice, P: ObjectPool> Renderer for GpuRenderer<D, P> {
    fn kind(&self) -> RendererKind {
        RendererKind::Gpu
    }

    fn settings(&self) -> &RendererConfig {
        &self.settings
    }

    fn state(&self) -> &RenderState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut RenderState {
        &mut self.state
    }

    fn is_context_valid(&self) -> bool {
        self.context.is_active() && !self.device().is_lost()
    }

    fn restore(&mut self) {
        if self.state.restore() {
            self.apply_scissor();
        }
        if self.mask_active {
            self.compositor.set_stencil(StencilMode::Disabled);
            self.mask_active = false;
        }
    }

    fn set_blend_mode(&mut self, mode: BlendMode) {
        self.state.blend_mode = self.compositor.set_blend_mode(mode);
    }

    fn clip_rect(&mut self, x: f32, y: f32, width: f32, height: f32) -> Result<()> {
        self.ensure_active()?;
        match self.state.set_clip(x, y, width, height) {
            ClipChange::Unchanged => {}
            ClipChange::Set(_) | ClipChange::Cleared => self.apply_scissor(),
        }
        Ok(())
    }

    fn set_mask(&mut self, shape: &Shape) -> Result<()> {
        self.ensure_active()?;
        self.compositor.set_stencil(StencilMode::Disabled);
        self.compositor.clear(Color::TRANSPARENT, ClearFlags::STENCIL);
        self.compositor.set_stencil(StencilMode::Write);
        self.fill_shape(shape, Color::WHITE);
        self.compositor.set_stencil(StencilMode::Test);
        self.mask_active = true;
        Ok(())
    }

    fn clear_mask(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.compositor.set_stencil(StencilMode::Disabled);
        self.mask_active = false;
        Ok(())
    }

    fn stroke_rect(&mut self, x: f32, y: f32, width: f32, height: f32, fill: bool) -> Result<()> {
        self.ensure_active()?;
        if !self.visible() {
            return Ok(());
        }
        let color = self.state.color;
        self.primitive(color, |out| rect_vertices(x, y, width, height, fill, out));
        Ok(())
    }

    fn stroke_polygon(&mut self, polygon: &Polygon, fill: bool) -> Result<()> {
        self.ensure_active()?;
        if !self.visible() || polygon.points.len() < 2 {
            return Ok(());
        }
        let color = self.state.color;
        self.primitive(color, |out| {
            polygon_vertices(polygon.world_points(), fill, out)
        });
        Ok(())
    }

    fn stroke_polyline(&mut self, line: &Line) -> Result<()> {
        self.ensure_active()?;
        if !self.visible() || line.points.len() < 2 {
            return Ok(());
        }
        let color = self.state.color;
        self.primitive(color, |out| {
            out.extend(line.world_points());
            if out.len() == 2 {
                Topology::LineList
            } else {
                Topology::LineStrip
            }
        });
        Ok(())
    }

    fn stroke_ellipse(&mut self, x: f32, y: f32, w: f32, h: f32, fill: bool) -> Result<()> {
        self.ensure_active()?;
        if !self.visible() {
            return Ok(());
        }
        let color = self.state.color;
        self.primitive(color, |out| ellipse_vertices(x, y, w, h, fill, out));
        Ok(())
    }

    fn stroke_arc(
        &mut self,
        x: f32,
        y: f32,
        radius: f32,
        start: f32,
        end: f32,
        anticlockwise: bool,
        fill: bool,
    ) -> Result<()> {
        self.ensure_active()?;
        if !self.visible() {
            return Ok(());
        }
        let color = self.state.color;
        let points = arc_points(x, y, radius, start, end, anticlockwise);
        self.primitive(color, |out| {
            if fill {
                // fanned from the first point, so the open side closes as a chord
                fan(points[0], &points[1..], false, out);
                Topology::TriangleList
            } else {
                out.extend_from_slice(&points);
                Topology::LineStrip
            }
        });
        Ok(())
    }

    fn clear_rect(&mut self, x: f32, y: f32, width: f32, height: f32) -> Result<()> {
        self.ensure_active()?;
        let (surface_w, surface_h) = (self.state.width(), self.state.height());
        let mut area = device_bounds(&self.state.transform, x, y, width, height, surface_w, surface_h);
        if let Some(scissor) = self.state.scissor {
            area = intersect(area, scissor.pixels(surface_w, surface_h));
        }
        if area[2] == 0 || area[3] == 0 {
            return Ok(());
        }
        let previous = self.compositor.scissor();
        self.compositor.set_scissor(Some(area));
        self.compositor.clear(Color::TRANSPARENT, ClearFlags::COLOR);
        self.compositor.set_scissor(previous);
        Ok(())
    }

    fn clear_color(&mut self, color: Color, opaque: bool) -> Result<()> {
        self.ensure_active()?;
        if opaque {
            let previous = self.compositor.scissor();
            self.compositor.set_scissor(None);
            self.compositor.clear(color, ClearFlags::COLOR);
            self.compositor.set_scissor(previous);
            return Ok(());
        }
        // covers the whole canvas whatever clip or mask is active
        let scissor = self.compositor.scissor();
        let stencil = self.compositor.stencil();
        self.compositor.set_scissor(None);
        self.compositor.set_stencil(StencilMode::Disabled);
        let (w, h) = (self.state.width() as f32, self.state.height() as f32);
        self.compositor.draw_vertices(
            Topology::TriangleStrip,
            &[
                Vec2::new(w, 0.0),
                Vec2::ZERO,
                Vec2::new(w, h),
                Vec2::new(0.0, h),
            ],
            color,
            &Transform::IDENTITY,
        );
        self.compositor.set_stencil(stencil);
        self.compositor.set_scissor(scissor);
        Ok(())
    }

    fn draw_image(&mut self, image: &Image, draw: ImageDraw) -> Result<()> {
        self.ensure_active()?;
        let tint = self.state.tint;
        let tint = tint.with_alpha(tint.a * self.state.color.a);
        if tint.a < ALPHA_THRESHOLD {
            return Ok(());
        }
        let (src, mut dest) = draw.resolve(image.width(), image.height());
        if !self.settings.sub_pixel {
            dest.x = dest.x.trunc();
            dest.y = dest.y.trunc();
        }
        let key = self.image_key(image, src)?;
        let view = self.state.transform;
        self.compositor
            .add_quad(&mut self.cache, image, &key, dest, tint, &view)
    }

    fn add_atlas(&mut self, atlas: TextureAtlas) -> Result<()> {
        self.ensure_active()?;
        self.cache.set(atlas)
    }

    fn draw_region(&mut self, image: &Image, name: &str, x: f32, y: f32) -> Result<()> {
        self.ensure_active()?;
        let tint = self.state.tint;
        let tint = tint.with_alpha(tint.a * self.state.color.a);
        if tint.a < ALPHA_THRESHOLD {
            return Ok(());
        }
        let region = self.cache.get(image)?.resolve(name)?.clone();
        let mut placement = place_region(&region, x, y);
        if !self.settings.sub_pixel {
            placement.dest.x = placement.dest.x.trunc();
            placement.dest.y = placement.dest.y.trunc();
        }
        let view = match placement.rotation {
            Some(rotation) => self.state.transform.multiply(&rotation),
            None => self.state.transform,
        };
        self.compositor
            .add_quad(&mut self.cache, image, name, placement.dest, tint, &view)
    }

    fn create_pattern(&mut self, image: &Image, repeat: RepeatMode) -> Result<Pattern> {
        self.ensure_active()?;
        if self.cache.contains(image.id()) {
            let registered = self.cache.get(image)?.repeat();
            if registered != repeat {
                warn!(
                    "{} is already registered with {:?}, keeping it over {:?}",
                    image.label(),
                    registered,
                    repeat
                );
            }
        } else {
            let atlas = TextureAtlas::pattern(image.clone(), repeat)
                .with_uv_offset(self.settings.uv_offset());
            self.cache.set(atlas)?;
        }
        self.compositor
            .upload_texture(&mut self.cache, image, false)?;
        let repeat = self.cache.get(image)?.repeat();
        Ok(Pattern::new(
            image.clone(),
            self.cache.effective_repeat(image, repeat),
        ))
    }

    fn draw_pattern(
        &mut self,
        pattern: &Pattern,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    ) -> Result<()> {
        self.ensure_active()?;
        let tint = Color::WHITE.with_alpha(self.state.color.a);
        if tint.a < ALPHA_THRESHOLD {
            return Ok(());
        }
        let image = pattern.image();
        let repeat = pattern.repeat();
        let width = if repeat.repeats_x() {
            width
        } else {
            width.min(image.width() as f32)
        };
        let height = if repeat.repeats_y() {
            height
        } else {
            height.min(image.height() as f32)
        };
        // sampled past the image edge so the sampler wraps; no region is kept
        let uv_offset = self.cache.get(image)?.uv_offset();
        let uvs = compute_uvs(
            0.0,
            0.0,
            width,
            height,
            image.width() as f32,
            image.height() as f32,
            uv_offset,
        );
        let view = self.state.transform;
        self.compositor.add_quad_uvs(
            &mut self.cache,
            image,
            uvs,
            Rect::new(x, y, width, height),
            tint,
            &view,
        )
    }

    fn draw_text(&mut self, text: &str, x: f32, y: f32, style: &TextStyle) -> Result<()> {
        self.ensure_active()?;
        if !self.visible() || style.color.a < ALPHA_THRESHOLD {
            return Ok(());
        }
        let Some(bitmap) = self.text_rasterizer().rasterize(text, style) else {
            return Ok(());
        };
        let width = bitmap.width().min(self.font.width()) as f32;
        let height = bitmap.height().min(self.font.height()) as f32;

        let identity = tiny_skia::Transform::identity();
        let copy = PixmapPaint {
            blend_mode: tiny_skia::BlendMode::Source,
            ..Default::default()
        };
        self.font
            .pixmap_mut()
            .draw_pixmap(0, 0, bitmap.pixmap().as_ref(), &copy, identity, None);
        self.compositor
            .upload_texture(&mut self.cache, &self.font, true)?;

        let uv_offset = self.cache.get(&self.font)?.uv_offset();
        let uvs = compute_uvs(
            0.0,
            0.0,
            width,
            height,
            self.font.width() as f32,
            self.font.height() as f32,
            uv_offset,
        );
        let tint = Color::WHITE.with_alpha(self.state.color.a);
        let view = self.state.transform;
        self.compositor.add_quad_uvs(
            &mut self.cache,
            &self.font,
            uvs,
            Rect::new(x.round(), y.round(), width, height),
            tint,
            &view,
        )?;

        // the uploaded texture keeps the text; only the staging pixels go
        if let Some(area) = tiny_skia::Rect::from_xywh(0.0, 0.0, width, height) {
            let erase = Paint {
                blend_mode: tiny_skia::BlendMode::Clear,
                ..Default::default()
            };
            self.font
                .pixmap_mut()
                .fill_rect(area, &erase, identity, None);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.compositor.flush();
        let stats = self.compositor.take_stats();
        self.compositor.device_mut().end_frame()?;
        if self.settings.verbose {
            info!(
                "Frame: {} draw calls, {} quads, {} primitives",
                stats.draw_calls, stats.quads, stats.primitives
            );
        } else {
            debug!(
                "Frame: {} draw calls, {} quads, {} primitives",
                stats.draw_calls, stats.quads, stats.primitives
            );
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.compositor.flush();
        self.compositor.release_textures();
        self.cache.clear();
        self.state.reset();
        self.state.blend_mode = self.compositor.set_blend_mode(self.settings.blend_mode);
        self.compositor.set_scissor(None);
        self.compositor.set_stencil(StencilMode::Disabled);
        self.mask_active = false;
        let color = self.state.color;
        self.clear_color(color, !self.settings.transparent)
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidSurfaceSize { width, height });
        }
        if width == self.state.width() && height == self.state.height() {
            return Ok(());
        }
        self.ensure_active()?;
        self.compositor.set_scissor(None);
        self.compositor.resize(width, height);
        self.settings.width = width;
        self.settings.height = height;
        self.state.resize(width, height);
        Ok(())
    }

    fn snapshot(&mut self) -> Result<Image> {
        self.ensure_active()?;
        self.compositor.flush();
        self.compositor.device_mut().end_frame()?;
        self.compositor.device_mut().read_pixels()
    }
}

/// Surface-pixel bounding box of a rectangle under `transform`.
fn device_bounds(
    transform: &Transform,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    surface_w: u32,
    surface_h: u32,
) -> [u32; 4] {
    let corners = [
        transform.apply(x, y),
        transform.apply(x + width, y),
        transform.apply(x, y + height),
        transform.apply(x + width, y + height),
    ];
    let (mut x0, mut y0) = (f32::MAX, f32::MAX);
    let (mut x1, mut y1) = (f32::MIN, f32::MIN);
    for (cx, cy) in corners {
        x0 = x0.min(cx);
        y0 = y0.min(cy);
        x1 = x1.max(cx);
        y1 = y1.max(cy);
    }
    let clamp_x = |v: f32| v.clamp(0.0, surface_w as f32) as u32;
    let clamp_y = |v: f32| v.clamp(0.0, surface_h as f32) as u32;
    let (left, top) = (clamp_x(x0.floor()), clamp_y(y0.floor()));
    let (right, bottom) = (clamp_x(x1.ceil()), clamp_y(y1.ceil()));
    [left, top, right - left, bottom - top]
}

fn intersect(a: [u32; 4], b: [u32; 4]) -> [u32; 4] {
    let left = a[0].max(b[0]);
    let top = a[1].max(b[1]);
    let right = (a[0] + a[2]).min(b[0] + b[2]);
    let bottom = (a[1] + a[3]).min(b[1] + b[3]);
    [
        left,
        top,
        right.saturating_sub(left),
        bottom.saturating_sub(top),
    ]
}
