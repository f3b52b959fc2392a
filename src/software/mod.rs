//! CPU rasterizer backend on `tiny_skia`.

use log::debug;
use resvg::tiny_skia::{
    self, FillRule, FilterQuality, Mask, Paint, Path, PathBuilder, Pixmap, PixmapPaint,
    SpreadMode, Stroke,
};

use crate::color::Color;
use crate::config::{RendererConfig, RendererKind};
use crate::error::{RenderError, Result};
use crate::geometry::{Line, Polygon, Rect, Shape, Vec2};
use crate::image::Image;
use crate::renderer::{
    arc_points, place_region, BlendMode, ClipChange, ImageDraw, Pattern, RenderState, Renderer,
    ALPHA_THRESHOLD,
};
use crate::surface::create_surface;
use crate::text::{TextRasterizer, TextStyle};
use crate::texture::{RepeatMode, TextureAtlas, TextureCache};

/// Control point distance for a quarter ellipse drawn with one cubic.
const ELLIPSE_KAPPA: f32 = 0.551784;

pub struct SoftwareRenderer {
    settings: RendererConfig,
    state: RenderState,
    front: Pixmap,
    back: Option<Pixmap>,
    cache: TextureCache,
    /// Active mask shape, already in surface space.
    mask: Option<Path>,
    /// Scissor and mask combined, rebuilt whenever either changes.
    clip: Option<Mask>,
    text: Option<TextRasterizer>,
}

impl SoftwareRenderer {
    pub fn new(settings: RendererConfig) -> Result<Self> {
        let front = create_surface(settings.width, settings.height, false)?;
        let back = if settings.double_buffering {
            Some(create_surface(settings.width, settings.height, true)?)
        } else {
            None
        };
        let cache = TextureCache::unbounded()
            .with_uv_offset(settings.uv_offset())
            .with_legacy_pot(settings.legacy_pot);

        let mut state = RenderState::new(settings.width, settings.height);
        state.blend_mode = settings.blend_mode;

        debug!(
            "Software renderer {}x{} (double buffering: {})",
            settings.width, settings.height, settings.double_buffering
        );

        Ok(Self {
            settings,
            state,
            front,
            back,
            cache,
            mask: None,
            clip: None,
            text: None,
        })
    }

    /// The visible surface.
    pub fn front(&self) -> &Pixmap {
        &self.front
    }

    pub fn cache(&self) -> &TextureCache {
        &self.cache
    }

    /// Color of a pixel on the surface draws currently land on.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        self.target_ref()
            .pixel(x, y)
            .map(Color::from_premultiplied)
    }

    fn target_ref(&self) -> &Pixmap {
        self.back.as_ref().unwrap_or(&self.front)
    }

    /// Split borrow of the draw target and the clip mask.
    fn target(&mut self) -> (&mut Pixmap, Option<&Mask>) {
        let pixmap = match self.back.as_mut() {
            Some(back) => back,
            None => &mut self.front,
        };
        (pixmap, self.clip.as_ref())
    }

    fn rebuild_clip(&mut self) {
        let scissor = self
            .state
            .scissor
            .and_then(|s| {
                tiny_skia::Rect::from_xywh(s.device.x, s.device.y, s.device.width, s.device.height)
            })
            .map(PathBuilder::from_rect);
        if scissor.is_none() && self.mask.is_none() {
            self.clip = None;
            return;
        }

        let mut clip = Mask::new(self.state.width(), self.state.height());
        if let Some(clip) = clip.as_mut() {
            let identity = tiny_skia::Transform::identity();
            let anti_alias = self.settings.anti_alias;
            match (&scissor, &self.mask) {
                (Some(rect), Some(shape)) => {
                    clip.fill_path(rect, FillRule::Winding, false, identity);
                    clip.intersect_path(shape, FillRule::Winding, anti_alias, identity);
                }
                (Some(rect), None) => clip.fill_path(rect, FillRule::Winding, false, identity),
                (None, Some(shape)) => {
                    clip.fill_path(shape, FillRule::Winding, anti_alias, identity)
                }
                (None, None) => {}
            }
        }
        self.clip = clip;
    }

    fn visible(&self) -> bool {
        self.state.color.a >= ALPHA_THRESHOLD
    }

    fn paint(&self) -> Paint<'static> {
        let mut paint = Paint {
            anti_alias: self.settings.anti_alias,
            blend_mode: self.state.blend_mode.to_skia(),
            ..Default::default()
        };
        paint.set_color(self.state.color.to_skia());
        paint
    }

    fn stroke_style(&self) -> Stroke {
        Stroke {
            width: self.state.line_width,
            ..Default::default()
        }
    }

    fn draw_path(&mut self, path: &Path, fill: bool) {
        let paint = self.paint();
        let stroke = self.stroke_style();
        let transform = self.state.transform.to_skia();
        let (pixmap, clip) = self.target();
        if fill {
            pixmap.fill_path(path, &paint, FillRule::Winding, transform, clip);
        } else {
            pixmap.stroke_path(path, &paint, &stroke, transform, clip);
        }
    }

    /// Draw `src` of `image` stretched over `dest`, in the current transform.
    fn blit(&mut self, image: &Image, src: Rect, dest: Rect, opacity: f32) {
        if src.width <= 0.0 || src.height <= 0.0 {
            return;
        }
        let Some(rect) = tiny_skia::Rect::from_xywh(dest.x, dest.y, dest.width, dest.height) else {
            return;
        };
        let quality = if self.settings.anti_alias {
            FilterQuality::Bilinear
        } else {
            FilterQuality::Nearest
        };
        let placement = tiny_skia::Transform::from_translate(dest.x, dest.y)
            .pre_scale(dest.width / src.width, dest.height / src.height)
            .pre_translate(-src.x, -src.y);
        let paint = Paint {
            shader: tiny_skia::Pattern::new(
                image.pixmap().as_ref(),
                SpreadMode::Pad,
                quality,
                opacity,
                placement,
            ),
            anti_alias: self.settings.anti_alias,
            blend_mode: self.state.blend_mode.to_skia(),
            ..Default::default()
        };
        let transform = self.state.transform.to_skia();
        let (pixmap, clip) = self.target();
        pixmap.fill_rect(rect, &paint, transform, clip);
    }

    /// `image` with the current tint applied, and the opacity to draw it at.
    /// `None` when the draw would be invisible.
    fn tinted(&mut self, image: &Image) -> Result<Option<(Image, f32)>> {
        let tint = self.state.tint;
        let opacity = self.state.color.a * tint.a;
        if opacity < ALPHA_THRESHOLD {
            return Ok(None);
        }
        // the tint cache is keyed by rgb, the tint alpha becomes opacity
        let source = if tint.is_white() {
            image.clone()
        } else {
            self.cache.tint(image, tint.with_alpha(1.0))?
        };
        Ok(Some((source, opacity)))
    }

    fn text_rasterizer(&mut self) -> &mut TextRasterizer {
        self.text.get_or_insert_with(TextRasterizer::new)
    }
}

fn polygon_path(points: impl IntoIterator<Item = Vec2>, close: bool) -> Option<Path> {
    let mut builder = PathBuilder::new();
    let mut points = points.into_iter();
    let first = points.next()?;
    builder.move_to(first.x, first.y);
    for p in points {
        builder.line_to(p.x, p.y);
    }
    if close {
        builder.close();
    }
    builder.finish()
}

fn ellipse_path(x: f32, y: f32, w: f32, h: f32) -> Option<Path> {
    let (lx, rx, ty, by) = (x - w, x + w, y - h, y + h);
    let (xmagic, ymagic) = (w * ELLIPSE_KAPPA, h * ELLIPSE_KAPPA);
    let (xmin, xmax, ymin, ymax) = (x - xmagic, x + xmagic, y - ymagic, y + ymagic);

    let mut builder = PathBuilder::new();
    builder.move_to(x, ty);
    builder.cubic_to(xmax, ty, rx, ymin, rx, y);
    builder.cubic_to(rx, ymax, xmax, by, x, by);
    builder.cubic_to(xmin, by, lx, ymax, lx, y);
    builder.cubic_to(lx, ymin, xmin, ty, x, ty);
    builder.close();
    builder.finish()
}

fn shape_path(shape: &Shape) -> Option<Path> {
    match shape {
        Shape::Rect(r) => tiny_skia::Rect::from_xywh(r.x, r.y, r.width, r.height)
            .map(PathBuilder::from_rect),
        Shape::Polygon(p) => polygon_path(p.world_points(), true),
        Shape::Line(l) => polygon_path(l.world_points(), true),
        Shape::Ellipse(e) => ellipse_path(e.center.x, e.center.y, e.radius_x, e.radius_y),
    }
}

impl Renderer for SoftwareRenderer {
    fn kind(&self) -> RendererKind {
        RendererKind::Software
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

    fn restore(&mut self) {
        let scissor_changed = self.state.restore();
        if scissor_changed || self.mask.take().is_some() {
            self.rebuild_clip();
        }
    }

    fn set_blend_mode(&mut self, mode: BlendMode) {
        self.state.blend_mode = mode;
    }

    fn clip_rect(&mut self, x: f32, y: f32, width: f32, height: f32) -> Result<()> {
        match self.state.set_clip(x, y, width, height) {
            ClipChange::Unchanged => {}
            ClipChange::Set(_) | ClipChange::Cleared => self.rebuild_clip(),
        }
        Ok(())
    }

    fn set_mask(&mut self, shape: &Shape) -> Result<()> {
        self.mask = shape_path(shape).and_then(|p| p.transform(self.state.transform.to_skia()));
        self.rebuild_clip();
        Ok(())
    }

    fn clear_mask(&mut self) -> Result<()> {
        if self.mask.take().is_some() {
            self.rebuild_clip();
        }
        Ok(())
    }

    fn stroke_rect(&mut self, x: f32, y: f32, width: f32, height: f32, fill: bool) -> Result<()> {
        if !self.visible() {
            return Ok(());
        }
        if let Some(rect) = tiny_skia::Rect::from_xywh(x, y, width, height) {
            self.draw_path(&PathBuilder::from_rect(rect), fill);
        }
        Ok(())
    }

    fn stroke_polygon(&mut self, polygon: &Polygon, fill: bool) -> Result<()> {
        if !self.visible() {
            return Ok(());
        }
        if let Some(path) = polygon_path(polygon.world_points(), true) {
            self.draw_path(&path, fill);
        }
        Ok(())
    }

    fn stroke_polyline(&mut self, line: &Line) -> Result<()> {
        if !self.visible() {
            return Ok(());
        }
        if let Some(path) = polygon_path(line.world_points(), false) {
            self.draw_path(&path, false);
        }
        Ok(())
    }

    fn stroke_ellipse(&mut self, x: f32, y: f32, w: f32, h: f32, fill: bool) -> Result<()> {
        if !self.visible() {
            return Ok(());
        }
        if let Some(path) = ellipse_path(x, y, w, h) {
            self.draw_path(&path, fill);
        }
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
        if !self.visible() {
            return Ok(());
        }
        let points = arc_points(x, y, radius, start, end, anticlockwise);
        if let Some(path) = polygon_path(points, fill) {
            self.draw_path(&path, fill);
        }
        Ok(())
    }

    fn clear_rect(&mut self, x: f32, y: f32, width: f32, height: f32) -> Result<()> {
        let Some(rect) = tiny_skia::Rect::from_xywh(x, y, width, height) else {
            return Ok(());
        };
        let paint = Paint {
            blend_mode: tiny_skia::BlendMode::Clear,
            ..Default::default()
        };
        let transform = self.state.transform.to_skia();
        let (pixmap, clip) = self.target();
        pixmap.fill_rect(rect, &paint, transform, clip);
        Ok(())
    }

    fn clear_color(&mut self, color: Color, opaque: bool) -> Result<()> {
        let (pixmap, _) = self.target();
        if opaque {
            pixmap.fill(color.to_skia());
            return Ok(());
        }
        let Some(rect) = tiny_skia::Rect::from_xywh(0.0, 0.0, pixmap.width() as f32, pixmap.height() as f32)
        else {
            return Ok(());
        };
        let mut paint = Paint::default();
        paint.set_color(color.to_skia());
        pixmap.fill_rect(rect, &paint, tiny_skia::Transform::identity(), None);
        Ok(())
    }

    fn draw_image(&mut self, image: &Image, draw: ImageDraw) -> Result<()> {
        let Some((source, opacity)) = self.tinted(image)? else {
            return Ok(());
        };
        let (src, mut dest) = draw.resolve(image.width(), image.height());
        if !self.settings.sub_pixel {
            dest.x = dest.x.trunc();
            dest.y = dest.y.trunc();
        }
        self.blit(&source, src, dest, opacity);
        Ok(())
    }

    fn add_atlas(&mut self, atlas: TextureAtlas) -> Result<()> {
        self.cache.set(atlas)
    }

    fn draw_region(&mut self, image: &Image, name: &str, x: f32, y: f32) -> Result<()> {
        let (region, page) = {
            let atlas = self.cache.get(image)?;
            let region = atlas.resolve(name)?.clone();
            let page = atlas
                .texture_for(&region)
                .cloned()
                .unwrap_or_else(|| image.clone());
            (region, page)
        };
        let Some((source, opacity)) = self.tinted(&page)? else {
            return Ok(());
        };
        let mut placement = place_region(&region, x, y);
        if !self.settings.sub_pixel {
            placement.dest.x = placement.dest.x.trunc();
            placement.dest.y = placement.dest.y.trunc();
        }

        let view = self.state.transform;
        if let Some(rotation) = placement.rotation {
            self.state.transform = view.multiply(&rotation);
        }
        self.blit(&source, placement.src, placement.dest, opacity);
        self.state.transform = view;
        Ok(())
    }

    fn create_pattern(&mut self, image: &Image, repeat: RepeatMode) -> Result<Pattern> {
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
        if !self.visible() {
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
        let Some(rect) = tiny_skia::Rect::from_xywh(x, y, width, height) else {
            return Ok(());
        };
        let quality = if self.settings.anti_alias {
            FilterQuality::Bilinear
        } else {
            FilterQuality::Nearest
        };
        let paint = Paint {
            shader: tiny_skia::Pattern::new(
                image.pixmap().as_ref(),
                SpreadMode::Repeat,
                quality,
                self.state.color.a,
                tiny_skia::Transform::from_translate(x, y),
            ),
            anti_alias: self.settings.anti_alias,
            blend_mode: self.state.blend_mode.to_skia(),
            ..Default::default()
        };
        let transform = self.state.transform.to_skia();
        let (pixmap, clip) = self.target();
        pixmap.fill_rect(rect, &paint, transform, clip);
        Ok(())
    }

    fn draw_text(&mut self, text: &str, x: f32, y: f32, style: &TextStyle) -> Result<()> {
        if !self.visible() || style.color.a < ALPHA_THRESHOLD {
            return Ok(());
        }
        let Some(bitmap) = self.text_rasterizer().rasterize(text, style) else {
            return Ok(());
        };
        let (src, dest) = ImageDraw::at(x, y).resolve(bitmap.width(), bitmap.height());
        self.blit(&bitmap, src, dest, self.state.color.a);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let Some(back) = self.back.as_ref() else {
            return Ok(());
        };
        if self.settings.transparent {
            // a transparent front is replaced, not composited over
            self.front.data_mut().copy_from_slice(back.data());
        } else {
            self.front.draw_pixmap(
                0,
                0,
                back.as_ref(),
                &PixmapPaint::default(),
                tiny_skia::Transform::identity(),
                None,
            );
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.state.reset();
        self.state.blend_mode = self.settings.blend_mode;
        self.mask = None;
        self.clip = None;
        self.cache.clear();
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
        self.front = create_surface(width, height, false)?;
        if self.back.is_some() {
            self.back = Some(create_surface(width, height, true)?);
        }
        self.settings.width = width;
        self.settings.height = height;
        self.state.resize(width, height);
        self.mask = None;
        self.clip = None;
        Ok(())
    }

    fn snapshot(&mut self) -> Result<Image> {
        Ok(Image::from_pixmap(self.front.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer(width: u32, height: u32) -> SoftwareRenderer {
        SoftwareRenderer::new(RendererConfig::new(width, height)).unwrap()
    }

    fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Image {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba(rgba));
        Image::from_rgba(&img).unwrap()
    }

    fn rgba(renderer: &SoftwareRenderer, x: u32, y: u32) -> [u8; 4] {
        renderer.pixel(x, y).unwrap().to_rgba8()
    }

    #[test]
    fn test_fill_rect_honors_transform() {
        let mut r = renderer(20, 20);
        r.set_color(Color::WHITE);
        r.translate(10.0, 10.0);
        r.fill_rect(0.0, 0.0, 5.0, 5.0).unwrap();
        assert_eq!(rgba(&r, 12, 12), [255, 255, 255, 255]);
        assert_eq!(rgba(&r, 2, 2)[3], 0);
    }

    #[test]
    fn test_transparent_draws_are_skipped() {
        let mut r = renderer(4, 4);
        r.set_color(Color::rgba(1.0, 1.0, 1.0, 0.001));
        r.fill_rect(0.0, 0.0, 4.0, 4.0).unwrap();
        assert_eq!(rgba(&r, 1, 1), [0, 0, 0, 0]);

        r.set_global_alpha(1.0);
        r.set_tint(Color::WHITE, 0.001);
        r.draw_image(&solid(4, 4, [255, 0, 0, 255]), ImageDraw::at(0.0, 0.0))
            .unwrap();
        assert_eq!(rgba(&r, 1, 1), [0, 0, 0, 0]);
    }

    #[test]
    fn test_clip_rect_limits_drawing() {
        let mut r = renderer(10, 10);
        r.set_color(Color::WHITE);
        r.clip_rect(0.0, 0.0, 5.0, 10.0).unwrap();
        r.fill_rect(0.0, 0.0, 10.0, 10.0).unwrap();
        assert_eq!(rgba(&r, 2, 5)[3], 255);
        assert_eq!(rgba(&r, 7, 5)[3], 0);
    }

    #[test]
    fn test_mask_is_dropped_on_restore() {
        let mut r = renderer(10, 10);
        r.set_color(Color::WHITE);
        r.save();
        r.set_mask(&Shape::Rect(Rect::new(0.0, 0.0, 3.0, 3.0))).unwrap();
        r.fill_rect(0.0, 0.0, 10.0, 10.0).unwrap();
        assert_eq!(rgba(&r, 1, 1)[3], 255);
        assert_eq!(rgba(&r, 6, 6)[3], 0);

        r.restore();
        r.fill_rect(0.0, 0.0, 10.0, 10.0).unwrap();
        assert_eq!(rgba(&r, 6, 6)[3], 255);
    }

    #[test]
    fn test_double_buffer_copies_onto_transparent_front() {
        let config = RendererConfig::new(4, 4)
            .double_buffering(true)
            .transparent(true);
        let mut r = SoftwareRenderer::new(config).unwrap();
        r.set_color(Color::rgba(1.0, 0.0, 0.0, 0.5));
        r.fill_rect(0.0, 0.0, 4.0, 4.0).unwrap();
        assert_eq!(r.front().pixel(0, 0).unwrap().alpha(), 0);

        r.flush().unwrap();
        r.flush().unwrap();
        // copy semantics: a second flush does not accumulate alpha
        let front = Color::from_premultiplied(r.front().pixel(0, 0).unwrap());
        assert_eq!(front.to_rgba8()[3], 128);
    }

    #[test]
    fn test_tinted_image_uses_cache() {
        let mut r = renderer(4, 4);
        let img = solid(4, 4, [255, 255, 255, 255]);
        r.set_tint(Color::rgb(0.0, 1.0, 0.0), 1.0);
        r.draw_image(&img, ImageDraw::at(0.0, 0.0)).unwrap();
        r.draw_image(&img, ImageDraw::at(0.0, 0.0)).unwrap();
        assert_eq!(r.cache().tinted_count(), 1);
        assert_eq!(rgba(&r, 2, 2), [0, 255, 0, 255]);
    }

    #[test]
    fn test_image_region_is_scaled_into_destination() {
        let mut rgba_img = image::RgbaImage::from_pixel(4, 4, image::Rgba([0, 0, 255, 255]));
        rgba_img.put_pixel(0, 0, image::Rgba([255, 0, 0, 255]));
        let img = Image::from_rgba(&rgba_img).unwrap();

        let mut r = renderer(8, 8);
        r.draw_image(
            &img,
            ImageDraw::region(Rect::new(0.0, 0.0, 1.0, 1.0), Rect::new(0.0, 0.0, 8.0, 8.0)),
        )
        .unwrap();
        assert_eq!(rgba(&r, 7, 7), [255, 0, 0, 255]);
    }

    #[test]
    fn test_named_region_is_drawn_at_natural_size() {
        let mut sheet = image::RgbaImage::from_pixel(4, 2, image::Rgba([0, 0, 255, 255]));
        for y in 0..2 {
            for x in 0..2 {
                sheet.put_pixel(x, y, image::Rgba([255, 0, 0, 255]));
            }
        }
        let img = Image::from_rgba(&sheet).unwrap();
        let mut r = renderer(8, 8);
        r.add_atlas(TextureAtlas::from_spritesheet(
            crate::texture::SpriteSheet::new(2, 2),
            img.clone(),
        ))
        .unwrap();

        r.draw_region(&img, "1", 5.0, 5.0).unwrap();
        assert_eq!(rgba(&r, 5, 5), [0, 0, 255, 255]);
        assert_eq!(rgba(&r, 6, 6), [0, 0, 255, 255]);
        assert_eq!(rgba(&r, 4, 5)[3], 0);
        assert_eq!(rgba(&r, 7, 7)[3], 0);
    }

    #[test]
    fn test_rotated_region_is_turned_upright() {
        // a 1x2 frame packed on its side: the right texel is its top
        let mut sheet = image::RgbaImage::from_pixel(2, 1, image::Rgba([0, 0, 255, 255]));
        sheet.put_pixel(0, 0, image::Rgba([255, 0, 0, 255]));
        let img = Image::from_rgba(&sheet).unwrap();
        let json = r#"{"meta":{"app":"texturepacker","size":{"w":2,"h":1}},
            "frames":[{"filename":"tall","frame":{"x":0,"y":0,"w":1,"h":2},"rotated":true}]}"#;
        let mut r = renderer(6, 6);
        r.add_atlas(TextureAtlas::from_json(json, img.clone()).unwrap())
            .unwrap();

        r.draw_region(&img, "tall", 2.0, 2.0).unwrap();
        assert_eq!(rgba(&r, 2, 2), [0, 0, 255, 255]);
        assert_eq!(rgba(&r, 2, 3), [255, 0, 0, 255]);
        assert_eq!(rgba(&r, 3, 2)[3], 0);
        assert_eq!(rgba(&r, 1, 3)[3], 0);
    }

    #[test]
    fn test_clear_rect_erases() {
        let mut r = renderer(4, 4);
        r.clear_color(Color::WHITE, true).unwrap();
        r.clear_rect(0.0, 0.0, 2.0, 4.0).unwrap();
        assert_eq!(rgba(&r, 0, 0)[3], 0);
        assert_eq!(rgba(&r, 3, 0), [255, 255, 255, 255]);
    }

    #[test]
    fn test_reset_clears_to_opaque_black() {
        let mut r = renderer(4, 4);
        r.clear_color(Color::WHITE, true).unwrap();
        r.translate(3.0, 3.0);
        r.reset().unwrap();
        assert!(r.current_transform().is_identity());
        assert_eq!(rgba(&r, 1, 1), [0, 0, 0, 255]);
    }

    #[test]
    fn test_resize_rejects_empty_surface() {
        let mut r = renderer(4, 4);
        assert!(matches!(
            r.resize(0, 4),
            Err(RenderError::InvalidSurfaceSize { .. })
        ));
        r.resize(8, 2).unwrap();
        assert_eq!((r.width(), r.height()), (8, 2));
    }
}
