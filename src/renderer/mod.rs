//! The drawing contract shared by the software and GPU backends.

pub mod state;

use std::f32::consts::TAU;

use resvg::tiny_skia;

use crate::color::Color;
use crate::config::{RendererConfig, RendererKind};
use crate::error::Result;
use crate::geometry::{Line, Polygon, Rect, Shape, Vec2};
use crate::image::Image;
use crate::text::TextStyle;
use crate::texture::{Region, RepeatMode, TextureAtlas};
use crate::transform::Transform;

pub use state::{ClipChange, RenderState, Scissor};

/// Draws whose effective alpha is below this are skipped entirely.
pub const ALPHA_THRESHOLD: f32 = 1.0 / 255.0;

/// How drawn pixels are combined with the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Additive,
    Screen,
}

impl BlendMode {
    /// Parse a blend mode name; anything unrecognized is `Normal`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "multiply" => Self::Multiply,
            "additive" | "lighter" => Self::Additive,
            "screen" => Self::Screen,
            _ => Self::Normal,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Multiply => "multiply",
            Self::Additive => "additive",
            Self::Screen => "screen",
        }
    }

    pub(crate) fn to_skia(self) -> tiny_skia::BlendMode {
        match self {
            Self::Normal => tiny_skia::BlendMode::SourceOver,
            Self::Multiply => tiny_skia::BlendMode::Multiply,
            Self::Additive => tiny_skia::BlendMode::Plus,
            Self::Screen => tiny_skia::BlendMode::Screen,
        }
    }
}

/// Source and destination of a `draw_image` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImageDraw {
    /// The whole image, unscaled, with its top-left corner at a point.
    At { x: f32, y: f32 },
    /// The whole image stretched over a rectangle.
    Scaled { dest: Rect },
    /// A sub-rectangle of the image stretched over a rectangle.
    Region { src: Rect, dest: Rect },
}

impl ImageDraw {
    pub fn at(x: f32, y: f32) -> Self {
        Self::At { x, y }
    }

    pub fn scaled(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::Scaled {
            dest: Rect::new(x, y, width, height),
        }
    }

    pub fn region(src: Rect, dest: Rect) -> Self {
        Self::Region { src, dest }
    }

    /// Source and destination rectangles for an image of the given size.
    pub fn resolve(&self, image_width: u32, image_height: u32) -> (Rect, Rect) {
        let whole = Rect::new(0.0, 0.0, image_width as f32, image_height as f32);
        match *self {
            Self::At { x, y } => (whole, whole.translate(x, y)),
            Self::Scaled { dest } => (whole, dest),
            Self::Region { src, dest } => (src, dest),
        }
    }
}

/// A repeating fill created by [`Renderer::create_pattern`].
#[derive(Debug, Clone)]
pub struct Pattern {
    image: Image,
    repeat: RepeatMode,
}

impl Pattern {
    pub(crate) fn new(image: Image, repeat: RepeatMode) -> Self {
        Self { image, repeat }
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    /// Repeat mode the backend will actually sample with.
    pub fn repeat(&self) -> RepeatMode {
        self.repeat
    }
}

/// A 2D drawing surface.
///
/// Both backends honor the same external semantics: a caller can switch
/// from one to the other without changing its draw code. Drawing operations
/// return `Err` only for fatal conditions (texture unit exhaustion, a lost
/// GPU context, invalid sizes); draws that cannot be visible are skipped.
pub trait Renderer {
    fn kind(&self) -> RendererKind;

    fn settings(&self) -> &RendererConfig;

    fn state(&self) -> &RenderState;

    fn state_mut(&mut self) -> &mut RenderState;

    fn width(&self) -> u32 {
        self.state().width()
    }

    fn height(&self) -> u32 {
        self.state().height()
    }

    /// Whether the backend can currently draw.
    fn is_context_valid(&self) -> bool {
        true
    }

    /// Push the transform, color and scissor.
    fn save(&mut self) {
        self.state_mut().save();
    }

    /// Pop the transform, color and scissor, and drop any active mask.
    fn restore(&mut self);

    fn translate(&mut self, x: f32, y: f32) {
        self.transform(&Transform::translate(x, y));
    }

    fn rotate(&mut self, angle: f32) {
        self.transform(&Transform::rotate(angle));
    }

    fn scale(&mut self, x: f32, y: f32) {
        self.transform(&Transform::scale(x, y));
    }

    /// Compose `matrix` into the current transform, applied before it.
    fn transform(&mut self, matrix: &Transform) {
        let state = self.state_mut();
        state.transform = state.transform.multiply(matrix);
    }

    fn set_transform(&mut self, matrix: &Transform) {
        self.state_mut().transform = *matrix;
    }

    fn reset_transform(&mut self) {
        self.state_mut().transform = Transform::IDENTITY;
    }

    fn current_transform(&self) -> Transform {
        self.state().transform
    }

    fn set_color(&mut self, color: Color) {
        self.state_mut().color = color;
    }

    fn color(&self) -> Color {
        self.state().color
    }

    fn set_global_alpha(&mut self, alpha: f32) {
        self.state_mut().color.a = alpha.clamp(0.0, 1.0);
    }

    fn global_alpha(&self) -> f32 {
        self.state().color.a
    }

    /// Tint subsequent image draws; `alpha` scales the tint's own alpha.
    fn set_tint(&mut self, tint: Color, alpha: f32) {
        self.state_mut().tint = tint.with_alpha(tint.a * alpha);
    }

    fn clear_tint(&mut self) {
        self.state_mut().tint = Color::WHITE;
    }

    fn tint_color(&self) -> Color {
        self.state().tint
    }

    fn set_line_width(&mut self, width: f32) {
        self.state_mut().line_width = width;
    }

    fn line_width(&self) -> f32 {
        self.state().line_width
    }

    /// Modes the backend cannot honor fall back to `Normal`.
    fn set_blend_mode(&mut self, mode: BlendMode);

    fn blend_mode(&self) -> BlendMode {
        self.state().blend_mode
    }

    /// Restrict drawing to a rectangle; a rectangle covering the whole
    /// surface turns clipping off.
    fn clip_rect(&mut self, x: f32, y: f32, width: f32, height: f32) -> Result<()>;

    /// Restrict drawing to the area covered by `shape`, in current
    /// transform space.
    fn set_mask(&mut self, shape: &Shape) -> Result<()>;

    fn clear_mask(&mut self) -> Result<()>;

    fn stroke(&mut self, shape: &Shape, fill: bool) -> Result<()> {
        match shape {
            Shape::Rect(r) => self.stroke_rect(r.x, r.y, r.width, r.height, fill),
            Shape::Polygon(p) => self.stroke_polygon(p, fill),
            Shape::Line(l) => self.stroke_polyline(l),
            Shape::Ellipse(e) => self.stroke_ellipse(
                e.center.x,
                e.center.y,
                e.radius_x,
                e.radius_y,
                fill,
            ),
        }
    }

    fn fill(&mut self, shape: &Shape) -> Result<()> {
        self.stroke(shape, true)
    }

    fn stroke_rect(&mut self, x: f32, y: f32, width: f32, height: f32, fill: bool) -> Result<()>;

    fn fill_rect(&mut self, x: f32, y: f32, width: f32, height: f32) -> Result<()> {
        self.stroke_rect(x, y, width, height, true)
    }

    fn stroke_polygon(&mut self, polygon: &Polygon, fill: bool) -> Result<()>;

    fn fill_polygon(&mut self, polygon: &Polygon) -> Result<()> {
        self.stroke_polygon(polygon, true)
    }

    /// Stroke an open polyline; lines have no interior to fill.
    fn stroke_polyline(&mut self, line: &Line) -> Result<()>;

    fn stroke_line(&mut self, x0: f32, y0: f32, x1: f32, y1: f32) -> Result<()> {
        self.stroke_polyline(&Line::segment(x0, y0, x1, y1))
    }

    fn fill_line(&mut self, x0: f32, y0: f32, x1: f32, y1: f32) -> Result<()> {
        self.stroke_line(x0, y0, x1, y1)
    }

    /// Ellipse centered on `(x, y)` with radii `w` and `h`.
    fn stroke_ellipse(&mut self, x: f32, y: f32, w: f32, h: f32, fill: bool) -> Result<()>;

    fn fill_ellipse(&mut self, x: f32, y: f32, w: f32, h: f32) -> Result<()> {
        self.stroke_ellipse(x, y, w, h, true)
    }

    #[allow(clippy::too_many_arguments)]
    fn stroke_arc(
        &mut self,
        x: f32,
        y: f32,
        radius: f32,
        start: f32,
        end: f32,
        anticlockwise: bool,
        fill: bool,
    ) -> Result<()>;

    fn fill_arc(
        &mut self,
        x: f32,
        y: f32,
        radius: f32,
        start: f32,
        end: f32,
        anticlockwise: bool,
    ) -> Result<()> {
        self.stroke_arc(x, y, radius, start, end, anticlockwise, true)
    }

    /// Erase a rectangle to transparent black.
    fn clear_rect(&mut self, x: f32, y: f32, width: f32, height: f32) -> Result<()>;

    /// Fill the whole surface with `color`; `opaque` replaces pixels instead
    /// of blending over them.
    fn clear_color(&mut self, color: Color, opaque: bool) -> Result<()>;

    /// Prepare the surface for a new frame.
    fn clear(&mut self) -> Result<()> {
        if self.settings().transparent {
            self.clear_color(Color::TRANSPARENT, true)
        } else {
            Ok(())
        }
    }

    fn draw_image(&mut self, image: &Image, draw: ImageDraw) -> Result<()>;

    /// Register an atlas so its regions can be drawn by name. The atlas is
    /// filed under every backing image it spans.
    fn add_atlas(&mut self, atlas: TextureAtlas) -> Result<()>;

    /// Draw the named region of the atlas holding `image` at its natural
    /// size, top-left corner at `(x, y)`. Rotated frames are turned back
    /// upright.
    fn draw_region(&mut self, image: &Image, name: &str, x: f32, y: f32) -> Result<()>;

    /// Prepare `image` to be repeated by [`draw_pattern`](Self::draw_pattern).
    fn create_pattern(&mut self, image: &Image, repeat: RepeatMode) -> Result<Pattern>;

    fn draw_pattern(
        &mut self,
        pattern: &Pattern,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    ) -> Result<()>;

    /// Draw a single block of text with its top-left corner at `(x, y)`.
    fn draw_text(&mut self, text: &str, x: f32, y: f32, style: &TextStyle) -> Result<()>;

    /// A new bitmap with `color` composited over `image` through `mode`,
    /// masked to the source's alpha.
    fn tint(&self, image: &Image, color: Color, mode: BlendMode) -> Result<Image> {
        crate::image::tint(image, color, mode)
    }

    /// Present everything drawn so far.
    fn flush(&mut self) -> Result<()>;

    /// Reset the logical state and the backend's caches.
    fn reset(&mut self) -> Result<()>;

    fn resize(&mut self, width: u32, height: u32) -> Result<()>;

    /// Whether a rectangle in surface space intersects the surface.
    fn overlaps(&self, rect: &Rect) -> bool {
        rect.x < self.width() as f32
            && rect.right() > 0.0
            && rect.y < self.height() as f32
            && rect.bottom() > 0.0
    }

    /// Copy the presented surface into a new image.
    fn snapshot(&mut self) -> Result<Image>;
}

/// Where an atlas region lands when drawn at `(x, y)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RegionPlacement {
    /// Area of the backing image, in texels.
    pub src: Rect,
    pub dest: Rect,
    /// Extra view transform for frames a packer stored rotated.
    pub rotation: Option<Transform>,
}

pub(crate) fn place_region(region: &Region, x: f32, y: f32) -> RegionPlacement {
    let (fw, fh) = region.footprint();
    let src = Rect::new(region.offset.x, region.offset.y, fw, fh);
    if !region.rotated || region.angle == 0.0 {
        return RegionPlacement {
            src,
            dest: Rect::new(x, y, fw, fh),
            rotation: None,
        };
    }
    // the turned footprint is drawn left of the pivot, then swung into place
    let rotation = Transform::translate(x, y)
        .multiply(&Transform::rotate(region.angle))
        .multiply(&Transform::translate(-x, -y));
    RegionPlacement {
        src,
        dest: Rect::new(x - fw, y, fw, fh),
        rotation: Some(rotation),
    }
}

/// Number of segments used to approximate an arc of the given radius.
pub(crate) fn arc_segments(radius: f32) -> usize {
    ((24.0 * (radius.abs() * 2.0).sqrt()).floor() as usize).max(3)
}

/// Number of segments used to approximate an ellipse of the given radii.
pub(crate) fn ellipse_segments(w: f32, h: f32) -> usize {
    let len = (24.0 * w.abs().sqrt()).floor() as usize;
    let len = if len == 0 {
        (12.0 * (w.abs() + h.abs()).sqrt()).floor() as usize
    } else {
        len
    };
    len.max(3)
}

/// Points along a circular arc, from `start` to `end` inclusive.
///
/// The sweep follows the canvas convention: clockwise unless `anticlockwise`
/// is set, and a full circle once the angles are a whole turn apart.
pub(crate) fn arc_points(
    x: f32,
    y: f32,
    radius: f32,
    start: f32,
    end: f32,
    anticlockwise: bool,
) -> Vec<Vec2> {
    let sweep = arc_sweep(start, end, anticlockwise);
    let full = arc_segments(radius);
    let len = ((full as f32 * sweep.abs() / TAU).ceil() as usize).max(1);
    let step = sweep / len as f32;
    (0..=len)
        .map(|i| {
            let angle = start + step * i as f32;
            Vec2::new(x + angle.cos() * radius, y + angle.sin() * radius)
        })
        .collect()
}

fn arc_sweep(start: f32, end: f32, anticlockwise: bool) -> f32 {
    let delta = end - start;
    if anticlockwise {
        if -delta >= TAU {
            -TAU
        } else {
            -((start - end).rem_euclid(TAU))
        }
    } else if delta >= TAU {
        TAU
    } else {
        delta.rem_euclid(TAU)
    }
}

/// Points around an ellipse centered on `(x, y)`, without repeating the
/// first point.
pub(crate) fn ellipse_points(x: f32, y: f32, w: f32, h: f32) -> Vec<Vec2> {
    let len = ellipse_segments(w, h);
    let segment = TAU / len as f32;
    (0..len)
        .map(|i| {
            let angle = segment * -(i as f32);
            Vec2::new(x + angle.sin() * w, y + angle.cos() * h)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blend_mode_names_fall_back_to_normal() {
        assert_eq!(BlendMode::from_name("multiply"), BlendMode::Multiply);
        assert_eq!(BlendMode::from_name("lighter"), BlendMode::Additive);
        assert_eq!(BlendMode::from_name("overlay"), BlendMode::Normal);
        assert_eq!(BlendMode::Multiply.name(), "multiply");
    }

    #[test]
    fn test_image_draw_resolves_all_shapes() {
        let (src, dest) = ImageDraw::at(5.0, 6.0).resolve(10, 20);
        assert_eq!(src, Rect::new(0.0, 0.0, 10.0, 20.0));
        assert_eq!(dest, Rect::new(5.0, 6.0, 10.0, 20.0));

        let (src, dest) = ImageDraw::scaled(1.0, 2.0, 30.0, 40.0).resolve(10, 20);
        assert_eq!(src, Rect::new(0.0, 0.0, 10.0, 20.0));
        assert_eq!(dest, Rect::new(1.0, 2.0, 30.0, 40.0));

        let region = ImageDraw::region(Rect::new(2.0, 2.0, 4.0, 4.0), Rect::new(0.0, 0.0, 8.0, 8.0));
        let (src, dest) = region.resolve(10, 20);
        assert_eq!(src, Rect::new(2.0, 2.0, 4.0, 4.0));
        assert_eq!(dest, Rect::new(0.0, 0.0, 8.0, 8.0));
    }

    fn frame(rotated: bool) -> Region {
        Region {
            name: "frame".into(),
            texture: "sheet.png".into(),
            offset: Vec2::new(8.0, 4.0),
            width: 10.0,
            height: 20.0,
            rotated,
            trimmed: false,
            angle: if rotated { -std::f32::consts::FRAC_PI_2 } else { 0.0 },
            anchor_point: None,
            uvs: [0.0; 4],
        }
    }

    #[test]
    fn test_upright_region_keeps_its_size() {
        let placement = place_region(&frame(false), 3.0, 5.0);
        assert_eq!(placement.src, Rect::new(8.0, 4.0, 10.0, 20.0));
        assert_eq!(placement.dest, Rect::new(3.0, 5.0, 10.0, 20.0));
        assert!(placement.rotation.is_none());
    }

    #[test]
    fn test_rotated_region_lands_upright_at_its_position() {
        let placement = place_region(&frame(true), 3.0, 5.0);
        assert_eq!(placement.src, Rect::new(8.0, 4.0, 20.0, 10.0));
        let rotation = placement.rotation.unwrap();
        let d = placement.dest;
        let corners = [
            rotation.apply(d.left(), d.top()),
            rotation.apply(d.right(), d.top()),
            rotation.apply(d.left(), d.bottom()),
            rotation.apply(d.right(), d.bottom()),
        ];
        let min_x = corners.iter().map(|c| c.0).fold(f32::MAX, f32::min);
        let max_x = corners.iter().map(|c| c.0).fold(f32::MIN, f32::max);
        let min_y = corners.iter().map(|c| c.1).fold(f32::MAX, f32::min);
        let max_y = corners.iter().map(|c| c.1).fold(f32::MIN, f32::max);
        // 10 wide and 20 tall once turned back
        assert!((min_x - 3.0).abs() < 1e-4 && (max_x - 13.0).abs() < 1e-4);
        assert!((min_y - 5.0).abs() < 1e-4 && (max_y - 25.0).abs() < 1e-4);
    }

    #[test]
    fn test_segment_counts() {
        // floor(24 * sqrt(2 * 8)) = 96
        assert_eq!(arc_segments(8.0), 96);
        assert_eq!(ellipse_segments(4.0, 2.0), 48);
        assert_eq!(ellipse_segments(0.0, 0.0), 3);
    }

    #[test]
    fn test_arc_sweep_directions() {
        use std::f32::consts::{FRAC_PI_2, PI};
        assert!((arc_sweep(0.0, FRAC_PI_2, false) - FRAC_PI_2).abs() < 1e-5);
        assert!((arc_sweep(0.0, FRAC_PI_2, true) + 3.0 * FRAC_PI_2).abs() < 1e-5);
        assert!((arc_sweep(0.0, 2.0 * PI, false) - TAU).abs() < 1e-5);

        let points = arc_points(0.0, 0.0, 10.0, 0.0, PI, false);
        let first = points[0];
        let last = points[points.len() - 1];
        assert!((first.x - 10.0).abs() < 1e-4 && first.y.abs() < 1e-4);
        assert!((last.x + 10.0).abs() < 1e-4 && last.y.abs() < 1e-3);
    }

    #[test]
    fn test_ellipse_points_stay_on_the_curve() {
        let points = ellipse_points(10.0, 20.0, 4.0, 2.0);
        assert_eq!(points.len(), ellipse_segments(4.0, 2.0));
        for p in points {
            let nx = (p.x - 10.0) / 4.0;
            let ny = (p.y - 20.0) / 2.0;
            assert!((nx * nx + ny * ny - 1.0).abs() < 1e-4);
        }
    }
}
