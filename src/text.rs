//! Text shaping and rasterization.

use cosmic_text::{Attrs, Buffer, Family, FontSystem, Metrics, Shaping, SwashCache};
use resvg::tiny_skia::{self, Paint, Pixmap};

use crate::color::Color;
use crate::image::Image;

#[derive(Debug, Clone, PartialEq)]
pub struct TextStyle {
    /// Font family name; `None` picks the system sans-serif face.
    pub family: Option<String>,
    pub size: f32,
    /// Line height as a multiple of `size`.
    pub line_height: f32,
    pub color: Color,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            family: None,
            size: 16.0,
            line_height: 1.2,
            color: Color::BLACK,
        }
    }
}

impl TextStyle {
    pub fn new(size: f32) -> Self {
        Self {
            size,
            ..Default::default()
        }
    }

    pub fn family(mut self, family: impl Into<String>) -> Self {
        self.family = Some(family.into());
        self
    }

    pub fn line_height(mut self, line_height: f32) -> Self {
        self.line_height = line_height;
        self
    }

    pub fn color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }
}

pub struct TextRasterizer {
    font_system: FontSystem,
    swash_cache: SwashCache,
}

impl TextRasterizer {
    pub fn new() -> Self {
        Self {
            font_system: FontSystem::new(),
            swash_cache: SwashCache::new(),
        }
    }

    fn layout(&mut self, text: &str, style: &TextStyle) -> Buffer {
        let metrics = Metrics::new(style.size, style.size * style.line_height);
        let mut buffer = Buffer::new(&mut self.font_system, metrics);
        let family = match &style.family {
            Some(name) => Family::Name(name.as_str()),
            None => Family::SansSerif,
        };

        buffer.set_size(&mut self.font_system, None, None);
        buffer.set_text(
            &mut self.font_system,
            text,
            &Attrs::new().family(family),
            Shaping::Advanced,
            None,
        );
        buffer.shape_until_scroll(&mut self.font_system, true);
        buffer
    }

    /// Width and height of the laid out text block.
    pub fn measure(&mut self, text: &str, style: &TextStyle) -> (f32, f32) {
        let buffer = self.layout(text, style);
        bounds(&buffer)
    }

    /// Rasterize `text` into a bitmap sized to its layout bounds.
    ///
    /// Returns `None` when the text has no visible extent.
    pub fn rasterize(&mut self, text: &str, style: &TextStyle) -> Option<Image> {
        if text.is_empty() {
            return None;
        }
        let buffer = self.layout(text, style);
        let (width, height) = bounds(&buffer);
        let mut pixmap = Pixmap::new(width.ceil() as u32, height.ceil() as u32)?;

        let [r, g, b, a] = style.color.to_rgba8();
        let mut paint = Paint::default();
        buffer.draw(
            &mut self.font_system,
            &mut self.swash_cache,
            cosmic_text::Color::rgba(r, g, b, a),
            |x, y, w, h, color| {
                if color.a() == 0 {
                    return;
                }
                let Some(rect) = tiny_skia::Rect::from_xywh(x as f32, y as f32, w as f32, h as f32)
                else {
                    return;
                };
                paint.set_color_rgba8(color.r(), color.g(), color.b(), color.a());
                pixmap.fill_rect(rect, &paint, tiny_skia::Transform::identity(), None);
            },
        );

        Some(Image::from_pixmap(pixmap))
    }
}

impl Default for TextRasterizer {
    fn default() -> Self {
        Self::new()
    }
}

fn bounds(buffer: &Buffer) -> (f32, f32) {
    let mut width = 0.0f32;
    let mut height = 0.0f32;
    for run in buffer.layout_runs() {
        width = width.max(run.line_w);
        height += run.line_height;
    }
    (width, height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_style_builder() {
        let style = TextStyle::new(24.0)
            .family("Noto Sans")
            .color(Color::WHITE)
            .line_height(1.5);
        assert_eq!(style.family.as_deref(), Some("Noto Sans"));
        assert_eq!(style.size, 24.0);
        assert_eq!(style.line_height, 1.5);
        assert_eq!(style.color, Color::WHITE);
    }

    #[test]
    fn test_empty_text_has_no_bitmap() {
        let mut rasterizer = TextRasterizer::new();
        assert!(rasterizer.rasterize("", &TextStyle::default()).is_none());
    }
}
