//! Drawable bitmaps.
//!
//! An [`Image`] is a cheaply clonable, premultiplied RGBA bitmap carrying a
//! stable identity. The identity keys texture units, tinted variants and
//! atlas lookups, so two clones of the same image share one GPU texture.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use resvg::tiny_skia::{self, ColorU8, Pixmap, PixmapPaint};

use crate::color::Color;
use crate::error::{RenderError, Result};
use crate::renderer::BlendMode;
use crate::surface::create_surface;

static NEXT_IMAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a backing image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(u64);

impl ImageId {
    fn next() -> Self {
        Self(NEXT_IMAGE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Clone)]
pub struct Image {
    id: ImageId,
    name: Option<Arc<str>>,
    pixmap: Arc<Pixmap>,
}

impl Image {
    /// A transparent image of the given size.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        Ok(Self::from_pixmap(create_surface(width, height, true)?))
    }

    pub fn from_pixmap(pixmap: Pixmap) -> Self {
        Self {
            id: ImageId::next(),
            name: None,
            pixmap: Arc::new(pixmap),
        }
    }

    /// Convert a decoded straight-alpha RGBA image.
    pub fn from_rgba(rgba: &image::RgbaImage) -> Result<Self> {
        let (width, height) = rgba.dimensions();
        let mut pixmap = create_surface(width, height, true)?;
        for (dst, src) in pixmap.pixels_mut().iter_mut().zip(rgba.pixels()) {
            let [r, g, b, a] = src.0;
            *dst = ColorU8::from_rgba(r, g, b, a).premultiply();
        }
        Ok(Self::from_pixmap(pixmap))
    }

    /// Decode a PNG, JPEG, GIF or WebP file held in memory.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let img = image::load_from_memory(bytes)?;
        Self::from_rgba(&img.to_rgba8())
    }

    /// Rasterize an SVG document at `scale` times its intrinsic size.
    pub fn from_svg(bytes: &[u8], scale: f32) -> Result<Self> {
        let tree = resvg::usvg::Tree::from_data(bytes, &resvg::usvg::Options::default())
            .map_err(|e| RenderError::Svg(e.to_string()))?;
        let size = tree.size();
        let width = (size.width() * scale).ceil() as u32;
        let height = (size.height() * scale).ceil() as u32;
        let mut pixmap = create_surface(width, height, true)?;
        let transform = tiny_skia::Transform::from_scale(scale, scale);
        resvg::render(&tree, transform, &mut pixmap.as_mut());
        Ok(Self::from_pixmap(pixmap))
    }

    pub fn with_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn id(&self) -> ImageId {
        self.id
    }

    /// The asset name, if any; used in diagnostics and as the default atlas key.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    pub fn is_pot(&self) -> bool {
        self.width().is_power_of_two() && self.height().is_power_of_two()
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    /// Mutable access to the pixels; the identity is kept, other clones are
    /// left untouched.
    pub fn pixmap_mut(&mut self) -> &mut Pixmap {
        Arc::make_mut(&mut self.pixmap)
    }

    /// Straight-alpha color of a pixel.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        self.pixmap.pixel(x, y).map(Color::from_premultiplied)
    }

    /// Export as a straight-alpha RGBA image.
    pub fn to_rgba(&self) -> image::RgbaImage {
        let mut out = image::RgbaImage::new(self.width(), self.height());
        for (dst, src) in out.pixels_mut().zip(self.pixmap.pixels()) {
            let c = src.demultiply();
            *dst = image::Rgba([c.red(), c.green(), c.blue(), c.alpha()]);
        }
        out
    }

    /// Encode as PNG.
    pub fn save_png(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        self.to_rgba().save(path)?;
        Ok(())
    }

    pub(crate) fn label(&self) -> String {
        match &self.name {
            Some(name) => name.to_string(),
            None => format!("image#{}", self.id.0),
        }
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

/// Apply `color` to `src` through `mode`, keeping only the pixels where the
/// source has coverage.
///
/// The result is a fresh image: the color is laid down first, the source is
/// composited over it with `mode`, and a destination-atop pass with the
/// source masks everything back to the source's alpha.
pub fn tint(src: &Image, color: Color, mode: BlendMode) -> Result<Image> {
    let mut pixmap = create_surface(src.width(), src.height(), true)?;
    pixmap.fill(color.to_skia());

    let identity = tiny_skia::Transform::identity();
    let paint = PixmapPaint {
        blend_mode: mode.to_skia(),
        ..Default::default()
    };
    pixmap.draw_pixmap(0, 0, src.pixmap().as_ref(), &paint, identity, None);

    let mask = PixmapPaint {
        blend_mode: tiny_skia::BlendMode::DestinationAtop,
        ..Default::default()
    };
    pixmap.draw_pixmap(0, 0, src.pixmap().as_ref(), &mask, identity, None);

    let tinted = Image::from_pixmap(pixmap);
    Ok(match src.name() {
        Some(name) => tinted.with_name(format!("{name}#{:08x}", color.to_u32())),
        None => tinted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Image {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba(rgba));
        Image::from_rgba(&img).unwrap()
    }

    #[test]
    fn test_ids_are_unique_and_shared_by_clones() {
        let a = Image::new(2, 2).unwrap();
        let b = Image::new(2, 2).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn test_rgba_conversion_round_trip() {
        let img = solid(3, 2, [200, 100, 50, 255]);
        let back = img.to_rgba();
        assert_eq!(back.get_pixel(2, 1).0, [200, 100, 50, 255]);
    }

    #[test]
    fn test_pixmap_mut_keeps_identity() {
        let mut img = Image::new(2, 2).unwrap();
        let original = img.clone();
        img.pixmap_mut().fill(tiny_skia::Color::WHITE);
        assert_eq!(img.id(), original.id());
        assert_eq!(original.pixel(0, 0), Some(Color::TRANSPARENT));
        assert_eq!(img.pixel(0, 0), Some(Color::WHITE));
    }

    #[test]
    fn test_tint_multiplies_and_keeps_source_alpha() {
        let mut rgba = image::RgbaImage::from_pixel(2, 1, image::Rgba([255, 255, 255, 255]));
        rgba.put_pixel(1, 0, image::Rgba([0, 0, 0, 0]));
        let src = Image::from_rgba(&rgba).unwrap();

        let tinted = tint(&src, Color::rgb(1.0, 0.0, 0.0), BlendMode::Multiply).unwrap();
        assert_ne!(tinted.id(), src.id());
        assert_eq!(tinted.pixel(0, 0).unwrap().to_rgba8(), [255, 0, 0, 255]);
        assert_eq!(tinted.pixel(1, 0).unwrap().to_rgba8()[3], 0);
    }

    #[test]
    fn test_pot_detection() {
        assert!(Image::new(64, 32).unwrap().is_pot());
        assert!(!Image::new(48, 32).unwrap().is_pot());
    }
}
