//! Texture cache: atlases, tinted variants and texture-unit allocation.

pub mod atlas;
pub mod format;

use std::collections::HashMap;

use crate::color::Color;
use crate::error::{RenderError, Result};
use crate::image::{tint, Image, ImageId};
use crate::renderer::BlendMode;

pub use atlas::{compute_uvs, region_key, Region, RepeatMode, SpriteSheet, TextureAtlas};
pub use format::{AtlasData, AtlasFormat};

/// Maps backing images to their atlas and texture unit.
///
/// Units are handed out monotonically the first time an image is
/// registered and are never evicted: registering more distinct images than
/// the device has units is an error.
pub struct TextureCache {
    max_units: usize,
    atlases: Vec<TextureAtlas>,
    by_image: HashMap<ImageId, usize>,
    units: HashMap<ImageId, usize>,
    /// Registration order, replayed when the units are reassigned.
    order: Vec<ImageId>,
    tinted: HashMap<(ImageId, u32), Image>,
    uv_offset: f32,
    legacy_pot: bool,
}

impl TextureCache {
    pub fn new(max_units: usize) -> Self {
        Self {
            max_units,
            atlases: Vec::new(),
            by_image: HashMap::new(),
            units: HashMap::new(),
            order: Vec::new(),
            tinted: HashMap::new(),
            uv_offset: 0.0,
            legacy_pot: false,
        }
    }

    /// A cache with no unit limit, for backends that never bind textures.
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    /// Texel inset applied to atlases created by [`get`](Self::get).
    pub fn with_uv_offset(mut self, uv_offset: f32) -> Self {
        self.uv_offset = uv_offset;
        self
    }

    pub fn with_legacy_pot(mut self, legacy_pot: bool) -> Self {
        self.legacy_pot = legacy_pot;
        self
    }

    pub fn max_units(&self) -> usize {
        self.max_units
    }

    pub fn units_in_use(&self) -> usize {
        self.units.len()
    }

    pub fn contains(&self, id: ImageId) -> bool {
        self.by_image.contains_key(&id)
    }

    /// Unit assigned to an image, if it has been registered.
    pub fn unit_of(&self, id: ImageId) -> Option<usize> {
        self.units.get(&id).copied()
    }

    /// Unit for `image`, assigning the next free one on first use.
    pub fn unit(&mut self, image: &Image) -> Result<usize> {
        if let Some(unit) = self.units.get(&image.id()) {
            return Ok(*unit);
        }
        let unit = self.units.len();
        if unit >= self.max_units {
            return Err(RenderError::TextureCacheOverflow {
                requested: unit + 1,
                available: self.max_units,
            });
        }
        log::debug!("Assigned texture unit {} to {}", unit, image.label());
        self.units.insert(image.id(), unit);
        self.order.push(image.id());
        Ok(unit)
    }

    /// Register an atlas under every backing image it spans.
    ///
    /// Region UVs are recomputed with the cache's texel inset.
    pub fn set(&mut self, atlas: TextureAtlas) -> Result<()> {
        let atlas = if atlas.uv_offset() == self.uv_offset {
            atlas
        } else {
            atlas.with_uv_offset(self.uv_offset)
        };
        let images: Vec<Image> = atlas.images().cloned().collect();
        let fresh = images
            .iter()
            .filter(|i| !self.units.contains_key(&i.id()))
            .count();
        let requested = self.units.len() + fresh;
        if requested > self.max_units {
            return Err(RenderError::TextureCacheOverflow {
                requested,
                available: self.max_units,
            });
        }
        if self.legacy_pot && atlas.repeat() != RepeatMode::NoRepeat {
            for image in images.iter().filter(|i| !i.is_pot()) {
                log::warn!(
                    "[Texture] {} is not a POT texture ({}x{}), repeat will fall back to clamp",
                    image.label(),
                    image.width(),
                    image.height()
                );
            }
        }

        let index = self.atlases.len();
        self.atlases.push(atlas);
        for image in &images {
            self.unit(image)?;
            self.by_image.insert(image.id(), index);
        }
        Ok(())
    }

    /// The atlas holding `image`, creating a single-region one on a miss.
    pub fn get(&mut self, image: &Image) -> Result<&mut TextureAtlas> {
        if !self.by_image.contains_key(&image.id()) {
            let atlas = TextureAtlas::from_image(image.clone()).with_uv_offset(self.uv_offset);
            self.set(atlas)?;
        }
        let index = self.by_image[&image.id()];
        Ok(&mut self.atlases[index])
    }

    /// Wrap mode an image can actually be sampled with.
    pub fn effective_repeat(&self, image: &Image, repeat: RepeatMode) -> RepeatMode {
        if self.legacy_pot && repeat != RepeatMode::NoRepeat && !image.is_pot() {
            RepeatMode::NoRepeat
        } else {
            repeat
        }
    }

    /// A tinted copy of `src`, memoized per source and color.
    pub fn tint(&mut self, src: &Image, color: Color) -> Result<Image> {
        let key = (src.id(), color.to_u32());
        if let Some(tinted) = self.tinted.get(&key) {
            return Ok(tinted.clone());
        }
        let tinted = tint(src, color, BlendMode::Multiply)?;
        self.tinted.insert(key, tinted.clone());
        Ok(tinted)
    }

    /// Drop every tinted variant of `src`; needed when its pixels change.
    pub fn evict_tinted(&mut self, src: ImageId) {
        self.tinted.retain(|(id, _), _| *id != src);
    }

    pub fn tinted_count(&self) -> usize {
        self.tinted.len()
    }

    /// Reassign every unit from scratch, in registration order.
    ///
    /// Atlases and tinted variants survive; only GPU-facing state is rebuilt.
    pub fn reinitialize(&mut self) {
        let order = std::mem::take(&mut self.order);
        self.units.clear();
        for (unit, id) in order.into_iter().enumerate() {
            self.units.insert(id, unit);
            self.order.push(id);
        }
    }

    pub fn clear(&mut self) {
        self.atlases.clear();
        self.by_image.clear();
        self.units.clear();
        self.order.clear();
        self.tinted.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> Image {
        Image::new(4, 4).unwrap()
    }

    #[test]
    fn test_units_are_monotonic() {
        let mut cache = TextureCache::new(4);
        let a = image();
        let b = image();
        cache.get(&a).unwrap();
        cache.get(&b).unwrap();
        cache.get(&a).unwrap();
        assert_eq!(cache.unit_of(a.id()), Some(0));
        assert_eq!(cache.unit_of(b.id()), Some(1));
        assert_eq!(cache.units_in_use(), 2);
    }

    #[test]
    fn test_overflow_on_the_allocation_past_capacity() {
        let mut cache = TextureCache::new(2);
        assert!(cache.get(&image()).is_ok());
        assert!(cache.get(&image()).is_ok());
        match cache.get(&image()) {
            Err(RenderError::TextureCacheOverflow {
                requested,
                available,
            }) => {
                assert_eq!(requested, 3);
                assert_eq!(available, 2);
            }
            _ => panic!("expected overflow"),
        }
        assert_eq!(cache.units_in_use(), 2);
    }

    #[test]
    fn test_get_creates_default_region() {
        let mut cache = TextureCache::new(1).with_uv_offset(0.0);
        let img = image();
        let entry = cache.get(&img).unwrap();
        assert!(entry.region(atlas::DEFAULT_REGION).is_some());
        assert_eq!(entry.texture().unwrap().id(), img.id());
    }

    #[test]
    fn test_tint_is_memoized_per_color() {
        let mut cache = TextureCache::unbounded();
        let src = image();
        let red = cache.tint(&src, Color::rgb(1.0, 0.0, 0.0)).unwrap();
        let again = cache.tint(&src, Color::rgb(1.0, 0.0, 0.0)).unwrap();
        let blue = cache.tint(&src, Color::rgb(0.0, 0.0, 1.0)).unwrap();
        assert_eq!(red.id(), again.id());
        assert_ne!(red.id(), blue.id());
        assert_eq!(cache.tinted_count(), 2);

        cache.evict_tinted(src.id());
        assert_eq!(cache.tinted_count(), 0);
    }

    #[test]
    fn test_set_insets_spritesheet_cells() {
        let mut cache = TextureCache::new(2).with_uv_offset(1.0);
        let sheet = Image::new(32, 16).unwrap();
        cache
            .set(TextureAtlas::from_spritesheet(SpriteSheet::new(16, 16), sheet.clone()))
            .unwrap();
        let atlas = cache.get(&sheet).unwrap();
        assert_eq!(atlas.uv_offset(), 1.0);
        // half a texel in from every edge of the second cell
        assert_eq!(
            atlas.region("1").unwrap().uvs,
            [16.5 / 32.0, 0.5 / 16.0, 31.5 / 32.0, 15.5 / 16.0]
        );
    }

    #[test]
    fn test_legacy_pot_falls_back_to_clamp() {
        let cache = TextureCache::new(4).with_legacy_pot(true);
        let npot = Image::new(3, 4).unwrap();
        let pot = Image::new(4, 4).unwrap();
        assert_eq!(
            cache.effective_repeat(&npot, RepeatMode::Repeat),
            RepeatMode::NoRepeat
        );
        assert_eq!(
            cache.effective_repeat(&pot, RepeatMode::Repeat),
            RepeatMode::Repeat
        );
    }

    #[test]
    fn test_reinitialize_keeps_assignment_order() {
        let mut cache = TextureCache::new(4);
        let a = image();
        let b = image();
        cache.get(&a).unwrap();
        cache.get(&b).unwrap();
        cache.reinitialize();
        assert_eq!(cache.unit_of(a.id()), Some(0));
        assert_eq!(cache.unit_of(b.id()), Some(1));
        assert!(cache.contains(b.id()));
    }
}
