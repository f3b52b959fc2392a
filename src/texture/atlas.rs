//! Region lookup inside one or more backing images.

use std::collections::HashMap;

use crate::error::{RenderError, Result};
use crate::geometry::Vec2;
use crate::image::Image;
use crate::texture::format::{AtlasData, AtlasFormat};

/// Name of the single region covering a whole image.
pub const DEFAULT_REGION: &str = "default";

/// How a texture is sampled outside of `0..1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepeatMode {
    #[default]
    NoRepeat,
    Repeat,
    RepeatX,
    RepeatY,
}

impl RepeatMode {
    /// Parse a CSS-style repeat keyword; unknown values do not repeat.
    pub fn from_name(name: &str) -> Self {
        match name {
            "repeat" => Self::Repeat,
            "repeat-x" => Self::RepeatX,
            "repeat-y" => Self::RepeatY,
            _ => Self::NoRepeat,
        }
    }

    pub fn repeats_x(self) -> bool {
        matches!(self, Self::Repeat | Self::RepeatX)
    }

    pub fn repeats_y(self) -> bool {
        matches!(self, Self::Repeat | Self::RepeatY)
    }
}

/// A named sub-rectangle of a backing image.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub name: String,
    /// Key of the backing image inside a multipack atlas.
    pub texture: String,
    pub offset: Vec2,
    pub width: f32,
    pub height: f32,
    pub rotated: bool,
    pub trimmed: bool,
    /// Rotation to undo at draw time, `-PI/2` for rotated frames.
    pub angle: f32,
    /// Normalized pivot derived from trim metadata.
    pub anchor_point: Option<Vec2>,
    /// `[u0, v0, u1, v1]`
    pub uvs: [f32; 4],
}

impl Region {
    /// Size the region occupies in its backing image. Packers store rotated
    /// frames turned by a quarter, so their width and height swap.
    pub fn footprint(&self) -> (f32, f32) {
        if self.rotated {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }

    fn compute_uvs(&self, (texture_width, texture_height): (f32, f32), uv_offset: f32) -> [f32; 4] {
        let (w, h) = self.footprint();
        compute_uvs(
            self.offset.x,
            self.offset.y,
            w,
            h,
            texture_width,
            texture_height,
            uv_offset,
        )
    }
}

/// Fixed-cell spritesheet description.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpriteSheet {
    pub frame_width: u32,
    pub frame_height: u32,
    pub margin: u32,
    pub spacing: u32,
    pub anchor_point: Option<Vec2>,
}

impl SpriteSheet {
    pub fn new(frame_width: u32, frame_height: u32) -> Self {
        Self {
            frame_width,
            frame_height,
            margin: 0,
            spacing: 0,
            anchor_point: None,
        }
    }

    pub fn margin(mut self, margin: u32) -> Self {
        self.margin = margin;
        self
    }

    pub fn spacing(mut self, spacing: u32) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn anchor_point(mut self, anchor: Vec2) -> Self {
        self.anchor_point = Some(anchor);
        self
    }
}

/// UV rectangle of a region, inset by half of `uv_offset` texels per edge.
pub fn compute_uvs(
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    texture_width: f32,
    texture_height: f32,
    uv_offset: f32,
) -> [f32; 4] {
    let inset = uv_offset * 0.5;
    [
        (x + inset) / texture_width,
        (y + inset) / texture_height,
        (x + width - inset) / texture_width,
        (y + height - inset) / texture_height,
    ]
}

/// One backing image and the regions defined on it.
#[derive(Debug, Clone)]
struct Page {
    key: String,
    image: Image,
    /// Dimensions UVs are normalized against.
    size: (f32, f32),
    regions: HashMap<String, Region>,
}

impl Page {
    fn insert(&mut self, mut region: Region, uv_offset: f32) {
        region.uvs = region.compute_uvs(self.size, uv_offset);
        // frames are also reachable through their literal "x,y,w,h" key
        let (w, h) = region.footprint();
        let alias = region_key(region.offset.x, region.offset.y, w, h);
        self.regions.entry(alias).or_insert_with(|| region.clone());
        self.regions.insert(region.name.clone(), region);
    }
}

/// A texture atlas: regions spread over one or more backing images.
#[derive(Debug, Clone)]
pub struct TextureAtlas {
    format: AtlasFormat,
    repeat: RepeatMode,
    uv_offset: f32,
    pages: Vec<Page>,
}

impl TextureAtlas {
    /// Load a JSON atlas whose frames live on `image`.
    pub fn from_json(json: &str, image: Image) -> Result<Self> {
        Self::from_data(AtlasData::from_json(json)?, image)
    }

    pub fn from_data(data: AtlasData, image: Image) -> Result<Self> {
        Self::from_multipack(vec![(data, image)])
    }

    /// Load several atlases whose frames are spread over several images.
    /// Pages are keyed by `meta.image`.
    pub fn from_multipack(packs: Vec<(AtlasData, Image)>) -> Result<Self> {
        if packs.is_empty() {
            return Err(RenderError::EmptyAtlas);
        }
        let mut atlas = Self {
            format: AtlasFormat::TexturePacker,
            repeat: RepeatMode::NoRepeat,
            uv_offset: 0.0,
            pages: Vec::with_capacity(packs.len()),
        };

        for (index, (data, image)) in packs.into_iter().enumerate() {
            let format = data.format()?;
            if index == 0 {
                atlas.format = format;
                atlas.repeat = data
                    .meta
                    .repeat
                    .as_deref()
                    .map(RepeatMode::from_name)
                    .unwrap_or_default();
            }
            let key = data
                .meta
                .image
                .clone()
                .unwrap_or_else(|| DEFAULT_REGION.to_string());
            let mut page = Page {
                key: key.clone(),
                image,
                size: (data.meta.size.w, data.meta.size.h),
                regions: HashMap::new(),
            };
            for (name, frame) in data.frames.named() {
                let s = frame.frame;
                let anchor_point = match (frame.sprite_source_size, frame.source_size, frame.pivot)
                {
                    (Some(sss), Some(source), Some(pivot)) => {
                        let (trim_x, trim_y) = if frame.trimmed {
                            (sss.x, sss.y)
                        } else {
                            (0.0, 0.0)
                        };
                        let origin_x = source.w * pivot.x - trim_x;
                        let origin_y = source.h * pivot.y - trim_y;
                        Some(Vec2::new(origin_x / s.w, origin_y / s.h))
                    }
                    _ => None,
                };
                let region = Region {
                    name,
                    texture: key.clone(),
                    offset: Vec2::new(s.x, s.y),
                    width: s.w,
                    height: s.h,
                    rotated: frame.rotated,
                    trimmed: frame.trimmed,
                    angle: if frame.rotated {
                        -std::f32::consts::FRAC_PI_2
                    } else {
                        0.0
                    },
                    anchor_point,
                    uvs: [0.0; 4],
                };
                page.insert(region, atlas.uv_offset);
            }
            atlas.pages.push(page);
        }

        log::debug!(
            "Loaded {:?} atlas with {} page(s)",
            atlas.format,
            atlas.pages.len()
        );
        Ok(atlas)
    }

    /// Slice `image` into a grid of equally sized cells named `"0"`, `"1"`, ...
    ///
    /// If the image does not divide evenly into cells, the effective size is
    /// truncated to the whole cells with a warning.
    pub fn from_spritesheet(sheet: SpriteSheet, image: Image) -> Self {
        let spacing = sheet.spacing;
        let margin = sheet.margin;
        let cell_w = sheet.frame_width + spacing;
        let cell_h = sheet.frame_height + spacing;
        let mut width = image.width();
        let mut height = image.height();

        let cols = (width + spacing).saturating_sub(margin) / cell_w.max(1);
        let rows = (height + spacing).saturating_sub(margin) / cell_h.max(1);

        if width % cell_w.max(1) != 0 || height % cell_h.max(1) != 0 {
            let computed_w = cols * cell_w;
            let computed_h = rows * cell_h;
            let delta_w = i64::from(computed_w) - i64::from(width);
            let delta_h = i64::from(computed_h) - i64::from(height);
            if delta_w != i64::from(spacing) && delta_h != i64::from(spacing) {
                width = computed_w;
                height = computed_h;
                log::warn!(
                    "Spritesheet texture {} is not divisible by {}x{}, truncating effective size to {}x{}",
                    image.label(),
                    cell_w,
                    cell_h,
                    width,
                    height
                );
            }
        }

        let mut page = Page {
            key: DEFAULT_REGION.to_string(),
            image,
            size: (width as f32, height as f32),
            regions: HashMap::new(),
        };
        for frame in 0..cols * rows {
            let region = Region {
                name: frame.to_string(),
                texture: DEFAULT_REGION.to_string(),
                offset: Vec2::new(
                    (margin + cell_w * (frame % cols)) as f32,
                    (margin + cell_h * (frame / cols)) as f32,
                ),
                width: sheet.frame_width as f32,
                height: sheet.frame_height as f32,
                rotated: false,
                trimmed: false,
                angle: 0.0,
                anchor_point: sheet.anchor_point,
                uvs: [0.0; 4],
            };
            page.insert(region, 0.0);
        }

        Self {
            format: AtlasFormat::SpriteSheet,
            repeat: RepeatMode::NoRepeat,
            uv_offset: 0.0,
            pages: vec![page],
        }
    }

    /// Wrap a raw image in a single region named [`DEFAULT_REGION`].
    pub fn from_image(image: Image) -> Self {
        Self::pattern(image, RepeatMode::NoRepeat)
    }

    /// A single-region atlas sampled with `repeat`.
    pub fn pattern(image: Image, repeat: RepeatMode) -> Self {
        let width = image.width() as f32;
        let height = image.height() as f32;
        let mut page = Page {
            key: DEFAULT_REGION.to_string(),
            image,
            size: (width, height),
            regions: HashMap::new(),
        };
        page.insert(
            Region {
                name: DEFAULT_REGION.to_string(),
                texture: DEFAULT_REGION.to_string(),
                offset: Vec2::ZERO,
                width,
                height,
                rotated: false,
                trimmed: false,
                angle: 0.0,
                anchor_point: None,
                uvs: [0.0; 4],
            },
            0.0,
        );
        Self {
            format: AtlasFormat::Internal,
            repeat,
            uv_offset: 0.0,
            pages: vec![page],
        }
    }

    /// Recompute every region's UVs with a texel inset.
    pub fn with_uv_offset(mut self, uv_offset: f32) -> Self {
        self.uv_offset = uv_offset;
        for page in &mut self.pages {
            let size = page.size;
            for region in page.regions.values_mut() {
                region.uvs = region.compute_uvs(size, uv_offset);
            }
        }
        self
    }

    pub fn format(&self) -> AtlasFormat {
        self.format
    }

    pub fn repeat(&self) -> RepeatMode {
        self.repeat
    }

    pub fn uv_offset(&self) -> f32 {
        self.uv_offset
    }

    /// Key of the first page, used in diagnostics.
    pub fn name(&self) -> &str {
        self.pages.first().map_or(DEFAULT_REGION, |p| p.key.as_str())
    }

    /// Backing image of the first page.
    pub fn texture(&self) -> Option<&Image> {
        self.pages.first().map(|p| &p.image)
    }

    /// Backing image a region was cut from.
    pub fn texture_for(&self, region: &Region) -> Option<&Image> {
        self.pages
            .iter()
            .find(|p| p.key == region.texture)
            .map(|p| &p.image)
    }

    pub fn images(&self) -> impl Iterator<Item = &Image> {
        self.pages.iter().map(|p| &p.image)
    }

    /// Look a region up by name across every page.
    pub fn region(&self, name: &str) -> Option<&Region> {
        self.pages.iter().find_map(|p| p.regions.get(name))
    }

    pub fn region_names(&self) -> impl Iterator<Item = &str> {
        self.pages
            .iter()
            .flat_map(|p| p.regions.iter())
            .filter(|(key, region)| **key == region.name)
            .map(|(key, _)| key.as_str())
    }

    /// Define a region on the first page.
    pub fn add_region(&mut self, name: &str, x: f32, y: f32, width: f32, height: f32) -> &Region {
        log::debug!("Adding texture region {} to atlas {}", name, self.name());
        let uv_offset = self.uv_offset;
        let page = &mut self.pages[0];
        let texture = page.key.clone();
        page.insert(
            Region {
                name: name.to_string(),
                texture,
                offset: Vec2::new(x, y),
                width,
                height,
                rotated: false,
                trimmed: false,
                angle: 0.0,
                anchor_point: None,
                uvs: [0.0; 4],
            },
            uv_offset,
        );
        &page.regions[name]
    }

    /// Resolve a region by name, or by a literal `"x,y,w,h"` key which
    /// defines the region on demand.
    pub fn resolve(&mut self, name: &str) -> Result<&Region> {
        if self.region(name).is_none() {
            let (x, y, w, h) = parse_region_key(name).ok_or_else(|| RenderError::RegionNotFound {
                region: name.to_string(),
                atlas: self.name().to_string(),
            })?;
            return Ok(self.add_region(name, x, y, w, h));
        }
        self.region(name).ok_or_else(|| RenderError::RegionNotFound {
            region: name.to_string(),
            atlas: self.name().to_string(),
        })
    }

    pub fn uvs(&mut self, name: &str) -> Result<[f32; 4]> {
        Ok(self.resolve(name)?.uvs)
    }
}

/// Build the literal key for a sub-rectangle.
pub fn region_key(x: f32, y: f32, width: f32, height: f32) -> String {
    format!("{},{},{},{}", x, y, width, height)
}

fn parse_region_key(key: &str) -> Option<(f32, f32, f32, f32)> {
    let mut parts = key.split(',').map(|p| p.trim().parse::<f32>());
    let x = parts.next()?.ok()?;
    let y = parts.next()?.ok()?;
    let w = parts.next()?.ok()?;
    let h = parts.next()?.ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((x, y, w, h))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    fn image(width: u32, height: u32) -> Image {
        Image::new(width, height).unwrap()
    }

    const TEXTURE_PACKER: &str = r#"{
        "meta": {"app": "http://www.codeandweb.com/texturepacker", "image": "sprites.png", "size": {"w": 128, "h": 64}},
        "frames": [
            {
                "filename": "hero",
                "frame": {"x": 32, "y": 0, "w": 16, "h": 32},
                "rotated": false,
                "trimmed": true,
                "spriteSourceSize": {"x": 4, "y": 2, "w": 16, "h": 32},
                "sourceSize": {"w": 24, "h": 36},
                "pivot": {"x": 0.5, "y": 1.0}
            },
            {
                "filename": "coin",
                "frame": {"x": 0, "y": 32, "w": 8, "h": 8},
                "rotated": true
            }
        ]
    }"#;

    #[test]
    fn test_json_regions_and_anchor() {
        let atlas = TextureAtlas::from_json(TEXTURE_PACKER, image(128, 64)).unwrap();
        assert_eq!(atlas.format(), AtlasFormat::TexturePacker);
        assert_eq!(atlas.name(), "sprites.png");

        let hero = atlas.region("hero").unwrap();
        assert_eq!(hero.offset, Vec2::new(32.0, 0.0));
        assert_eq!(hero.texture, "sprites.png");
        let anchor = hero.anchor_point.unwrap();
        // (24 * 0.5 - 4) / 16, (36 * 1.0 - 2) / 32
        assert!(approx_eq(anchor.x, 0.5));
        assert!(approx_eq(anchor.y, 34.0 / 32.0));

        let coin = atlas.region("coin").unwrap();
        assert!(coin.rotated);
        assert!(approx_eq(coin.angle, -std::f32::consts::FRAC_PI_2));
        assert!(coin.anchor_point.is_none());
    }

    #[test]
    fn test_uv_round_trip() {
        let atlas = TextureAtlas::from_json(TEXTURE_PACKER, image(128, 64)).unwrap();
        let uvs = atlas.region("hero").unwrap().uvs;
        let expected = [32.0 / 128.0, 0.0, 48.0 / 128.0, 32.0 / 64.0];
        for (u, e) in uvs.iter().zip(expected) {
            assert!(approx_eq(*u, e));
        }
    }

    #[test]
    fn test_rotated_frame_samples_its_turned_footprint() {
        let atlas = TextureAtlas::from_json(
            r#"{"meta":{"app":"texturepacker","image":"r.png","size":{"w":64,"h":64}},
                "frames":[{"filename":"tall","frame":{"x":0,"y":0,"w":16,"h":32},"rotated":true}]}"#,
            image(64, 64),
        )
        .unwrap();
        let tall = atlas.region("tall").unwrap();
        assert_eq!(tall.footprint(), (32.0, 16.0));
        assert_eq!(tall.uvs, [0.0, 0.0, 0.5, 0.25]);
        assert!(atlas.region("0,0,32,16").is_some());
    }

    #[test]
    fn test_uv_offset_insets_every_edge() {
        let atlas = TextureAtlas::from_json(TEXTURE_PACKER, image(128, 64))
            .unwrap()
            .with_uv_offset(1.0);
        let uvs = atlas.region("hero").unwrap().uvs;
        assert!(approx_eq(uvs[0], 32.5 / 128.0));
        assert!(approx_eq(uvs[1], 0.5 / 64.0));
        assert!(approx_eq(uvs[2], 47.5 / 128.0));
        assert!(approx_eq(uvs[3], 31.5 / 64.0));
    }

    #[test]
    fn test_literal_key_creates_region_on_demand() {
        let mut atlas = TextureAtlas::from_image(image(100, 100));
        let region = atlas.resolve("10,20,30,40").unwrap().clone();
        assert_eq!(region.offset, Vec2::new(10.0, 20.0));
        assert_eq!(region.width, 30.0);
        assert_eq!(region.height, 40.0);
        assert!(approx_eq(region.uvs[2], 0.4));
        // now cached
        assert!(atlas.region("10,20,30,40").is_some());
    }

    #[test]
    fn test_unknown_region_names_atlas() {
        let mut atlas = TextureAtlas::from_json(TEXTURE_PACKER, image(128, 64)).unwrap();
        match atlas.resolve("villain") {
            Err(RenderError::RegionNotFound { region, atlas }) => {
                assert_eq!(region, "villain");
                assert_eq!(atlas, "sprites.png");
            }
            other => panic!("unexpected {:?}", other.map(|r| r.name.clone())),
        }
    }

    #[test]
    fn test_whole_frame_alias() {
        let atlas = TextureAtlas::from_image(image(64, 32));
        let by_key = atlas.region(&region_key(0.0, 0.0, 64.0, 32.0)).unwrap();
        assert_eq!(by_key.name, DEFAULT_REGION);
    }

    #[test]
    fn test_spritesheet_grid() {
        let atlas = TextureAtlas::from_spritesheet(
            SpriteSheet::new(16, 16).margin(2).spacing(2),
            image(56, 38),
        );
        // (56 - 2 + 2) / 18 = 3 columns, (38 - 2 + 2) / 18 = 2 rows
        assert_eq!(atlas.region_names().count(), 6);
        let r4 = atlas.region("4").unwrap();
        assert_eq!(r4.offset, Vec2::new(20.0, 20.0));
        assert_eq!(atlas.format(), AtlasFormat::SpriteSheet);
    }

    #[test]
    fn test_spritesheet_truncates_uneven_size() {
        let atlas = TextureAtlas::from_spritesheet(SpriteSheet::new(16, 16), image(40, 40));
        assert_eq!(atlas.region_names().count(), 4);
        // effective size is 32x32, so a full cell spans half the texture
        let uvs = atlas.region("3").unwrap().uvs;
        assert!(approx_eq(uvs[0], 0.5));
        assert!(approx_eq(uvs[3], 1.0));
    }

    #[test]
    fn test_multipack_lookup_spans_pages() {
        let page = |name: &str, frame: &str| {
            AtlasData::from_json(&format!(
                r#"{{"meta":{{"app":"texturepacker","image":"{name}","size":{{"w":32,"h":32}}}},
                    "frames":[{{"filename":"{frame}","frame":{{"x":0,"y":0,"w":8,"h":8}}}}]}}"#
            ))
            .unwrap()
        };
        let first = image(32, 32);
        let second = image(32, 32);
        let atlas = TextureAtlas::from_multipack(vec![
            (page("a.png", "alpha"), first.clone()),
            (page("b.png", "beta"), second.clone()),
        ])
        .unwrap();

        let beta = atlas.region("beta").unwrap();
        assert_eq!(beta.texture, "b.png");
        assert_eq!(atlas.texture_for(beta).unwrap().id(), second.id());
        assert_eq!(atlas.texture().unwrap().id(), first.id());
        assert_eq!(atlas.images().count(), 2);
    }

    #[test]
    fn test_repeat_mode_parsing() {
        assert_eq!(RepeatMode::from_name("repeat-x"), RepeatMode::RepeatX);
        assert!(RepeatMode::RepeatX.repeats_x());
        assert!(!RepeatMode::RepeatX.repeats_y());
        assert_eq!(RepeatMode::from_name("bogus"), RepeatMode::NoRepeat);
    }
}
