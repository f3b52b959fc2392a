//! Atlas JSON schema shared by TexturePacker, Free Texture Packer,
//! ShoeBox, Aseprite and internally generated atlases.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::{RenderError, Result};

/// Producer of an atlas, identified from `meta.app`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtlasFormat {
    TexturePacker,
    ShoeBox,
    Aseprite,
    /// Single-frame and pattern atlases built by the renderer itself.
    Internal,
    /// Fixed cell grid, not loaded from JSON.
    SpriteSheet,
}

impl AtlasFormat {
    pub fn identify(app: &str) -> Result<Self> {
        let lower = app.to_ascii_lowercase();
        if lower.contains("texturepacker") || lower.contains("free-tex-packer") {
            Ok(Self::TexturePacker)
        } else if lower.contains("shoebox") {
            Ok(Self::ShoeBox)
        } else if lower.contains("aseprite") {
            Ok(Self::Aseprite)
        } else if app.contains("melonJS") {
            Ok(Self::Internal)
        } else {
            Err(RenderError::UnknownAtlasFormat {
                app: app.to_string(),
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct FrameRect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct FrameSize {
    pub w: f32,
    pub h: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Pivot {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameData {
    /// Missing on the trailing dummy entry some ShoeBox templates emit.
    #[serde(default)]
    pub filename: Option<String>,
    pub frame: FrameRect,
    #[serde(default)]
    pub rotated: bool,
    #[serde(default)]
    pub trimmed: bool,
    #[serde(default)]
    pub sprite_source_size: Option<FrameRect>,
    #[serde(default)]
    pub source_size: Option<FrameSize>,
    #[serde(default)]
    pub pivot: Option<Pivot>,
}

/// `frames` is an array in the "JSON (Array)" export and a map keyed by
/// frame name in the "JSON (Hash)" export.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FrameList {
    Array(Vec<FrameData>),
    Map(BTreeMap<String, FrameData>),
}

impl FrameList {
    /// Named frames in declaration order (map exports are ordered by name).
    pub fn named(&self) -> Vec<(String, &FrameData)> {
        match self {
            FrameList::Array(frames) => frames
                .iter()
                .filter_map(|f| f.filename.clone().map(|name| (name, f)))
                .collect(),
            FrameList::Map(frames) => frames
                .iter()
                .map(|(name, f)| (f.filename.clone().unwrap_or_else(|| name.clone()), f))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AtlasMeta {
    pub app: String,
    pub size: FrameSize,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub repeat: Option<String>,
    #[serde(default)]
    pub exporter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AtlasData {
    pub meta: AtlasMeta,
    pub frames: FrameList,
}

impl AtlasData {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn format(&self) -> Result<AtlasFormat> {
        let format = AtlasFormat::identify(&self.meta.app)?;
        if format == AtlasFormat::ShoeBox
            && !self
                .meta
                .exporter
                .as_deref()
                .is_some_and(|e| e.contains("melonJS"))
        {
            return Err(RenderError::UnknownAtlasFormat {
                app: format!("{} (requires the melonJS exporter template)", self.meta.app),
            });
        }
        Ok(format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identify_producers() {
        assert_eq!(
            AtlasFormat::identify("http://www.codeandweb.com/texturepacker").unwrap(),
            AtlasFormat::TexturePacker
        );
        assert_eq!(
            AtlasFormat::identify("http://free-tex-packer.com").unwrap(),
            AtlasFormat::TexturePacker
        );
        assert_eq!(
            AtlasFormat::identify("http://www.aseprite.org/").unwrap(),
            AtlasFormat::Aseprite
        );
        assert_eq!(
            AtlasFormat::identify("melonJS").unwrap(),
            AtlasFormat::Internal
        );
        assert!(matches!(
            AtlasFormat::identify("photoshop"),
            Err(RenderError::UnknownAtlasFormat { app }) if app == "photoshop"
        ));
    }

    #[test]
    fn test_shoebox_requires_exporter() {
        let json = r#"{"meta":{"app":"ShoeBox","size":{"w":8,"h":8}},"frames":[]}"#;
        let data = AtlasData::from_json(json).unwrap();
        assert!(data.format().is_err());

        let json = r#"{"meta":{"app":"ShoeBox","exporter":"melonJS","size":{"w":8,"h":8}},"frames":[]}"#;
        let data = AtlasData::from_json(json).unwrap();
        assert_eq!(data.format().unwrap(), AtlasFormat::ShoeBox);
    }

    #[test]
    fn test_frames_hash_export() {
        let json = r#"{
            "meta": {"app": "aseprite", "size": {"w": 32, "h": 16}},
            "frames": {
                "walk 0": {"frame": {"x": 0, "y": 0, "w": 16, "h": 16}},
                "walk 1": {"frame": {"x": 16, "y": 0, "w": 16, "h": 16}}
            }
        }"#;
        let data = AtlasData::from_json(json).unwrap();
        let named = data.frames.named();
        assert_eq!(named.len(), 2);
        assert_eq!(named[1].0, "walk 1");
        assert_eq!(named[1].1.frame.x, 16.0);
    }

    #[test]
    fn test_frames_without_filename_are_skipped() {
        let json = r#"{
            "meta": {"app": "texturepacker", "size": {"w": 8, "h": 8}},
            "frames": [
                {"filename": "a", "frame": {"x": 0, "y": 0, "w": 4, "h": 4}},
                {"frame": {"x": 0, "y": 0, "w": 0, "h": 0}}
            ]
        }"#;
        let data = AtlasData::from_json(json).unwrap();
        assert_eq!(data.frames.named().len(), 1);
    }
}
