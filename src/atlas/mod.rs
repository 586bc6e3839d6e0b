//! Pre-packed atlas sheets
//!
//! An atlas definition maps frame names to pixel rectangles inside one sheet
//! image. Once the sheet texture is resident, frames resolve to views onto it
//! with no further fetch. Definitions are read from TexturePacker JSON exports
//! (hash or array flavour).

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::gpu::{FrameRect, TextureHandle};

/// Frame table of one atlas sheet
#[derive(Debug, Clone, PartialEq)]
pub struct AtlasDefinition {
    pub name: String,
    /// Sheet image path, relative to the image root
    pub image: String,
    pub width: u32,
    pub height: u32,
    pub frames: HashMap<String, FrameRect>,
}

#[derive(Deserialize)]
struct RawSheet {
    frames: RawFrames,
    meta: RawMeta,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFrames {
    Hash(HashMap<String, RawFrame>),
    Array(Vec<RawNamedFrame>),
}

#[derive(Deserialize)]
struct RawFrame {
    frame: FrameRect,
}

#[derive(Deserialize)]
struct RawNamedFrame {
    filename: String,
    frame: FrameRect,
}

#[derive(Deserialize)]
struct RawMeta {
    image: String,
    size: RawSize,
}

#[derive(Deserialize)]
struct RawSize {
    w: u32,
    h: u32,
}

impl AtlasDefinition {
    /// Parses a TexturePacker JSON export
    pub fn from_texturepacker_json(name: &str, json: &str) -> Result<Self> {
        let raw: RawSheet =
            serde_json::from_str(json).with_context(|| format!("Invalid atlas JSON for '{}'", name))?;

        let frames: HashMap<String, FrameRect> = match raw.frames {
            RawFrames::Hash(map) => map.into_iter().map(|(k, f)| (k, f.frame)).collect(),
            RawFrames::Array(list) => list.into_iter().map(|f| (f.filename, f.frame)).collect(),
        };

        let definition = Self {
            name: name.to_string(),
            image: raw.meta.image,
            width: raw.meta.size.w,
            height: raw.meta.size.h,
            frames,
        };
        definition.validate()?;
        Ok(definition)
    }

    /// Reads a TexturePacker JSON file; the atlas is named after the file stem
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read atlas file: {}", path.display()))?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("atlas");
        Self::from_texturepacker_json(name, &json)
    }

    /// Every frame must lie inside the sheet
    pub fn validate(&self) -> Result<()> {
        for (frame, rect) in &self.frames {
            if rect.w == 0 || rect.h == 0 {
                anyhow::bail!("Atlas '{}' frame '{}' is empty", self.name, frame);
            }
            let right = rect.x.checked_add(rect.w);
            let bottom = rect.y.checked_add(rect.h);
            let inside = matches!((right, bottom), (Some(r), Some(b)) if r <= self.width && b <= self.height);
            if !inside {
                anyhow::bail!(
                    "Atlas '{}' frame '{}' ({:?}) exceeds sheet {}x{}",
                    self.name,
                    frame,
                    rect,
                    self.width,
                    self.height
                );
            }
        }
        Ok(())
    }

    fn lookup(&self, id: &str) -> Option<(&str, FrameRect)> {
        if let Some((name, rect)) = self.frames.get_key_value(id) {
            return Some((name.as_str(), *rect));
        }
        let file_name = file_name_of(id)?;
        self.frames
            .get_key_value(file_name)
            .map(|(name, rect)| (name.as_str(), *rect))
    }
}

fn file_name_of(id: &str) -> Option<&str> {
    Path::new(id).file_name().and_then(|s| s.to_str())
}

struct AtlasEntry {
    definition: AtlasDefinition,
    sheet: Option<TextureHandle>,
}

/// Resolves logical image ids against resident atlas sheets
pub struct AtlasManager {
    atlases: Vec<AtlasEntry>,
}

impl AtlasManager {
    pub fn new(definitions: Vec<AtlasDefinition>) -> Self {
        let frames: usize = definitions.iter().map(|d| d.frames.len()).sum();
        info!("🧩 Atlas manager: {} sheets, {} frames", definitions.len(), frames);

        Self {
            atlases: definitions
                .into_iter()
                .map(|definition| AtlasEntry {
                    definition,
                    sheet: None,
                })
                .collect(),
        }
    }

    /// Makes a sheet resident. Returns false for an unknown atlas name.
    pub fn register_sheet(&mut self, atlas_name: &str, sheet: TextureHandle) -> bool {
        let Some(entry) = self.atlases.iter_mut().find(|e| e.definition.name == atlas_name) else {
            warn!("Ignoring sheet for unknown atlas '{}'", atlas_name);
            return false;
        };

        let expected = (entry.definition.width, entry.definition.height);
        if sheet.size() != expected {
            warn!(
                "Atlas '{}' sheet is {:?}, definition says {:?}",
                atlas_name,
                sheet.size(),
                expected
            );
        }

        debug!("🧩 Sheet for atlas '{}' is resident", atlas_name);
        entry.sheet = Some(sheet);
        true
    }

    /// Definitions whose sheet still needs to be loaded
    pub fn pending_sheets(&self) -> Vec<AtlasDefinition> {
        self.atlases
            .iter()
            .filter(|e| e.sheet.is_none())
            .map(|e| e.definition.clone())
            .collect()
    }

    /// Resident sheet textures
    pub fn sheets(&self) -> Vec<TextureHandle> {
        self.atlases.iter().filter_map(|e| e.sheet.clone()).collect()
    }

    /// True if a resident atlas has a frame named `id` (or its file name)
    pub fn has_frame(&self, id: &str) -> bool {
        self.find_atlas_for(id).is_some()
    }

    /// Name of the first resident atlas containing `id`
    pub fn find_atlas_for(&self, id: &str) -> Option<&str> {
        self.atlases
            .iter()
            .filter(|e| e.sheet.is_some())
            .find(|e| e.definition.lookup(id).is_some())
            .map(|e| e.definition.name.as_str())
    }

    /// View onto the frame's sub-region of the sheet. `atlas_name` pins the
    /// lookup to one atlas; `None` searches all resident sheets.
    pub fn get_frame_texture(&self, id: &str, atlas_name: Option<&str>) -> Option<TextureHandle> {
        let entry = match atlas_name {
            Some(name) => self.atlases.iter().find(|e| e.definition.name == name),
            None => {
                let name = self.find_atlas_for(id)?;
                self.atlases.iter().find(|e| e.definition.name == name)
            }
        };

        let Some(entry) = entry else {
            warn!("No atlas named {:?} for frame '{}'", atlas_name, id);
            return None;
        };
        let Some(sheet) = entry.sheet.as_ref() else {
            warn!("Atlas '{}' sheet is not loaded yet", entry.definition.name);
            return None;
        };
        let Some((frame, rect)) = entry.definition.lookup(id) else {
            warn!("Frame '{}' missing from atlas '{}'", id, entry.definition.name);
            return None;
        };

        Some(sheet.frame_view(&entry.definition.name, frame, rect))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{GpuBackend, HeadlessBackend, TextureSource};

    const HASH_JSON: &str = r#"{
        "frames": {
            "mountain.jpg": { "frame": { "x": 0, "y": 0, "w": 64, "h": 32 }, "rotated": false },
            "lake.jpg": { "frame": { "x": 64, "y": 0, "w": 64, "h": 32 } }
        },
        "meta": { "image": "slides.png", "size": { "w": 128, "h": 64 }, "scale": "1" }
    }"#;

    const ARRAY_JSON: &str = r#"{
        "frames": [
            { "filename": "forest.jpg", "frame": { "x": 0, "y": 0, "w": 32, "h": 32 } }
        ],
        "meta": { "image": "extra.png", "size": { "w": 32, "h": 32 } }
    }"#;

    fn sheet(backend: &HeadlessBackend, w: u32, h: u32) -> TextureHandle {
        backend
            .create_texture("sheet", w, h, &vec![0; (w * h * 4) as usize])
            .unwrap()
    }

    #[test]
    fn test_parses_hash_and_array_exports() {
        let hash = AtlasDefinition::from_texturepacker_json("slides", HASH_JSON).unwrap();
        assert_eq!(hash.image, "slides.png");
        assert_eq!(hash.frames.len(), 2);
        assert_eq!(hash.frames["lake.jpg"], FrameRect { x: 64, y: 0, w: 64, h: 32 });

        let array = AtlasDefinition::from_texturepacker_json("extra", ARRAY_JSON).unwrap();
        assert_eq!(array.frames.len(), 1);
        assert!(array.frames.contains_key("forest.jpg"));
    }

    #[test]
    fn test_rejects_frames_outside_sheet() {
        let json = r#"{
            "frames": { "big.jpg": { "frame": { "x": 10, "y": 0, "w": 64, "h": 64 } } },
            "meta": { "image": "s.png", "size": { "w": 64, "h": 64 } }
        }"#;
        assert!(AtlasDefinition::from_texturepacker_json("bad", json).is_err());
        assert!(AtlasDefinition::from_texturepacker_json("bad", "{ nope").is_err());
    }

    #[test]
    fn test_rejects_frames_with_wrapping_extent() {
        let json = r#"{
            "frames": { "wrap.jpg": { "frame": { "x": 4294967295, "y": 0, "w": 2, "h": 8 } } },
            "meta": { "image": "s.png", "size": { "w": 64, "h": 64 } }
        }"#;
        assert!(AtlasDefinition::from_texturepacker_json("wrap", json).is_err());

        let json = r#"{
            "frames": { "wrap.jpg": { "frame": { "x": 0, "y": 4294967290, "w": 8, "h": 10 } } },
            "meta": { "image": "s.png", "size": { "w": 64, "h": 64 } }
        }"#;
        assert!(AtlasDefinition::from_texturepacker_json("wrap", json).is_err());
    }

    #[test]
    fn test_has_frame_requires_resident_sheet() {
        let backend = HeadlessBackend::new();
        let mut atlas = AtlasManager::new(vec![
            AtlasDefinition::from_texturepacker_json("slides", HASH_JSON).unwrap(),
        ]);

        assert!(!atlas.has_frame("mountain.jpg"));
        assert_eq!(atlas.pending_sheets().len(), 1);

        assert!(atlas.register_sheet("slides", sheet(&backend, 128, 64)));
        assert!(atlas.has_frame("mountain.jpg"));
        assert!(atlas.has_frame("images/2024/mountain.jpg"));
        assert!(!atlas.has_frame("desert.jpg"));
        assert!(atlas.pending_sheets().is_empty());
    }

    #[test]
    fn test_frame_texture_is_a_view_on_the_sheet() {
        let backend = HeadlessBackend::new();
        let mut atlas = AtlasManager::new(vec![
            AtlasDefinition::from_texturepacker_json("slides", HASH_JSON).unwrap(),
        ]);
        let sheet = sheet(&backend, 128, 64);
        atlas.register_sheet("slides", sheet.clone());

        let frame = atlas.get_frame_texture("lake.jpg", None).unwrap();
        assert_eq!(frame.size(), (64, 32));
        assert_eq!(frame.allocation_key(), sheet.key());
        assert!(matches!(
            frame.source(),
            TextureSource::AtlasFrame { atlas, .. } if atlas == "slides"
        ));
        assert_eq!(backend.stats().created(), 1);
    }

    #[test]
    fn test_missing_frame_or_atlas_returns_none() {
        let backend = HeadlessBackend::new();
        let mut atlas = AtlasManager::new(vec![
            AtlasDefinition::from_texturepacker_json("slides", HASH_JSON).unwrap(),
            AtlasDefinition::from_texturepacker_json("extra", ARRAY_JSON).unwrap(),
        ]);
        atlas.register_sheet("slides", sheet(&backend, 128, 64));

        assert!(atlas.get_frame_texture("desert.jpg", None).is_none());
        assert!(atlas.get_frame_texture("lake.jpg", Some("nope")).is_none());
        assert!(atlas.get_frame_texture("forest.jpg", Some("extra")).is_none());
        assert!(!atlas.register_sheet("nope", sheet(&backend, 1, 1)));
        assert_eq!(atlas.find_atlas_for("lake.jpg"), Some("slides"));
    }
}
