//! GPU-backed handles shared between the slider subsystems
//!
//! Everything the widget allocates on the GPU side is represented here by a
//! cheap, clonable handle:
//! - `TextureHandle`: an owned texture or a view onto an atlas sheet
//! - `DisplayNode`: a scene-graph sprite or container
//! - `FilterHandle`: a shader filter instance with named uniforms
//!
//! Handles never free anything on drop. Destruction goes through
//! `ResourceManager`, which calls `destroy` exactly once per tracked handle.
//!
//! The actual allocation is delegated to a `GpuBackend`. `HeadlessBackend`
//! keeps textures in memory and counts allocations; `WgpuBackend` (feature
//! `wgpu-backend`) uploads real textures.

use anyhow::Result;
use cgmath::Vector2;
use log::{debug, warn};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::resources::{Disposable, ResourceKey};

mod headless;
#[cfg(feature = "wgpu-backend")]
mod wgpu_backend;

pub use headless::{HeadlessBackend, HeadlessStats};
#[cfg(feature = "wgpu-backend")]
pub use wgpu_backend::{WgpuBackend, WgpuTexture};

/// Allocates GPU textures for the slider
pub trait GpuBackend: Send + Sync {
    /// Human-readable backend name for logs
    fn name(&self) -> &str;

    /// Uploads tightly packed RGBA8 pixels into a new texture
    fn create_texture(&self, label: &str, width: u32, height: u32, rgba: &[u8])
        -> Result<TextureHandle>;
}

/// Backend-side storage behind a texture
pub trait TextureBacking: Send + Sync {
    /// Frees the GPU allocation
    fn destroy(&self) -> Result<()>;

    /// Access to the concrete backing (e.g. to fetch a wgpu view)
    fn as_any(&self) -> &dyn Any;
}

/// Rectangle inside an atlas sheet, in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FrameRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// Where the pixels of a texture handle come from
#[derive(Debug, Clone, PartialEq)]
pub enum TextureSource {
    /// The handle owns its allocation
    Owned,
    /// The handle is a view onto a shared atlas sheet
    AtlasFrame {
        atlas: String,
        frame: String,
        rect: FrameRect,
        /// [u_min, v_min, u_max, v_max]
        uv_rect: [f32; 4],
    },
}

struct TextureInner {
    key: ResourceKey,
    label: String,
    width: u32,
    height: u32,
    backing: Box<dyn TextureBacking>,
    destroyed: AtomicBool,
}

/// Clonable handle to a GPU texture or atlas sub-region
#[derive(Clone)]
pub struct TextureHandle {
    key: ResourceKey,
    inner: Arc<TextureInner>,
    source: TextureSource,
}

impl std::fmt::Debug for TextureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureHandle")
            .field("key", &self.key)
            .field("label", &self.inner.label)
            .field("size", &self.size())
            .field("source", &self.source)
            .finish()
    }
}

impl TextureHandle {
    /// Wraps a freshly created backend allocation
    pub fn new(label: &str, width: u32, height: u32, backing: Box<dyn TextureBacking>) -> Self {
        let key = ResourceKey::fresh();
        Self {
            key,
            inner: Arc::new(TextureInner {
                key,
                label: label.to_string(),
                width,
                height,
                backing,
                destroyed: AtomicBool::new(false),
            }),
            source: TextureSource::Owned,
        }
    }

    /// Creates a view onto a sub-region of this texture without a new allocation
    pub fn frame_view(&self, atlas: &str, frame: &str, rect: FrameRect) -> Self {
        let (sheet_w, sheet_h) = (self.inner.width.max(1) as f32, self.inner.height.max(1) as f32);
        let uv_rect = [
            rect.x as f32 / sheet_w,
            rect.y as f32 / sheet_h,
            (rect.x + rect.w) as f32 / sheet_w,
            (rect.y + rect.h) as f32 / sheet_h,
        ];

        Self {
            key: ResourceKey::fresh(),
            inner: Arc::clone(&self.inner),
            source: TextureSource::AtlasFrame {
                atlas: atlas.to_string(),
                frame: frame.to_string(),
                rect,
                uv_rect,
            },
        }
    }

    pub fn key(&self) -> ResourceKey {
        self.key
    }

    /// Key of the allocation this handle reads from (the sheet for atlas frames)
    pub fn allocation_key(&self) -> ResourceKey {
        self.inner.key
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Logical size: the frame size for atlas views, the full size otherwise
    pub fn size(&self) -> (u32, u32) {
        match &self.source {
            TextureSource::AtlasFrame { rect, .. } => (rect.w, rect.h),
            TextureSource::Owned => (self.inner.width, self.inner.height),
        }
    }

    pub fn source(&self) -> &TextureSource {
        &self.source
    }

    pub fn is_atlas_frame(&self) -> bool {
        matches!(self.source, TextureSource::AtlasFrame { .. })
    }

    /// True once the underlying allocation has been freed
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    pub fn backing(&self) -> &dyn TextureBacking {
        self.inner.backing.as_ref()
    }

    /// Frees the allocation. Atlas views only drop their reference; the sheet
    /// stays alive until its own handle is destroyed.
    pub fn destroy(&self) -> Result<()> {
        if self.is_atlas_frame() {
            debug!("🧩 Released atlas view {:?} of '{}'", self.key, self.inner.label);
            return Ok(());
        }

        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        debug!("🗑️ Destroying texture '{}' {:?}", self.inner.label, self.key);
        self.inner.backing.destroy()
    }
}

impl Disposable for TextureHandle {
    fn resource_key(&self) -> ResourceKey {
        self.key
    }

    fn dispose(&mut self) -> Result<()> {
        self.destroy()
    }
}

/// Kind of scene-graph node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Sprite,
    Container,
}

#[derive(Debug)]
struct NodeState {
    label: String,
    texture: Option<TextureHandle>,
    position: Vector2<f32>,
    scale: Vector2<f32>,
    alpha: f32,
    visible: bool,
    filters: Vec<FilterHandle>,
    children: Vec<ResourceKey>,
    destroyed: bool,
}

/// Clonable handle to a sprite or container in the scene graph
#[derive(Debug, Clone)]
pub struct DisplayNode {
    key: ResourceKey,
    kind: NodeKind,
    state: Arc<Mutex<NodeState>>,
}

impl DisplayNode {
    fn with_kind(kind: NodeKind, label: &str, texture: Option<TextureHandle>) -> Self {
        Self {
            key: ResourceKey::fresh(),
            kind,
            state: Arc::new(Mutex::new(NodeState {
                label: label.to_string(),
                texture,
                position: Vector2::new(0.0, 0.0),
                scale: Vector2::new(1.0, 1.0),
                alpha: 1.0,
                visible: true,
                filters: Vec::new(),
                children: Vec::new(),
                destroyed: false,
            })),
        }
    }

    pub fn sprite(label: &str, texture: TextureHandle) -> Self {
        Self::with_kind(NodeKind::Sprite, label, Some(texture))
    }

    pub fn container(label: &str) -> Self {
        Self::with_kind(NodeKind::Container, label, None)
    }

    pub fn key(&self) -> ResourceKey {
        self.key
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn label(&self) -> String {
        self.state.lock().label.clone()
    }

    /// Swaps the texture shown by a sprite, returning the previous one
    pub fn set_texture(&self, texture: TextureHandle) -> Option<TextureHandle> {
        let mut state = self.state.lock();
        if state.destroyed {
            warn!("Ignoring texture swap on destroyed node '{}'", state.label);
            return None;
        }
        state.texture.replace(texture)
    }

    pub fn texture(&self) -> Option<TextureHandle> {
        self.state.lock().texture.clone()
    }

    pub fn set_position(&self, x: f32, y: f32) {
        self.state.lock().position = Vector2::new(x, y);
    }

    pub fn position(&self) -> Vector2<f32> {
        self.state.lock().position
    }

    pub fn set_scale(&self, sx: f32, sy: f32) {
        self.state.lock().scale = Vector2::new(sx, sy);
    }

    pub fn scale(&self) -> Vector2<f32> {
        self.state.lock().scale
    }

    pub fn set_alpha(&self, alpha: f32) {
        self.state.lock().alpha = alpha.clamp(0.0, 1.0);
    }

    pub fn alpha(&self) -> f32 {
        self.state.lock().alpha
    }

    pub fn set_visible(&self, visible: bool) {
        self.state.lock().visible = visible;
    }

    pub fn is_visible(&self) -> bool {
        self.state.lock().visible
    }

    pub fn add_child(&self, child: &DisplayNode) {
        let mut state = self.state.lock();
        if !state.children.contains(&child.key) {
            state.children.push(child.key);
        }
    }

    pub fn child_count(&self) -> usize {
        self.state.lock().children.len()
    }

    pub fn attach_filter(&self, filter: FilterHandle) {
        let mut state = self.state.lock();
        if !state.filters.iter().any(|f| f.key() == filter.key()) {
            state.filters.push(filter);
        }
    }

    pub fn filters(&self) -> Vec<FilterHandle> {
        self.state.lock().filters.clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    /// Detaches children, filters and texture. Textures are not freed here;
    /// they are owned by the ledger and disposed after all nodes.
    pub fn destroy(&self) {
        let mut state = self.state.lock();
        if state.destroyed {
            return;
        }
        state.destroyed = true;
        state.texture = None;
        state.filters.clear();
        state.children.clear();
        debug!("🧹 Destroyed {:?} node '{}'", self.kind, state.label);
    }
}

impl Disposable for DisplayNode {
    fn resource_key(&self) -> ResourceKey {
        self.key
    }

    fn dispose(&mut self) -> Result<()> {
        self.destroy();
        Ok(())
    }
}

#[derive(Debug)]
struct FilterState {
    enabled: bool,
    uniforms: HashMap<String, f32>,
    destroyed: bool,
}

/// Clonable handle to a shader filter instance
#[derive(Debug, Clone)]
pub struct FilterHandle {
    key: ResourceKey,
    name: Arc<str>,
    state: Arc<Mutex<FilterState>>,
}

impl FilterHandle {
    pub fn new(name: &str) -> Self {
        Self {
            key: ResourceKey::fresh(),
            name: Arc::from(name),
            state: Arc::new(Mutex::new(FilterState {
                enabled: true,
                uniforms: HashMap::new(),
                destroyed: false,
            })),
        }
    }

    pub fn key(&self) -> ResourceKey {
        self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_uniform(&self, name: &str, value: f32) {
        let mut state = self.state.lock();
        if state.destroyed {
            return;
        }
        state.uniforms.insert(name.to_string(), value);
    }

    pub fn uniform(&self, name: &str) -> Option<f32> {
        self.state.lock().uniforms.get(name).copied()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.state.lock().enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    pub fn destroy(&self) {
        let mut state = self.state.lock();
        state.destroyed = true;
        state.enabled = false;
        state.uniforms.clear();
    }
}

impl Disposable for FilterHandle {
    fn resource_key(&self) -> ResourceKey {
        self.key
    }

    fn dispose(&mut self) -> Result<()> {
        self.destroy();
        Ok(())
    }
}

/// Scale that fits `content` inside `container`, preserving aspect ratio.
/// Degenerate sizes fall back to identity scale.
pub fn fit_scale(container: (u32, u32), content: (u32, u32)) -> f32 {
    if container.0 == 0 || container.1 == 0 || content.0 == 0 || content.1 == 0 {
        warn!(
            "Degenerate size in fit_scale (container {:?}, content {:?}), using identity",
            container, content
        );
        return 1.0;
    }

    let sx = container.0 as f32 / content.0 as f32;
    let sy = container.1 as f32 / content.1 as f32;
    sx.min(sy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_texture_destroys_once() {
        let backend = HeadlessBackend::new();
        let texture = backend.create_texture("slide", 4, 4, &[0; 64]).unwrap();

        texture.destroy().unwrap();
        texture.destroy().unwrap();
        texture.clone().destroy().unwrap();

        assert!(texture.is_destroyed());
        assert_eq!(backend.stats().destroyed(), 1);
    }

    #[test]
    fn test_frame_view_does_not_free_sheet() {
        let backend = HeadlessBackend::new();
        let sheet = backend.create_texture("sheet", 200, 100, &vec![0; 200 * 100 * 4]).unwrap();
        let view = sheet.frame_view("main", "a.jpg", FrameRect { x: 50, y: 0, w: 50, h: 50 });

        assert_eq!(view.size(), (50, 50));
        assert_eq!(view.allocation_key(), sheet.key());
        assert_ne!(view.key(), sheet.key());
        match view.source() {
            TextureSource::AtlasFrame { uv_rect, .. } => {
                assert_eq!(*uv_rect, [0.25, 0.0, 0.5, 0.5]);
            }
            other => panic!("unexpected source {:?}", other),
        }

        view.destroy().unwrap();
        assert!(!sheet.is_destroyed());
        assert_eq!(backend.stats().destroyed(), 0);
    }

    #[test]
    fn test_node_destroy_detaches_but_keeps_texture_alive() {
        let backend = HeadlessBackend::new();
        let texture = backend.create_texture("slide", 2, 2, &[0; 16]).unwrap();
        let sprite = DisplayNode::sprite("sprite", texture.clone());
        sprite.attach_filter(FilterHandle::new("displacement"));

        sprite.destroy();

        assert!(sprite.is_destroyed());
        assert!(sprite.texture().is_none());
        assert!(sprite.filters().is_empty());
        assert!(!texture.is_destroyed());
        assert!(sprite.set_texture(texture).is_none());
    }

    #[test]
    fn test_filter_uniforms() {
        let filter = FilterHandle::new("displacement");
        filter.set_uniform("strength", 0.5);
        assert_eq!(filter.uniform("strength"), Some(0.5));

        filter.destroy();
        filter.set_uniform("strength", 1.0);
        assert_eq!(filter.uniform("strength"), None);
        assert!(!filter.is_enabled());
    }

    #[test]
    fn test_fit_scale() {
        assert_eq!(fit_scale((800, 600), (1600, 600)), 0.5);
        assert_eq!(fit_scale((0, 600), (100, 100)), 1.0);
        assert_eq!(fit_scale((800, 600), (0, 0)), 1.0);
    }
}
