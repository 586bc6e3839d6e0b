//! In-memory backend used for headless runs and tests.

use anyhow::Result;
use log::debug;
use std::any::Any;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use super::{GpuBackend, TextureBacking, TextureHandle};

/// Allocation counters shared by every texture the backend created
#[derive(Debug, Default)]
pub struct HeadlessStats {
    created: AtomicUsize,
    destroyed: AtomicUsize,
    live_bytes: AtomicU64,
}

impl HeadlessStats {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Acquire)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::Acquire)
    }

    pub fn live(&self) -> usize {
        self.created().saturating_sub(self.destroyed())
    }

    pub fn live_bytes(&self) -> u64 {
        self.live_bytes.load(Ordering::Acquire)
    }
}

/// Backend that keeps no GPU state, only bookkeeping
#[derive(Debug, Default, Clone)]
pub struct HeadlessBackend {
    stats: Arc<HeadlessStats>,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> Arc<HeadlessStats> {
        Arc::clone(&self.stats)
    }
}

struct HeadlessTexture {
    stats: Arc<HeadlessStats>,
    bytes: u64,
}

impl TextureBacking for HeadlessTexture {
    fn destroy(&self) -> Result<()> {
        self.stats.destroyed.fetch_add(1, Ordering::AcqRel);
        self.stats.live_bytes.fetch_sub(self.bytes, Ordering::AcqRel);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl GpuBackend for HeadlessBackend {
    fn name(&self) -> &str {
        "headless"
    }

    fn create_texture(&self, label: &str, width: u32, height: u32, rgba: &[u8]) -> Result<TextureHandle> {
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            anyhow::bail!(
                "texture '{}' expects {} bytes for {}x{}, got {}",
                label,
                expected,
                width,
                height,
                rgba.len()
            );
        }

        self.stats.created.fetch_add(1, Ordering::AcqRel);
        self.stats.live_bytes.fetch_add(expected as u64, Ordering::AcqRel);
        debug!("🆕 Headless texture '{}' {}x{}", label, width, height);

        Ok(TextureHandle::new(
            label,
            width,
            height,
            Box::new(HeadlessTexture {
                stats: Arc::clone(&self.stats),
                bytes: expected as u64,
            }),
        ))
    }
}
