//! Slide image loading with retry, backoff and cancellation
//!
//! Resolution order for a slide id:
//! 1. A frame in a resident atlas sheet (no fetch)
//! 2. An individual fetch + decode + upload, retried with exponential backoff
//!
//! Every wait checks the instance's `CancellationToken`, so an unmounted
//! slider never touches shared state from a late load.

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::atlas::AtlasManager;
use crate::config::LoadingConfig;
use crate::error::LoadError;
use crate::gpu::{GpuBackend, TextureHandle};

/// Tightly packed RGBA8 pixels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl DecodedImage {
    /// Single-colour image, handy for placeholders and synthetic slides
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = width as usize * height as usize;
        Self {
            width,
            height,
            rgba: rgba.iter().copied().cycle().take(pixels * 4).collect(),
        }
    }
}

/// Where slide pixels come from
pub trait ImageSource: Send + Sync {
    fn fetch(&self, path: &str) -> impl Future<Output = Result<DecodedImage, LoadError>> + Send;
}

/// Reads image files below a root directory and decodes them with `image`
#[derive(Debug, Clone)]
pub struct FileImageSource {
    root: PathBuf,
}

impl FileImageSource {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl ImageSource for FileImageSource {
    async fn fetch(&self, path: &str) -> Result<DecodedImage, LoadError> {
        let full = self.root.join(path);
        let bytes = tokio::fs::read(&full).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LoadError::NotFound(path.to_string())
            } else {
                LoadError::Io {
                    path: path.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let decode_path = path.to_string();
        tokio::task::spawn_blocking(move || {
            let image = image::load_from_memory(&bytes).map_err(|e| LoadError::Decode {
                path: decode_path,
                reason: e.to_string(),
            })?;
            let rgba = image.to_rgba8();
            Ok(DecodedImage {
                width: rgba.width(),
                height: rgba.height(),
                rgba: rgba.into_raw(),
            })
        })
        .await
        .map_err(|e| LoadError::Decode {
            path: path.to_string(),
            reason: format!("decoder task failed: {}", e),
        })?
    }
}

/// In-memory image table; unknown paths are `NotFound`
#[derive(Debug, Default)]
pub struct MemoryImageSource {
    images: Mutex<HashMap<String, DecodedImage>>,
    fetches: AtomicUsize,
}

impl MemoryImageSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<String>, image: DecodedImage) {
        self.images.lock().insert(path.into(), image);
    }

    pub fn remove(&self, path: &str) -> Option<DecodedImage> {
        self.images.lock().remove(path)
    }

    /// Number of fetch calls so far, successful or not
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl ImageSource for MemoryImageSource {
    async fn fetch(&self, path: &str) -> Result<DecodedImage, LoadError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.images
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| LoadError::NotFound(path.to_string()))
    }
}

/// Exponential backoff with jitter
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Relative jitter applied to each delay, e.g. 0.15 for ±15%
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&LoadingConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &LoadingConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.retry_base_delay(),
            jitter: config.jitter,
        }
    }

    /// Wait after failed attempt `attempt` (1-based): `base · 2^(attempt-1)` ± jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let nominal = self.base_delay.saturating_mul(1 << exponent);
        if self.jitter <= 0.0 {
            return nominal;
        }

        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        nominal.mul_f64(factor.max(0.0))
    }
}

/// Result of resolving one slide
#[derive(Debug, Clone)]
pub enum LoadOutcome {
    Loaded(TextureHandle),
    Failed(LoadError),
    Cancelled,
}

impl LoadOutcome {
    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadOutcome::Loaded(_))
    }
}

fn file_name_of(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
}

/// Fetches, decodes and uploads one image, retrying per `policy`.
/// The final attempt falls back to the bare file name.
pub async fn load_with_retry<S>(
    source: &S,
    backend: &dyn GpuBackend,
    path: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> LoadOutcome
where
    S: ImageSource + ?Sized,
{
    let attempts = policy.max_retries.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return LoadOutcome::Cancelled;
        }

        let target = if attempt == attempts && attempts > 1 {
            file_name_of(path)
        } else {
            path
        };

        let fetched = tokio::select! {
            _ = cancel.cancelled() => return LoadOutcome::Cancelled,
            fetched = source.fetch(target) => fetched,
        };

        let uploaded = fetched.and_then(|image| {
            backend
                .create_texture(path, image.width, image.height, &image.rgba)
                .map_err(|e| LoadError::Upload {
                    path: path.to_string(),
                    reason: format!("{:#}", e),
                })
        });

        match uploaded {
            Ok(texture) => {
                if cancel.is_cancelled() {
                    let _ = texture.destroy();
                    return LoadOutcome::Cancelled;
                }
                if attempt > 1 {
                    info!("📥 Loaded '{}' on attempt {}/{}", path, attempt, attempts);
                }
                return LoadOutcome::Loaded(texture);
            }
            Err(e) => {
                warn!("Attempt {}/{} for '{}' failed: {}", attempt, attempts, target, e);
                last_error = Some(e);
            }
        }

        if attempt < attempts {
            let delay = policy.delay_for(attempt);
            debug!("⏳ Retrying '{}' in {:?}", path, delay);
            tokio::select! {
                _ = cancel.cancelled() => return LoadOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    LoadOutcome::Failed(LoadError::Exhausted {
        path: path.to_string(),
        attempts,
        last: Box::new(last_error.unwrap_or_else(|| LoadError::NotFound(path.to_string()))),
    })
}

/// Atlas-first slide resolver shared by the slider instances
pub struct SlideLoader<S> {
    source: Arc<S>,
    backend: Arc<dyn GpuBackend>,
    atlas: Arc<RwLock<AtlasManager>>,
    policy: RetryPolicy,
    use_atlas: bool,
}

impl<S: ImageSource> SlideLoader<S> {
    pub fn new(
        source: Arc<S>,
        backend: Arc<dyn GpuBackend>,
        atlas: Arc<RwLock<AtlasManager>>,
        config: &LoadingConfig,
    ) -> Self {
        Self {
            source,
            backend,
            atlas,
            policy: RetryPolicy::from_config(config),
            use_atlas: config.use_atlas,
        }
    }

    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    pub fn atlas(&self) -> &Arc<RwLock<AtlasManager>> {
        &self.atlas
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Atlas frame if one is resident, otherwise an individual load
    pub async fn resolve(&self, id: &str, cancel: &CancellationToken) -> LoadOutcome {
        if self.use_atlas {
            let frame = {
                let atlas = self.atlas.read();
                if atlas.has_frame(id) {
                    atlas.get_frame_texture(id, None)
                } else {
                    None
                }
            };
            if let Some(frame) = frame {
                debug!("🧩 '{}' served from atlas", id);
                return LoadOutcome::Loaded(frame);
            }
        }

        load_with_retry(self.source.as_ref(), self.backend.as_ref(), id, &self.policy, cancel).await
    }

    /// Resolves every id concurrently; each gets its own outcome
    pub async fn load_batch(&self, ids: &[String], cancel: &CancellationToken) -> Vec<(String, LoadOutcome)> {
        let outcomes = futures::future::join_all(ids.iter().map(|id| self.resolve(id, cancel))).await;
        ids.iter().cloned().zip(outcomes).collect()
    }

    /// Loads and registers every atlas sheet that is not resident yet.
    /// Returns the number of sheets registered.
    pub async fn load_atlas_sheets(&self, cancel: &CancellationToken) -> usize {
        if !self.use_atlas {
            return 0;
        }

        let pending = self.atlas.read().pending_sheets();
        let mut registered = 0;

        for definition in pending {
            let outcome = load_with_retry(
                self.source.as_ref(),
                self.backend.as_ref(),
                &definition.image,
                &self.policy,
                cancel,
            )
            .await;

            match outcome {
                LoadOutcome::Loaded(sheet) => {
                    if self.atlas.write().register_sheet(&definition.name, sheet) {
                        registered += 1;
                    }
                }
                LoadOutcome::Failed(e) => {
                    warn!("Atlas '{}' unavailable, slides fall back to individual loads: {}", definition.name, e);
                }
                LoadOutcome::Cancelled => return registered,
            }
        }

        registered
    }
}
