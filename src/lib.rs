//! # slidewarp
//!
//! Render resource and scheduling coordination for GPU-backed image sliders.
//!
//! ## Architecture
//!
//! slidewarp is built from small collaborating services:
//! - `resources`: per-instance ownership ledger, disposes everything exactly once
//! - `scheduler`: frame-aligned coalescing of visual updates with priorities
//! - `animation`: typed animation groups with per-(owner, kind) exclusivity
//! - `window`: sliding window of resident slides and per-slide state
//! - `atlas`: pre-packed sprite sheets resolved to texture views
//! - `loader`: image fetch with retry, backoff and cancellation
//! - `instance`: one slider widget wiring all of the above
//! - `gpu`: backend-agnostic texture, node and filter handles
//! - `config`: TOML configuration
//!
//! ## Usage
//!
//! ```rust,no_run
//! use slidewarp::{
//!     AnimationCoordinator, AtlasManager, HeadlessBackend, MemoryImageSource, RenderScheduler,
//!     SliderConfig, SliderInstance, SliderServices, SlideLoader,
//! };
//! use parking_lot::RwLock;
//! use std::sync::Arc;
//! use std::time::Instant;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SliderConfig::default();
//!     let scheduler = Arc::new(RenderScheduler::new(&config.scheduler));
//!     let services = SliderServices {
//!         coordinator: Arc::new(AnimationCoordinator::new(Arc::clone(&scheduler))),
//!         scheduler,
//!         loader: Arc::new(SlideLoader::new(
//!             Arc::new(MemoryImageSource::new()),
//!             Arc::new(HeadlessBackend::new()),
//!             Arc::new(RwLock::new(AtlasManager::new(Vec::new()))),
//!             &config.loading,
//!         )),
//!     };
//!
//!     let mut slider = SliderInstance::new("hero", vec!["a.jpg".into()], &config, services.clone());
//!     slider.mount()?;
//!
//!     // per frame
//!     services.coordinator.tick(Instant::now());
//!     services.scheduler.run_frame(Instant::now());
//!
//!     slider.teardown();
//!     Ok(())
//! }
//! ```

pub mod animation;
pub mod atlas;
pub mod config;
pub mod error;
pub mod events;
pub mod gpu;
pub mod instance;
mod isolation;
pub mod loader;
pub mod logging;
pub mod resources;
pub mod scheduler;
pub mod window;

// Re-export main types for easy access
pub use animation::{AnimationCoordinator, AnimationGroup, AnimationHandle, AnimationKind, Tween};
pub use atlas::{AtlasDefinition, AtlasManager};
pub use config::SliderConfig;
pub use error::{LoadError, ResourceError, StateError};
pub use events::{EventBus, SliderEvent, SliderEventKind};
pub use gpu::{DisplayNode, FilterHandle, GpuBackend, HeadlessBackend, TextureHandle};
pub use instance::{Intent, SliderInstance, SliderServices, TeardownReport};
pub use loader::{FileImageSource, ImageSource, LoadOutcome, MemoryImageSource, RetryPolicy, SlideLoader};
pub use resources::{DisposeReport, ResourceManager};
pub use scheduler::{Priority, RenderScheduler, UpdateType};
pub use window::{SlideState, SlidingWindowManager};

// Re-export common error types
pub use anyhow::{Context, Error, Result};

/// Version information for slidewarp
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
