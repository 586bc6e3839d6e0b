//! # slidewarp demo driver
//!
//! Runs one or more slider instances against the headless GPU backend and
//! drives them frame by frame, the way a host page would. Useful for
//! watching the scheduler, animation and loading logs without a window.

use anyhow::Result;
use clap::Parser;
use log::{error, info, warn};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use slidewarp::loader::DecodedImage;
use slidewarp::{
    logging, AnimationCoordinator, AtlasDefinition, AtlasManager, FileImageSource, HeadlessBackend,
    ImageSource, Intent, MemoryImageSource, RenderScheduler, SliderConfig, SliderInstance, SliderServices,
    SlideLoader,
};

#[derive(Parser)]
#[command(name = "slidewarp")]
#[command(about = "Headless driver for the slidewarp slider coordination layer")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/slidewarp/slidewarp.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Number of synthetic slides when no image directory is given
    #[arg(short, long, default_value_t = 8)]
    slides: usize,

    /// Load slides from this directory instead of generating them
    #[arg(long)]
    image_dir: Option<PathBuf>,

    /// TexturePacker JSON atlas descriptions to register
    #[arg(long)]
    atlas: Vec<PathBuf>,

    /// Number of slider instances sharing the services
    #[arg(long, default_value_t = 1)]
    instances: usize,

    /// How many "next" navigations to perform
    #[arg(long, default_value_t = 5)]
    steps: usize,

    /// Frames between navigations
    #[arg(long, default_value_t = 30)]
    frames_per_step: usize,

    /// Frame interval in milliseconds
    #[arg(long, default_value_t = 16)]
    frame_ms: u64,

    /// Override the window radius from the config
    #[arg(long)]
    radius: Option<usize>,

    /// Disable wrap-around navigation
    #[arg(long)]
    no_loop: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(cli.debug);

    info!("🚀 Starting slidewarp demo driver");
    info!("📄 Version: {}", slidewarp::VERSION);
    if let Some(commit) = option_env!("GIT_COMMIT") {
        info!("🔖 Build: {} for {} ({})", commit, env!("TARGET_TRIPLE"), env!("BUILD_DATE"));
    }

    // Load configuration
    let config = match SliderConfig::load(&cli.config) {
        Ok(config) => {
            info!("✅ Configuration loaded from: {}", cli.config);
            config
        }
        Err(e) => {
            error!("❌ Failed to load configuration: {}", e);
            info!("📝 Using default configuration");
            SliderConfig::default()
        }
    };

    let config = apply_overrides(config, &cli)?;

    let mut definitions = Vec::new();
    for path in &cli.atlas {
        match AtlasDefinition::load(path) {
            Ok(definition) => {
                info!("🗺️ Atlas '{}' with {} frames", definition.name, definition.frames.len());
                definitions.push(definition);
            }
            Err(e) => warn!("Skipping atlas {}: {:#}", path.display(), e),
        }
    }

    match &cli.image_dir {
        Some(dir) => {
            let slides = list_images(dir)?;
            info!("📁 {} slides from {}", slides.len(), dir.display());
            run(&cli, &config, Arc::new(FileImageSource::new(dir)), slides, definitions).await
        }
        None => {
            let source = MemoryImageSource::new();
            let slides = synthetic_slides(&source, cli.slides);
            info!("🎨 {} synthetic slides", slides.len());
            run(&cli, &config, Arc::new(source), slides, definitions).await
        }
    }
}

fn apply_overrides(mut config: SliderConfig, cli: &Cli) -> Result<SliderConfig> {
    if cli.debug {
        config.general.debug = true;
    }
    if let Some(radius) = cli.radius {
        config.window.radius = radius;
        info!("🪟 Window radius set to {} via CLI", radius);
    }
    if cli.no_loop {
        config.window.looping = false;
    }
    config.validate()?;
    Ok(config)
}

fn synthetic_slides(source: &MemoryImageSource, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            let path = format!("slide-{:02}.png", i);
            let shade = ((i * 37) % 256) as u8;
            source.insert(path.clone(), DecodedImage::solid(64, 36, [shade, 255 - shade, 128, 255]));
            path
        })
        .collect()
}

fn list_images(dir: &Path) -> Result<Vec<String>> {
    let mut slides: Vec<String> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .filter(|name| {
            let lower = name.to_ascii_lowercase();
            [".png", ".jpg", ".jpeg", ".webp"].iter().any(|ext| lower.ends_with(ext))
        })
        .collect();
    slides.sort();
    if slides.is_empty() {
        anyhow::bail!("No images found in {}", dir.display());
    }
    Ok(slides)
}

async fn run<S: ImageSource + 'static>(
    cli: &Cli,
    config: &SliderConfig,
    source: Arc<S>,
    slides: Vec<String>,
    definitions: Vec<AtlasDefinition>,
) -> Result<()> {
    let backend = Arc::new(HeadlessBackend::new());
    let gpu_stats = backend.stats();

    let scheduler = Arc::new(RenderScheduler::new(&config.scheduler));
    let coordinator = Arc::new(AnimationCoordinator::new(Arc::clone(&scheduler)));
    let loader = Arc::new(SlideLoader::new(
        source,
        backend,
        Arc::new(RwLock::new(AtlasManager::new(definitions))),
        &config.loading,
    ));

    let shutdown = CancellationToken::new();
    if config.loading.use_atlas {
        let sheets = loader.load_atlas_sheets(&shutdown).await;
        info!("🗺️ {} atlas sheets resident", sheets);
    }

    let services = SliderServices {
        scheduler: Arc::clone(&scheduler),
        coordinator: Arc::clone(&coordinator),
        loader,
    };

    let mut sliders = Vec::with_capacity(cli.instances.max(1));
    for n in 0..cli.instances.max(1) {
        let mut slider = SliderInstance::new(format!("slider-{}", n), slides.clone(), config, services.clone());
        slider.mount()?;
        slider.handle_intent(Intent::Resize { width: 1280, height: 720 });
        sliders.push(slider);
    }

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("🛑 Interrupted");
            ctrl_c.cancel();
        }
    });

    let mut interval = tokio::time::interval(Duration::from_millis(cli.frame_ms.max(1)));
    let total_frames = cli.steps * cli.frames_per_step.max(1);

    for frame in 0..total_frames {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        if frame > 0 && frame % cli.frames_per_step.max(1) == 0 {
            for slider in sliders.iter_mut() {
                slider.handle_intent(Intent::Next);
            }
        }
        if frame % 7 == 3 {
            let x = (frame % 100) as f32 / 100.0;
            if let Some(slider) = sliders.first_mut() {
                slider.handle_intent(Intent::PointerMove { x, y: 0.5 });
            }
        }

        let now = Instant::now();
        coordinator.tick(now);
        let report = scheduler.run_frame(now);
        if report.failed > 0 {
            warn!("Frame {} had {} failed updates", frame, report.failed);
        }
        for slider in sliders.iter_mut() {
            slider.drain_load_results();
        }
    }

    for slider in sliders.iter_mut() {
        slider.settle_loads().await;
        info!(
            "🎠 '{}' at slide {} with window {:?}",
            slider.id(),
            slider.current_index(),
            slider.window_indices()
        );
    }

    let scheduler_stats = scheduler.stats();
    let animation_stats = coordinator.stats();
    info!(
        "📊 Scheduler: {} scheduled, {} executed, {} merged, {} frames, buffer {:?}",
        scheduler_stats.scheduled,
        scheduler_stats.executed,
        scheduler_stats.merged,
        scheduler_stats.frames,
        scheduler_stats.buffer_delay
    );
    info!(
        "📊 Animations: {} started, {} completed, {} cancelled",
        animation_stats.started, animation_stats.completed, animation_stats.cancelled
    );

    for slider in sliders.iter_mut() {
        let report = slider.teardown();
        if report.resources.failed > 0 {
            warn!("'{}' had {} resources fail to dispose", slider.id(), report.resources.failed);
        }
    }

    info!(
        "✅ GPU textures: {} created, {} destroyed, {} live",
        gpu_stats.created(),
        gpu_stats.destroyed(),
        gpu_stats.live()
    );

    Ok(())
}
