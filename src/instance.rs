//! One mounted slider widget
//!
//! Wires the shared scheduler, animation coordinator and loader to a
//! per-instance resource ledger, sliding window and event bus. The host
//! forwards normalized input as `Intent`s and drives frames on the shared
//! services; everything this instance allocates is torn down in one call.
//!
//! # Teardown order
//!
//! ```text
//! cancel loads → cancel pending updates → stop animation groups → dispose ledger
//! ```

use anyhow::Result;
use cgmath::Vector2;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendError, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

use crate::animation::{
    AnimatedValue, AnimationCoordinator, AnimationGroup, AnimationHandle, AnimationKind, EasingCurve, Tween,
};
use crate::config::SliderConfig;
use crate::events::{EventBus, EventHandler, SliderEvent, SliderEventKind};
use crate::gpu::{fit_scale, DisplayNode, FilterHandle, TextureHandle};
use crate::loader::{ImageSource, LoadOutcome, SlideLoader};
use crate::resources::{DisposeReport, ResourceManager, TimerId};
use crate::scheduler::{Priority, RenderScheduler, UpdateType};
use crate::window::{SlideState, SlideStateTable, SlidingWindowManager};

/// Filter strength reached while the pointer is over the slider
const INTERACTION_STRENGTH: f32 = 1.0;
/// Filter strength of the idle "breathing" effect
const IDLE_STRENGTH: f32 = 0.35;
const INTERACTION_DURATION: Duration = Duration::from_millis(250);
const PLACEHOLDER_RGBA: [u8; 4] = [32, 32, 32, 255];

/// Normalized user intent produced by the host's input layer
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Next,
    Previous,
    GoTo(usize),
    PointerMove { x: f32, y: f32 },
    PointerLeave,
    Resize { width: u32, height: u32 },
}

/// Services shared by every slider on a page
pub struct SliderServices<S> {
    pub scheduler: Arc<RenderScheduler>,
    pub coordinator: Arc<AnimationCoordinator>,
    pub loader: Arc<SlideLoader<S>>,
}

impl<S> Clone for SliderServices<S> {
    fn clone(&self) -> Self {
        Self {
            scheduler: Arc::clone(&self.scheduler),
            coordinator: Arc::clone(&self.coordinator),
            loader: Arc::clone(&self.loader),
        }
    }
}

/// What `teardown` cleaned up
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub cancelled_updates: usize,
    pub cancelled_groups: usize,
    pub resources: DisposeReport,
}

type LoadResult = (usize, LoadOutcome);

/// A slider widget instance
pub struct SliderInstance<S: ImageSource + 'static> {
    id: String,
    slides: Vec<String>,
    config: SliderConfig,
    services: SliderServices<S>,
    bus: EventBus,

    resources: ResourceManager,
    window: SlidingWindowManager,
    states: SlideStateTable,
    cancel: CancellationToken,

    root: Option<DisplayNode>,
    sprites: Vec<DisplayNode>,
    placeholder: Option<TextureHandle>,
    filter: Option<FilterHandle>,
    /// Real textures currently shown by each slide
    slide_textures: HashMap<usize, TextureHandle>,

    slide_offset: AnimatedValue,
    filter_strength: AnimatedValue,
    viewport: Arc<Mutex<(u32, u32)>>,

    load_tx: UnboundedSender<LoadResult>,
    load_rx: UnboundedReceiver<LoadResult>,
    in_flight: usize,
    /// Idle animations started by the timer, waiting to be tracked
    idle_tx: UnboundedSender<AnimationHandle>,
    idle_rx: UnboundedReceiver<AnimationHandle>,

    idle_timer: Option<TimerId>,
    mounted: bool,
    torn_down: bool,
}

impl<S: ImageSource + 'static> SliderInstance<S> {
    pub fn new(id: impl Into<String>, slides: Vec<String>, config: &SliderConfig, services: SliderServices<S>) -> Self {
        let id = id.into();
        let (load_tx, load_rx) = mpsc::unbounded_channel();
        let (idle_tx, idle_rx) = mpsc::unbounded_channel();

        debug!("🎠 Slider '{}' created with {} slides", id, slides.len());

        Self {
            resources: ResourceManager::new(id.clone()),
            window: SlidingWindowManager::new(slides.len(), config.window.radius, config.window.looping),
            states: SlideStateTable::new(slides.len()),
            cancel: CancellationToken::new(),
            id,
            slides,
            config: config.clone(),
            services,
            bus: EventBus::new(),
            root: None,
            sprites: Vec::new(),
            placeholder: None,
            filter: None,
            slide_textures: HashMap::new(),
            slide_offset: AnimatedValue::new(0.0),
            filter_strength: AnimatedValue::new(0.0),
            viewport: Arc::new(Mutex::new((0, 0))),
            load_tx,
            load_rx,
            in_flight: 0,
            idle_tx,
            idle_rx,
            idle_timer: None,
            mounted: false,
            torn_down: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Bus the host's input layer publishes on
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    pub fn current_index(&self) -> usize {
        self.window.current_index()
    }

    pub fn window_indices(&self) -> Vec<usize> {
        self.window.window_indices()
    }

    pub fn slide_state(&self, index: usize) -> Option<SlideState> {
        self.states.get(index)
    }

    pub fn states(&self) -> &SlideStateTable {
        &self.states
    }

    pub fn sprite(&self, index: usize) -> Option<&DisplayNode> {
        self.sprites.get(index)
    }

    pub fn root(&self) -> Option<&DisplayNode> {
        self.root.as_ref()
    }

    pub fn placeholder(&self) -> Option<&TextureHandle> {
        self.placeholder.as_ref()
    }

    pub fn filter(&self) -> Option<&FilterHandle> {
        self.filter.as_ref()
    }

    pub fn slide_texture(&self, index: usize) -> Option<&TextureHandle> {
        self.slide_textures.get(&index)
    }

    pub fn slide_offset(&self) -> f32 {
        self.slide_offset.get()
    }

    pub fn filter_strength(&self) -> f32 {
        self.filter_strength.get()
    }

    pub fn pending_loads(&self) -> usize {
        self.in_flight
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Builds the scene, subscribes handlers, loads the first window and
    /// arms the idle timer.
    pub fn mount(&mut self) -> Result<()> {
        if self.mounted || self.torn_down {
            warn!("Slider '{}' cannot be mounted twice", self.id);
            return Ok(());
        }

        let backend = Arc::clone(self.services.loader.backend());
        let placeholder = self.resources.track_texture(backend.create_texture(
            &format!("{}:placeholder", self.id),
            1,
            1,
            &PLACEHOLDER_RGBA,
        )?);

        let root = self
            .resources
            .track_display_object(DisplayNode::container(&format!("{}:root", self.id)));
        let filter = self.resources.track_filter(FilterHandle::new("displacement"));
        filter.set_uniform("strength", 0.0);
        root.attach_filter(filter.clone());

        for (index, slide) in self.slides.iter().enumerate() {
            let sprite = self
                .resources
                .track_display_object(DisplayNode::sprite(slide, placeholder.clone()));
            sprite.set_visible(false);
            root.add_child(&sprite);
            self.sprites.push(sprite);

            if let Err(e) = self.states.transition(index, SlideState::Placeholder) {
                warn!("{}", e);
            }
        }

        self.placeholder = Some(placeholder);
        self.filter = Some(filter);
        self.root = Some(root);
        self.register_listeners();
        self.mounted = true;

        info!("🎠 Slider '{}' mounted with {} slides", self.id, self.slides.len());

        self.navigate(0, true);
        self.reset_idle_timer();
        Ok(())
    }

    fn register_listeners(&mut self) {
        let Some(filter) = self.filter.clone() else {
            return;
        };
        let mut listeners: HashMap<SliderEventKind, Vec<EventHandler>> = HashMap::new();

        let scheduler = Arc::clone(&self.services.scheduler);
        let source = self.id.clone();
        let pointer_filter = filter.clone();
        listeners.entry(SliderEventKind::PointerMove).or_default().push(Arc::new(move |event: &SliderEvent| {
            let SliderEvent::PointerMove { position } = event else {
                return;
            };
            let filter = pointer_filter.clone();
            let position: Vector2<f32> = *position;
            scheduler.schedule_keyed_update(
                source.clone(),
                UpdateType::Filter,
                "pointer",
                move || {
                    filter.set_uniform("pointer_x", position.x);
                    filter.set_uniform("pointer_y", position.y);
                    Ok(())
                },
                Priority::High,
            );
        }));

        let scheduler = Arc::clone(&self.services.scheduler);
        let source = self.id.clone();
        let leave_filter = filter;
        listeners.entry(SliderEventKind::PointerLeave).or_default().push(Arc::new(move |_: &SliderEvent| {
            let filter = leave_filter.clone();
            scheduler.schedule_keyed_update(
                source.clone(),
                UpdateType::Filter,
                "pointer",
                move || {
                    filter.set_uniform("pointer_x", 0.0);
                    filter.set_uniform("pointer_y", 0.0);
                    Ok(())
                },
                Priority::Normal,
            );
        }));

        let scheduler = Arc::clone(&self.services.scheduler);
        let source = self.id.clone();
        let sprites = self.sprites.clone();
        let offset = self.slide_offset.clone();
        listeners.entry(SliderEventKind::Resize).or_default().push(Arc::new(move |event: &SliderEvent| {
            let SliderEvent::Resize { width, height } = *event else {
                return;
            };
            let sprites = sprites.clone();
            let offset = offset.clone();
            scheduler.schedule_typed_update(
                source.clone(),
                UpdateType::Resize,
                move || {
                    layout_sprites(&sprites, offset.get(), width as f32);
                    for sprite in &sprites {
                        let Some(texture) = sprite.texture() else {
                            continue;
                        };
                        let scale = fit_scale((width, height), texture.size());
                        sprite.set_scale(scale, scale);
                    }
                    Ok(())
                },
                Priority::Critical,
            );
        }));

        self.resources.add_event_listener_batch(&self.bus, listeners);
    }

    /// Applies one user intent. Ignored (with a warning) when not mounted.
    pub fn handle_intent(&mut self, intent: Intent) {
        if !self.mounted || self.torn_down {
            warn!("Slider '{}' ignoring {:?} while not mounted", self.id, intent);
            return;
        }
        self.track_idle_animations();

        match intent {
            Intent::Next => {
                let target = self.step(1);
                self.navigate(target, false);
            }
            Intent::Previous => {
                let target = self.step(-1);
                self.navigate(target, false);
            }
            Intent::GoTo(index) => self.navigate(index, false),
            Intent::PointerMove { x, y } => {
                self.bus.emit(&SliderEvent::PointerMove {
                    position: Vector2::new(x, y),
                });
                self.start_interaction(INTERACTION_STRENGTH);
                self.reset_idle_timer();
            }
            Intent::PointerLeave => {
                self.bus.emit(&SliderEvent::PointerLeave);
                self.start_interaction(0.0);
                self.reset_idle_timer();
            }
            Intent::Resize { width, height } => {
                if width == 0 || height == 0 {
                    warn!(
                        "Slider '{}' resized to {}x{}, keeping previous layout",
                        self.id, width, height
                    );
                    return;
                }
                *self.viewport.lock() = (width, height);
                self.bus.emit(&SliderEvent::Resize { width, height });
            }
        }
    }

    fn step(&self, delta: isize) -> usize {
        let total = self.slides.len();
        if total == 0 {
            return 0;
        }
        let current = self.window.current_index() as isize;
        let next = current + delta;
        if self.window.is_looping() {
            next.rem_euclid(total as isize) as usize
        } else {
            next.clamp(0, total as isize - 1) as usize
        }
    }

    fn navigate(&mut self, target: usize, force: bool) {
        let from = self.window.current_index();
        let to = self.window.update_current_index(target);
        if to == from && !force {
            return;
        }

        let plan = self.window.plan(&self.states);
        debug!(
            "🪟 '{}' {} -> {}: window {:?}, promote {:?}, demote {:?}",
            self.id, from, to, plan.window, plan.promote, plan.demote
        );

        for index in &plan.demote {
            self.demote(*index);
        }
        for index in &plan.promote {
            self.promote(*index);
        }

        self.start_transition(to);
        self.schedule_visibility(plan.window);

        if to != from {
            self.bus.emit(&SliderEvent::SlideChanged { from, to });
        }
    }

    fn demote(&mut self, index: usize) {
        if let (Some(sprite), Some(placeholder)) = (self.sprites.get(index), self.placeholder.as_ref()) {
            sprite.set_texture(placeholder.clone());
        }
        if let Some(texture) = self.slide_textures.remove(&index) {
            self.resources.release(texture.key());
        }
        if let Err(e) = self.states.transition(index, SlideState::Placeholder) {
            warn!("{}", e);
        }
        debug!("⬇️ '{}' slide {} demoted to placeholder", self.id, index);
    }

    fn promote(&mut self, index: usize) {
        let Some(path) = self.slides.get(index).cloned() else {
            return;
        };
        if let Err(e) = self.states.transition(index, SlideState::Loading) {
            warn!("{}", e);
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime, slide {} of '{}' stays a placeholder", index, self.id);
            if let Err(e) = self.states.transition(index, SlideState::Placeholder) {
                warn!("{}", e);
            }
            return;
        };

        let loader = Arc::clone(&self.services.loader);
        let cancel = self.cancel.clone();
        let tx = self.load_tx.clone();

        runtime.spawn(async move {
            let outcome = loader.resolve(&path, &cancel).await;
            if let Err(SendError((_, LoadOutcome::Loaded(texture)))) = tx.send((index, outcome)) {
                // Instance is gone; nobody will track this texture
                let _ = texture.destroy();
            }
        });

        self.in_flight += 1;
        debug!("⬆️ '{}' slide {} loading", self.id, index);
    }

    fn start_transition(&mut self, to: usize) {
        let duration = Duration::from_millis(self.config.general.transition_duration_ms);
        let tween = self.resources.track_animation(AnimationHandle::new(
            "slide-offset",
            Tween::new(self.slide_offset.clone(), to as f32, duration).easing(EasingCurve::EaseInOut),
        ));

        let sprites = self.sprites.clone();
        let offset = self.slide_offset.clone();
        let viewport = Arc::clone(&self.viewport);
        self.services.coordinator.queue_animation_group(
            AnimationGroup::new(
                format!("{}:slide:{}", self.id, to),
                self.id.clone(),
                AnimationKind::SlideTransition,
            )
            .with_animation(tween)
            .with_render_update(format!("{}:offset", self.id), move || {
                layout_sprites(&sprites, offset.get(), viewport.lock().0 as f32);
                Ok(())
            }),
        );
    }

    fn schedule_visibility(&self, window: Vec<usize>) {
        let sprites = self.sprites.clone();
        self.services.scheduler.schedule_typed_update(
            self.id.clone(),
            UpdateType::Texture,
            move || {
                for (index, sprite) in sprites.iter().enumerate() {
                    sprite.set_visible(window.contains(&index));
                }
                Ok(())
            },
            Priority::High,
        );
    }

    fn start_interaction(&mut self, strength: f32) {
        let coordinator = &self.services.coordinator;
        coordinator.cancel_owner_animations_by_type(&self.id, AnimationKind::IdleEffect);

        let tween = self.resources.track_animation(AnimationHandle::new(
            "filter-strength",
            Tween::new(self.filter_strength.clone(), strength, INTERACTION_DURATION).easing(EasingCurve::EaseOut),
        ));
        let group = AnimationGroup::new(format!("{}:interaction", self.id), self.id.clone(), AnimationKind::Interaction)
            .with_animation(tween);
        coordinator.queue_animation_group(match self.filter.clone() {
            Some(filter) => with_strength_update(group, &self.id, filter, self.filter_strength.clone()),
            None => group,
        });
    }

    /// Moves idle animations started by the timer into the ledger
    fn track_idle_animations(&mut self) {
        while let Ok(handle) = self.idle_rx.try_recv() {
            self.resources.track_animation(handle);
        }
    }

    fn reset_idle_timer(&mut self) {
        if let Some(timer) = self.idle_timer.take() {
            self.resources.clear_timeout(timer);
        }
        if !self.config.idle.enabled {
            return;
        }

        let Some(filter) = self.filter.clone() else {
            return;
        };
        let owner = self.id.clone();
        let coordinator = Arc::clone(&self.services.coordinator);
        let bus = self.bus.clone();
        let strength = self.filter_strength.clone();
        let duration = Duration::from_millis(self.config.idle.reset_duration_ms);
        let cancel = self.cancel.clone();
        let idle_tx = self.idle_tx.clone();

        let armed = self.resources.set_timeout(self.config.idle.timeout(), move || {
            if cancel.is_cancelled() {
                return;
            }
            debug!("💤 Slider '{}' idle", owner);
            let breathe = AnimationHandle::new(
                "idle-breathe",
                Tween::new(strength.clone(), IDLE_STRENGTH, duration).easing(EasingCurve::EaseInOut),
            );
            let group = AnimationGroup::new(format!("{}:idle", owner), owner.clone(), AnimationKind::IdleEffect)
                .with_animation(breathe.clone());
            let id = coordinator.queue_animation_group(with_strength_update(group, &owner, filter, strength));

            // Teardown may have run while the group was being queued
            if cancel.is_cancelled() || idle_tx.send(breathe).is_err() {
                coordinator.cancel_group(&id);
                return;
            }
            bus.emit(&SliderEvent::Idle);
        });

        match armed {
            Ok(timer) => self.idle_timer = Some(timer),
            Err(e) => warn!("Idle timer for '{}' not armed: {}", self.id, e),
        }
    }

    /// Applies every load result that has arrived so far. Returns how many.
    pub fn drain_load_results(&mut self) -> usize {
        self.track_idle_animations();
        let mut applied = 0;
        while let Ok((index, outcome)) = self.load_rx.try_recv() {
            self.in_flight = self.in_flight.saturating_sub(1);
            self.apply_load_outcome(index, outcome);
            applied += 1;
        }
        applied
    }

    /// Waits until every in-flight load has reported back
    pub async fn settle_loads(&mut self) -> usize {
        self.track_idle_animations();
        let mut applied = 0;
        while self.in_flight > 0 {
            let Some((index, outcome)) = self.load_rx.recv().await else {
                break;
            };
            self.in_flight -= 1;
            self.apply_load_outcome(index, outcome);
            applied += 1;
        }
        applied
    }

    /// Records the result of loading slide `index`
    pub fn apply_load_outcome(&mut self, index: usize, outcome: LoadOutcome) {
        if self.torn_down {
            if let LoadOutcome::Loaded(texture) = outcome {
                self.resources.track_texture(texture);
            }
            return;
        }

        match outcome {
            LoadOutcome::Loaded(texture) => {
                if self.states.get(index) != Some(SlideState::Loading) {
                    debug!("Slide {} of '{}' no longer wants its texture", index, self.id);
                    let texture = self.resources.track_texture(texture);
                    self.resources.release(texture.key());
                    return;
                }
                if !self.window.contains(index) {
                    debug!("⬇️ '{}' slide {} left the window while loading", self.id, index);
                    let texture = self.resources.track_texture(texture);
                    self.resources.release(texture.key());
                    if let Err(e) = self.states.transition(index, SlideState::Placeholder) {
                        warn!("{}", e);
                    }
                    return;
                }

                let texture = self.resources.track_texture(texture);
                if let Some(sprite) = self.sprites.get(index) {
                    sprite.set_texture(texture.clone());
                    let viewport = *self.viewport.lock();
                    if viewport.0 > 0 && viewport.1 > 0 {
                        let scale = fit_scale(viewport, texture.size());
                        sprite.set_scale(scale, scale);
                    }
                }
                if let Some(previous) = self.slide_textures.insert(index, texture) {
                    self.resources.release(previous.key());
                }
                if let Err(e) = self.states.transition(index, SlideState::Loaded) {
                    warn!("{}", e);
                }
            }
            LoadOutcome::Failed(e) => {
                warn!("Slide {} of '{}' failed to load: {}", index, self.id, e);
                if let Err(e) = self.states.transition(index, SlideState::Error) {
                    warn!("{}", e);
                }
            }
            LoadOutcome::Cancelled => {
                debug!("Load of slide {} for '{}' cancelled", index, self.id);
            }
        }
    }

    /// Cancels loads, pending updates and animations, then disposes every
    /// resource. Safe to call more than once.
    pub fn teardown(&mut self) -> TeardownReport {
        if self.torn_down {
            return TeardownReport::default();
        }

        self.cancel.cancel();
        let cancelled_updates = self.services.scheduler.cancel_owner(&self.id);
        let cancelled_groups = self.services.coordinator.cancel_instance_animations(&self.id);

        self.load_rx.close();
        while let Ok((_, outcome)) = self.load_rx.try_recv() {
            if let LoadOutcome::Loaded(texture) = outcome {
                self.resources.track_texture(texture);
            }
        }
        self.in_flight = 0;

        self.idle_rx.close();
        self.track_idle_animations();
        self.idle_timer = None;
        let resources = self.resources.dispose();
        self.slide_textures.clear();
        self.torn_down = true;
        self.mounted = false;

        info!(
            "👋 Slider '{}' torn down: {} updates, {} groups cancelled, {} resources disposed",
            self.id, cancelled_updates, cancelled_groups, resources.disposed
        );

        TeardownReport {
            cancelled_updates,
            cancelled_groups,
            resources,
        }
    }
}

/// Places each sprite one viewport width apart, shifted by the slide offset
fn layout_sprites(sprites: &[DisplayNode], offset: f32, width: f32) {
    for (index, sprite) in sprites.iter().enumerate() {
        sprite.set_position((index as f32 - offset) * width, 0.0);
    }
}

fn with_strength_update(group: AnimationGroup, owner: &str, filter: FilterHandle, strength: AnimatedValue) -> AnimationGroup {
    group.with_render_update(format!("{}:strength", owner), move || {
        filter.set_uniform("strength", strength.get());
        Ok(())
    })
}

impl<S: ImageSource + 'static> Drop for SliderInstance<S> {
    fn drop(&mut self) {
        if !self.torn_down {
            self.teardown();
        }
    }
}
