//! Tests for the resource ledger

use super::*;
use crate::gpu::{GpuBackend, HeadlessBackend};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::Arc;

/// Disposable that records the order it was destroyed in
#[derive(Clone)]
struct Tracer {
    key: ResourceKey,
    name: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
    mode: TracerMode,
}

#[derive(Clone, Copy)]
enum TracerMode {
    Ok,
    Fail,
    Panic,
}

impl Tracer {
    fn new(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Self {
        Self {
            key: ResourceKey::fresh(),
            name,
            log: Arc::clone(log),
            mode: TracerMode::Ok,
        }
    }

    fn with_mode(mut self, mode: TracerMode) -> Self {
        self.mode = mode;
        self
    }
}

impl Disposable for Tracer {
    fn resource_key(&self) -> ResourceKey {
        self.key
    }

    fn dispose(&mut self) -> Result<()> {
        self.log.lock().push(self.name);
        match self.mode {
            TracerMode::Ok => Ok(()),
            TracerMode::Fail => anyhow::bail!("{} refused to die", self.name),
            TracerMode::Panic => panic!("{} exploded", self.name),
        }
    }
}

fn texture(backend: &HeadlessBackend, label: &str) -> TextureHandle {
    backend.create_texture(label, 1, 1, &[0; 4]).unwrap()
}

#[test]
fn test_dispose_destroys_each_texture_once() {
    let backend = HeadlessBackend::new();
    let mut ledger = ResourceManager::new("slider-a");

    let a = ledger.track_texture(texture(&backend, "a"));
    let b = ledger.track_texture(texture(&backend, "b"));

    let report = ledger.dispose();

    assert_eq!(report, DisposeReport { disposed: 2, failed: 0 });
    assert!(a.is_destroyed());
    assert!(b.is_destroyed());
    assert_eq!(backend.stats().destroyed(), 2);
    assert_eq!(backend.stats().live(), 0);
}

#[test]
fn test_tracking_same_texture_twice_keeps_one_entry() {
    let backend = HeadlessBackend::new();
    let mut ledger = ResourceManager::new("slider-a");

    let tex = texture(&backend, "dup");
    ledger.track_texture(tex.clone());
    let handle = ledger.handle_of(tex.key());
    ledger.track_texture(tex.clone());

    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger.handle_of(tex.key()), handle);

    ledger.dispose();
    assert_eq!(backend.stats().destroyed(), 1);
}

#[test]
fn test_disposal_order_puts_textures_last() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut ledger = ResourceManager::new("ordered");

    ledger.track(ResourceKind::Texture, Tracer::new("texture", &log));
    ledger.track(ResourceKind::DisplayObject, Tracer::new("sprite", &log));
    ledger.track(ResourceKind::Filter, Tracer::new("filter", &log));
    ledger.track(ResourceKind::Animation, Tracer::new("tween", &log));
    ledger.track(ResourceKind::EventSubscription, Tracer::new("listener", &log));
    ledger.track(ResourceKind::Timer, Tracer::new("timer", &log));

    ledger.dispose();

    assert_eq!(
        *log.lock(),
        vec!["timer", "listener", "tween", "filter", "sprite", "texture"]
    );
}

#[test]
fn test_registration_order_within_kind() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut ledger = ResourceManager::new("ordered");

    ledger.track(ResourceKind::Texture, Tracer::new("first", &log));
    ledger.track(ResourceKind::Texture, Tracer::new("second", &log));
    ledger.track(ResourceKind::Texture, Tracer::new("third", &log));

    ledger.dispose();
    assert_eq!(*log.lock(), vec!["first", "second", "third"]);
}

#[test]
fn test_failing_disposal_does_not_stop_the_pass() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut ledger = ResourceManager::new("faulty");

    ledger.track(
        ResourceKind::Filter,
        Tracer::new("broken-filter", &log).with_mode(TracerMode::Fail),
    );
    ledger.track(
        ResourceKind::DisplayObject,
        Tracer::new("panicking-sprite", &log).with_mode(TracerMode::Panic),
    );
    ledger.track(ResourceKind::Texture, Tracer::new("texture", &log));

    let report = ledger.dispose();

    assert_eq!(report, DisposeReport { disposed: 1, failed: 2 });
    assert_eq!(
        *log.lock(),
        vec!["broken-filter", "panicking-sprite", "texture"]
    );
    assert!(ledger.is_empty());
}

#[test]
fn test_dispose_twice_is_noop() {
    let backend = HeadlessBackend::new();
    let mut ledger = ResourceManager::new("twice");
    ledger.track_texture(texture(&backend, "a"));

    assert_eq!(ledger.dispose().disposed, 1);
    assert_eq!(ledger.dispose(), DisposeReport::default());
    assert!(ledger.is_disposed());
    assert_eq!(backend.stats().destroyed(), 1);
}

#[test]
fn test_track_after_dispose_destroys_immediately() {
    let backend = HeadlessBackend::new();
    let mut ledger = ResourceManager::new("late");
    ledger.dispose();

    let tex = ledger.track_texture(texture(&backend, "late"));

    assert!(tex.is_destroyed());
    assert!(!ledger.is_tracked(tex.key()));
    assert!(ledger.is_empty());
}

#[test]
fn test_release_single_resource() {
    let backend = HeadlessBackend::new();
    let mut ledger = ResourceManager::new("release");

    let keep = ledger.track_texture(texture(&backend, "keep"));
    let drop_me = ledger.track_texture(texture(&backend, "drop"));

    assert!(ledger.release(drop_me.key()));
    assert!(!ledger.release(drop_me.key()));

    assert!(drop_me.is_destroyed());
    assert!(!keep.is_destroyed());
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger.kind_of(keep.key()), Some(ResourceKind::Texture));
}

#[test]
fn test_released_slot_is_reused_with_new_generation() {
    let backend = HeadlessBackend::new();
    let mut ledger = ResourceManager::new("arena");

    let first = ledger.track_texture(texture(&backend, "first"));
    let old_handle = ledger.handle_of(first.key()).unwrap();
    ledger.release(first.key());

    let second = ledger.track_texture(texture(&backend, "second"));
    let new_handle = ledger.handle_of(second.key()).unwrap();

    assert_eq!(old_handle.index, new_handle.index);
    assert_ne!(old_handle.generation, new_handle.generation);
}

#[test]
fn test_stats_by_kind() {
    let backend = HeadlessBackend::new();
    let bus = EventBus::new();
    let mut ledger = ResourceManager::new("stats");

    let tex = ledger.track_texture(texture(&backend, "a"));
    ledger.track_display_object(DisplayNode::sprite("sprite", tex));
    ledger.track_display_object(DisplayNode::container("root"));
    ledger.track_filter(FilterHandle::new("displacement"));
    ledger.add_event_listener(&bus, SliderEventKind::Idle, Arc::new(|_: &crate::events::SliderEvent| {}));

    let stats = ledger.stats();
    assert_eq!(stats.textures, 1);
    assert_eq!(stats.display_objects, 2);
    assert_eq!(stats.filters, 1);
    assert_eq!(stats.subscriptions, 1);
    assert_eq!(stats.total(), 5);
}

#[test]
fn test_listener_batch_is_detached_on_dispose() {
    let bus = EventBus::new();
    let mut ledger = ResourceManager::new("listeners");
    let hits = Arc::new(AtomicUsize::new(0));

    let mut listeners: HashMap<SliderEventKind, Vec<EventHandler>> = HashMap::new();
    for kind in [SliderEventKind::PointerMove, SliderEventKind::PointerLeave] {
        let counter = Arc::clone(&hits);
        listeners.entry(kind).or_default().push(Arc::new(move |_: &crate::events::SliderEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
    }

    let keys = ledger.add_event_listener_batch(&bus, listeners);
    assert_eq!(keys.len(), 2);
    assert_eq!(bus.emit(&crate::events::SliderEvent::PointerLeave), 1);

    ledger.dispose();

    assert_eq!(bus.subscriber_count(SliderEventKind::PointerMove), 0);
    assert_eq!(bus.subscriber_count(SliderEventKind::PointerLeave), 0);
    assert_eq!(bus.emit(&crate::events::SliderEvent::PointerLeave), 0);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_set_timeout_without_runtime() {
    let mut ledger = ResourceManager::new("no-runtime");
    let result = ledger.set_timeout(Duration::from_millis(10), || {});
    assert!(matches!(result, Err(ResourceError::NoRuntime)));
}

#[tokio::test(start_paused = true)]
async fn test_timer_fires_after_delay() {
    let mut ledger = ResourceManager::new("timers");
    let fired = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&fired);

    ledger
        .set_timeout(Duration::from_millis(100), move || {
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!fired.load(Ordering::SeqCst));

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(fired.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_clear_timeout_prevents_callback() {
    let mut ledger = ResourceManager::new("timers");
    let fired = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&fired);

    let id = ledger
        .set_timeout(Duration::from_millis(100), move || {
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();
    ledger.clear_timeout(id);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!fired.load(Ordering::SeqCst));
    assert_eq!(ledger.stats().timers, 0);
}

#[tokio::test(start_paused = true)]
async fn test_dispose_aborts_pending_timers() {
    let mut ledger = ResourceManager::new("timers");
    let fired = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&fired);

    ledger
        .set_timeout(Duration::from_millis(100), move || {
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();
    ledger.dispose();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!fired.load(Ordering::SeqCst));

    let late = ledger.set_timeout(Duration::from_millis(1), || {});
    assert!(matches!(late, Err(ResourceError::Disposed(_))));
}

#[tokio::test(start_paused = true)]
async fn test_fired_timers_are_pruned() {
    let mut ledger = ResourceManager::new("timers");

    ledger.set_timeout(Duration::from_millis(10), || {}).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    tokio::task::yield_now().await;

    ledger.set_timeout(Duration::from_millis(10), || {}).unwrap();
    assert_eq!(ledger.stats().timers, 1);
}

#[test]
fn test_drop_disposes_live_resources() {
    let backend = HeadlessBackend::new();
    let tex;
    {
        let mut ledger = ResourceManager::new("dropped");
        tex = ledger.track_texture(texture(&backend, "leaky"));
    }
    assert!(tex.is_destroyed());
}

#[test]
fn test_settled_animations_are_pruned_on_next_track() {
    use crate::animation::{AnimatedValue, AnimationHandle, Tween};
    use std::time::Instant;

    let mut ledger = ResourceManager::new("tweens");
    let tween = |to| AnimationHandle::new("fade", Tween::new(AnimatedValue::new(0.0), to, Duration::from_millis(10)));

    let killed = ledger.track_animation(tween(1.0));
    let completed = ledger.track_animation(tween(1.0));
    let running = ledger.track_animation(tween(1.0));
    assert_eq!(ledger.stats().animations, 3);

    killed.kill();
    let start = Instant::now();
    completed.advance(start);
    completed.advance(start + Duration::from_secs(1));
    assert!(running.is_running());

    ledger.track_animation(tween(0.5));
    assert_eq!(ledger.stats().animations, 2);

    let report = ledger.dispose();
    assert_eq!(report.disposed, 2);
    assert!(!running.is_running());
}
