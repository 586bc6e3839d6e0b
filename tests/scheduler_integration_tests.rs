// Scheduler and animation coordinator integration tests
//
// Exercises the shared services the way several sliders on one page use
// them: concurrent producers, animation follow-up updates and the
// process-wide singletons.

use parking_lot::Mutex;
use serial_test::serial;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use slidewarp::animation::{AnimatedValue, AnimationGroup, AnimationHandle, AnimationKind, Tween};
use slidewarp::config::SchedulerConfig;
use slidewarp::{AnimationCoordinator, Priority, RenderScheduler, UpdateType};

fn later() -> Instant {
    Instant::now() + Duration::from_secs(1)
}

#[test]
fn test_concurrent_producers_coalesce_per_source() {
    let scheduler = Arc::new(RenderScheduler::new(&SchedulerConfig::default()));
    let executed = Arc::new(Mutex::new(Vec::new()));

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let scheduler = Arc::clone(&scheduler);
            let executed = Arc::clone(&executed);
            thread::spawn(move || {
                for i in 0..100 {
                    let executed = Arc::clone(&executed);
                    scheduler.schedule_typed_update(
                        format!("slider-{}", p),
                        UpdateType::Filter,
                        move || {
                            executed.lock().push((p, i));
                            Ok(())
                        },
                        Priority::Normal,
                    );
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    assert_eq!(scheduler.pending_count(), 4);
    let report = scheduler.run_frame(later());
    assert_eq!(report.executed, 4);

    // Only the last payload of each producer survives
    let mut executed = executed.lock().clone();
    executed.sort_unstable();
    assert_eq!(executed, vec![(0, 99), (1, 99), (2, 99), (3, 99)]);

    let stats = scheduler.stats();
    assert_eq!(stats.scheduled, 400);
    assert_eq!(stats.merged, 396);
}

#[test]
fn test_animation_updates_follow_tweens() {
    let scheduler = Arc::new(RenderScheduler::new(&SchedulerConfig::default()));
    let coordinator = AnimationCoordinator::new(Arc::clone(&scheduler));

    let value = AnimatedValue::new(0.0);
    let applied = Arc::new(Mutex::new(Vec::new()));
    let tween = AnimationHandle::new("fade", Tween::new(value.clone(), 1.0, Duration::from_millis(100)));
    let sample = value.clone();
    let sink = Arc::clone(&applied);
    coordinator.queue_animation_group(
        AnimationGroup::new("s1:slide:1", "s1", AnimationKind::SlideTransition)
            .with_animation(tween)
            .with_render_update("s1:alpha", move || {
                sink.lock().push(sample.get());
                Ok(())
            }),
    );

    let start = Instant::now();
    for step in 0..=6u64 {
        let now = start + Duration::from_millis(step * 30);
        coordinator.tick(now);
        scheduler.run_frame(now + Duration::from_secs(1));
    }

    // Ticks at 0..=120ms advance the tween, nothing is scheduled afterwards
    let applied = applied.lock();
    assert_eq!(applied.len(), 5);
    assert!(applied.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*applied.last().unwrap(), 1.0);
    assert!(!coordinator.is_active("s1:slide:1"));
    assert_eq!(scheduler.pending_count(), 0);
}

#[test]
fn test_owner_cancel_spares_other_instances() {
    let scheduler = Arc::new(RenderScheduler::new(&SchedulerConfig::default()));
    let coordinator = AnimationCoordinator::new(Arc::clone(&scheduler));
    let ran = Arc::new(AtomicUsize::new(0));

    for owner in ["a", "b"] {
        let counter = Arc::clone(&ran);
        scheduler.schedule_typed_update(
            owner,
            UpdateType::Texture,
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            Priority::High,
        );
        let counter = Arc::clone(&ran);
        coordinator.schedule_animation_update(
            AnimationKind::Interaction,
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            &format!("{}:strength", owner),
        );
    }
    assert_eq!(scheduler.pending_count(), 4);

    assert_eq!(scheduler.cancel_owner("a"), 2);
    scheduler.run_frame(later());
    assert_eq!(ran.load(Ordering::SeqCst), 2);
}

#[test]
fn test_failures_do_not_leak_between_sources() {
    let scheduler = RenderScheduler::new(&SchedulerConfig::default());
    let ran = Arc::new(AtomicUsize::new(0));

    scheduler.schedule_typed_update("broken", UpdateType::Render, || anyhow::bail!("lost context"), Priority::Critical);
    scheduler.schedule_typed_update("broken", UpdateType::Text, || panic!("font missing"), Priority::Critical);
    let counter = Arc::clone(&ran);
    scheduler.schedule_typed_update(
        "healthy",
        UpdateType::Render,
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
        Priority::Critical,
    );

    let report = scheduler.run_frame(Instant::now());
    assert_eq!(report.executed, 1);
    assert_eq!(report.failed, 2);
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.stats().failed, 2);
}

#[test]
fn test_debounced_resize_waits_for_quiet_period() {
    let config = SchedulerConfig {
        debounce_ms: 50,
        ..SchedulerConfig::default()
    };
    let scheduler = RenderScheduler::new(&config);
    let ran = Arc::new(AtomicUsize::new(0));

    for _ in 0..5 {
        let counter = Arc::clone(&ran);
        scheduler.schedule_typed_update(
            "slider",
            UpdateType::Resize,
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            Priority::Debounced,
        );
    }

    scheduler.run_frame(Instant::now());
    assert_eq!(ran.load(Ordering::SeqCst), 0);

    scheduler.run_frame(Instant::now() + Duration::from_millis(60));
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.pending_count(), 0);
}

#[test]
#[serial]
fn test_global_services_are_shared() {
    let a = RenderScheduler::global();
    let b = RenderScheduler::global();
    assert!(Arc::ptr_eq(&a, &b));

    let coordinator = AnimationCoordinator::global();
    assert!(Arc::ptr_eq(coordinator.scheduler(), &a));
    assert!(Arc::ptr_eq(&coordinator, &AnimationCoordinator::global()));
}
