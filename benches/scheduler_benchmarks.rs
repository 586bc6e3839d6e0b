//! Performance benchmarks for slidewarp
//!
//! Covers the per-frame hot paths: update coalescing, frame draining,
//! animation ticking and sliding window planning.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::sync::Arc;
use std::time::{Duration, Instant};

use slidewarp::{
    animation::{AnimatedValue, AnimationGroup, AnimationHandle, AnimationKind, Tween},
    config::SchedulerConfig,
    window::{SlideState, SlideStateTable, SlidingWindowManager},
    AnimationCoordinator, Priority, RenderScheduler, UpdateType,
};

/// Benchmark scheduling with heavy coalescing
fn bench_schedule_coalescing(c: &mut Criterion) {
    let mut group = c.benchmark_group("schedule_coalescing");

    for sources in [1usize, 10, 100].iter() {
        group.bench_with_input(format!("1000_updates_{}_sources", sources), sources, |b, &sources| {
            b.iter_batched(
                || RenderScheduler::new(&SchedulerConfig::default()),
                |scheduler| {
                    for i in 0..1000 {
                        scheduler.schedule_typed_update(
                            format!("slider-{}", i % sources),
                            UpdateType::Filter,
                            || Ok(()),
                            Priority::Normal,
                        );
                    }
                    black_box(scheduler.pending_count())
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

/// Benchmark draining a full frame of mixed-priority updates
fn bench_run_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("run_frame");
    let priorities = [Priority::Critical, Priority::High, Priority::Normal, Priority::Low];

    for pending in [10usize, 100, 1000].iter() {
        group.bench_with_input(format!("drain_{}_updates", pending), pending, |b, &pending| {
            b.iter_batched(
                || {
                    let scheduler = RenderScheduler::new(&SchedulerConfig::default());
                    for i in 0..pending {
                        scheduler.schedule_keyed_update(
                            "slider",
                            UpdateType::Position,
                            format!("sprite-{}", i),
                            || Ok(()),
                            priorities[i % priorities.len()],
                        );
                    }
                    scheduler
                },
                |scheduler| black_box(scheduler.run_frame(Instant::now() + Duration::from_secs(1))),
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

/// Benchmark ticking many concurrent animation groups
fn bench_animation_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("animation_tick");

    for groups in [10usize, 100].iter() {
        group.bench_with_input(format!("tick_{}_groups", groups), groups, |b, &groups| {
            b.iter_batched(
                || {
                    let coordinator =
                        AnimationCoordinator::new(Arc::new(RenderScheduler::new(&SchedulerConfig::default())));
                    for i in 0..groups {
                        let tween = AnimationHandle::new(
                            "bench",
                            Tween::new(AnimatedValue::new(0.0), 1.0, Duration::from_millis(500)),
                        );
                        coordinator.queue_animation_group(
                            AnimationGroup::new(format!("s{}:slide", i), format!("s{}", i), AnimationKind::SlideTransition)
                                .with_animation(tween),
                        );
                    }
                    coordinator
                },
                |coordinator| {
                    let start = Instant::now();
                    for frame in 0..30u64 {
                        black_box(coordinator.tick(start + Duration::from_millis(frame * 16)));
                    }
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

/// Benchmark window planning over large slide sets
fn bench_window_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("window_plan");

    for total in [50usize, 500, 5000].iter() {
        group.bench_with_input(format!("plan_{}_slides", total), total, |b, &total| {
            let mut window = SlidingWindowManager::new(total, 2, true);
            let mut states = SlideStateTable::new(total);
            for index in 0..total {
                let _ = states.transition(index, SlideState::Placeholder);
            }

            b.iter(|| {
                for step in 0..10 {
                    window.update_current_index((step * 7) % total);
                    black_box(window.plan(&states));
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_schedule_coalescing,
    bench_run_frame,
    bench_animation_tick,
    bench_window_plan
);
criterion_main!(benches);
