//! Frame-aligned render update scheduler
//!
//! Many independent parts of a slider (filters, pointer tracking, text,
//! animation follow-ups) want to mutate the scene. Instead of touching the
//! GPU scene whenever they like, they submit updates here and the host drains
//! them once per frame with `run_frame`.
//!
//! # Features
//!
//! - **Coalescing**: one surviving update per (source, type[, sub-key]) per batch,
//!   latest payload wins, priority is promoted to the most urgent request
//! - **Priority classes**: critical, high, normal, low, debounced
//! - **Preemption**: enough pending high-priority work flushes early
//! - **Debounce**: per-key deadline reset on every request
//! - **Adaptive buffering**: the coalescing delay grows when batches are slow
//!   and shrinks back toward one frame when they are cheap
//! - **Failure isolation**: a failing callback never stops the batch
//!
//! # Usage
//!
//! ```no_run
//! use slidewarp::scheduler::{Priority, RenderScheduler, UpdateType};
//! use slidewarp::config::SchedulerConfig;
//! use std::time::Instant;
//!
//! let scheduler = RenderScheduler::new(&SchedulerConfig::default());
//! scheduler.schedule_typed_update("slider-1", UpdateType::Filter, || Ok(()), Priority::High);
//!
//! // once per frame
//! let report = scheduler.run_frame(Instant::now());
//! ```

use log::{debug, info, trace};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::SchedulerConfig;
use crate::isolation::isolate;


/// Frame budget at 60 FPS (16.67ms)
pub const FRAME_BUDGET: Duration = Duration::from_micros(16_667);

/// Number of batch timings kept for adaptive tuning
const TIMING_WINDOW: usize = 10;

/// Minimum samples before the delay may grow
const MIN_GROW_SAMPLES: usize = 3;

const GROW_FACTOR: f64 = 1.5;
const SHRINK_FACTOR: f64 = 0.8;

/// Priority class; declaration order is execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Runs on the next frame regardless of buffering
    Critical,
    /// Runs after the buffer delay, or early once enough are pending
    High,
    Normal,
    Low,
    /// Runs once its own debounce deadline has passed
    Debounced,
}

impl Priority {
    /// Classes that wait for the shared coalescing window
    fn is_buffered(self) -> bool {
        matches!(self, Priority::High | Priority::Normal | Priority::Low)
    }

    /// The more urgent of two classes
    pub fn promote(self, other: Priority) -> Priority {
        self.min(other)
    }
}

/// What an update mutates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateType {
    Render,
    Filter,
    Position,
    Texture,
    Text,
    Animation,
    Resize,
    Custom(&'static str),
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateType::Custom(name) => write!(f, "custom:{}", name),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Coalescing key of a scheduled update
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpdateKey {
    pub source: String,
    pub update_type: UpdateType,
    pub sub_key: Option<String>,
}

impl fmt::Display for UpdateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sub_key {
            Some(sub) => write!(f, "{}/{}/{}", self.source, self.update_type, sub),
            None => write!(f, "{}/{}", self.source, self.update_type),
        }
    }
}

/// Deferred scene mutation
pub type UpdateFn = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

struct PendingUpdate {
    callback: UpdateFn,
    priority: Priority,
    /// Order of first submission, kept across merges
    seq: u64,
    deadline: Option<Instant>,
}

/// Scheduler counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerStats {
    pub scheduled: u64,
    pub executed: u64,
    pub merged: u64,
    pub cancelled: u64,
    pub failed: u64,
    pub frames: u64,
    pub pending: usize,
    pub buffer_delay: Duration,
}

/// Result of one `run_frame`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    pub executed: usize,
    pub failed: usize,
    /// Updates still queued after the frame
    pub remaining: usize,
    pub elapsed: Duration,
}

struct SchedulerState {
    pending: HashMap<UpdateKey, PendingUpdate>,
    next_seq: u64,
    /// When the current coalescing window opened
    batch_opened_at: Option<Instant>,
    buffer_delay: Duration,
    timings: VecDeque<Duration>,
    stats: SchedulerStats,
}

impl SchedulerState {
    fn buffered_count(&self) -> usize {
        self.pending
            .values()
            .filter(|p| p.priority.is_buffered())
            .count()
    }

    fn high_count(&self) -> usize {
        self.pending
            .values()
            .filter(|p| p.priority == Priority::High)
            .count()
    }

    fn close_batch_if_drained(&mut self) {
        if self.buffered_count() == 0 {
            self.batch_opened_at = None;
        }
    }
}

/// Shared, frame-driven update coalescer
pub struct RenderScheduler {
    floor: Duration,
    ceiling: Duration,
    high_priority_threshold: usize,
    debounce: Duration,
    state: Mutex<SchedulerState>,
}

static GLOBAL: OnceCell<Arc<RenderScheduler>> = OnceCell::new();

impl RenderScheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        let floor = config.buffer_floor();
        let ceiling = config.buffer_ceiling().max(floor);

        info!(
            "⏱️ Render scheduler: buffer {:?}..{:?}, high threshold {}, debounce {:?}",
            floor,
            ceiling,
            config.high_priority_threshold,
            config.debounce()
        );

        Self {
            floor,
            ceiling,
            high_priority_threshold: config.high_priority_threshold.max(1),
            debounce: config.debounce(),
            state: Mutex::new(SchedulerState {
                pending: HashMap::new(),
                next_seq: 0,
                batch_opened_at: None,
                buffer_delay: floor,
                timings: VecDeque::with_capacity(TIMING_WINDOW),
                stats: SchedulerStats {
                    buffer_delay: floor,
                    ..Default::default()
                },
            }),
        }
    }

    /// Process-wide scheduler with default settings, created on first use
    pub fn global() -> Arc<RenderScheduler> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(RenderScheduler::new(&SchedulerConfig::default()))))
    }

    pub fn schedule_typed_update<F>(
        &self,
        source: impl Into<String>,
        update_type: UpdateType,
        callback: F,
        priority: Priority,
    ) -> UpdateKey
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let key = UpdateKey {
            source: source.into(),
            update_type,
            sub_key: None,
        };
        self.enqueue(key, Box::new(callback), priority, Instant::now())
    }

    pub fn schedule_keyed_update<F>(
        &self,
        source: impl Into<String>,
        update_type: UpdateType,
        sub_key: impl Into<String>,
        callback: F,
        priority: Priority,
    ) -> UpdateKey
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let key = UpdateKey {
            source: source.into(),
            update_type,
            sub_key: Some(sub_key.into()),
        };
        self.enqueue(key, Box::new(callback), priority, Instant::now())
    }

    /// Queues or merges an update as of `now`
    pub(crate) fn enqueue(&self, key: UpdateKey, callback: UpdateFn, priority: Priority, now: Instant) -> UpdateKey {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.stats.scheduled += 1;

        let seq = state.next_seq;
        let debounce = self.debounce;

        let merged = match state.pending.get_mut(&key) {
            Some(existing) => {
                let promoted = existing.priority.promote(priority);
                existing.callback = callback;
                existing.priority = promoted;
                existing.deadline = if promoted == Priority::Debounced {
                    Some(now + debounce)
                } else {
                    None
                };
                trace!("🔁 Merged update {} ({:?})", key, promoted);
                true
            }
            None => {
                let deadline = (priority == Priority::Debounced).then(|| now + debounce);
                state.pending.insert(
                    key.clone(),
                    PendingUpdate {
                        callback,
                        priority,
                        seq,
                        deadline,
                    },
                );
                state.next_seq += 1;
                false
            }
        };

        if merged {
            state.stats.merged += 1;
        }

        let buffered = state
            .pending
            .get(&key)
            .map_or(false, |p| p.priority.is_buffered());
        if buffered && state.batch_opened_at.is_none() {
            state.batch_opened_at = Some(now);
        }

        key
    }

    /// Removes pending updates for (source, type), all sub-keys, optionally
    /// only those in one priority class. Returns how many were removed.
    pub fn cancel_typed_update(&self, source: &str, update_type: UpdateType, priority: Option<Priority>) -> usize {
        self.cancel_where(|key, pending| {
            key.source == source
                && key.update_type == update_type
                && priority.map_or(true, |p| p == pending.priority)
        })
    }

    /// Removes every pending update of a source
    pub fn cancel_source(&self, source: &str) -> usize {
        self.cancel_where(|key, _| key.source == source)
    }

    /// Removes updates submitted by `owner` directly or on its behalf
    /// (sub-keys prefixed with `"<owner>:"`)
    pub fn cancel_owner(&self, owner: &str) -> usize {
        let prefix = format!("{}:", owner);
        self.cancel_where(|key, _| {
            key.source == owner
                || key
                    .sub_key
                    .as_deref()
                    .map_or(false, |sub| sub.starts_with(&prefix))
        })
    }

    fn cancel_where<P>(&self, predicate: P) -> usize
    where
        P: Fn(&UpdateKey, &PendingUpdate) -> bool,
    {
        let mut state = self.state.lock();
        let before = state.pending.len();
        state.pending.retain(|key, pending| !predicate(key, pending));
        let removed = before - state.pending.len();

        state.stats.cancelled += removed as u64;
        state.close_batch_if_drained();

        if removed > 0 {
            debug!("🚫 Cancelled {} pending updates", removed);
        }
        removed
    }

    pub fn is_pending(&self, key: &UpdateKey) -> bool {
        self.state.lock().pending.contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn buffer_delay(&self) -> Duration {
        self.state.lock().buffer_delay
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.state.lock();
        SchedulerStats {
            pending: state.pending.len(),
            buffer_delay: state.buffer_delay,
            ..state.stats.clone()
        }
    }

    /// Runs every update that is due at `now`. Called once per frame by the host.
    pub fn run_frame(&self, now: Instant) -> FrameReport {
        let batch = self.take_due(now);
        if batch.is_empty() {
            return FrameReport {
                remaining: self.pending_count(),
                ..Default::default()
            };
        }

        let started = Instant::now();
        let mut report = FrameReport::default();

        for (key, callback) in batch {
            let context = format!("update {}", key);
            if isolate(&context, callback) {
                report.executed += 1;
            } else {
                report.failed += 1;
            }
        }

        report.elapsed = started.elapsed();
        self.record_batch_time(report.elapsed);

        let mut state = self.state.lock();
        state.stats.executed += report.executed as u64;
        state.stats.failed += report.failed as u64;
        report.remaining = state.pending.len();

        trace!(
            "🎞️ Frame ran {} updates ({} failed) in {:?}, {} remaining",
            report.executed,
            report.failed,
            report.elapsed,
            report.remaining
        );
        report
    }

    fn take_due(&self, now: Instant) -> Vec<(UpdateKey, UpdateFn)> {
        let mut state = self.state.lock();
        state.stats.frames += 1;

        let window_elapsed = state
            .batch_opened_at
            .map_or(false, |opened| now.saturating_duration_since(opened) >= state.buffer_delay);
        let high_flush = state.high_count() >= self.high_priority_threshold;

        let due_keys: Vec<UpdateKey> = state
            .pending
            .iter()
            .filter(|(_, p)| match p.priority {
                Priority::Critical => true,
                Priority::High => window_elapsed || high_flush,
                Priority::Normal | Priority::Low => window_elapsed,
                Priority::Debounced => p.deadline.map_or(true, |d| now >= d),
            })
            .map(|(k, _)| k.clone())
            .collect();

        let mut due: Vec<(UpdateKey, PendingUpdate)> = due_keys
            .into_iter()
            .filter_map(|k| state.pending.remove(&k).map(|p| (k, p)))
            .collect();
        due.sort_by_key(|(_, p)| (p.priority, p.seq));

        if high_flush && !window_elapsed {
            debug!("⚡ {} high-priority updates pending, flushing early", self.high_priority_threshold);
        }
        state.close_batch_if_drained();

        due.into_iter().map(|(k, p)| (k, p.callback)).collect()
    }

    /// Feeds one batch duration into the adaptive buffer
    pub(crate) fn record_batch_time(&self, elapsed: Duration) {
        let mut state = self.state.lock();
        if state.timings.len() == TIMING_WINDOW {
            state.timings.pop_front();
        }
        state.timings.push_back(elapsed);

        let samples = state.timings.len();
        let average = state.timings.iter().sum::<Duration>() / samples as u32;
        let current = state.buffer_delay;

        let adjusted = if average > FRAME_BUDGET / 4 && samples >= MIN_GROW_SAMPLES {
            Some(current.mul_f64(GROW_FACTOR).min(self.ceiling))
        } else if average < FRAME_BUDGET / 8 && samples == TIMING_WINDOW {
            Some(current.mul_f64(SHRINK_FACTOR).max(self.floor))
        } else {
            None
        };

        if let Some(delay) = adjusted {
            state.timings.clear();
            if delay != current {
                debug!(
                    "📐 Buffer delay {:?} -> {:?} (avg batch {:?})",
                    current, delay, average
                );
                state.buffer_delay = delay;
            }
        }
    }
}

impl Default for RenderScheduler {
    fn default() -> Self {
        Self::new(&SchedulerConfig::default())
    }
}
