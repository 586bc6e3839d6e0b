//! Timed animations: easing, tweens and killable handles

use anyhow::Result;
use log::trace;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::isolation::{isolate, isolate_unit};
use crate::resources::{Disposable, ResourceKey};

/// Easing curve applied to normalized progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EasingCurve {
    Linear,
    EaseIn,
    EaseOut,
    #[default]
    EaseInOut,
    BounceOut,
    ElasticOut,
    BackOut,
}

impl EasingCurve {
    pub fn apply(self, progress: f32) -> f32 {
        let t = progress.clamp(0.0, 1.0);

        match self {
            EasingCurve::Linear => t,
            EasingCurve::EaseIn => t * t,
            EasingCurve::EaseOut => 1.0 - (1.0 - t) * (1.0 - t),
            EasingCurve::EaseInOut => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    -1.0 + (4.0 - 2.0 * t) * t
                }
            }
            EasingCurve::BounceOut => {
                if t < 1.0 / 2.75 {
                    7.5625 * t * t
                } else if t < 2.0 / 2.75 {
                    let t = t - 1.5 / 2.75;
                    7.5625 * t * t + 0.75
                } else if t < 2.5 / 2.75 {
                    let t = t - 2.25 / 2.75;
                    7.5625 * t * t + 0.9375
                } else {
                    let t = t - 2.625 / 2.75;
                    7.5625 * t * t + 0.984375
                }
            }
            EasingCurve::ElasticOut => {
                if t == 0.0 || t == 1.0 {
                    t
                } else {
                    let p = 0.3;
                    let s = p / 4.0;
                    2.0_f32.powf(-10.0 * t) * ((t - s) * (2.0 * std::f32::consts::PI) / p).sin() + 1.0
                }
            }
            EasingCurve::BackOut => {
                let s = 1.70158;
                let t = t - 1.0;
                t * t * ((s + 1.0) * t + s) + 1.0
            }
        }
    }
}

/// Shared f32 cell written by tweens and read by render updates
#[derive(Debug, Clone, Default)]
pub struct AnimatedValue(Arc<Mutex<f32>>);

impl AnimatedValue {
    pub fn new(value: f32) -> Self {
        Self(Arc::new(Mutex::new(value)))
    }

    pub fn get(&self) -> f32 {
        *self.0.lock()
    }

    pub fn set(&self, value: f32) {
        *self.0.lock() = value;
    }
}

/// Anything that can be sampled against the frame clock
pub trait TimedAnimation: Send {
    /// Writes the value for `now`. Returns true once the animation has finished.
    fn sample(&mut self, now: Instant) -> bool;
}

/// Interpolates an `AnimatedValue` toward a target
pub struct Tween {
    target: AnimatedValue,
    from: Option<f32>,
    to: f32,
    delay: Duration,
    duration: Duration,
    easing: EasingCurve,
    started_at: Option<Instant>,
}

impl Tween {
    /// Tween from the value's current reading (taken at the first sample) to `to`
    pub fn new(target: AnimatedValue, to: f32, duration: Duration) -> Self {
        Self {
            target,
            from: None,
            to,
            delay: Duration::ZERO,
            duration,
            easing: EasingCurve::default(),
            started_at: None,
        }
    }

    pub fn from(mut self, value: f32) -> Self {
        self.from = Some(value);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn easing(mut self, easing: EasingCurve) -> Self {
        self.easing = easing;
        self
    }
}

impl TimedAnimation for Tween {
    fn sample(&mut self, now: Instant) -> bool {
        let started_at = *self.started_at.get_or_insert(now);
        let elapsed = now.saturating_duration_since(started_at);
        if elapsed < self.delay {
            return false;
        }

        let from = *self.from.get_or_insert_with(|| self.target.get());
        let running = elapsed - self.delay;
        let progress = if self.duration.is_zero() {
            1.0
        } else {
            (running.as_secs_f32() / self.duration.as_secs_f32()).min(1.0)
        };

        let value = from + (self.to - from) * self.easing.apply(progress);
        self.target.set(if progress >= 1.0 { self.to } else { value });
        progress >= 1.0
    }
}

/// Lifecycle of an animation handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationState {
    Running,
    Completed,
    Killed,
}

type CompletionFn = Box<dyn FnOnce() + Send>;

struct HandleInner {
    animation: Box<dyn TimedAnimation>,
    state: AnimationState,
    on_complete: Option<CompletionFn>,
}

/// Clonable, killable handle to a running animation
#[derive(Clone)]
pub struct AnimationHandle {
    key: ResourceKey,
    label: Arc<str>,
    inner: Arc<Mutex<HandleInner>>,
}

impl fmt::Debug for AnimationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnimationHandle")
            .field("key", &self.key)
            .field("label", &self.label)
            .field("state", &self.state())
            .finish()
    }
}

impl AnimationHandle {
    pub fn new(label: &str, animation: impl TimedAnimation + 'static) -> Self {
        Self {
            key: ResourceKey::fresh(),
            label: Arc::from(label),
            inner: Arc::new(Mutex::new(HandleInner {
                animation: Box::new(animation),
                state: AnimationState::Running,
                on_complete: None,
            })),
        }
    }

    /// Callback fired once when the animation finishes naturally (not when killed)
    pub fn on_complete<F>(self, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.lock().on_complete = Some(Box::new(callback));
        self
    }

    pub fn key(&self) -> ResourceKey {
        self.key
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> AnimationState {
        self.inner.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == AnimationState::Running
    }

    /// Samples the animation at `now`. The completion callback runs after the
    /// handle is unlocked, behind a failure barrier.
    pub fn advance(&self, now: Instant) -> AnimationState {
        let callback = {
            let mut inner = self.inner.lock();
            if inner.state != AnimationState::Running {
                return inner.state;
            }

            let mut finished = false;
            let context = format!("sampling animation '{}'", self.label);
            let sampled = isolate(&context, || {
                finished = inner.animation.sample(now);
                Ok(())
            });

            if !sampled {
                inner.state = AnimationState::Killed;
                inner.on_complete = None;
                return AnimationState::Killed;
            }
            if !finished {
                return AnimationState::Running;
            }

            inner.state = AnimationState::Completed;
            inner.on_complete.take()
        };

        trace!("✅ Animation '{}' completed", self.label);
        if let Some(callback) = callback {
            isolate_unit(&format!("animation '{}' completion", self.label), callback);
        }
        AnimationState::Completed
    }

    /// Stops the animation where it is. Returns false if it was not running.
    pub fn kill(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != AnimationState::Running {
            return false;
        }
        inner.state = AnimationState::Killed;
        inner.on_complete = None;
        true
    }
}

impl Disposable for AnimationHandle {
    fn resource_key(&self) -> ResourceKey {
        self.key
    }

    fn dispose(&mut self) -> Result<()> {
        self.kill();
        Ok(())
    }

    fn is_finished(&self) -> bool {
        !self.is_running()
    }
}
