//! Animation coordination
//!
//! Groups timed animations by semantic kind and owner so that two animations
//! of the same kind never fight over the same slider:
//! - Starting a group cancels the active group of the same (owner, kind)
//! - Cancelled groups stop where they are; values are never reverted
//! - Completion callbacks fire once every animation in the group finished
//! - Follow-up render work goes through the shared `RenderScheduler`, once
//!   per tick while a group runs and once more on the tick it completes

use log::{debug, info};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::isolation::isolate_unit;
use crate::scheduler::{Priority, RenderScheduler, UpdateKey, UpdateType};

mod tween;

pub use tween::{
    AnimatedValue, AnimationHandle, AnimationState, EasingCurve, TimedAnimation, Tween,
};


/// Semantic category; at most one active group per (owner, kind)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnimationKind {
    SlideTransition,
    IdleEffect,
    Interaction,
    TextAnimation,
}

impl AnimationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnimationKind::SlideTransition => "slide_transition",
            AnimationKind::IdleEffect => "idle_effect",
            AnimationKind::Interaction => "interaction",
            AnimationKind::TextAnimation => "text_animation",
        }
    }
}

impl fmt::Display for AnimationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type GroupCallback = Box<dyn FnOnce() + Send>;
type RenderFn = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Scene write re-submitted to the scheduler after every tick
#[derive(Clone)]
struct RenderUpdate {
    key: String,
    apply: RenderFn,
}

/// Named set of animations started and cancelled together
pub struct AnimationGroup {
    id: String,
    owner: String,
    kind: AnimationKind,
    animations: Vec<AnimationHandle>,
    on_complete: Option<GroupCallback>,
    render_update: Option<RenderUpdate>,
}

impl fmt::Debug for AnimationGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnimationGroup")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("kind", &self.kind)
            .field("animations", &self.animations.len())
            .field("render_update", &self.render_update.as_ref().map(|u| u.key.as_str()))
            .finish()
    }
}

impl AnimationGroup {
    pub fn new(id: impl Into<String>, owner: impl Into<String>, kind: AnimationKind) -> Self {
        Self {
            id: id.into(),
            owner: owner.into(),
            kind,
            animations: Vec::new(),
            on_complete: None,
            render_update: None,
        }
    }

    pub fn with_animation(mut self, animation: AnimationHandle) -> Self {
        self.animations.push(animation);
        self
    }

    pub fn with_animations(mut self, animations: impl IntoIterator<Item = AnimationHandle>) -> Self {
        self.animations.extend(animations);
        self
    }

    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_complete = Some(Box::new(callback));
        self
    }

    /// Writes the animated values into the scene. Scheduled under `key`
    /// after each tick that advanced the group, including the final one.
    pub fn with_render_update<F>(mut self, key: impl Into<String>, apply: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.render_update = Some(RenderUpdate {
            key: key.into(),
            apply: Arc::new(apply),
        });
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn kind(&self) -> AnimationKind {
        self.kind
    }

    pub fn animations(&self) -> &[AnimationHandle] {
        &self.animations
    }

    fn kill_all(&self) -> usize {
        self.animations.iter().filter(|a| a.kill()).count()
    }
}

/// Coordinator counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnimationStats {
    pub active_groups: usize,
    pub started: u64,
    pub completed: u64,
    pub cancelled: u64,
}

/// Outcome of one `tick`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub advanced: usize,
    pub completed_groups: usize,
    pub render_updates: usize,
}

#[derive(Default)]
struct CoordinatorState {
    groups: HashMap<String, AnimationGroup>,
    stats: AnimationStats,
}

/// Shared animation service
pub struct AnimationCoordinator {
    scheduler: Arc<RenderScheduler>,
    state: Mutex<CoordinatorState>,
}

static GLOBAL: OnceCell<Arc<AnimationCoordinator>> = OnceCell::new();

impl AnimationCoordinator {
    pub fn new(scheduler: Arc<RenderScheduler>) -> Self {
        Self {
            scheduler,
            state: Mutex::new(CoordinatorState::default()),
        }
    }

    /// Process-wide coordinator bound to `RenderScheduler::global()`
    pub fn global() -> Arc<AnimationCoordinator> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(AnimationCoordinator::new(RenderScheduler::global()))))
    }

    pub fn scheduler(&self) -> &Arc<RenderScheduler> {
        &self.scheduler
    }

    /// Starts a group, first cancelling whatever group of the same owner and
    /// kind (or the same id) is active. Returns the group id.
    pub fn queue_animation_group(&self, group: AnimationGroup) -> String {
        let mut state = self.state.lock();

        let conflicting: Vec<String> = state
            .groups
            .values()
            .filter(|g| g.id == group.id || (g.owner == group.owner && g.kind == group.kind))
            .map(|g| g.id.clone())
            .collect();

        for id in conflicting {
            if let Some(old) = state.groups.remove(&id) {
                let killed = old.kill_all();
                state.stats.cancelled += 1;
                debug!(
                    "⏹️ Group '{}' ({}) replaced, {} animations stopped",
                    old.id, old.kind, killed
                );
            }
        }

        let id = group.id.clone();
        debug!(
            "🎬 Starting {} group '{}' for '{}' with {} animations",
            group.kind,
            group.id,
            group.owner,
            group.animations.len()
        );
        state.groups.insert(id.clone(), group);
        state.stats.started += 1;
        id
    }

    /// Stops every group of `kind`, for all owners
    pub fn cancel_animations_by_type(&self, kind: AnimationKind) -> usize {
        self.cancel_where(|g| g.kind == kind)
    }

    pub fn cancel_owner_animations_by_type(&self, owner: &str, kind: AnimationKind) -> usize {
        self.cancel_where(|g| g.owner == owner && g.kind == kind)
    }

    /// Stops every group owned by an instance (teardown)
    pub fn cancel_instance_animations(&self, owner: &str) -> usize {
        let cancelled = self.cancel_where(|g| g.owner == owner);
        if cancelled > 0 {
            info!("⏹️ Cancelled {} animation groups of '{}'", cancelled, owner);
        }
        cancelled
    }

    pub fn cancel_group(&self, id: &str) -> bool {
        self.cancel_where(|g| g.id == id) > 0
    }

    fn cancel_where<P>(&self, predicate: P) -> usize
    where
        P: Fn(&AnimationGroup) -> bool,
    {
        let mut state = self.state.lock();
        let ids: Vec<String> = state
            .groups
            .values()
            .filter(|g| predicate(g))
            .map(|g| g.id.clone())
            .collect();

        for id in &ids {
            if let Some(group) = state.groups.remove(id) {
                group.kill_all();
            }
        }
        state.stats.cancelled += ids.len() as u64;
        ids.len()
    }

    /// Submits one render follow-up for an animation kind. Updates sharing
    /// `key` coalesce; prefix the key with `"<owner>:"` so teardown can find it.
    pub fn schedule_animation_update<F>(&self, kind: AnimationKind, callback: F, key: &str) -> UpdateKey
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.scheduler.schedule_keyed_update(
            format!("animation:{}", kind.as_str()),
            UpdateType::Animation,
            key,
            callback,
            Priority::High,
        )
    }

    /// Advances every active animation to `now`, then retires finished groups.
    /// Group completion callbacks only fire when no animation was killed.
    /// Groups that advanced get their render update scheduled afterwards.
    pub fn tick(&self, now: Instant) -> TickReport {
        let (snapshot, advancing): (Vec<AnimationHandle>, HashSet<String>) = {
            let state = self.state.lock();
            let snapshot = state
                .groups
                .values()
                .flat_map(|g| g.animations.iter().cloned())
                .collect();
            let advancing = state
                .groups
                .values()
                .filter(|g| g.animations.iter().any(|a| a.is_running()))
                .map(|g| g.id.clone())
                .collect();
            (snapshot, advancing)
        };

        let mut report = TickReport::default();
        for animation in &snapshot {
            if animation.is_running() {
                animation.advance(now);
                report.advanced += 1;
            }
        }

        let mut renders: Vec<(AnimationKind, RenderUpdate)> = Vec::new();
        let callbacks: Vec<(String, Option<GroupCallback>)> = {
            let mut state = self.state.lock();
            for group in state.groups.values() {
                if let Some(update) = group.render_update.as_ref().filter(|_| advancing.contains(&group.id)) {
                    renders.push((group.kind, update.clone()));
                }
            }

            let finished: Vec<String> = state
                .groups
                .values()
                .filter(|g| g.animations.iter().all(|a| !a.is_running()))
                .map(|g| g.id.clone())
                .collect();

            let mut callbacks = Vec::new();
            for id in finished {
                let Some(mut group) = state.groups.remove(&id) else {
                    continue;
                };
                let completed = group
                    .animations
                    .iter()
                    .all(|a| a.state() == AnimationState::Completed);
                if completed {
                    state.stats.completed += 1;
                    callbacks.push((id, group.on_complete.take()));
                } else {
                    debug!("Group '{}' ended with killed animations", id);
                }
            }
            callbacks
        };

        for (kind, update) in renders {
            let apply = update.apply;
            self.schedule_animation_update(kind, move || apply(), &update.key);
            report.render_updates += 1;
        }

        for (id, callback) in callbacks {
            report.completed_groups += 1;
            if let Some(callback) = callback {
                isolate_unit(&format!("group '{}' completion", id), callback);
            }
        }

        report
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.state.lock().groups.contains_key(id)
    }

    /// Id of the active group for (owner, kind), if any
    pub fn active_group(&self, owner: &str, kind: AnimationKind) -> Option<String> {
        self.state
            .lock()
            .groups
            .values()
            .find(|g| g.owner == owner && g.kind == kind)
            .map(|g| g.id.clone())
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().groups.len()
    }

    pub fn stats(&self) -> AnimationStats {
        let state = self.state.lock();
        AnimationStats {
            active_groups: state.groups.len(),
            ..state.stats.clone()
        }
    }
}
