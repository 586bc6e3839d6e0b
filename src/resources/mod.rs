//! Per-instance ownership ledger for GPU resources, subscriptions and timers
//!
//! Every texture, scene node, filter, animation handle, event subscription
//! and timer created on behalf of a slider instance is registered here. The
//! ledger is an arena of generation-counted slots indexed by the resource's
//! `ResourceKey`, so registering the same resource again is an upsert.
//!
//! # Disposal order
//!
//! ```text
//! timers → subscriptions → animations → filters → display objects → textures
//! ```
//!
//! Textures go last because nodes and filters may still reference them.
//! Disposal never panics out: each resource runs behind a failure barrier and
//! failures are collected into a `DisposeReport`.

use anyhow::Result;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::animation::AnimationHandle;
use crate::error::ResourceError;
use crate::events::{EventBus, EventHandler, SliderEventKind};
use crate::gpu::{DisplayNode, FilterHandle, TextureHandle};
use crate::isolation::{isolate, isolate_unit};

#[cfg(test)]
mod tests;

/// Opaque identity of a tracked resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey(pub u64);

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

impl ResourceKey {
    /// Allocates a process-unique key
    pub fn fresh() -> Self {
        Self(NEXT_KEY.fetch_add(1, Ordering::Relaxed))
    }
}

/// Something the ledger can destroy
pub trait Disposable: Send {
    fn resource_key(&self) -> ResourceKey;

    /// Frees the underlying resource. May be called at most once by the ledger.
    fn dispose(&mut self) -> Result<()>;

    /// Finished resources (fired timers, settled animations) can be pruned without disposal
    fn is_finished(&self) -> bool {
        false
    }
}

/// Resource category; declaration order is disposal order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    Timer,
    EventSubscription,
    Animation,
    Filter,
    DisplayObject,
    Texture,
}

/// Stable arena handle for a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    index: u32,
    generation: u32,
}

/// Handle of a timer armed through `ResourceManager::set_timeout`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(ResourceKey);

struct TimerEntry {
    key: ResourceKey,
    task: JoinHandle<()>,
}

impl Disposable for TimerEntry {
    fn resource_key(&self) -> ResourceKey {
        self.key
    }

    fn dispose(&mut self) -> Result<()> {
        self.task.abort();
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

struct Entry {
    kind: ResourceKind,
    seq: u64,
    resource: Box<dyn Disposable>,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Outcome of a disposal pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisposeReport {
    /// Resources disposed successfully
    pub disposed: usize,
    /// Resources whose disposal failed (logged, skipped)
    pub failed: usize,
}

/// Live resource counts per kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerStats {
    pub textures: usize,
    pub display_objects: usize,
    pub filters: usize,
    pub animations: usize,
    pub subscriptions: usize,
    pub timers: usize,
}

impl LedgerStats {
    pub fn total(&self) -> usize {
        self.textures
            + self.display_objects
            + self.filters
            + self.animations
            + self.subscriptions
            + self.timers
    }
}

/// Ownership ledger for one slider instance
pub struct ResourceManager {
    instance_id: String,
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_key: HashMap<ResourceKey, ResourceHandle>,
    next_seq: u64,
    disposed: bool,
}

impl ResourceManager {
    pub fn new(instance_id: impl Into<String>) -> Self {
        let instance_id = instance_id.into();
        debug!("📒 Resource ledger created for '{}'", instance_id);
        Self {
            instance_id,
            slots: Vec::new(),
            free: Vec::new(),
            by_key: HashMap::new(),
            next_seq: 0,
            disposed: false,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn track_texture(&mut self, texture: TextureHandle) -> TextureHandle {
        self.track(ResourceKind::Texture, texture)
    }

    pub fn track_display_object(&mut self, node: DisplayNode) -> DisplayNode {
        self.track(ResourceKind::DisplayObject, node)
    }

    pub fn track_filter(&mut self, filter: FilterHandle) -> FilterHandle {
        self.track(ResourceKind::Filter, filter)
    }

    pub fn track_animation(&mut self, animation: AnimationHandle) -> AnimationHandle {
        self.track(ResourceKind::Animation, animation)
    }

    pub fn track_animation_batch(&mut self, animations: Vec<AnimationHandle>) -> Vec<AnimationHandle> {
        animations
            .into_iter()
            .map(|a| self.track_animation(a))
            .collect()
    }

    /// Registers (or re-registers) a clonable resource and hands it back
    pub fn track<R>(&mut self, kind: ResourceKind, resource: R) -> R
    where
        R: Disposable + Clone + 'static,
    {
        self.insert(kind, Box::new(resource.clone()));
        resource
    }

    /// Subscribes `handler` on `bus` and records the subscription
    pub fn add_event_listener(
        &mut self,
        bus: &EventBus,
        kind: SliderEventKind,
        handler: EventHandler,
    ) -> ResourceKey {
        let subscription = bus.subscribe(kind, handler);
        let key = subscription.resource_key();
        self.insert(ResourceKind::EventSubscription, Box::new(subscription));
        key
    }

    /// Registers many handlers on one bus in one call
    pub fn add_event_listener_batch(
        &mut self,
        bus: &EventBus,
        listeners: HashMap<SliderEventKind, Vec<EventHandler>>,
    ) -> Vec<ResourceKey> {
        let mut keys = Vec::new();
        for (kind, handlers) in listeners {
            for handler in handlers {
                keys.push(self.add_event_listener(bus, kind, handler));
            }
        }
        debug!(
            "🔔 '{}' registered {} listeners in batch",
            self.instance_id,
            keys.len()
        );
        keys
    }

    /// Arms a one-shot timer on the current tokio runtime
    pub fn set_timeout<F>(&mut self, delay: Duration, callback: F) -> Result<TimerId, ResourceError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.disposed {
            return Err(ResourceError::Disposed(self.instance_id.clone()));
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ResourceError::NoRuntime)?;
        self.prune_finished();

        let key = ResourceKey::fresh();
        let context = format!("timer {:?} of '{}'", key, self.instance_id);
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            isolate_unit(&context, callback);
        });

        self.insert(ResourceKind::Timer, Box::new(TimerEntry { key, task }));
        Ok(TimerId(key))
    }

    /// Cancels a pending timer. Unknown or already-fired ids are ignored.
    pub fn clear_timeout(&mut self, id: TimerId) {
        self.release(id.0);
    }

    /// Disposes a single resource now. Returns false if the key is not tracked.
    pub fn release(&mut self, key: ResourceKey) -> bool {
        let Some(handle) = self.by_key.remove(&key) else {
            return false;
        };

        let Some(entry) = self.take_slot(handle) else {
            return false;
        };

        let Entry { kind, mut resource, .. } = entry;
        let context = format!("disposing {:?} {:?} of '{}'", kind, key, self.instance_id);
        isolate(&context, || resource.dispose())
    }

    /// True if the key currently has a live entry
    pub fn is_tracked(&self, key: ResourceKey) -> bool {
        self.lookup(key).is_some()
    }

    /// Arena handle of a tracked key
    pub fn handle_of(&self, key: ResourceKey) -> Option<ResourceHandle> {
        self.lookup(key).map(|_| self.by_key[&key])
    }

    pub fn kind_of(&self, key: ResourceKey) -> Option<ResourceKind> {
        self.lookup(key).map(|e| e.kind)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn stats(&self) -> LedgerStats {
        let mut stats = LedgerStats::default();
        for entry in self.slots.iter().filter_map(|s| s.entry.as_ref()) {
            match entry.kind {
                ResourceKind::Texture => stats.textures += 1,
                ResourceKind::DisplayObject => stats.display_objects += 1,
                ResourceKind::Filter => stats.filters += 1,
                ResourceKind::Animation => stats.animations += 1,
                ResourceKind::EventSubscription => stats.subscriptions += 1,
                ResourceKind::Timer => stats.timers += 1,
            }
        }
        stats
    }

    /// Destroys everything exactly once, in dependency-safe order.
    /// Calling it again is a no-op.
    pub fn dispose(&mut self) -> DisposeReport {
        if self.disposed {
            debug!("Ledger '{}' already disposed", self.instance_id);
            return DisposeReport::default();
        }
        self.disposed = true;

        let mut entries: Vec<(ResourceKey, Entry)> = Vec::with_capacity(self.by_key.len());
        let handles: Vec<(ResourceKey, ResourceHandle)> = self.by_key.drain().collect();
        for (key, handle) in handles {
            if let Some(entry) = self.take_slot(handle) {
                entries.push((key, entry));
            }
        }
        entries.sort_by_key(|(_, e)| (e.kind, e.seq));

        let mut report = DisposeReport::default();
        for (key, entry) in entries {
            let Entry { kind, mut resource, .. } = entry;
            let context = format!("disposing {:?} {:?} of '{}'", kind, key, self.instance_id);
            if isolate(&context, || resource.dispose()) {
                report.disposed += 1;
            } else {
                report.failed += 1;
            }
        }

        self.slots.clear();
        self.free.clear();

        info!(
            "🧹 Ledger '{}' disposed: {} resources, {} failures",
            self.instance_id, report.disposed, report.failed
        );
        report
    }

    fn insert(&mut self, kind: ResourceKind, mut resource: Box<dyn Disposable>) -> Option<ResourceHandle> {
        let key = resource.resource_key();

        if self.disposed {
            warn!(
                "Tracking {:?} {:?} after '{}' was disposed, destroying it immediately",
                kind, key, self.instance_id
            );
            let context = format!("late disposal of {:?} {:?}", kind, key);
            isolate(&context, || resource.dispose());
            return None;
        }

        self.prune_finished();

        // Re-registration replaces the stored handle in place
        if let Some(&handle) = self.by_key.get(&key) {
            if let Some(entry) = self.slot_entry_mut(handle) {
                entry.kind = kind;
                entry.resource = resource;
                return Some(handle);
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let entry = Entry { kind, seq, resource };

        let handle = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                ResourceHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                ResourceHandle {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        };

        self.by_key.insert(key, handle);
        Some(handle)
    }

    fn lookup(&self, key: ResourceKey) -> Option<&Entry> {
        let handle = self.by_key.get(&key)?;
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    fn slot_entry_mut(&mut self, handle: ResourceHandle) -> Option<&mut Entry> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    fn take_slot(&mut self, handle: ResourceHandle) -> Option<Entry> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let entry = slot.entry.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        entry
    }

    fn prune_finished(&mut self) {
        let finished: Vec<ResourceKey> = self
            .by_key
            .keys()
            .copied()
            .filter(|k| self.lookup(*k).map_or(false, |e| e.resource.is_finished()))
            .collect();

        for key in finished {
            if let Some(handle) = self.by_key.remove(&key) {
                self.take_slot(handle);
            }
        }
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        if !self.disposed && !self.by_key.is_empty() {
            warn!(
                "Ledger '{}' dropped with {} live resources, disposing",
                self.instance_id,
                self.by_key.len()
            );
            self.dispose();
        }
    }
}
