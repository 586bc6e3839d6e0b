//! Typed publish/subscribe channel between slider components
//!
//! Input normalization (outside this crate) publishes intent-level events,
//! and the pointer tracker, filter updater and slide logic subscribe to the
//! kinds they care about. Subscriptions are `Disposable` so the resource
//! ledger can detach them on teardown.

use anyhow::Result;
use cgmath::Vector2;
use log::trace;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::isolation::isolate_unit;
use crate::resources::{Disposable, ResourceKey};

/// Discriminant used to route events to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SliderEventKind {
    PointerMove,
    PointerLeave,
    Resize,
    SlideChanged,
    Idle,
}

/// Event published on the bus
#[derive(Debug, Clone, PartialEq)]
pub enum SliderEvent {
    PointerMove { position: Vector2<f32> },
    PointerLeave,
    Resize { width: u32, height: u32 },
    SlideChanged { from: usize, to: usize },
    Idle,
}

impl SliderEvent {
    pub fn kind(&self) -> SliderEventKind {
        match self {
            SliderEvent::PointerMove { .. } => SliderEventKind::PointerMove,
            SliderEvent::PointerLeave => SliderEventKind::PointerLeave,
            SliderEvent::Resize { .. } => SliderEventKind::Resize,
            SliderEvent::SlideChanged { .. } => SliderEventKind::SlideChanged,
            SliderEvent::Idle => SliderEventKind::Idle,
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&SliderEvent) + Send + Sync>;

#[derive(Default)]
struct BusInner {
    handlers: HashMap<SliderEventKind, Vec<(ResourceKey, EventHandler)>>,
}

/// Clonable handle to a shared event bus
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler. Dropping the returned subscription does not
    /// unsubscribe; dispose it (usually through the resource ledger).
    pub fn subscribe(&self, kind: SliderEventKind, handler: EventHandler) -> Subscription {
        let key = ResourceKey::fresh();
        self.inner
            .lock()
            .handlers
            .entry(kind)
            .or_default()
            .push((key, handler));

        Subscription {
            key,
            kind,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Delivers an event to every subscriber of its kind. Handlers run with the
    /// bus unlocked, each behind a failure barrier. Returns the delivery count.
    pub fn emit(&self, event: &SliderEvent) -> usize {
        let kind = event.kind();
        let handlers: Vec<(ResourceKey, EventHandler)> = self
            .inner
            .lock()
            .handlers
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        for (key, handler) in &handlers {
            let context = format!("{:?} handler {:?}", kind, key);
            isolate_unit(&context, || handler(event));
        }

        trace!("📨 {:?} delivered to {} handlers", kind, handlers.len());
        handlers.len()
    }

    pub fn subscriber_count(&self, kind: SliderEventKind) -> usize {
        self.inner.lock().handlers.get(&kind).map_or(0, |h| h.len())
    }
}

/// Live registration on an `EventBus`
pub struct Subscription {
    key: ResourceKey,
    kind: SliderEventKind,
    bus: Weak<Mutex<BusInner>>,
}

impl Subscription {
    pub fn kind(&self) -> SliderEventKind {
        self.kind
    }

    pub fn unsubscribe(&self) {
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        let mut inner = bus.lock();
        if let Some(list) = inner.handlers.get_mut(&self.kind) {
            list.retain(|(key, _)| *key != self.key);
        }
    }
}

impl Disposable for Subscription {
    fn resource_key(&self) -> ResourceKey {
        self.key
    }

    fn dispose(&mut self) -> Result<()> {
        self.unsubscribe();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emit_routes_by_kind() {
        let bus = EventBus::new();
        let moves = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&moves);

        let _sub = bus.subscribe(
            SliderEventKind::PointerMove,
            Arc::new(move |_: &SliderEvent| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        bus.emit(&SliderEvent::PointerMove {
            position: Vector2::new(1.0, 2.0),
        });
        bus.emit(&SliderEvent::PointerLeave);

        assert_eq!(moves.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_detaches() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(SliderEventKind::Idle, Arc::new(|_: &SliderEvent| {}));
        assert_eq!(bus.subscriber_count(SliderEventKind::Idle), 1);

        sub.dispose().unwrap();
        assert_eq!(bus.subscriber_count(SliderEventKind::Idle), 0);
        assert_eq!(bus.emit(&SliderEvent::Idle), 0);
    }

    #[test]
    fn test_panicking_handler_does_not_block_others() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        let _bad = bus.subscribe(SliderEventKind::Idle, Arc::new(|_: &SliderEvent| panic!("handler bug")));
        let _good = bus.subscribe(
            SliderEventKind::Idle,
            Arc::new(move |_: &SliderEvent| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(bus.emit(&SliderEvent::Idle), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_outliving_bus() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(SliderEventKind::Resize, Arc::new(|_: &SliderEvent| {}));
        drop(bus);
        assert!(sub.dispose().is_ok());
    }
}
