//! Event capture layer for programmatic verification of log instrumentation.
//!
//! A custom `tracing_subscriber::Layer` that records emitted events into a
//! thread-safe `EventStore`, so integration tests can assert on what the
//! sync machinery logs without any external backend.
//!
//! Uses `tracing::subscriber::set_default()` (not `set_global_default`) for
//! test isolation; tests MUST use `#[tokio::test(flavor = "current_thread")]`
//! so all async work runs on the thread where the subscriber is installed.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;

/// A captured event with its metadata and fields.
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: tracing::Level,
    pub target: String,
    pub fields: HashMap<String, String>,
}

impl CapturedEvent {
    /// The event's `message` field, if any.
    pub fn message(&self) -> Option<&str> {
        self.fields.get("message").map(String::as_str)
    }
}

/// Thread-safe store of captured events with query methods.
#[derive(Debug, Clone, Default)]
pub struct EventStore(Arc<Mutex<Vec<CapturedEvent>>>);

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// First event whose message contains the given fragment.
    pub fn find_message(&self, fragment: &str) -> Option<CapturedEvent> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.message().is_some_and(|m| m.contains(fragment)))
            .cloned()
    }

    pub fn has_message(&self, fragment: &str) -> bool {
        self.find_message(fragment).is_some()
    }

    /// All events at the given level.
    pub fn at_level(&self, level: tracing::Level) -> Vec<CapturedEvent> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.level == level)
            .cloned()
            .collect()
    }
}

/// Custom tracing layer that captures events.
pub struct EventCaptureLayer {
    store: EventStore,
}

impl<S: Subscriber> Layer<S> for EventCaptureLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor(HashMap::new());
        event.record(&mut visitor);
        self.store.0.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            target: event.metadata().target().to_string(),
            fields: visitor.0,
        });
    }
}

/// Field visitor that extracts typed values into a string map.
struct FieldVisitor(HashMap<String, String>);

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0
            .insert(field.name().to_string(), format!("{:?}", value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }
}

/// Install a capture-all subscriber for the current test.
///
/// Returns the `EventStore` for assertions and a `DefaultGuard` that
/// restores the previous subscriber when dropped.
pub fn init_test_tracing() -> (EventStore, tracing::subscriber::DefaultGuard) {
    let store = EventStore::new();
    let layer = EventCaptureLayer {
        store: store.clone(),
    };
    let subscriber = tracing_subscriber::Registry::default().with(layer);
    let guard = tracing::subscriber::set_default(subscriber);
    (store, guard)
}
