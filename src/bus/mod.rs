//! Event bus
//!
//! Typed publish/subscribe channel for run lifecycle events. Every state
//! transition in the engine is announced here; nothing in the engine depends
//! on a synchronous return value from a subscriber.

use std::collections::HashMap;
use std::sync::Arc;

use crate::model::{SuiteInfo, TestInfo, TestRecord};

/// A lifecycle event together with its payload.
#[derive(Clone, Debug)]
pub enum Event {
    /// A test was registered.
    TestAdded(TestInfo),
    /// A suite was registered and its body has settled.
    SuiteAdded(SuiteInfo),
    /// The run is starting.
    BeforeAll,
    /// The run has ended.
    AfterAll,
    /// A suite is being entered during traversal.
    BeforeSuite(SuiteInfo),
    /// A suite is being left during traversal.
    AfterSuite(SuiteInfo),
    /// A test is about to execute.
    BeforeTest(TestInfo),
    /// A test was finalized.
    AfterTest(TestRecord),
    /// A test matched the skip state and was not executed.
    SkippedTest(TestInfo),
    /// The run was stopped before completion.
    Abort,
}

/// Discriminant used to subscribe to a single event type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    TestAdded,
    SuiteAdded,
    BeforeAll,
    AfterAll,
    BeforeSuite,
    AfterSuite,
    BeforeTest,
    AfterTest,
    SkippedTest,
    Abort,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::TestAdded(_) => EventKind::TestAdded,
            Event::SuiteAdded(_) => EventKind::SuiteAdded,
            Event::BeforeAll => EventKind::BeforeAll,
            Event::AfterAll => EventKind::AfterAll,
            Event::BeforeSuite(_) => EventKind::BeforeSuite,
            Event::AfterSuite(_) => EventKind::AfterSuite,
            Event::BeforeTest(_) => EventKind::BeforeTest,
            Event::AfterTest(_) => EventKind::AfterTest,
            Event::SkippedTest(_) => EventKind::SkippedTest,
            Event::Abort => EventKind::Abort,
        }
    }
}

/// A bus subscriber callback.
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Ordered, synchronous event dispatcher.
///
/// Listeners for a given kind are invoked in registration order. Dispatch
/// runs on a snapshot of the subscriber list, so a listener is free to
/// re-enter the engine that owns the bus (e.g. to stop the run).
#[derive(Default)]
pub struct Bus {
    listeners: HashMap<EventKind, Vec<Listener>>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one event kind.
    pub fn on<F>(&mut self, kind: EventKind, listener: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.listeners.entry(kind).or_default().push(Arc::new(listener));
    }

    /// Snapshot the subscriber list for a kind.
    pub fn listeners(&self, kind: EventKind) -> Vec<Listener> {
        self.listeners.get(&kind).cloned().unwrap_or_default()
    }

    /// Dispatch an event to its subscribers, in registration order.
    pub fn trigger(&self, event: &Event) {
        for listener in self.listeners(event.kind()) {
            listener(event);
        }
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<EventKind, usize> =
            self.listeners.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("Bus").field("listeners", &counts).finish()
    }
}
