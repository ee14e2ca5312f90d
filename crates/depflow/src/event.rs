// Copyright 2026 the DepFlow authors

//! Graph lifecycle and driver events
//!
//! A graph fires `constructed` once all nodes exist, `connected` once edges
//! are derived, `stepped` on every non-terminal recomputation, `resolved`
//! with the final state, and `error` on any failure inside recomputation.
//!
//! `constructed` and `connected` are *sticky*: construction is synchronous,
//! so by the time a caller can attach a listener both have already fired -
//! attaching one delivers it immediately. Driver events are not sticky.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::graph::State;

/// An event fired by a graph.
#[derive(Clone, Debug)]
pub enum GraphEvent {
    /// All nodes have been instantiated.
    Constructed,
    /// Edges have been derived; the graph is ready to run.
    Connected,
    /// A recomputation pass finished with unresolved nodes remaining.
    Stepped {
        /// Visible state at this step.
        state: State,
        /// Names of visible nodes still absent.
        undefined_paths: Vec<String>,
    },
    /// The run settled; every visible node has a value.
    Resolved {
        /// The final state.
        state: State,
    },
    /// The run failed.
    Error {
        /// Rendered error message.
        message: String,
    },
}

/// Discriminant for listener registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// See [`GraphEvent::Constructed`].
    Constructed,
    /// See [`GraphEvent::Connected`].
    Connected,
    /// See [`GraphEvent::Stepped`].
    Stepped,
    /// See [`GraphEvent::Resolved`].
    Resolved,
    /// See [`GraphEvent::Error`].
    Error,
}

impl GraphEvent {
    /// The discriminant of this event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            GraphEvent::Constructed => EventKind::Constructed,
            GraphEvent::Connected => EventKind::Connected,
            GraphEvent::Stepped { .. } => EventKind::Stepped,
            GraphEvent::Resolved { .. } => EventKind::Resolved,
            GraphEvent::Error { .. } => EventKind::Error,
        }
    }
}

/// Handle for removing a listener with [`EventBus::off`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenerId(u64);

type Callback = Arc<dyn Fn(&GraphEvent) + Send + Sync>;

struct Listener {
    id: u64,
    kind: EventKind,
    once: bool,
    callback: Callback,
}

/// Listener registry for one graph.
pub struct EventBus {
    listeners: Mutex<Vec<Listener>>,
    next_id: AtomicU64,
    constructed: Mutex<bool>,
    connected: Mutex<bool>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            constructed: Mutex::new(false),
            connected: Mutex::new(false),
        }
    }

    fn sticky_fired(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::Constructed => *self.constructed.lock().expect("event bus poisoned"),
            EventKind::Connected => *self.connected.lock().expect("event bus poisoned"),
            _ => false,
        }
    }

    /// Register a listener. Sticky events that already fired are delivered
    /// immediately.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&GraphEvent) + Send + Sync + 'static,
    {
        self.register(kind, callback, false)
    }

    /// Register a listener removed after its first delivery.
    pub fn once<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&GraphEvent) + Send + Sync + 'static,
    {
        self.register(kind, callback, true)
    }

    fn register<F>(&self, kind: EventKind, callback: F, once: bool) -> ListenerId
    where
        F: Fn(&GraphEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if self.sticky_fired(kind) {
            let event = match kind {
                EventKind::Constructed => GraphEvent::Constructed,
                EventKind::Connected => GraphEvent::Connected,
                _ => unreachable!("only lifecycle events are sticky"),
            };
            callback(&event);
            if once {
                return ListenerId(id);
            }
        }
        self.listeners
            .lock()
            .expect("event bus poisoned")
            .push(Listener {
                id,
                kind,
                once,
                callback: Arc::new(callback),
            });
        ListenerId(id)
    }

    /// Remove a listener. Returns whether it was still registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().expect("event bus poisoned");
        let before = listeners.len();
        listeners.retain(|l| l.id != id.0);
        listeners.len() != before
    }

    /// Fire an event to every matching listener.
    ///
    /// Callbacks run outside the registry lock so a listener may add or
    /// remove listeners.
    pub(crate) fn emit(&self, event: &GraphEvent) {
        match event.kind() {
            EventKind::Constructed => {
                *self.constructed.lock().expect("event bus poisoned") = true;
            }
            EventKind::Connected => {
                *self.connected.lock().expect("event bus poisoned") = true;
            }
            _ => {}
        }
        let matched: Vec<Callback> = {
            let mut listeners = self.listeners.lock().expect("event bus poisoned");
            let matched = listeners
                .iter()
                .filter(|l| l.kind == event.kind())
                .map(|l| Arc::clone(&l.callback))
                .collect();
            listeners.retain(|l| !(l.once && l.kind == event.kind()));
            matched
        };
        for callback in matched {
            callback(event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field(
                "listeners",
                &self.listeners.lock().expect("event bus poisoned").len(),
            )
            .finish()
    }
}
