//! Session reconstruction.
//!
//! Events arrive interleaved across sessions; this module keeps one open
//! buffer per session id and materializes [`Trace`]s restricted to a time
//! window. Windowing is what gives session isolation: two cases run against
//! the same live session must not see each other's tool calls.
//!
//! The store is a cheaply cloneable handle. A background watcher may append
//! while an evaluation reads; materialization takes a snapshot of the buffer
//! under the lock rather than iterating a live structure.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::event::{Event, EventType};
use crate::trace::{Trace, ToolInvocation};

struct SessionBuffer {
    events: Vec<Event>,
    last_append: Instant,
}

struct StoreInner {
    buffers: HashMap<String, SessionBuffer>,
    warnings: u64,
}

/// Shared, append-only store of per-session event buffers.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                buffers: HashMap::new(),
                warnings: 0,
            })),
        }
    }

    /// Append one event to its session buffer, in arrival order. This is the
    /// only mutating operation concurrent with trace materialization.
    pub fn append(&self, event: Event) {
        let mut inner = self.inner.lock().expect("session store poisoned");
        let buffer = inner
            .buffers
            .entry(event.session_id.clone())
            .or_insert_with(|| SessionBuffer {
                events: Vec::new(),
                last_append: Instant::now(),
            });
        buffer.events.push(event);
        buffer.last_append = Instant::now();
    }

    /// Record lines the reader had to drop while feeding this store.
    pub fn record_warnings(&self, count: u64) {
        if count > 0 {
            self.inner.lock().expect("session store poisoned").warnings += count;
        }
    }

    /// Total dropped-line warnings recorded against this store.
    pub fn warnings(&self) -> u64 {
        self.inner.lock().expect("session store poisoned").warnings
    }

    /// All buffered session ids, sorted.
    pub fn session_ids(&self) -> Vec<String> {
        let inner = self.inner.lock().expect("session store poisoned");
        let mut ids: Vec<String> = inner.buffers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether a terminal `response` event arrived at or after `since`.
    /// Used by the driver's bounded wait; never blocks.
    pub fn has_terminal_response(&self, session_id: &str, since: DateTime<Utc>) -> bool {
        let inner = self.inner.lock().expect("session store poisoned");
        inner.buffers.get(session_id).is_some_and(|buffer| {
            buffer
                .events
                .iter()
                .any(|e| e.event_type == EventType::Response && e.timestamp >= since)
        })
    }

    /// Materialize a trace restricted to the half-open window `[start, end)`.
    pub fn materialize(
        &self,
        session_id: &str,
        window: (DateTime<Utc>, DateTime<Utc>),
    ) -> Trace {
        let snapshot = self.snapshot(session_id, Some(window));
        build_trace(session_id, snapshot, window)
    }

    /// Materialize a trace spanning the whole buffered session. Used for
    /// offline replay and mining.
    pub fn materialize_full(&self, session_id: &str) -> Trace {
        let snapshot = self.snapshot(session_id, None);
        let window = match (snapshot.first(), snapshot.last()) {
            (Some(first), Some(last)) => {
                let start = snapshot.iter().map(|e| e.timestamp).min().unwrap_or(first.timestamp);
                let end = snapshot.iter().map(|e| e.timestamp).max().unwrap_or(last.timestamp)
                    + ChronoDuration::milliseconds(1);
                (start, end)
            }
            _ => {
                let now = Utc::now();
                (now, now)
            }
        };
        build_trace(session_id, snapshot, window)
    }

    /// Evict buffers with no append for the idle period. Returns the number
    /// evicted. Never affects traces that were already materialized.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut inner = self.inner.lock().expect("session store poisoned");
        let before = inner.buffers.len();
        inner
            .buffers
            .retain(|_, buffer| buffer.last_append.elapsed() < max_idle);
        let evicted = before - inner.buffers.len();
        if evicted > 0 {
            debug!(evicted, "Evicted idle session buffers");
        }
        evicted
    }

    /// Snapshot of one buffer, optionally filtered to a window, taken under
    /// the lock so a concurrent append cannot tear the read.
    fn snapshot(
        &self,
        session_id: &str,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Vec<Event> {
        let inner = self.inner.lock().expect("session store poisoned");
        let Some(buffer) = inner.buffers.get(session_id) else {
            return Vec::new();
        };
        match window {
            Some((start, end)) => buffer
                .events
                .iter()
                .filter(|e| e.timestamp >= start && e.timestamp < end)
                .cloned()
                .collect(),
            None => buffer.events.clone(),
        }
    }
}

/// Order events, pair calls with results, and take the last response text.
fn build_trace(
    session_id: &str,
    mut events: Vec<Event>,
    window: (DateTime<Utc>, DateTime<Utc>),
) -> Trace {
    events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.seq.cmp(&b.seq)));

    let mut invocations: Vec<ToolInvocation> = Vec::new();
    // Oldest unanswered call per tool name; results pair FIFO within a name.
    let mut open: HashMap<String, VecDeque<usize>> = HashMap::new();
    let mut final_text = String::new();

    for event in events {
        match event.event_type {
            EventType::ToolCall => {
                let name = event.tool_name.unwrap_or_default();
                let position = invocations.len();
                invocations.push(ToolInvocation {
                    name: name.clone(),
                    args: event.input.unwrap_or_default(),
                    output_summary: String::new(),
                    position,
                });
                open.entry(name).or_default().push_back(position);
            }
            EventType::ToolResult => {
                let name = event.tool_name.unwrap_or_default();
                let output = event.output_summary.unwrap_or_default();
                if let Some(position) = open.get_mut(&name).and_then(VecDeque::pop_front) {
                    let invocation = &mut invocations[position];
                    invocation.output_summary = output;
                    if invocation.args.is_empty() {
                        if let Some(input) = event.input {
                            invocation.args = input;
                        }
                    }
                } else {
                    // A result whose call fell outside the window still
                    // represents an observed invocation.
                    let position = invocations.len();
                    invocations.push(ToolInvocation {
                        name,
                        args: event.input.unwrap_or_default(),
                        output_summary: output,
                        position,
                    });
                }
            }
            EventType::Response => {
                if let Some(text) = event.text {
                    final_text = text;
                }
            }
            EventType::SessionStatus => {}
        }
    }

    Trace {
        session_id: session_id.to_string(),
        invocations,
        final_text,
        window,
    }
}
