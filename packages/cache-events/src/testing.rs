//! Testing utilities for dispatchers and handlers.
//!
//! # Feature Flag
//!
//! This module is only available with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! cache-events = { version = "0.1", features = ["testing"] }
//! ```
//!
//! # Helpers
//!
//! | Helper               | Use                                                     |
//! |----------------------|---------------------------------------------------------|
//! | [`RecordingHandler`] | remembers every event name and the thread it ran on     |
//! | [`CountingHandler`]  | counts invocations                                      |
//! | [`LifecycleProbe`]   | writes lifecycle hooks and deliveries into a [`Journal`] |
//! | [`ManualExecutor`]   | queues tasks until the test runs them                   |
//! | [`EventLatch`]       | waits for an exact number of deliveries                 |
//!
//! ## Using `EventLatch` for Deferred Dispatch
//!
//! ```ignore
//! use cache_events::testing::EventLatch;
//!
//! let latch = Arc::new(EventLatch::new(1));
//! dispatcher.register(MatchAll, handler_fn("latch", {
//!     let latch = latch.clone();
//!     move |_, _| { latch.dec(); Ok(()) }
//! }));
//!
//! dispatcher.dispatch_later(event)?;
//! latch.await_zero().await;
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use anyhow::Result;
use tokio::sync::Notify;

use crate::core::SharedEvent;
use crate::dispatch::EventDispatcher;
use crate::error::EventsError;
use crate::executor::{Task, TaskExecutor};
use crate::filter::FilterKey;
use crate::handler::{EventHandler, HandlerLifecycle};

// =============================================================================
// Journal
// =============================================================================

/// Ordered, shareable log of test observations.
#[derive(Debug, Default)]
pub struct Journal {
    entries: Mutex<Vec<String>>,
}

impl Journal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry.into());
    }

    /// Snapshot of all entries in insertion order.
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handler that records each event it sees.
#[derive(Debug)]
pub struct RecordingHandler {
    name: String,
    seen: Mutex<Vec<(&'static str, ThreadId)>>,
    journal: Option<Arc<Journal>>,
}

impl RecordingHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            seen: Mutex::new(Vec::new()),
            journal: None,
        }
    }

    /// Also append `"<name>:<event>"` to `journal` on every delivery.
    pub fn with_journal(mut self, journal: Arc<Journal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Names of the events seen, in delivery order.
    pub fn events(&self) -> Vec<&'static str> {
        self.seen().into_iter().map(|(name, _)| name).collect()
    }

    /// Threads each delivery ran on.
    pub fn threads(&self) -> Vec<ThreadId> {
        self.seen().into_iter().map(|(_, thread)| thread).collect()
    }

    pub fn len(&self) -> usize {
        self.seen().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn seen(&self) -> Vec<(&'static str, ThreadId)> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl EventHandler for RecordingHandler {
    fn process(&self, _dispatcher: &EventDispatcher, event: &SharedEvent) -> Result<()> {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((event.event_name(), thread::current().id()));
        if let Some(journal) = &self.journal {
            journal.push(format!("{}:{}", self.name, event.event_name()));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Handler that only counts invocations.
#[derive(Debug, Default)]
pub struct CountingHandler {
    count: AtomicUsize,
}

impl CountingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl EventHandler for CountingHandler {
    fn process(&self, _dispatcher: &EventDispatcher, _event: &SharedEvent) -> Result<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Lifecycle-aware handler writing every hook and delivery to a journal.
///
/// Entries look like `before:<name>`, `after:<name>`, `process:<name>` and
/// `unregistered:<name>`. Both registration hooks also write
/// `handlers:<count>`, the dispatcher's handler count at that moment.
#[derive(Debug)]
pub struct LifecycleProbe {
    name: String,
    journal: Arc<Journal>,
}

impl LifecycleProbe {
    pub fn new(name: impl Into<String>, journal: Arc<Journal>) -> Self {
        Self {
            name: name.into(),
            journal,
        }
    }
}

impl EventHandler for LifecycleProbe {
    fn process(&self, _dispatcher: &EventDispatcher, _event: &SharedEvent) -> Result<()> {
        self.journal.push(format!("process:{}", self.name));
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Option<&dyn HandlerLifecycle> {
        Some(self)
    }
}

impl HandlerLifecycle for LifecycleProbe {
    fn before_registered(&self, dispatcher: &EventDispatcher, _filter: &FilterKey) {
        self.journal.push(format!("before:{}", self.name));
        self.journal
            .push(format!("handlers:{}", dispatcher.handler_count()));
    }

    fn after_registered(&self, dispatcher: &EventDispatcher, _filter: &FilterKey) {
        self.journal.push(format!("after:{}", self.name));
        self.journal
            .push(format!("handlers:{}", dispatcher.handler_count()));
    }

    fn after_unregistered(&self, _dispatcher: &EventDispatcher, _filter: &FilterKey) {
        self.journal.push(format!("unregistered:{}", self.name));
    }
}

// =============================================================================
// Executors
// =============================================================================

/// Executor that queues tasks until the test runs them.
///
/// Tasks run on whichever thread calls [`run_pending`](Self::run_pending),
/// which lets a test observe the state between submission and execution.
#[derive(Default)]
pub struct ManualExecutor {
    queue: Mutex<VecDeque<Task>>,
    closed: AtomicBool,
}

impl ManualExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued tasks.
    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Run queued tasks (including any they submit) until the queue is empty.
    /// Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            // Pop under the lock, run outside it: tasks may submit more tasks.
            let next = self.queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Reject every later submission.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl TaskExecutor for ManualExecutor {
    fn submit(&self, task: Task) -> Result<(), EventsError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EventsError::ExecutorRejected {
                operation: "submit",
                message: "executor closed".to_string(),
            });
        }
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(task);
        Ok(())
    }
}

impl std::fmt::Debug for ManualExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualExecutor")
            .field("pending", &self.pending())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

// =============================================================================
// Event Latch
// =============================================================================

/// Latch that waits for an exact number of deliveries.
///
/// Deferred dispatch and asynchronous handlers finish on executor threads at
/// an unspecified time. Instead of sleeping, tests wait for the count to reach
/// zero.
///
/// # Timeout Safety
///
/// ```ignore
/// use std::time::Duration;
/// use tokio::time::timeout;
///
/// timeout(Duration::from_secs(5), latch.await_zero())
///     .await
///     .expect("latch timed out");
/// ```
#[derive(Debug)]
pub struct EventLatch {
    remaining: AtomicUsize,
    notify: Notify,
}

impl EventLatch {
    /// Create a latch expecting `expected` deliveries.
    pub fn new(expected: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(expected),
            notify: Notify::new(),
        }
    }

    /// Decrement the remaining count, waking waiters when it hits zero.
    ///
    /// # Panics
    ///
    /// Panics if called more times than expected.
    pub fn dec(&self) {
        let prev = self.remaining.fetch_sub(1, Ordering::AcqRel);
        if prev == 0 {
            panic!("EventLatch decremented below zero - more deliveries than expected");
        }
        if prev == 1 {
            self.notify.notify_waiters();
        }
    }

    /// Wait for the count to reach zero.
    pub async fn await_zero(&self) {
        loop {
            // Register before checking so a concurrent `dec` is not missed.
            let notified = self.notify.notified();

            if self.remaining.load(Ordering::Acquire) == 0 {
                return;
            }

            notified.await;
        }
    }

    /// Current remaining count.
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }
}
