//! Deferred teardown actions.
//!
//! GPU objects usually depend on each other: framebuffers reference a render
//! pass and image views, pipelines reference a render pass and a layout. A
//! [`DeletionQueue`] lets each component register the destruction of an object
//! right after creating it, and later release everything in one call with the
//! dependents going first.
//!
//! # Example
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use vkframe_core::DeletionQueue;
//!
//! let log = Arc::new(Mutex::new(Vec::new()));
//! let mut queue = DeletionQueue::new("example");
//!
//! for name in ["image", "view", "framebuffer"] {
//!     let log = Arc::clone(&log);
//!     queue.push_action(move || log.lock().unwrap().push(name));
//! }
//!
//! queue.flush();
//! assert_eq!(*log.lock().unwrap(), ["framebuffer", "view", "image"]);
//! ```

use std::fmt;

use tracing::trace;

type TeardownAction = Box<dyn FnOnce() + Send>;

/// An ordered list of teardown actions executed last-in, first-out.
///
/// A queue that is dropped while still holding actions flushes itself. This
/// makes a local queue a rollback guard during a multi-step build: if a later
/// step fails and the function returns early, everything created so far is
/// released in reverse order.
#[derive(Default)]
pub struct DeletionQueue {
    label: &'static str,
    actions: Vec<TeardownAction>,
}

impl DeletionQueue {
    /// Creates an empty queue. The label only appears in log output.
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            actions: Vec::new(),
        }
    }

    /// Appends a teardown action.
    pub fn push_action<F>(&mut self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.actions.push(Box::new(action));
    }

    /// Runs every action in reverse registration order and leaves the queue empty.
    ///
    /// Flushing an empty queue does nothing.
    pub fn flush(&mut self) {
        if self.actions.is_empty() {
            return;
        }

        trace!(
            "Flushing deletion queue '{}' ({} actions)",
            self.label,
            self.actions.len()
        );

        while let Some(action) = self.actions.pop() {
            action();
        }
    }

    /// Number of pending actions.
    #[inline]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Returns `true` when no actions are pending.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// The label given at construction.
    #[inline]
    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl Drop for DeletionQueue {
    fn drop(&mut self) {
        self.flush();
    }
}

impl fmt::Debug for DeletionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeletionQueue")
            .field("label", &self.label)
            .field("pending", &self.actions.len())
            .finish()
    }
}
