//! Single-occupancy task slots for cancellable timers
//!
//! Each kind of timer (capture guard, auto-hide, re-arm, ...) owns one slot.
//! Starting a task in an occupied slot aborts whatever was pending there.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::trace;

/// Holds at most one spawned task of a given kind
#[derive(Debug)]
pub struct TaskSlot {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
}

impl TaskSlot {
    /// Create an empty slot
    pub fn new(name: &'static str) -> Self {
        Self { name, handle: None }
    }

    /// Spawn `task`, cancelling any task already in the slot
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.handle = Some(tokio::spawn(task));
    }

    /// Run `task` once `delay` has elapsed, cancelling any pending task
    pub fn spawn_after<F>(&mut self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
    }

    /// Abort the pending task, if any
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            if !handle.is_finished() {
                trace!(slot = self.name, "cancelling pending task");
            }
            handle.abort();
        }
    }

    /// Whether a task is still pending in this slot
    pub fn is_pending(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}
