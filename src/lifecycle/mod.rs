//! Process lifecycle
//!
//! The entry point owns the [`Lifecycle`] and advances its [`Phase`];
//! everything else holds a [`LifecycleHandle`] and reads it.

mod shutdown;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

pub use shutdown::ShutdownSignal;

/// Where the daemon is in its life
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Owner of the process phase
#[derive(Debug)]
pub struct Lifecycle {
    tx: watch::Sender<Phase>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Phase::Starting);
        Self { tx }
    }

    /// Move to `phase`
    pub fn advance(&self, phase: Phase) {
        let previous = self.tx.send_replace(phase);
        if previous != phase {
            info!(from = ?previous, to = ?phase, "lifecycle phase changed");
        }
    }

    pub fn handle(&self) -> LifecycleHandle {
        LifecycleHandle {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of the process phase
#[derive(Debug, Clone)]
pub struct LifecycleHandle {
    rx: watch::Receiver<Phase>,
}

impl LifecycleHandle {
    pub fn phase(&self) -> Phase {
        *self.rx.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.phase() == Phase::Running
    }
}
