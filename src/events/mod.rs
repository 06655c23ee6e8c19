//! Messages into and out of the listening state machine
//!
//! [`Input`] is everything the sequencing owner reacts to: collaborator
//! callbacks, timer expiries and background results. [`StateEvent`] is what
//! it announces to observers (IPC subscribers, logging).

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::classify::{Classification, ClassifyError};
use crate::state::State;
use crate::voice::CaptureError;

/// Identifies one wake -> capture -> classify -> dispatch cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CycleId(pub u64);

impl CycleId {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for CycleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Timers owned by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Speech has not begun within the onset window
    SpeechOnset,
    /// Capture session exceeded its hard cap
    CaptureGuard,
    /// Cool-down finished; re-arm the wake detector
    Rearm,
}

/// Input to the sequencing owner
#[derive(Debug)]
pub enum Input {
    /// The wake detector heard the wake phrase
    Wake,
    /// The recognizer detected the beginning of speech
    SpeechStarted { cycle: CycleId },
    /// Final transcript of a capture session
    Transcript { cycle: CycleId, text: String },
    /// Capture session ended without a transcript
    CaptureFailed { cycle: CycleId, error: CaptureError },
    /// Text typed in directly, bypassing capture. The reply carries the new
    /// cycle, or the state that made the machine refuse it.
    Submit {
        text: String,
        reply: oneshot::Sender<Result<CycleId, State>>,
    },
    /// Remote classification finished
    Classified {
        cycle: CycleId,
        result: Result<Classification, ClassifyError>,
    },
    /// A timer fired
    Timer { cycle: CycleId, kind: TimerKind },
}

/// Where a command was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedBy {
    Local,
    Remote,
}

/// Events emitted by the state machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    /// The machine moved between states
    Transition { from: State, to: State },

    /// Wake phrase detected, a new cycle began
    WakeDetected { cycle: CycleId },

    /// Microphone handed to the recognizer
    CaptureStarted { cycle: CycleId },

    /// Recognizer released the microphone
    CaptureStopped { cycle: CycleId },

    /// Utterance available for classification
    TranscriptReceived { cycle: CycleId, text: String },

    /// A command was resolved and handed to the dispatcher
    CommandResolved {
        cycle: CycleId,
        category: String,
        resolved_by: ResolvedBy,
    },

    /// The cycle ended and the wake detector is armed again
    CycleComplete {
        cycle: CycleId,
        /// Duration in milliseconds from wake to re-arm
        duration_ms: u64,
    },
}

impl std::fmt::Display for StateEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateEvent::Transition { from, to } => write!(f, "TRANSITION {from} -> {to}"),
            StateEvent::WakeDetected { cycle } => write!(f, "WAKE_DETECTED {cycle}"),
            StateEvent::CaptureStarted { cycle } => write!(f, "CAPTURE_STARTED {cycle}"),
            StateEvent::CaptureStopped { cycle } => write!(f, "CAPTURE_STOPPED {cycle}"),
            StateEvent::TranscriptReceived { cycle, .. } => {
                write!(f, "TRANSCRIPT_RECEIVED {cycle}")
            }
            StateEvent::CommandResolved {
                cycle, category, ..
            } => write!(f, "COMMAND_RESOLVED {cycle} ({category})"),
            StateEvent::CycleComplete { cycle, duration_ms } => {
                write!(f, "CYCLE_COMPLETE {cycle} ({duration_ms}ms)")
            }
        }
    }
}
