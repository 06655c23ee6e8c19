//! Listening state machine
//!
//! Sequences one wake -> capture -> classify -> dispatch cycle at a time:
//! - Idle: not listening (startup and shutdown)
//! - Armed: wake detector owns the microphone
//! - Capturing: a capture session owns the microphone
//! - Classifying: transcript is being mapped to a command
//! - Dispatching: the command's handler is issuing its side effect
//! - CoolingDown: short pause before the wake detector is re-armed

mod machine;

pub use machine::{Microphone, Pipeline, State, StateMachine};
