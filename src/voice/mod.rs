//! Speech collaborators: wake-word detection, capture and synthesis
//!
//! The engines themselves are external. Wake and capture collaborators
//! report back by posting [`Input`](crate::events::Input) messages into the
//! state machine's channel, tagged with the cycle they belong to.

mod console;

use std::time::Duration;

use async_trait::async_trait;

pub use console::{ConsoleInput, ConsoleRecognizer, ConsoleSynthesizer, ConsoleWakeWord, EspeakSynthesizer};

use crate::events::CycleId;

/// Parameters for one capture session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// BCP-47 language tag
    pub language: String,
    /// Trailing silence after which the utterance is complete
    pub silence_timeout: Duration,
    /// Only the best hypothesis is delivered
    pub max_results: u8,
    pub partial_results: bool,
}

impl CaptureConfig {
    pub fn free_form(silence_timeout: Duration) -> Self {
        Self {
            language: "en-US".to_string(),
            silence_timeout,
            max_results: 1,
            partial_results: false,
        }
    }
}

/// Why a capture session ended without a transcript
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("microphone permission denied")]
    PermissionDenied,

    #[error("no speech recognized")]
    NoMatch,

    #[error("recognizer timed out")]
    Timeout,

    #[error("recognizer failure: {0}")]
    Recognizer(String),
}

/// Errors from the wake detector or synthesizer
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    #[error("wake detector unavailable: {0}")]
    WakeUnavailable(String),

    #[error("speech synthesis failed: {0}")]
    Synthesis(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Speech volume in percent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Volume(u8);

impl Volume {
    pub fn percent(percent: u8) -> Self {
        Self(percent.min(100))
    }

    pub fn as_percent(self) -> u8 {
        self.0
    }

    /// Map onto an engine-native range `0..=max`
    pub fn scaled(self, max: u32) -> u32 {
        u32::from(self.0) * max / 100
    }
}

/// Wake-word engine; owns the microphone while armed
pub trait WakeWord: Send {
    fn arm(&mut self) -> Result<(), VoiceError>;
    fn disarm(&mut self);
}

/// Speech-to-text engine; owns the microphone while a session is open
pub trait Recognizer: Send {
    /// Open a session for `cycle`. Results arrive as `Input` messages.
    fn start(&mut self, cycle: CycleId, config: &CaptureConfig) -> Result<(), CaptureError>;
    fn stop(&mut self);
}

/// Text-to-speech engine
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Speak `text`, resolving once playback has finished
    async fn speak(&self, text: &str, volume: Volume) -> Result<(), VoiceError>;
}
