//! Spoken and visual feedback
//!
//! One task owns the indicator and the synthesizer; everything else talks
//! to it through a cloneable [`FeedbackHandle`]. With voice enabled the
//! indicator stays up until speech completes (or fails); otherwise it hides
//! itself after the auto-hide delay.

mod overlay;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

pub use overlay::{LogOverlay, Overlay};

use crate::config::{Settings, Timings};
use crate::timer::TaskSlot;
use crate::voice::{Synthesizer, Volume};

/// Whether and how loudly to speak
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackPolicy {
    pub voice_enabled: bool,
    pub volume: Volume,
    pub auto_hide: Duration,
}

impl FeedbackPolicy {
    pub fn new(settings: &Settings, timings: &Timings) -> Self {
        Self {
            voice_enabled: settings.voice_response,
            volume: Volume::percent(settings.voice_volume),
            auto_hide: timings.auto_hide,
        }
    }
}

#[derive(Debug)]
enum Message {
    Say(String),
    Show(String),
    Hide,
    SpeechFinished { utterance: u64, error: Option<String> },
    AutoHide { generation: u64 },
}

/// Cloneable entry point to the feedback owner
#[derive(Debug, Clone)]
pub struct FeedbackHandle {
    tx: mpsc::UnboundedSender<Message>,
}

impl FeedbackHandle {
    /// Report `message` to the user, spoken if voice is enabled
    pub fn say(&self, message: impl Into<String>) {
        self.send(Message::Say(message.into()));
    }

    /// Put `text` on the indicator without speaking it
    pub fn show(&self, text: impl Into<String>) {
        self.send(Message::Show(text.into()));
    }

    pub fn hide(&self) {
        self.send(Message::Hide);
    }

    fn send(&self, message: Message) {
        if self.tx.send(message).is_err() {
            debug!("feedback owner gone, message dropped");
        }
    }
}

/// Owner of the indicator and the synthesizer
pub struct FeedbackSink {
    overlay: Box<dyn Overlay>,
    synthesizer: Arc<dyn Synthesizer>,
    policy: FeedbackPolicy,
    tx: mpsc::UnboundedSender<Message>,
    rx: mpsc::UnboundedReceiver<Message>,
    speech: TaskSlot,
    auto_hide: TaskSlot,
    /// Current utterance; completions for older ones are ignored
    utterance: u64,
    /// Current auto-hide arming; stale expiries are ignored
    generation: u64,
}

impl FeedbackSink {
    pub fn new(
        overlay: Box<dyn Overlay>,
        synthesizer: Arc<dyn Synthesizer>,
        policy: FeedbackPolicy,
    ) -> (Self, FeedbackHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = FeedbackHandle { tx: tx.clone() };
        let sink = Self {
            overlay,
            synthesizer,
            policy,
            tx,
            rx,
            speech: TaskSlot::new("speech"),
            auto_hide: TaskSlot::new("auto-hide"),
            utterance: 0,
            generation: 0,
        };
        (sink, handle)
    }

    /// Process feedback requests for the life of the daemon
    pub async fn run(mut self) {
        while let Some(message) = self.rx.recv().await {
            self.handle(message);
        }
        self.speech.cancel();
        self.auto_hide.cancel();
        self.overlay.hide();
    }

    fn handle(&mut self, message: Message) {
        match message {
            Message::Say(text) => self.say(text),
            Message::Show(text) => {
                self.overlay.show(&text);
                self.schedule_hide();
            }
            Message::Hide => self.hide(),
            Message::SpeechFinished { utterance, error } => {
                if utterance != self.utterance {
                    debug!(utterance, "stale speech completion ignored");
                    return;
                }
                if let Some(error) = error {
                    warn!(%error, "speech synthesis failed");
                }
                self.hide();
            }
            Message::AutoHide { generation } => {
                if generation == self.generation {
                    self.hide();
                }
            }
        }
    }

    fn say(&mut self, text: String) {
        self.overlay.show(&text);

        if !self.policy.voice_enabled {
            self.schedule_hide();
            return;
        }

        // Hidden by speech completion, not by the timer
        self.auto_hide.cancel();
        self.generation += 1;
        self.utterance += 1;
        let utterance = self.utterance;
        let synthesizer = Arc::clone(&self.synthesizer);
        let volume = self.policy.volume;
        let tx = self.tx.clone();

        // A new utterance flushes the one still playing
        self.speech.spawn(async move {
            let error = synthesizer
                .speak(&text, volume)
                .await
                .err()
                .map(|e| e.to_string());
            let _ = tx.send(Message::SpeechFinished { utterance, error });
        });
    }

    fn schedule_hide(&mut self) {
        if self.speech.is_pending() {
            // Speech completion will hide the indicator
            return;
        }
        self.generation += 1;
        let generation = self.generation;
        let tx = self.tx.clone();
        self.auto_hide.spawn_after(self.policy.auto_hide, async move {
            let _ = tx.send(Message::AutoHide { generation });
        });
    }

    fn hide(&mut self) {
        self.auto_hide.cancel();
        self.generation += 1;
        self.overlay.hide();
    }
}

/// Feedback requests captured without an owner task
#[cfg(test)]
pub(crate) mod recorder {
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Feedback {
        Say(String),
        Show(String),
        Hide,
    }

    pub(crate) struct FeedbackLog {
        rx: Mutex<mpsc::UnboundedReceiver<Message>>,
        seen: Mutex<Vec<Feedback>>,
    }

    impl FeedbackLog {
        /// Everything requested so far, in order
        pub(crate) fn entries(&self) -> Vec<Feedback> {
            let mut rx = self.rx.lock().unwrap();
            let mut seen = self.seen.lock().unwrap();
            while let Ok(message) = rx.try_recv() {
                seen.push(match message {
                    Message::Say(text) => Feedback::Say(text),
                    Message::Show(text) => Feedback::Show(text),
                    Message::Hide => Feedback::Hide,
                    other => unreachable!("handles never send {other:?}"),
                });
            }
            seen.clone()
        }

        /// Messages passed to `say`, in order
        pub(crate) fn said(&self) -> Vec<String> {
            self.entries()
                .into_iter()
                .filter_map(|f| match f {
                    Feedback::Say(text) => Some(text),
                    _ => None,
                })
                .collect()
        }
    }

    impl FeedbackHandle {
        pub(crate) fn recorder() -> (Self, FeedbackLog) {
            let (tx, rx) = mpsc::unbounded_channel();
            let log = FeedbackLog {
                rx: Mutex::new(rx),
                seen: Mutex::new(Vec::new()),
            };
            (Self { tx }, log)
        }
    }
}
