//! Console-backed wake and capture collaborators
//!
//! Reads utterances from stdin on a dedicated thread. While the wake
//! detector is armed, a line starting with the wake phrase raises a wake
//! event; whatever follows the phrase is held and delivered as the
//! transcript once capture starts. Otherwise capture reports speech onset
//! right away and the next line is the transcript, bounded only by the
//! capture guard.

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{CaptureConfig, CaptureError, Recognizer, Synthesizer, VoiceError, Volume, WakeWord};
use crate::events::{CycleId, Input};

/// Microphone view shared by the wake and capture halves
#[derive(Debug, Default)]
struct Shared {
    armed: bool,
    capture: Option<CycleId>,
    /// Text spoken in the same breath as the wake phrase
    pending: Option<String>,
}

type SharedState = Arc<Mutex<Shared>>;

fn lock(shared: &SharedState) -> MutexGuard<'_, Shared> {
    // A panic while holding the lock leaves plain flags behind; keep going
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Stdin reader feeding the state machine
pub struct ConsoleInput {
    input_tx: mpsc::Sender<Input>,
    wake_phrase: String,
    shared: SharedState,
    running: Arc<AtomicBool>,
}

impl ConsoleInput {
    pub fn new(input_tx: mpsc::Sender<Input>, wake_phrase: &str) -> Self {
        Self {
            input_tx,
            wake_phrase: wake_phrase.trim().to_lowercase(),
            shared: SharedState::default(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Wake-detector half
    pub fn wake_word(&self) -> ConsoleWakeWord {
        ConsoleWakeWord {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Recognizer half
    pub fn recognizer(&self) -> ConsoleRecognizer {
        ConsoleRecognizer {
            shared: Arc::clone(&self.shared),
            input_tx: self.input_tx.clone(),
        }
    }

    /// Start the reader thread
    pub fn start(&self) -> Result<(), VoiceError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(VoiceError::WakeUnavailable(
                "console reader is already running".to_string(),
            ));
        }

        let input_tx = self.input_tx.clone();
        let shared = Arc::clone(&self.shared);
        let running = Arc::clone(&self.running);
        let wake_phrase = self.wake_phrase.clone();

        thread::Builder::new()
            .name("console-input".to_string())
            .spawn(move || {
                info!(%wake_phrase, "console input thread started");

                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    let line = match line {
                        Ok(line) => line,
                        Err(e) => {
                            error!(?e, "failed to read stdin");
                            break;
                        }
                    };
                    let Some(input) = route_line(&shared, &wake_phrase, &line) else {
                        continue;
                    };
                    if input_tx.blocking_send(input).is_err() {
                        warn!("failed to send console input - channel closed?");
                        break;
                    }
                }

                running.store(false, Ordering::SeqCst);
                info!("console input thread stopped");
            })
            .map_err(VoiceError::Io)?;

        Ok(())
    }

    /// Stop forwarding input; the thread exits after its next line
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut shared = lock(&self.shared);
        shared.armed = false;
        shared.capture = None;
        shared.pending = None;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Decide what a console line means given who owns the microphone
fn route_line(shared: &SharedState, wake_phrase: &str, line: &str) -> Option<Input> {
    let mut shared = lock(shared);
    let text = line.trim();

    if let Some(cycle) = shared.capture.take() {
        return Some(if text.is_empty() {
            Input::CaptureFailed {
                cycle,
                error: CaptureError::NoMatch,
            }
        } else {
            Input::Transcript {
                cycle,
                text: text.to_string(),
            }
        });
    }

    if !shared.armed {
        debug!("microphone not armed, console input ignored");
        return None;
    }

    let rest = strip_wake_phrase(text, wake_phrase)?;
    // The wake callback is one-shot until re-armed
    shared.armed = false;
    shared.pending = (!rest.is_empty()).then(|| rest.to_string());
    Some(Input::Wake)
}

/// Text following the wake phrase, if `text` starts with it
fn strip_wake_phrase<'a>(text: &'a str, wake_phrase: &str) -> Option<&'a str> {
    let head = text.get(..wake_phrase.len())?;
    if !head.eq_ignore_ascii_case(wake_phrase) {
        return None;
    }
    let rest = &text[wake_phrase.len()..];
    if rest.chars().next().is_some_and(char::is_alphanumeric) {
        // "ellieville" is not the wake phrase
        return None;
    }
    Some(rest.trim_start_matches([',', '.', '!', ' ']).trim())
}

/// Wake-detector half of the console backend
pub struct ConsoleWakeWord {
    shared: SharedState,
}

impl WakeWord for ConsoleWakeWord {
    fn arm(&mut self) -> Result<(), VoiceError> {
        let mut shared = lock(&self.shared);
        if shared.capture.is_some() {
            return Err(VoiceError::WakeUnavailable(
                "microphone held by a capture session".to_string(),
            ));
        }
        shared.armed = true;
        shared.pending = None;
        Ok(())
    }

    fn disarm(&mut self) {
        lock(&self.shared).armed = false;
    }
}

/// Recognizer half of the console backend
pub struct ConsoleRecognizer {
    shared: SharedState,
    input_tx: mpsc::Sender<Input>,
}

impl Recognizer for ConsoleRecognizer {
    fn start(&mut self, cycle: CycleId, config: &CaptureConfig) -> Result<(), CaptureError> {
        debug!(
            %cycle,
            language = %config.language,
            silence_ms = config.silence_timeout.as_millis() as u64,
            max_results = config.max_results,
            partial_results = config.partial_results,
            "capture requested"
        );
        let mut shared = lock(&self.shared);
        if shared.armed {
            return Err(CaptureError::Recognizer(
                "microphone held by the wake detector".to_string(),
            ));
        }

        match shared.pending.take() {
            Some(text) => {
                drop(shared);
                self.input_tx
                    .try_send(Input::Transcript { cycle, text })
                    .map_err(|e| CaptureError::Recognizer(e.to_string()))
            }
            None => {
                shared.capture = Some(cycle);
                drop(shared);
                println!("listening...");
                // Typing counts as speech, so the onset deadline does not apply
                if let Err(e) = self.input_tx.try_send(Input::SpeechStarted { cycle }) {
                    warn!(%cycle, error = %e, "failed to report speech onset");
                }
                Ok(())
            }
        }
    }

    fn stop(&mut self) {
        lock(&self.shared).capture = None;
    }
}

/// Prints utterances instead of speaking them
#[derive(Debug, Default)]
pub struct ConsoleSynthesizer;

#[async_trait]
impl Synthesizer for ConsoleSynthesizer {
    async fn speak(&self, text: &str, volume: Volume) -> Result<(), VoiceError> {
        debug!(volume = volume.as_percent(), "speaking");
        println!("ellie: {text}");
        Ok(())
    }
}

/// Speaks through the `espeak` binary
#[derive(Debug, Default)]
pub struct EspeakSynthesizer;

/// espeak amplitude range is 0-200
const ESPEAK_MAX_AMPLITUDE: u32 = 200;

#[async_trait]
impl Synthesizer for EspeakSynthesizer {
    async fn speak(&self, text: &str, volume: Volume) -> Result<(), VoiceError> {
        let status = tokio::process::Command::new("espeak")
            .arg("-a")
            .arg(volume.scaled(ESPEAK_MAX_AMPLITUDE).to_string())
            .arg("--")
            .arg(text)
            .kill_on_drop(true)
            .status()
            .await?;

        if status.success() {
            Ok(())
        } else {
            Err(VoiceError::Synthesis(format!("espeak exited with {status}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn console() -> (ConsoleInput, mpsc::Receiver<Input>) {
        let (tx, rx) = mpsc::channel(8);
        (ConsoleInput::new(tx, "Ellie"), rx)
    }

    #[test]
    fn test_console_creation() {
        let (console, _rx) = console();
        assert!(!console.is_running());
    }

    #[test]
    fn test_strip_wake_phrase() {
        assert_eq!(strip_wake_phrase("Ellie, flashlight on", "ellie"), Some("flashlight on"));
        assert_eq!(strip_wake_phrase("ellie", "ellie"), Some(""));
        assert_eq!(strip_wake_phrase("ellieville", "ellie"), None);
        assert_eq!(strip_wake_phrase("hey there", "ellie"), None);
    }

    #[test]
    fn test_input_ignored_while_disarmed() {
        let (console, _rx) = console();
        assert!(route_line(&console.shared, "ellie", "ellie flashlight on").is_none());
    }

    #[test]
    fn test_wake_with_inline_utterance() {
        let (console, mut rx) = console();
        let mut wake = console.wake_word();
        let mut recognizer = console.recognizer();

        wake.arm().unwrap();
        assert!(matches!(
            route_line(&console.shared, "ellie", "Ellie flashlight on"),
            Some(Input::Wake)
        ));
        // One-shot: a second wake line is ignored until re-armed
        assert!(route_line(&console.shared, "ellie", "ellie again").is_none());

        wake.disarm();
        recognizer
            .start(CycleId(3), &CaptureConfig::free_form(std::time::Duration::from_secs(5)))
            .unwrap();
        match rx.try_recv().unwrap() {
            Input::Transcript { cycle, text } => {
                assert_eq!(cycle, CycleId(3));
                assert_eq!(text, "flashlight on");
            }
            other => panic!("unexpected input: {other:?}"),
        }
    }

    #[test]
    fn test_capture_takes_next_line() {
        let (console, mut rx) = console();
        let mut wake = console.wake_word();
        let mut recognizer = console.recognizer();

        wake.arm().unwrap();
        route_line(&console.shared, "ellie", "ellie");
        wake.disarm();
        recognizer
            .start(CycleId(1), &CaptureConfig::free_form(std::time::Duration::from_secs(5)))
            .unwrap();
        assert!(matches!(
            rx.try_recv(),
            Ok(Input::SpeechStarted { cycle: CycleId(1) })
        ));

        // Arming while capture is open is refused
        assert!(wake.arm().is_err());

        match route_line(&console.shared, "ellie", "  ") {
            Some(Input::CaptureFailed { cycle, error }) => {
                assert_eq!(cycle, CycleId(1));
                assert_eq!(error, CaptureError::NoMatch);
            }
            other => panic!("unexpected input: {other:?}"),
        }
        // Session consumed
        assert!(route_line(&console.shared, "ellie", "hello").is_none());
    }
}
