//! Fake collaborators shared by unit tests
//!
//! Device and microphone fakes append to one [`TraceLog`] so tests can
//! check ordering across collaborators, in particular that the wake
//! detector and a capture session never hold the microphone together.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::classify::{Classifier, LocalClassifier, PromptBuilder, RemoteClassifier};
use crate::config::{Settings, Timings};
use crate::device::{AppEntry, AppLauncher, Clipboard, DeviceError, DeviceRegistry, Torch, UrlOpener};
use crate::dispatch::{Devices, Dispatcher, PowerControl};
use crate::events::{CycleId, Input, StateEvent};
use crate::feedback::recorder::FeedbackLog;
use crate::feedback::{FeedbackHandle, Overlay};
use crate::llm::{LanguageModel, LlmError};
use crate::state::{Microphone, Pipeline, StateMachine};
use crate::voice::{CaptureConfig, CaptureError, Recognizer, Synthesizer, VoiceError, Volume, WakeWord};

/// Observable side effects, in the order they happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trace {
    Arm,
    Disarm,
    CaptureStart(CycleId),
    CaptureStop,
    Torch(bool),
    Launch(String),
    Search(String, String),
    OpenUrl(String),
}

#[derive(Debug, Clone, Default)]
pub struct TraceLog(Arc<Mutex<Vec<Trace>>>);

impl TraceLog {
    pub fn push(&self, trace: Trace) {
        self.0.lock().unwrap().push(trace);
    }

    pub fn events(&self) -> Vec<Trace> {
        self.0.lock().unwrap().clone()
    }

    pub fn contains(&self, trace: &Trace) -> bool {
        self.0.lock().unwrap().contains(trace)
    }

    /// Panics if the wake detector was armed while a capture was open,
    /// or if two captures overlapped
    pub fn assert_exclusive_microphone(&self) {
        let mut armed = false;
        let mut capturing = false;
        for (i, trace) in self.events().iter().enumerate() {
            match trace {
                Trace::Arm => {
                    assert!(!capturing, "armed during capture at step {i}");
                    armed = true;
                }
                Trace::Disarm => armed = false,
                Trace::CaptureStart(_) => {
                    assert!(!armed, "capture opened while armed at step {i}");
                    assert!(!capturing, "overlapping capture at step {i}");
                    capturing = true;
                }
                Trace::CaptureStop => capturing = false,
                _ => {}
            }
        }
    }
}

/// Language model answering from a script
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
    failing: bool,
    delay: Option<Duration>,
}

impl ScriptedModel {
    pub fn replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Every reply takes `delay` to arrive
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing {
            return Err(LlmError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(LlmError::EmptyResponse)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayOp {
    Show(String),
    Hide,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingOverlay {
    ops: Arc<Mutex<Vec<OverlayOp>>>,
}

impl RecordingOverlay {
    pub fn ops(&self) -> Vec<OverlayOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn is_visible(&self) -> bool {
        matches!(self.ops.lock().unwrap().last(), Some(OverlayOp::Show(_)))
    }
}

impl Overlay for RecordingOverlay {
    fn show(&mut self, text: &str) {
        self.ops.lock().unwrap().push(OverlayOp::Show(text.to_string()));
    }

    fn hide(&mut self) {
        self.ops.lock().unwrap().push(OverlayOp::Hide);
    }
}

/// Synthesizer that takes a fixed time per utterance
#[derive(Debug, Default)]
pub struct ScriptedSynthesizer {
    duration: Duration,
    failing: bool,
    spoken: Mutex<Vec<(String, u8)>>,
    completed: AtomicUsize,
}

impl ScriptedSynthesizer {
    pub fn with_duration(duration: Duration) -> Self {
        Self {
            duration,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn spoken(&self) -> Vec<(String, u8)> {
        self.spoken.lock().unwrap().clone()
    }

    /// Utterances that played to the end
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Synthesizer for ScriptedSynthesizer {
    async fn speak(&self, text: &str, volume: Volume) -> Result<(), VoiceError> {
        self.spoken
            .lock()
            .unwrap()
            .push((text.to_string(), volume.as_percent()));
        if self.failing {
            return Err(VoiceError::Synthesis("engine not initialized".to_string()));
        }
        tokio::time::sleep(self.duration).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeWake {
    trace: TraceLog,
    /// Arm attempts left to refuse
    failures: Arc<AtomicUsize>,
}

impl WakeWord for FakeWake {
    fn arm(&mut self) -> Result<(), VoiceError> {
        let refuse = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refuse {
            return Err(VoiceError::WakeUnavailable("engine busy".to_string()));
        }
        self.trace.push(Trace::Arm);
        Ok(())
    }

    fn disarm(&mut self) {
        self.trace.push(Trace::Disarm);
    }
}

pub struct FakeRecognizer {
    trace: TraceLog,
    start_error: Option<CaptureError>,
    open: bool,
}

impl Recognizer for FakeRecognizer {
    fn start(&mut self, cycle: CycleId, _config: &CaptureConfig) -> Result<(), CaptureError> {
        if let Some(error) = self.start_error.clone() {
            return Err(error);
        }
        self.open = true;
        self.trace.push(Trace::CaptureStart(cycle));
        Ok(())
    }

    fn stop(&mut self) {
        if std::mem::take(&mut self.open) {
            self.trace.push(Trace::CaptureStop);
        }
    }
}

struct FakeTorch(TraceLog);

impl Torch for FakeTorch {
    fn set(&self, on: bool) -> Result<(), DeviceError> {
        self.0.push(Trace::Torch(on));
        Ok(())
    }
}

struct FakeLauncher(TraceLog);

impl AppLauncher for FakeLauncher {
    fn launch(&self, app: &AppEntry) -> Result<(), DeviceError> {
        self.0.push(Trace::Launch(app.id.clone()));
        Ok(())
    }

    fn search(&self, app: &AppEntry, query: &str) -> Result<(), DeviceError> {
        self.0.push(Trace::Search(app.id.clone(), query.to_string()));
        Ok(())
    }
}

struct FakeOpener(TraceLog);

impl UrlOpener for FakeOpener {
    fn open(&self, url: &str) -> Result<(), DeviceError> {
        self.0.push(Trace::OpenUrl(url.to_string()));
        Ok(())
    }
}

struct FakeClipboard(Option<String>);

impl Clipboard for FakeClipboard {
    fn read_text(&self) -> Result<Option<String>, DeviceError> {
        Ok(self.0.clone())
    }
}

/// Wires fakes into a dispatcher or a full state machine
pub struct Harness {
    pub trace: TraceLog,
    pub model: Arc<ScriptedModel>,
    pub settings: Settings,
    pub timings: Timings,
    apps: Vec<AppEntry>,
    torch: bool,
    clipboard: Option<String>,
    capture_error: Option<CaptureError>,
    arm_failures: Arc<AtomicUsize>,
    shutdown_timeout: Duration,
    feedback: FeedbackHandle,
    log: FeedbackLog,
}

impl Harness {
    pub fn new() -> Self {
        let (feedback, log) = FeedbackHandle::recorder();
        Self {
            trace: TraceLog::default(),
            model: Arc::new(ScriptedModel::default()),
            settings: Settings::default(),
            timings: Timings::default(),
            apps: vec![AppEntry::new("com.android.settings", "Settings")],
            torch: true,
            clipboard: None,
            capture_error: None,
            arm_failures: Arc::default(),
            shutdown_timeout: Duration::from_millis(5000),
            feedback,
            log,
        }
    }

    pub fn without_torch(mut self) -> Self {
        self.torch = false;
        self
    }

    pub fn with_app(mut self, id: &str, label: &str) -> Self {
        self.apps.push(AppEntry::new(id, label));
        self
    }

    pub fn with_replies<const N: usize>(self, replies: [&str; N]) -> Self {
        self.with_model(ScriptedModel::replies(replies))
    }

    pub fn with_failing_model(self) -> Self {
        self.with_model(ScriptedModel::failing())
    }

    pub fn with_model(mut self, model: ScriptedModel) -> Self {
        self.model = Arc::new(model);
        self
    }

    pub fn with_clipboard(mut self, text: Option<&str>) -> Self {
        self.clipboard = text.map(str::to_string);
        self
    }

    pub fn with_server_address(mut self, address: &str) -> Self {
        self.settings.server_address = address.to_string();
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// The recognizer refuses to open a session
    pub fn with_capture_error(mut self, error: CaptureError) -> Self {
        self.capture_error = Some(error);
        self
    }

    /// The wake detector refuses its next `count` arms
    pub fn fail_next_arms(&self, count: usize) {
        self.arm_failures.store(count, Ordering::SeqCst);
    }

    pub fn said(&self) -> Vec<String> {
        self.log.said()
    }

    fn registry(&self) -> DeviceRegistry {
        DeviceRegistry::new(self.apps.iter().cloned())
    }

    pub fn dispatcher(&self) -> Dispatcher {
        let registry = self.registry();
        let trace = &self.trace;
        let devices = Devices {
            torch: self
                .torch
                .then(|| Arc::new(FakeTorch(trace.clone())) as Arc<dyn Torch>),
            launcher: Arc::new(FakeLauncher(trace.clone())),
            opener: Arc::new(FakeOpener(trace.clone())),
            clipboard: Arc::new(FakeClipboard(self.clipboard.clone())),
        };
        let power = PowerControl::new(&self.settings, self.shutdown_timeout).unwrap();

        Dispatcher::new(
            Arc::new(registry.clone()),
            devices,
            power,
            self.model.clone(),
            PromptBuilder::new(&registry),
            self.feedback.clone(),
            self.timings.llm_request,
        )
    }

    /// A state machine over the fakes, with its input queue and event feed
    pub fn machine(
        &self,
    ) -> (
        StateMachine,
        mpsc::Receiver<Input>,
        broadcast::Receiver<StateEvent>,
    ) {
        let (input_tx, input_rx) = mpsc::channel(32);
        let (event_tx, event_rx) = broadcast::channel(64);
        let registry = self.registry();
        let classifier = Classifier::new(
            LocalClassifier::new(self.settings.app_aliases.clone()),
            RemoteClassifier::new(self.model.clone(), PromptBuilder::new(&registry)),
        );
        let mic = Microphone {
            wake: Box::new(FakeWake {
                trace: self.trace.clone(),
                failures: Arc::clone(&self.arm_failures),
            }),
            recognizer: Box::new(FakeRecognizer {
                trace: self.trace.clone(),
                start_error: self.capture_error.clone(),
                open: false,
            }),
        };
        let pipeline = Pipeline {
            classifier,
            dispatcher: self.dispatcher(),
            feedback: self.feedback.clone(),
        };
        let machine = StateMachine::new(mic, pipeline, self.timings, input_tx, event_tx);
        (machine, input_rx, event_rx)
    }
}

/// Drain whatever events are queued right now
pub fn drain_events(rx: &mut broadcast::Receiver<StateEvent>) -> Vec<StateEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
