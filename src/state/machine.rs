//! Core state machine implementation
//!
//! A single task owns every piece of session state and reacts to [`Input`]
//! messages one at a time. Collaborators, timers and background work only
//! ever talk to it through the input channel, so transitions are strictly
//! serialized. Inputs tagged with a cycle other than the current one are
//! stale and dropped.

use std::future::Future;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::classify::{Classification, ClassifyError, Classifier};
use crate::command::Command;
use crate::config::Timings;
use crate::dispatch::{Dispatcher, Outcome};
use crate::events::{CycleId, Input, ResolvedBy, StateEvent, TimerKind};
use crate::feedback::FeedbackHandle;
use crate::timer::TaskSlot;
use crate::voice::{CaptureConfig, CaptureError, Recognizer, WakeWord};

const PERMISSION_NOTICE: &str = "Microphone permission required. Please enable in app settings.";
const CLASSIFY_FAILED: &str = "Internal error processing your request";
const LISTENING: &str = "Listening...";

/// States of the listening pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Not listening
    #[default]
    Idle,
    /// Waiting for the wake phrase
    Armed,
    /// Capture session open
    Capturing,
    /// Waiting on a classification
    Classifying,
    /// Handler issuing its side effect
    Dispatching,
    /// Pause before re-arming
    CoolingDown,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            State::Idle => write!(f, "Idle"),
            State::Armed => write!(f, "Armed"),
            State::Capturing => write!(f, "Capturing"),
            State::Classifying => write!(f, "Classifying"),
            State::Dispatching => write!(f, "Dispatching"),
            State::CoolingDown => write!(f, "CoolingDown"),
        }
    }
}

/// The two exclusive owners of the microphone
pub struct Microphone {
    pub wake: Box<dyn WakeWord>,
    pub recognizer: Box<dyn Recognizer>,
}

/// Everything downstream of a transcript
pub struct Pipeline {
    pub classifier: Classifier,
    pub dispatcher: Dispatcher,
    pub feedback: FeedbackHandle,
}

/// The sequencing owner
pub struct StateMachine {
    state: State,
    wake: Box<dyn WakeWord>,
    recognizer: Box<dyn Recognizer>,
    wake_armed: bool,
    /// Cycle whose capture session is open
    capture: Option<CycleId>,
    classifier: Classifier,
    dispatcher: Dispatcher,
    feedback: FeedbackHandle,
    timings: Timings,
    onset: TaskSlot,
    capture_guard: TaskSlot,
    rearm: TaskSlot,
    /// Remote classification in flight for the current cycle
    classification: Option<AbortHandle>,
    /// Used by timers and background work to post back
    input_tx: mpsc::Sender<Input>,
    event_tx: broadcast::Sender<StateEvent>,
    cycle: CycleId,
    cycle_started: Option<Instant>,
}

impl StateMachine {
    pub fn new(
        mic: Microphone,
        pipeline: Pipeline,
        timings: Timings,
        input_tx: mpsc::Sender<Input>,
        event_tx: broadcast::Sender<StateEvent>,
    ) -> Self {
        Self {
            state: State::Idle,
            wake: mic.wake,
            recognizer: mic.recognizer,
            wake_armed: false,
            capture: None,
            classifier: pipeline.classifier,
            dispatcher: pipeline.dispatcher,
            feedback: pipeline.feedback,
            timings,
            onset: TaskSlot::new("speech-onset"),
            capture_guard: TaskSlot::new("capture-guard"),
            rearm: TaskSlot::new("rearm"),
            classification: None,
            input_tx,
            event_tx,
            cycle: CycleId::default(),
            cycle_started: None,
        }
    }

    /// Get the current state
    pub fn state(&self) -> State {
        self.state
    }

    /// Leave Idle and arm the wake detector
    pub fn start(&mut self) {
        if self.state == State::Idle {
            self.arm_wake();
        }
    }

    /// Process inputs until every sender is gone
    pub async fn run(&mut self, mut input_rx: mpsc::Receiver<Input>) {
        self.start();
        info!(state = %self.state, "state machine started");

        while let Some(input) = input_rx.recv().await {
            self.handle(input);
        }

        self.shutdown();
        info!("state machine stopped");
    }

    /// Release the microphone, cancel pending work and return to Idle
    pub fn shutdown(&mut self) {
        self.cancel_pending();
        self.close_capture();
        self.disarm_wake();
        self.transition_to(State::Idle);
    }

    fn handle(&mut self, input: Input) {
        match input {
            Input::Wake => self.on_wake(),
            Input::SpeechStarted { cycle } => {
                if self.is_capturing(cycle) {
                    debug!(%cycle, "speech started");
                    self.onset.cancel();
                }
            }
            Input::Transcript { cycle, text } => {
                if self.is_capturing(cycle) {
                    self.on_transcript(text);
                } else {
                    self.discard(cycle, "transcript");
                }
            }
            Input::CaptureFailed { cycle, error } => {
                if self.is_capturing(cycle) {
                    self.on_capture_failed(error);
                } else {
                    self.discard(cycle, "capture error");
                }
            }
            Input::Submit { text, reply } => self.on_submit(text, reply),
            Input::Classified { cycle, result } => {
                if self.state == State::Classifying && cycle == self.cycle {
                    self.on_classified(result);
                } else {
                    self.discard(cycle, "classification");
                }
            }
            Input::Timer { cycle, kind } => {
                if cycle == self.cycle {
                    self.on_timer(kind);
                } else {
                    self.discard(cycle, "timer");
                }
            }
        }
    }

    fn is_capturing(&self, cycle: CycleId) -> bool {
        self.state == State::Capturing && self.capture == Some(cycle)
    }

    fn discard(&self, cycle: CycleId, what: &str) {
        debug!(%cycle, current = %self.cycle, state = %self.state, what, "stale input discarded");
    }

    fn on_wake(&mut self) {
        if self.state != State::Armed {
            debug!(state = %self.state, "wake ignored");
            return;
        }

        let cycle = self.begin_cycle();
        info!(%cycle, "wake detected");
        self.emit(StateEvent::WakeDetected { cycle });

        // Wake detector and capture never hold the microphone together
        self.disarm_wake();
        self.transition_to(State::Capturing);
        self.feedback.show(LISTENING);

        let config = CaptureConfig::free_form(self.timings.recognizer_silence);
        match self.recognizer.start(cycle, &config) {
            Ok(()) => {
                self.capture = Some(cycle);
                self.emit(StateEvent::CaptureStarted { cycle });
                let onset = self.post_timer(TimerKind::SpeechOnset);
                self.onset.spawn_after(self.timings.speech_onset, onset);
                let guard = self.post_timer(TimerKind::CaptureGuard);
                self.capture_guard
                    .spawn_after(self.timings.capture_guard, guard);
            }
            Err(error) => {
                warn!(%cycle, %error, "capture could not start");
                self.on_capture_failed(error);
            }
        }
    }

    fn on_transcript(&mut self, text: String) {
        let cycle = self.cycle;
        // One transcript per wake: the session ends here
        self.close_capture();

        let text = text.trim().to_string();
        if text.is_empty() {
            self.on_capture_failed(CaptureError::NoMatch);
            return;
        }

        info!(%cycle, transcript = %text, "transcript received");
        self.emit(StateEvent::TranscriptReceived {
            cycle,
            text: text.clone(),
        });
        self.feedback.show(text.clone());
        self.classify(text);
    }

    fn on_capture_failed(&mut self, error: CaptureError) {
        self.close_capture();
        if error == CaptureError::PermissionDenied {
            warn!(cycle = %self.cycle, "microphone permission denied");
            self.feedback.say(PERMISSION_NOTICE);
        } else {
            info!(cycle = %self.cycle, %error, "capture ended without transcript");
            self.feedback.hide();
        }
        self.recover();
    }

    fn on_submit(&mut self, text: String, reply: oneshot::Sender<Result<CycleId, State>>) {
        if self.state != State::Armed {
            debug!(state = %self.state, "submitted text refused");
            let _ = reply.send(Err(self.state));
            return;
        }

        let cycle = self.begin_cycle();
        info!(%cycle, transcript = %text, "text submitted");
        self.disarm_wake();
        let _ = reply.send(Ok(cycle));

        self.emit(StateEvent::TranscriptReceived {
            cycle,
            text: text.clone(),
        });
        self.feedback.show(text.clone());
        self.classify(text);
    }

    fn classify(&mut self, text: String) {
        self.transition_to(State::Classifying);

        if let Some(command) = self.classifier.classify_local(&text) {
            self.dispatch(command, ResolvedBy::Local);
            return;
        }

        debug!(cycle = %self.cycle, "no local rule matched, asking the language model");
        let remote = self.classifier.remote();
        let limit = self.timings.classify_guard;
        let work = tokio::spawn(async move {
            match tokio::time::timeout(limit, remote.classify(&text)).await {
                Ok(result) => result,
                Err(_) => Err(ClassifyError::Timeout(limit)),
            }
        });
        self.classification = Some(work.abort_handle());

        let tx = self.input_tx.clone();
        let cycle = self.cycle;
        tokio::spawn(async move {
            let result = match work.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => return,
                Err(e) => Err(ClassifyError::Task(e.to_string())),
            };
            let _ = tx.send(Input::Classified { cycle, result }).await;
        });
    }

    fn on_classified(&mut self, result: Result<Classification, ClassifyError>) {
        self.classification = None;
        match result {
            Ok(classification) => {
                if let Classification::Answer { reply, .. } = &classification {
                    debug!(reply = %reply, "classifier answered in prose, treating as question");
                }
                self.dispatch(classification.into_command(), ResolvedBy::Remote);
            }
            Err(error) => {
                warn!(cycle = %self.cycle, %error, "classification failed");
                self.feedback.say(CLASSIFY_FAILED);
                self.cool_down();
            }
        }
    }

    fn dispatch(&mut self, command: Command, resolved_by: ResolvedBy) {
        let cycle = self.cycle;
        self.transition_to(State::Dispatching);
        info!(%cycle, category = command.category(), ?resolved_by, "command resolved");
        self.emit(StateEvent::CommandResolved {
            cycle,
            category: command.category().to_string(),
            resolved_by,
        });

        if let Outcome::Background(_) = self.dispatcher.dispatch(command) {
            debug!(%cycle, "handler continues in the background");
        }
        self.cool_down();
    }

    fn cool_down(&mut self) {
        self.transition_to(State::CoolingDown);
        let rearm = self.post_timer(TimerKind::Rearm);
        self.rearm.spawn_after(self.timings.rearm, rearm);
    }

    fn on_timer(&mut self, kind: TimerKind) {
        match (kind, self.state) {
            (TimerKind::SpeechOnset, State::Capturing) => {
                info!(cycle = %self.cycle, "no speech before the onset deadline");
                self.on_capture_failed(CaptureError::Timeout);
            }
            (TimerKind::CaptureGuard, State::Capturing) => {
                warn!(cycle = %self.cycle, "capture exceeded its guard");
                self.on_capture_failed(CaptureError::Timeout);
            }
            (TimerKind::Rearm, State::CoolingDown | State::Idle) => self.recover(),
            (kind, state) => debug!(?kind, %state, "timer no longer relevant"),
        }
    }

    /// Return to Armed from anywhere, dropping whatever was in flight
    fn recover(&mut self) {
        self.cancel_pending();
        self.close_capture();
        self.arm_wake();
    }

    fn cancel_pending(&mut self) {
        self.onset.cancel();
        self.capture_guard.cancel();
        self.rearm.cancel();
        if let Some(work) = self.classification.take() {
            debug!(cycle = %self.cycle, "aborting classification");
            work.abort();
        }
    }

    fn begin_cycle(&mut self) -> CycleId {
        self.cycle = self.cycle.next();
        self.cycle_started = Some(Instant::now());
        self.cycle
    }

    fn arm_wake(&mut self) {
        if self.capture.is_some() {
            warn!("capture still open while arming");
            self.close_capture();
        }

        match self.wake.arm() {
            Ok(()) => {
                self.wake_armed = true;
                self.transition_to(State::Armed);
                if let Some(started) = self.cycle_started.take() {
                    let duration_ms = started.elapsed().as_millis() as u64;
                    info!(cycle = %self.cycle, duration_ms, "cycle complete");
                    self.emit(StateEvent::CycleComplete {
                        cycle: self.cycle,
                        duration_ms,
                    });
                }
            }
            Err(error) => {
                warn!(%error, "failed to arm wake detector, retrying");
                if self.state != State::Idle {
                    self.transition_to(State::CoolingDown);
                }
                let rearm = self.post_timer(TimerKind::Rearm);
                self.rearm.spawn_after(self.timings.rearm, rearm);
            }
        }
    }

    fn disarm_wake(&mut self) {
        if std::mem::take(&mut self.wake_armed) {
            self.wake.disarm();
        }
    }

    fn close_capture(&mut self) {
        self.onset.cancel();
        self.capture_guard.cancel();
        if let Some(cycle) = self.capture.take() {
            self.recognizer.stop();
            debug!(%cycle, "capture closed");
            self.emit(StateEvent::CaptureStopped { cycle });
        }
    }

    /// Future that posts a timer expiry for the current cycle
    fn post_timer(&self, kind: TimerKind) -> impl Future<Output = ()> + Send + 'static {
        let tx = self.input_tx.clone();
        let cycle = self.cycle;
        async move {
            let _ = tx.send(Input::Timer { cycle, kind }).await;
        }
    }

    /// Perform a state transition
    fn transition_to(&mut self, new_state: State) {
        let old_state = self.state;
        if old_state == new_state {
            return;
        }

        info!(from = %old_state, to = %new_state, cycle = %self.cycle, "state transition");
        self.state = new_state;
        self.emit(StateEvent::Transition {
            from: old_state,
            to: new_state,
        });
    }

    fn emit(&self, event: StateEvent) {
        debug!(%event, "emitting event");
        let _ = self.event_tx.send(event);
    }
}
