//! Command dispatch
//!
//! Maps each [`Command`] to its handler. Handlers never block the caller:
//! anything that touches the network or may stall (remote answers, power
//! control, clipboard reads) runs on a spawned task and reports through
//! the feedback sink when it resolves. Failures are turned into spoken
//! notices at the task boundary.

mod media;
mod power;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use power::PowerControl;

use media::{web_search_url, VIDEO_APP_ID};

use crate::classify::PromptBuilder;
use crate::command::{Command, PlayTarget};
use crate::device::{AppLauncher, Clipboard, DeviceRegistry, Torch, UrlOpener};
use crate::feedback::FeedbackHandle;
use crate::llm::LanguageModel;

const ANSWER_FAILED: &str = "Sorry, I couldn't get an answer right now.";
const FLASHLIGHT_UNAVAILABLE: &str = "Flashlight not available.";
const CLIPBOARD_EMPTY: &str = "NO DATA";

/// Hardware and OS capabilities the handlers act on
#[derive(Clone)]
pub struct Devices {
    /// `None` when the device has no torch
    pub torch: Option<Arc<dyn Torch>>,
    pub launcher: Arc<dyn AppLauncher>,
    pub opener: Arc<dyn UrlOpener>,
    pub clipboard: Arc<dyn Clipboard>,
}

/// What a dispatch left running
#[derive(Debug)]
pub enum Outcome {
    /// The side effect already happened
    Done,
    /// The side effect continues on a background task
    Background(JoinHandle<()>),
}

/// Routes commands to handlers
pub struct Dispatcher {
    registry: Arc<DeviceRegistry>,
    devices: Devices,
    power: Arc<PowerControl>,
    llm: Arc<dyn LanguageModel>,
    prompts: PromptBuilder,
    feedback: FeedbackHandle,
    answer_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        devices: Devices,
        power: PowerControl,
        llm: Arc<dyn LanguageModel>,
        prompts: PromptBuilder,
        feedback: FeedbackHandle,
        answer_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            devices,
            power: Arc::new(power),
            llm,
            prompts,
            feedback,
            answer_timeout,
        }
    }

    /// Issue the side effect for `command`
    pub fn dispatch(&self, command: Command) -> Outcome {
        info!(category = command.category(), "dispatching command");

        match command {
            Command::Flashlight { on } => {
                self.flashlight(on);
                Outcome::Done
            }
            Command::LaunchApp { app_name } => {
                self.launch_app(&app_name);
                Outcome::Done
            }
            Command::PowerPc { on } => self.power_pc(on),
            Command::PlayMusic { target, title } => {
                self.play_music(target, &title);
                Outcome::Done
            }
            Command::Question { text } => self.answer(text),
            Command::Clipboard => self.read_clipboard(),
            Command::Report { message } => {
                self.feedback.say(message);
                Outcome::Done
            }
            Command::Unhandled { category } => {
                self.feedback.say(format!("Unknown command {category}"));
                Outcome::Done
            }
        }
    }

    fn flashlight(&self, on: bool) {
        let Some(torch) = &self.devices.torch else {
            self.feedback.say(FLASHLIGHT_UNAVAILABLE);
            return;
        };

        match torch.set(on) {
            Ok(()) if on => self.feedback.say("Turned on the flashlight, sir"),
            Ok(()) => self.feedback.say("Turned off the flashlight, sir"),
            Err(e) => {
                warn!(error = %e, "torch control failed");
                self.feedback.say(FLASHLIGHT_UNAVAILABLE);
            }
        }
    }

    fn launch_app(&self, app_name: &str) {
        let Some(app) = self.registry.resolve(app_name) else {
            debug!(app_name, "unknown application, nothing launched");
            return;
        };

        match self.devices.launcher.launch(app) {
            Ok(()) => self.feedback.say(format!("Launched {}", app.label)),
            Err(e) => {
                warn!(app = %app.id, error = %e, "launch failed");
                self.feedback.say(format!("Failed to launch {}", app.label));
            }
        }
    }

    fn power_pc(&self, on: bool) -> Outcome {
        let power = Arc::clone(&self.power);
        let feedback = self.feedback.clone();

        Outcome::Background(tokio::spawn(async move {
            if on {
                match power.wake().await {
                    Ok(()) => feedback.say("Sent wake on lan"),
                    Err(e) => {
                        warn!(error = %e, "wake-on-lan failed");
                        feedback.say("Failed to send wake on lan");
                    }
                }
            } else {
                match power.shutdown().await {
                    Ok(()) => feedback.say("Shutdown command sent"),
                    Err(e) => {
                        warn!(error = %e, "shutdown request failed");
                        feedback.say("Failed to send shutdown");
                    }
                }
            }
        }))
    }

    fn play_music(&self, target: PlayTarget, title: &str) {
        if target == PlayTarget::Pc {
            self.feedback
                .say(format!("Playing {title} on PC (not implemented locally)."));
            return;
        }

        if let Some(app) = self.registry.resolve(VIDEO_APP_ID) {
            match self.devices.launcher.search(app, title) {
                Ok(()) => return,
                Err(e) => debug!(error = %e, "in-app search unavailable, using web search"),
            }
        }

        let url = web_search_url(title);
        if let Err(e) = self.devices.opener.open(&url) {
            warn!(%url, error = %e, "failed to open web search");
            self.feedback.say(format!("Couldn't open a player for {title}"));
        }
    }

    fn answer(&self, question: String) -> Outcome {
        let llm = Arc::clone(&self.llm);
        let prompt = self.prompts.question(&question);
        let feedback = self.feedback.clone();
        let limit = self.answer_timeout;

        Outcome::Background(tokio::spawn(async move {
            match tokio::time::timeout(limit, llm.complete(&prompt)).await {
                Ok(Ok(answer)) => feedback.say(answer.trim()),
                Ok(Err(e)) => {
                    warn!(error = %e, "question answering failed");
                    feedback.say(ANSWER_FAILED);
                }
                Err(_) => {
                    warn!(?limit, "question answering timed out");
                    feedback.say(ANSWER_FAILED);
                }
            }
        }))
    }

    fn read_clipboard(&self) -> Outcome {
        let clipboard = Arc::clone(&self.devices.clipboard);
        let feedback = self.feedback.clone();

        Outcome::Background(tokio::spawn(async move {
            let text = match tokio::task::spawn_blocking(move || clipboard.read_text()).await {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => {
                    warn!(error = %e, "clipboard read failed");
                    None
                }
                Err(e) => {
                    warn!(error = %e, "clipboard task failed");
                    None
                }
            };
            let text = text.unwrap_or_else(|| CLIPBOARD_EMPTY.to_string());
            feedback.say(format!("Clipboard: {text}"));
        }))
    }
}
