//! Rule-based classifier that runs before any remote call
//!
//! Rules are evaluated in order and the first match wins; the order matters
//! because the phrase patterns overlap.

use crate::command::{Command, PlayTarget};
use crate::config::AppAlias;

const POWER_ON_PHRASES: &[&str] = &["turn on pc", "power on pc", "turn on the pc"];
const POWER_OFF_PHRASES: &[&str] = &[
    "turn off pc",
    "turn off the pc",
    "shutdown pc",
    "power off pc",
];

/// Deterministic text -> command mapper with no side effects
#[derive(Debug, Clone)]
pub struct LocalClassifier {
    aliases: Vec<AppAlias>,
}

impl LocalClassifier {
    pub fn new(aliases: Vec<AppAlias>) -> Self {
        Self { aliases }
    }

    /// Classify `text`, or return `None` to defer to the remote classifier
    pub fn classify(&self, text: &str) -> Option<Command> {
        let t = text.trim().to_lowercase();

        if t.starts_with("flashlight")
            || t.contains("turn on flashlight")
            || t.contains("turn off flashlight")
        {
            return Some(Command::Flashlight {
                on: !t.contains("off"),
            });
        }

        if t.starts_with("open ") || t.starts_with("launch ") {
            // No alias match: the utterance names something the rules can't
            // resolve, so no later rule applies either.
            return self
                .aliases
                .iter()
                .find(|a| t.contains(a.alias.as_str()))
                .map(|a| Command::LaunchApp {
                    app_name: a.app_id.clone(),
                });
        }

        if POWER_ON_PHRASES.iter().any(|p| t.contains(p)) {
            return Some(Command::PowerPc { on: true });
        }
        if POWER_OFF_PHRASES.iter().any(|p| t.contains(p)) {
            return Some(Command::PowerPc { on: false });
        }

        if t.starts_with("play ") && !t.contains("on phone") {
            return Some(Command::PlayMusic {
                target: PlayTarget::Phone,
                title: strip_play_prefix(text),
            });
        }

        None
    }
}

/// Everything after the leading "play", keeping the speaker's casing
fn strip_play_prefix(text: &str) -> String {
    let trimmed = text.trim_start();
    let rest = trimmed
        .char_indices()
        .nth(4)
        .map_or("", |(idx, _)| &trimmed[idx..]);
    rest.trim().to_string()
}
