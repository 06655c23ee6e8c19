//! Structured commands
//!
//! Classifiers produce a [`Command`]; the dispatcher consumes it. Wire JSON
//! from the language model is converted exactly once, in
//! [`Command::from_wire`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Where `play_music` should play
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayTarget {
    Pc,
    Phone,
}

impl PlayTarget {
    /// Decode the wire id (`0` = PC, `1` = phone); anything else means phone
    pub fn from_id(id: i64) -> Self {
        if id == 0 {
            Self::Pc
        } else {
            Self::Phone
        }
    }
}

/// A resolved command with its typed parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Flashlight { on: bool },
    LaunchApp { app_name: String },
    PowerPc { on: bool },
    PlayMusic { target: PlayTarget, title: String },
    Question { text: String },
    Clipboard,
    Report { message: String },
    /// Category the dispatcher has no handler for
    Unhandled { category: String },
}

/// Command as emitted by the language model
#[derive(Debug, Clone, Deserialize)]
pub struct WireCommand {
    pub category: String,
    #[serde(default)]
    pub parameters: Option<Map<String, Value>>,
}

impl Command {
    /// Category tag as it appears on the wire
    pub fn category(&self) -> &str {
        match self {
            Command::Flashlight { .. } => "flashlight",
            Command::LaunchApp { .. } => "launch_app",
            Command::PowerPc { .. } => "power_pc",
            Command::PlayMusic { .. } => "play_music",
            Command::Question { .. } => "question",
            Command::Clipboard => "getClipBoard",
            Command::Report { .. } => "report",
            Command::Unhandled { category } => category,
        }
    }

    /// Convert a wire command into its typed form
    ///
    /// `transcript` fills in a missing question text. Unknown categories
    /// become [`Command::Unhandled`] rather than an error.
    pub fn from_wire(wire: WireCommand, transcript: &str) -> Self {
        let params = Params(wire.parameters.unwrap_or_default());

        match wire.category.as_str() {
            "flashlight" | "flashLight" => Command::Flashlight {
                on: params.bool("on", false),
            },
            "launch_app" => Command::LaunchApp {
                app_name: params.string("app_name", ""),
            },
            "power_pc" => Command::PowerPc {
                on: params.bool("on", false),
            },
            "play_music" => Command::PlayMusic {
                target: PlayTarget::from_id(params.int("in", 1)),
                title: params.string("title", ""),
            },
            "question" => Command::Question {
                text: params.string("text", transcript),
            },
            "getClipBoard" => Command::Clipboard,
            "report" => Command::Report {
                message: params.string("message", "Report"),
            },
            other => Command::Unhandled {
                category: other.to_string(),
            },
        }
    }
}

/// Lenient accessors over the wire parameter bag
struct Params(Map<String, Value>);

impl Params {
    fn bool(&self, key: &str, default: bool) -> bool {
        match self.0.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            Some(Value::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
            _ => default,
        }
    }

    fn int(&self, key: &str, default: i64) -> i64 {
        match self.0.get(key) {
            Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    fn string(&self, key: &str, default: &str) -> String {
        match self.0.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => default.to_string(),
            Some(other) => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(json: &str) -> WireCommand {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_flashlight_from_wire() {
        let cmd = Command::from_wire(
            wire(r#"{"category":"flashlight","parameters":{"on":true}}"#),
            "",
        );
        assert_eq!(cmd, Command::Flashlight { on: true });
    }

    #[test]
    fn test_flashlight_alias_and_string_bool() {
        let cmd = Command::from_wire(
            wire(r#"{"category":"flashLight","parameters":{"on":"true"}}"#),
            "",
        );
        assert_eq!(cmd, Command::Flashlight { on: true });
    }

    #[test]
    fn test_missing_parameters_use_defaults() {
        assert_eq!(
            Command::from_wire(wire(r#"{"category":"power_pc"}"#), ""),
            Command::PowerPc { on: false }
        );
        assert_eq!(
            Command::from_wire(wire(r#"{"category":"launch_app","parameters":null}"#), ""),
            Command::LaunchApp {
                app_name: String::new()
            }
        );
        assert_eq!(
            Command::from_wire(wire(r#"{"category":"play_music","parameters":{"title":"lofi"}}"#), ""),
            Command::PlayMusic {
                target: PlayTarget::Phone,
                title: "lofi".to_string()
            }
        );
    }

    #[test]
    fn test_play_target_ids() {
        let cmd = Command::from_wire(
            wire(r#"{"category":"play_music","parameters":{"in":"0","title":"jazz"}}"#),
            "",
        );
        assert_eq!(
            cmd,
            Command::PlayMusic {
                target: PlayTarget::Pc,
                title: "jazz".to_string()
            }
        );
    }

    #[test]
    fn test_question_falls_back_to_transcript() {
        let cmd = Command::from_wire(wire(r#"{"category":"question"}"#), "why is the sky blue");
        assert_eq!(
            cmd,
            Command::Question {
                text: "why is the sky blue".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_category_is_unhandled() {
        let cmd = Command::from_wire(
            wire(r#"{"category":"room_light","parameters":{"on":true}}"#),
            "",
        );
        assert_eq!(cmd.category(), "room_light");
        assert!(matches!(cmd, Command::Unhandled { .. }));
    }
}
