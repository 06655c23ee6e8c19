//! Two-tier classification: local rules first, language model second

mod local;
mod prompt;
mod remote;

use std::sync::Arc;
use std::time::Duration;

pub use local::LocalClassifier;
pub use prompt::PromptBuilder;
pub use remote::RemoteClassifier;

use crate::command::Command;
use crate::llm::LlmError;

/// Outcome of a successful classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// A structured command
    Command(Command),
    /// The model replied in prose; the utterance is an open question
    Answer { question: String, reply: String },
}

impl Classification {
    /// The command to dispatch for this classification
    pub fn into_command(self) -> Command {
        match self {
            Classification::Command(command) => command,
            Classification::Answer { question, .. } => Command::Question { text: question },
        }
    }
}

/// Why a remote classification failed
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("malformed command JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("classification timed out after {0:?}")]
    Timeout(Duration),

    #[error("classification task failed: {0}")]
    Task(String),
}

/// Local rules plus the remote gateway they fall back to
#[derive(Clone)]
pub struct Classifier {
    local: LocalClassifier,
    remote: Arc<RemoteClassifier>,
}

impl Classifier {
    pub fn new(local: LocalClassifier, remote: RemoteClassifier) -> Self {
        Self {
            local,
            remote: Arc::new(remote),
        }
    }

    /// Synchronous first tier
    pub fn classify_local(&self, text: &str) -> Option<Command> {
        self.local.classify(text)
    }

    /// Handle to the remote tier, for use from a background task
    pub fn remote(&self) -> Arc<RemoteClassifier> {
        Arc::clone(&self.remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answer_becomes_question_command() {
        let classification = Classification::Answer {
            question: "what is the weather today?".to_string(),
            reply: "Sunny.".to_string(),
        };
        assert_eq!(
            classification.into_command(),
            Command::Question {
                text: "what is the weather today?".to_string()
            }
        );
    }
}
