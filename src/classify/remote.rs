//! Language-model classifier used when the local rules miss

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::debug;

use crate::command::{Command, WireCommand};
use crate::llm::LanguageModel;

use super::prompt::PromptBuilder;
use super::{Classification, ClassifyError};

static JSON_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```json[ \t]*\r?\n(.*?)\r?\n[ \t]*```").expect("valid fenced-block regex")
});

/// Body of the first ```json fenced block in `text`
pub fn extract_json_block(text: &str) -> Option<&str> {
    JSON_BLOCK
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Builds prompts and turns model replies into classifications
pub struct RemoteClassifier {
    llm: Arc<dyn LanguageModel>,
    prompts: PromptBuilder,
}

impl RemoteClassifier {
    pub fn new(llm: Arc<dyn LanguageModel>, prompts: PromptBuilder) -> Self {
        Self { llm, prompts }
    }

    pub async fn classify(&self, transcript: &str) -> Result<Classification, ClassifyError> {
        let reply = self.llm.complete(&self.prompts.classify(transcript)).await?;
        interpret_reply(transcript, reply)
    }
}

/// Turn a classifier reply into a command, or a question turn when no
/// fenced JSON is present
fn interpret_reply(transcript: &str, reply: String) -> Result<Classification, ClassifyError> {
    let Some(block) = extract_json_block(&reply) else {
        debug!(reply_len = reply.len(), "no fenced JSON in reply, treating as question");
        return Ok(Classification::Answer {
            question: transcript.to_string(),
            reply,
        });
    };

    let wire: WireCommand = serde_json::from_str(block)?;
    Ok(Classification::Command(Command::from_wire(wire, transcript)))
}
