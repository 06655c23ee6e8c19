//! Prompt templates for the language model

use crate::device::DeviceRegistry;

const CLASSIFY_INSTRUCTION: &str = r#"You are a command classifier.
Categorize the user message into one category and extract parameters.
Output must be a ```json fenced block with keys: "category" and (if any) "parameters".
Categories:
- power_pc: {on: Boolean}
- launch_app: {app_name: String}
- flashlight: {on: Boolean}
- play_music: {in: Int, title: String}
- getClipBoard: {}
- question: {text: String}
IDs:
- in: PC=0, SmartPhone=1
"#;

const CLASSIFY_EXAMPLES: &str = r#"Examples:
User: "turn on the PC"
-> {"category": "power_pc", "parameters": {"on": true}}
User: "what is the weather today?"
-> {"category": "question", "parameters": {"text": "what is the weather today?"}}
User: "launch the settings app"
-> {"category": "launch_app", "parameters": {"app_name": "com.android.settings"}}
User: "read my clipboard"
-> {"category": "getClipBoard"}
"#;

const QUESTION_PERSONA: &str = "You are a question answering AI like J.A.R.V.I.S. \
Your task is to answer user questions based on the provided context.";

const QUESTION_STYLE: &str = "The output length should be concise, ideally within 50 words.\n\
Examples:\n\
- User: \"how long rabbit life\"\n  \
Output: sir. While wild rabbits typically possess a lifespan of merely one to two years, \
domesticated rabbits, with adequate care, are capable of surviving for a decade or even longer.\n";

/// Builds the classification and question prompts
///
/// The application list is captured once, when the registry is read.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    classify_preamble: String,
}

impl PromptBuilder {
    pub fn new(registry: &DeviceRegistry) -> Self {
        let classify_preamble = format!(
            "{CLASSIFY_INSTRUCTION}- app_names: {}\n{CLASSIFY_EXAMPLES}",
            registry.joined_ids()
        );
        Self { classify_preamble }
    }

    /// Prompt asking for a structured command
    pub fn classify(&self, transcript: &str) -> String {
        format!("{}\nUser: \"{}\"\n", self.classify_preamble, transcript.trim())
    }

    /// Prompt asking for a short spoken answer
    pub fn question(&self, question: &str) -> String {
        format!("{QUESTION_PERSONA}\n{QUESTION_STYLE}\n{}\n", question.trim())
    }
}
