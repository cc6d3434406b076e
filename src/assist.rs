use crate::buffer::Selection;
use crate::config::AssistConfig;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

pub const SYSTEM_PROMPT: &str = "You are a writing assistant inside a markdown README editor. \
You improve wording, fix grammar and draft new sections. Reply with the requested markdown \
only, without greetings or commentary, and do not wrap the answer in a code fence unless \
asked to.";

#[derive(Debug, Error)]
pub enum AssistError {
    #[error("Please add your API key first")]
    MissingApiKey,
    #[error("{0}")]
    MissingInput(&'static str),
    #[error("Please select some text first")]
    MissingSelection,
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error("Request failed: {0}")]
    Transport(String),
    #[error("Unexpected response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Generate,
    Improve,
    Installation,
    Usage,
    Grammar,
    Custom,
}

impl Feature {
    pub const ALL: [Feature; 6] = [
        Self::Generate,
        Self::Improve,
        Self::Installation,
        Self::Usage,
        Self::Grammar,
        Self::Custom,
    ];

    pub fn title(self) -> &'static str {
        match self {
            Self::Generate => "Generate README",
            Self::Improve => "Improve Text",
            Self::Installation => "Add Installation",
            Self::Usage => "Add Usage Examples",
            Self::Grammar => "Fix Grammar",
            Self::Custom => "Custom Request",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Generate => "Create a complete README from scratch",
            Self::Improve => "Make selected text more professional",
            Self::Installation => "Generate installation instructions",
            Self::Usage => "Generate usage examples and code snippets",
            Self::Grammar => "Fix spelling and grammar errors",
            Self::Custom => "Ask anything about your README",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            Self::Generate => "📝",
            Self::Improve => "✨",
            Self::Installation => "📦",
            Self::Usage => "💡",
            Self::Grammar => "✓",
            Self::Custom => "🤖",
        }
    }

    pub fn requires_selection(self) -> bool {
        matches!(self, Self::Improve | Self::Grammar)
    }

    /// Placeholder for the free-text field, for features that need one.
    pub fn input_placeholder(self) -> Option<&'static str> {
        match self {
            Self::Generate => Some("Describe your project, e.g. \"a CLI for tracking habits\""),
            Self::Custom => Some("What would you like help with?"),
            _ => None,
        }
    }

    pub fn requires_input(self) -> bool {
        self.input_placeholder().is_some()
    }

    fn missing_input_message(self) -> &'static str {
        match self {
            Self::Generate => "Please describe your project",
            _ => "Please enter your request",
        }
    }
}

/// Everything a prompt may draw on.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptInput<'a> {
    pub user_input: &'a str,
    pub selection: &'a str,
    pub document: &'a str,
}

pub fn build_prompt(feature: Feature, input: &PromptInput<'_>) -> Result<String, AssistError> {
    let user_input = input.user_input.trim();
    if feature.requires_input() && user_input.is_empty() {
        return Err(AssistError::MissingInput(feature.missing_input_message()));
    }
    if feature.requires_selection() && input.selection.trim().is_empty() {
        return Err(AssistError::MissingSelection);
    }

    let context = if input.document.trim().is_empty() {
        String::new()
    } else {
        format!("The README so far, for context:\n{}\n\n", input.document)
    };

    let prompt = match feature {
        Feature::Generate => format!(
            "Write a complete, professional README.md for this project:\n\n{user_input}\n\n\
             Cover the title and summary, features, installation, usage examples, \
             configuration if relevant, contributing and license. Use markdown \
             headings, lists, code blocks and badges where they help."
        ),
        Feature::Improve => format!(
            "Rewrite this README text so it reads clearer and more professional \
             without changing its meaning. Keep the markdown formatting.\n\n{}\n\n\
             Reply with the rewritten text only.",
            input.selection
        ),
        Feature::Installation => format!(
            "Write an \"Installation\" section for a README.md.\n\n{context}\
             Include prerequisites, step-by-step setup, the common installation \
             methods and a way to verify the install. Use markdown formatting."
        ),
        Feature::Usage => format!(
            "Write a \"Usage\" section with code examples for a README.md.\n\n{context}\
             Start with a basic example, then more advanced ones and typical use \
             cases. Put code in fenced blocks with a language tag."
        ),
        Feature::Grammar => format!(
            "Correct the spelling, grammar and punctuation of this text. Leave the \
             markdown formatting untouched.\n\n{}\n\n\
             Reply with the corrected text only.",
            input.selection
        ),
        Feature::Custom => format!(
            "You are an expert on README files. Help with this request:\n\n{user_input}\n\n\
             {context}Answer in markdown."
        ),
    };
    Ok(prompt)
}

pub trait TextGenerator: Send {
    fn generate(&self, prompt: &str) -> Result<String, AssistError>;
}

/// Chat-completions client for Groq's OpenAI-compatible endpoint.
pub struct GroqClient {
    agent: ureq::Agent,
    api_key: String,
    settings: AssistConfig,
}

impl GroqClient {
    pub fn new(api_key: impl Into<String>, settings: AssistConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .build();
        Self {
            agent,
            api_key: api_key.into(),
            settings,
        }
    }

    fn request_body(&self, prompt: &str) -> Value {
        json!({
            "model": self.settings.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_tokens,
            "top_p": 1,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl TextGenerator for GroqClient {
    fn generate(&self, prompt: &str) -> Result<String, AssistError> {
        if self.api_key.trim().is_empty() {
            return Err(AssistError::MissingApiKey);
        }
        let response = self
            .agent
            .post(&self.settings.endpoint)
            .set("Authorization", &format!("Bearer {}", self.api_key.trim()))
            .send_json(self.request_body(prompt));

        match response {
            Ok(response) => {
                let body: ChatResponse = response
                    .into_json()
                    .map_err(|err| AssistError::Decode(err.to_string()))?;
                Ok(body
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.message.content)
                    .unwrap_or_default())
            }
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(AssistError::Api {
                    status,
                    message: api_error_message(status, &body),
                })
            }
            Err(ureq::Error::Transport(transport)) => {
                Err(AssistError::Transport(transport.to_string()))
            }
        }
    }
}

/// `error.message` from an error body, or a generic status message.
fn api_error_message(status: u16, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| format!("API Error: {status}"))
}

/// A validated request, tied to the selection it will replace.
#[derive(Debug, Clone)]
pub struct AssistRequest {
    pub feature: Feature,
    pub target: Selection,
    pub prompt: String,
}

/// Checks the credential and the feature's inputs. Nothing here touches
/// the network.
pub fn prepare(
    feature: Feature,
    api_key: Option<&str>,
    input: &PromptInput<'_>,
    target: Selection,
) -> Result<AssistRequest, AssistError> {
    if api_key.is_none_or(|key| key.trim().is_empty()) {
        return Err(AssistError::MissingApiKey);
    }
    let prompt = build_prompt(feature, input)?;
    Ok(AssistRequest {
        feature,
        target,
        prompt,
    })
}

#[derive(Debug)]
pub struct AssistJob {
    pub feature: Feature,
    pub target: Selection,
    pub result: Result<String, AssistError>,
}

pub fn run(generator: &dyn TextGenerator, request: AssistRequest) -> AssistJob {
    info!(target: "assist", feature = request.feature.title(), prompt_chars = request.prompt.len(), "request_started");
    let result = generator.generate(&request.prompt);
    match &result {
        Ok(text) => info!(target: "assist", chars = text.len(), "request_finished"),
        Err(err) => error!(target: "assist", %err, "request_failed"),
    }
    AssistJob {
        feature: request.feature,
        target: request.target,
        result,
    }
}

/// Runs the request on a worker thread and sends the outcome back.
pub fn spawn<G, T>(generator: G, request: AssistRequest, tx: Sender<T>) -> JoinHandle<()>
where
    G: TextGenerator + 'static,
    T: From<AssistJob> + Send + 'static,
{
    thread::spawn(move || {
        let job = run(&generator, request);
        let _ = tx.send(T::from(job));
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    struct Canned {
        reply: Result<String, u16>,
        calls: Arc<AtomicUsize>,
    }

    impl TextGenerator for Canned {
        fn generate(&self, _prompt: &str) -> Result<String, AssistError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone().map_err(|status| AssistError::Api {
                status,
                message: format!("API Error: {status}"),
            })
        }
    }

    fn input<'a>(user_input: &'a str, selection: &'a str) -> PromptInput<'a> {
        PromptInput {
            user_input,
            selection,
            document: "# Demo\n",
        }
    }

    #[test]
    fn validation_happens_before_any_call() {
        let target = Selection::caret(0);
        assert!(matches!(
            prepare(Feature::Installation, None, &input("", ""), target),
            Err(AssistError::MissingApiKey)
        ));
        assert!(matches!(
            prepare(Feature::Installation, Some("  "), &input("", ""), target),
            Err(AssistError::MissingApiKey)
        ));
        assert!(matches!(
            prepare(Feature::Generate, Some("gsk"), &input("   ", ""), target),
            Err(AssistError::MissingInput("Please describe your project"))
        ));
        assert!(matches!(
            prepare(Feature::Custom, Some("gsk"), &input("", ""), target),
            Err(AssistError::MissingInput("Please enter your request"))
        ));
        assert!(matches!(
            prepare(Feature::Grammar, Some("gsk"), &input("", ""), target),
            Err(AssistError::MissingSelection)
        ));
        assert!(prepare(Feature::Usage, Some("gsk"), &input("", ""), target).is_ok());
    }

    #[test]
    fn prompts_carry_their_inputs() {
        let generate = build_prompt(Feature::Generate, &input("a habit tracker", "")).unwrap();
        assert!(generate.contains("a habit tracker"));

        let improve = build_prompt(Feature::Improve, &input("", "teh text")).unwrap();
        assert!(improve.contains("teh text"));

        let usage = build_prompt(Feature::Usage, &input("", "")).unwrap();
        assert!(usage.contains("# Demo"));

        let bare = build_prompt(Feature::Installation, &PromptInput::default()).unwrap();
        assert!(!bare.contains("for context"));
    }

    #[test]
    fn job_keeps_the_captured_target() {
        let calls = Arc::new(AtomicUsize::new(0));
        let generator = Canned {
            reply: Ok("## Usage\n".to_string()),
            calls: Arc::clone(&calls),
        };
        let target = Selection::new(4, 9);
        let request = prepare(Feature::Improve, Some("gsk"), &input("", "hello"), target).unwrap();

        let (tx, rx) = mpsc::channel::<AssistJob>();
        spawn(generator, request, tx).join().unwrap();
        let job = rx.recv().unwrap();

        assert_eq!(job.target, target);
        assert_eq!(job.feature, Feature::Improve);
        assert_eq!(job.result.unwrap(), "## Usage\n");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remote_failure_is_reported_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let generator = Canned {
            reply: Err(429),
            calls: Arc::clone(&calls),
        };
        let request = prepare(Feature::Usage, Some("gsk"), &input("", ""), Selection::caret(0))
            .unwrap();
        let job = run(&generator, request);
        assert_eq!(job.result.unwrap_err().to_string(), "API Error: 429");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn error_bodies() {
        assert_eq!(
            api_error_message(401, r#"{"error":{"message":"Invalid API Key"}}"#),
            "Invalid API Key"
        );
        assert_eq!(api_error_message(500, "<html>"), "API Error: 500");
    }

    #[test]
    fn request_body_uses_settings() {
        let client = GroqClient::new("gsk_test", AssistConfig::default());
        let body = client.request_body("hi");
        assert_eq!(body["model"], "openai/gpt-oss-120b");
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
    }
}
