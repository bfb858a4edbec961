//! Reply drafting: rank stored context against an email and ask a
//! completion provider for a reply body.

use crate::email::{KnowledgeEntry, ReplyRecord};
use crate::error::{Error, Result};
use crate::normalize::normalize_text;
use crate::scoring::{rank, Scored};
use crate::store::Storage;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Sampling temperature sent with every completion request.
pub const TEMPERATURE: f64 = 0.3;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Reply returned in mock mode.
pub const MOCK_REPLY: &str = "Thank you for contacting us.\n\n\
We have reviewed your message and will assist you accordingly.\n\
Please let us know if you need further clarification.";

/// Reply returned when anything in the drafting path fails.
pub const FALLBACK_REPLY: &str =
    "We are currently unable to process your request. Please try again later.";

pub const NO_KNOWLEDGE: &str = "No directly relevant knowledge found.";

pub const NO_TEMPLATES: &str = "No relevant templates found.";

/// One prompt submission.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub prompt: &'a str,
    pub model: &'a str,
    pub temperature: f64,
}

/// Anything that turns a prompt into generated text.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String>;
}

/// OpenAI-compatible chat completions client.
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[async_trait]
impl CompletionProvider for OpenAiClient {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = json!({
            "model": request.model,
            "messages": [{ "role": "user", "content": request.prompt }],
            "temperature": request.temperature,
        });

        debug!(url = %url, model = request.model, "submitting completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(200).collect();
            return Err(Error::Provider(format!("API error {}: {snippet}", status.as_u16())));
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| Error::Provider("response contained no message content".into()))
    }
}

/// Whether drafts come from a provider or from the fixed mock template.
#[derive(Clone)]
pub enum DraftMode {
    Mock,
    Live {
        provider: Arc<dyn CompletionProvider>,
        model: String,
    },
}

impl std::fmt::Debug for DraftMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mock => f.write_str("Mock"),
            Self::Live { model, .. } => f.debug_struct("Live").field("model", model).finish(),
        }
    }
}

/// Rendered context blocks for one email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftContext {
    pub knowledge: String,
    pub replies: String,
}

/// Drafts support replies from stored knowledge and past replies.
pub struct ReplyDrafter {
    store: Arc<dyn Storage>,
    mode: DraftMode,
}

impl ReplyDrafter {
    #[must_use]
    pub fn new(store: Arc<dyn Storage>, mode: DraftMode) -> Self {
        Self { store, mode }
    }

    #[must_use]
    pub const fn is_mock(&self) -> bool {
        matches!(self.mode, DraftMode::Mock)
    }

    /// Draft a reply body. Never fails: errors are logged and replaced
    /// with [`FALLBACK_REPLY`].
    pub async fn generate_reply(&self, email_text: &str) -> String {
        match self.try_generate_reply(email_text).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("reply drafting failed: {e}");
                FALLBACK_REPLY.to_string()
            }
        }
    }

    /// Draft a reply, surfacing any storage or provider error.
    pub async fn try_generate_reply(&self, email_text: &str) -> Result<String> {
        let context = self.build_context(email_text)?;

        let (provider, model) = match &self.mode {
            DraftMode::Mock => return Ok(MOCK_REPLY.to_string()),
            DraftMode::Live { provider, model } => (provider, model),
        };

        let prompt = render_prompt(&context, email_text);
        info!(model = %model, prompt_len = prompt.len(), "requesting reply draft");

        let reply = provider
            .complete(CompletionRequest {
                prompt: &prompt,
                model,
                temperature: TEMPERATURE,
            })
            .await?;

        Ok(reply.trim().to_string())
    }

    /// Rank knowledge and past replies against the email and render both blocks.
    pub fn build_context(&self, email_text: &str) -> Result<DraftContext> {
        let query = normalize_text(Some(email_text));

        let knowledge = self.store.all_knowledge()?;
        let ranked_knowledge = rank(&query, &knowledge, |k| k.content.as_str());

        let replies = self.store.all_replies()?;
        let ranked_replies = rank(&query, &replies, |r| r.ai_reply.as_str());

        debug!(
            query_tokens = query.len(),
            knowledge = ranked_knowledge.len(),
            replies = ranked_replies.len(),
            "ranked drafting context"
        );

        Ok(DraftContext {
            knowledge: render_knowledge(&ranked_knowledge),
            replies: render_replies(&ranked_replies),
        })
    }
}

fn render_knowledge(ranked: &[Scored<'_, KnowledgeEntry>]) -> String {
    if ranked.is_empty() {
        return NO_KNOWLEDGE.to_string();
    }
    ranked
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {}\n{}", i + 1, s.item.title, s.item.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn render_replies(ranked: &[Scored<'_, ReplyRecord>]) -> String {
    if ranked.is_empty() {
        return NO_TEMPLATES.to_string();
    }
    ranked
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {}", i + 1, s.item.ai_reply))
        .collect::<Vec<_>>()
        .join("\n\n")
}

const RULE: &str = "-------------------------------";

/// Assemble the single user prompt sent to the provider.
#[must_use]
pub fn render_prompt(context: &DraftContext, email_text: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str("You are a professional internal customer support AI assistant.\n\n");
    prompt.push_str("Generate a helpful and accurate reply using:\n");
    prompt.push_str("- Relevant Company Knowledge\n");
    prompt.push_str("- Relevant Saved Replies (tone reference)\n");
    prompt.push_str("- The Customer Email\n\n");
    prompt.push_str("STRICT RULES:\n");
    prompt.push_str("- WRITE ONLY THE EMAIL BODY.\n");
    prompt.push_str("- DO NOT include greeting.\n");
    prompt.push_str("- DO NOT include subject.\n");
    prompt.push_str("- DO NOT include signature.\n");
    prompt.push_str("- DO NOT invent policies.\n\n");

    for (heading, block) in [
        ("RELEVANT COMPANY KNOWLEDGE:", context.knowledge.as_str()),
        ("RELEVANT SAVED REPLIES:", context.replies.as_str()),
        ("CUSTOMER EMAIL:", email_text),
    ] {
        let _ = write!(prompt, "{RULE}\n{heading}\n{RULE}\n{block}\n\n");
    }

    prompt.push_str("Now write a clear, polite, and context-aware response.\n");
    prompt
}
