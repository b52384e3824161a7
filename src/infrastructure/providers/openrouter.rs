use crate::domain::error::DomainError;
use crate::domain::ports::summarizer::Summarizer;
use crate::domain::values::prompt_contract::PromptContract;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// OpenAI-compatible chat completions client.
pub struct OpenRouterSummarizer {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenRouterSummarizer {
    pub fn new(api_key: String, model: String, base_url: Option<String>, timeout: Duration) -> Self {
        Self {
            api_key,
            model,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.into())
                .trim_end_matches('/')
                .to_string(),
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    top_p: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl Summarizer for OpenRouterSummarizer {
    fn model(&self) -> &str {
        &self.model
    }

    async fn summarize(&self, text: &str, contract: &PromptContract) -> Result<String, DomainError> {
        let user_prompt = contract.render_user_prompt(text);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &contract.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &user_prompt,
                },
            ],
            temperature: 0.0,
            top_p: 1.0,
        };

        debug!(model = %self.model, chars = text.len(), "summarization request");
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("X-Title", "marketpulse")
            .json(&request)
            .send()
            .await
            .map_err(|e| DomainError::from_http("OpenRouter", e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DomainError::from_status("OpenRouter", status, &body));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| DomainError::MalformedResponse(format!("OpenRouter: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| DomainError::MalformedResponse("OpenRouter returned no content".into()))
    }
}
