//! OpenAI Chat Completions provider. Any compatible base URL works.

use async_trait::async_trait;
use knight_core::{
    context::{ApiMessage, Context},
    error::KnightError,
    message::{Completion, MessageMetadata},
    traits::Provider,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};

pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn from_config(base_url: String, api_key: String, model: String) -> Self {
        Self {
            client: super::http_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }
}

#[derive(Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    model: Option<String>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

#[derive(Deserialize)]
struct ChatUsage {
    total_tokens: Option<u64>,
}

/// System prompt goes first, as a `system` role message.
fn build_messages(system: &str, messages: &[ApiMessage]) -> Vec<ChatMessage> {
    let system = (!system.is_empty()).then(|| ChatMessage {
        role: "system".to_string(),
        content: Some(system.to_string()),
    });
    system
        .into_iter()
        .chain(messages.iter().map(|m| ChatMessage {
            role: m.role.clone(),
            content: Some(m.content.clone()),
        }))
        .collect()
}

fn response_text(resp: &ChatResponse) -> Option<String> {
    resp.choices
        .first()?
        .message
        .as_ref()?
        .content
        .clone()
        .filter(|t| !t.trim().is_empty())
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, context: &Context) -> Result<Completion, KnightError> {
        let (system, messages) = context.to_api_messages();
        let model = self.model.as_str();
        let start = Instant::now();

        let body = ChatRequest {
            model: model.to_string(),
            messages: build_messages(&system, &messages),
        };
        let url = self.endpoint("chat/completions");
        debug!("openai: POST {url} model={model}");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| KnightError::Provider(format!("openai request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(KnightError::Provider(format!(
                "openai returned {status}: {text}"
            )));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| KnightError::Provider(format!("openai: failed to parse response: {e}")))?;

        let text = response_text(&parsed)
            .ok_or_else(|| KnightError::Provider("openai returned no text".into()))?;

        Ok(Completion {
            text,
            metadata: MessageMetadata {
                provider_used: "openai".to_string(),
                tokens_used: parsed.usage.and_then(|u| u.total_tokens),
                processing_time_ms: start.elapsed().as_millis() as u64,
                model: parsed.model.or_else(|| Some(model.to_string())),
            },
        })
    }

    async fn is_available(&self) -> bool {
        if self.api_key.is_empty() {
            warn!("openai: no API key configured");
            return false;
        }
        match self
            .client
            .get(self.endpoint("models"))
            .bearer_auth(&self.api_key)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!("openai not available: {e}");
                false
            }
        }
    }
}
