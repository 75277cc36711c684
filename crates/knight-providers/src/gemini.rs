//! Google Gemini provider (`generateContent`).

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

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiProvider {
    pub fn from_config(api_key: String, model: String) -> Self {
        Self {
            client: super::http_client(),
            api_key,
            model,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
}

#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<Usage>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Usage {
    #[serde(default)]
    total_token_count: u64,
}

impl Content {
    fn text(role: Option<&str>, text: &str) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![Part {
                text: text.to_string(),
            }],
        }
    }
}

/// Gemini keeps the system prompt out of `contents` and calls the assistant "model".
fn build_request(system: &str, messages: &[ApiMessage]) -> GenerateRequest {
    let contents = messages
        .iter()
        .map(|m| {
            let role = if m.role == "assistant" { "model" } else { "user" };
            Content::text(Some(role), &m.content)
        })
        .collect();

    GenerateRequest {
        contents,
        system_instruction: (!system.is_empty()).then(|| Content::text(None, system)),
    }
}

/// Concatenated text parts of the first candidate.
fn response_text(resp: &GenerateResponse) -> Option<String> {
    let content = resp.candidates.first()?.content.as_ref()?;
    let text: String = content.parts.iter().map(|p| p.text.as_str()).collect();
    (!text.trim().is_empty()).then_some(text)
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, context: &Context) -> Result<Completion, KnightError> {
        let (system, messages) = context.to_api_messages();
        let model = self.model.as_str();
        let start = Instant::now();

        let url = format!("{GEMINI_BASE_URL}/models/{model}:generateContent");
        debug!("gemini: POST models/{model}:generateContent");

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&build_request(&system, &messages))
            .send()
            .await
            .map_err(|e| KnightError::Provider(format!("gemini request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(KnightError::Provider(format!(
                "gemini returned {status}: {body}"
            )));
        }

        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| KnightError::Provider(format!("gemini: failed to parse response: {e}")))?;

        let text = response_text(&parsed)
            .ok_or_else(|| KnightError::Provider("gemini returned no text".into()))?;

        Ok(Completion {
            text,
            metadata: MessageMetadata {
                provider_used: "gemini".to_string(),
                tokens_used: parsed.usage_metadata.map(|u| u.total_token_count),
                processing_time_ms: start.elapsed().as_millis() as u64,
                model: Some(model.to_string()),
            },
        })
    }

    async fn is_available(&self) -> bool {
        if self.api_key.is_empty() {
            warn!("gemini: no API key configured");
            return false;
        }
        let url = format!("{GEMINI_BASE_URL}/models");
        match self
            .client
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!("gemini not available: {e}");
                false
            }
        }
    }
}
