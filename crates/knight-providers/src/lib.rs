//! # knight-providers
//!
//! AI provider implementations for Knight.

pub mod gemini;
pub mod openai;

use knight_core::{config::ProviderConfig, error::KnightError, traits::Provider};
use std::time::Duration;

/// Upper bound for a single provider round trip.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Build the provider named by `provider.default`.
pub fn build_provider(config: &ProviderConfig) -> Result<Box<dyn Provider>, KnightError> {
    match config.default.as_str() {
        "gemini" => {
            let gemini = config.gemini.as_ref().ok_or_else(|| {
                KnightError::Config("provider.gemini section is missing".into())
            })?;
            Ok(Box::new(gemini::GeminiProvider::from_config(
                gemini.api_key.clone(),
                gemini.model.clone(),
            )))
        }
        "openai" => {
            let openai = config.openai.as_ref().ok_or_else(|| {
                KnightError::Config("provider.openai section is missing".into())
            })?;
            Ok(Box::new(openai::OpenAiProvider::from_config(
                openai.base_url.clone(),
                openai.api_key.clone(),
                openai.model.clone(),
            )))
        }
        other => Err(KnightError::Config(format!("unknown provider: {other}"))),
    }
}
