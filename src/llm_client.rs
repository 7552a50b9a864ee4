//! Client for OpenAI-compatible APIs.
//!
//! One client is built at process start and shared by every request (it is
//! read-only configuration plus a connection pool, never per-request state).

use async_openai::{Client, config::OpenAIConfig};

use crate::prelude::*;

/// Create an OpenAI-compatible client using the default configuration.
pub fn create_llm_client() -> Result<Client<OpenAIConfig>> {
    let mut client_config = OpenAIConfig::new();
    if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
        client_config = client_config.with_api_key(api_key);
    }
    if let Ok(api_base) = std::env::var("OPENAI_API_BASE") {
        client_config = client_config.with_api_base(api_base);
    }
    let client = Client::with_config(client_config);
    Ok(client)
}

/// Which model to use for extraction. Overridable for LiteLLM and
/// Ollama-style gateways.
pub fn extraction_model() -> String {
    std::env::var("CAMPO_OCR_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_owned())
}
