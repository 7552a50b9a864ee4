//! The extraction normalizer.
//!
//! Sends recognized text to an OpenAI-compatible model together with the
//! caller's field contract, then treats whatever comes back as untrusted:
//! the final result is always re-derived from the caller's own field list.
//! This component never fails outward; anything that goes wrong degrades to
//! an all-empty-fields result.

use std::{fmt, sync::Arc};

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
        CreateChatCompletionResponse, ResponseFormat, ResponseFormatJsonSchema,
    },
};
use async_trait::async_trait;
use serde_json::Value;

use crate::{
    fields::{ExtractionResult, FieldSpec},
    llm_client::{create_llm_client, extraction_model},
    prelude::*,
    prompt,
};

/// Near-deterministic sampling, matching the extraction task.
const EXTRACTION_TEMPERATURE: f32 = 0.1;

/// Output-token budget: fixed framing overhead plus a per-field value
/// allowance, so large field lists don't get truncated mid-reply.
const COMPLETION_TOKENS_BASE: u32 = 120;
const COMPLETION_TOKENS_PER_FIELD: u32 = 60;

/// The external text-understanding call. Implementations may fail; the
/// [`Extractor`] absorbs every failure.
#[async_trait]
pub trait CompletionService: fmt::Debug + Send + Sync + 'static {
    /// Ask the model to extract `fields` from `text`, returning its reply
    /// parsed as JSON but not yet validated against the field contract.
    async fn complete(
        &self,
        instruction: &str,
        text: &str,
        fields: &FieldSpec,
    ) -> Result<Value>;
}

/// OpenAI-compatible implementation of [`CompletionService`]. Holds the
/// process-wide client; no per-request state.
#[derive(Debug)]
pub struct OpenAiCompletion {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiCompletion {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: create_llm_client()?,
            model: extraction_model(),
        })
    }
}

#[async_trait]
impl CompletionService for OpenAiCompletion {
    async fn complete(
        &self,
        instruction: &str,
        text: &str,
        fields: &FieldSpec,
    ) -> Result<Value> {
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(instruction)
                .build()?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt::user_message(text))
                .build()?
                .into(),
        ];

        let json_schema = ResponseFormatJsonSchema {
            name: "DadosExtraidos".to_owned(),
            schema: Some(prompt::response_schema(fields)),
            strict: Some(true),
            description: None,
        };

        let mut req = CreateChatCompletionRequestArgs::default();
        req.model(self.model.clone())
            .messages(messages)
            .response_format(ResponseFormat::JsonSchema { json_schema })
            .temperature(EXTRACTION_TEMPERATURE)
            .max_completion_tokens(completion_token_budget(fields));
        let req = req.build().context("error building chat request")?;
        trace!(?req, "chat request");

        let chat_result: Value = self
            .client
            .chat()
            .create_byot(req)
            .await
            .context("chat completion request failed")?;
        let response = serde_json::from_value::<CreateChatCompletionResponse>(chat_result)
            .context("error parsing chat response")?;

        let choice = response
            .choices
            .first()
            .context("no choices in chat response")?;
        let content = choice.message.content.as_deref().unwrap_or_default();
        debug!(%content, "model reply");
        serde_json::from_str::<Value>(content)
            .with_context(|| format!("model reply was not valid JSON: {content:?}"))
    }
}

/// How many completion tokens to allow for a given field list.
fn completion_token_budget(fields: &FieldSpec) -> u32 {
    COMPLETION_TOKENS_BASE + COMPLETION_TOKENS_PER_FIELD * fields.len() as u32
}

/// The extraction normalizer: wraps a [`CompletionService`] in the
/// "always returns a well-shaped result" contract.
#[derive(Debug)]
pub struct Extractor {
    service: Arc<dyn CompletionService>,
}

impl Extractor {
    pub fn new(service: Arc<dyn CompletionService>) -> Self {
        Self { service }
    }

    /// Build the production extractor backed by the OpenAI client.
    pub fn openai() -> Result<Self> {
        Ok(Self::new(Arc::new(OpenAiCompletion::new()?)))
    }

    /// Extract the requested fields from recognized text.
    ///
    /// Never fails: service errors, malformed replies, and missing keys all
    /// degrade to empty strings, logged with the correlation id.
    #[instrument(level = "debug", skip_all, fields(request_id = %request_id))]
    pub async fn extract(
        &self,
        text: &str,
        fields: &FieldSpec,
        request_id: &str,
    ) -> ExtractionResult {
        let instruction = prompt::build_instruction(fields);
        match self.service.complete(&instruction, text, fields).await {
            Ok(reply) => normalize(fields, &reply),
            Err(err) => {
                warn!(%request_id, error = %err, "extraction degraded to empty fields");
                fields.empty_result()
            }
        }
    }
}

/// Project the model's reply onto the caller's field list.
///
/// Iterates the request's own fields, never the reply's keys: extra keys are
/// dropped, missing, null, or non-string values become `""`, and the key
/// order matches the request.
pub fn normalize(fields: &FieldSpec, reply: &Value) -> ExtractionResult {
    let mut result = ExtractionResult::new();
    for name in fields.names() {
        let value = reply
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or_default();
        result.insert(name.clone(), Value::String(value.to_owned()));
    }
    result
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn spec(names: &[&str]) -> FieldSpec {
        FieldSpec::new(names.iter().map(|s| s.to_string())).unwrap()
    }

    fn keys(result: &ExtractionResult) -> Vec<&str> {
        result.keys().map(String::as_str).collect()
    }

    #[test]
    fn normalize_drops_extra_keys_and_fills_missing_ones() {
        let fields = spec(&["nome", "sobrenome"]);
        let reply = json!({
            "nome": "Maria",
            "hallucinated": "yes",
        });
        let result = normalize(&fields, &reply);
        assert_eq!(keys(&result), ["nome", "sobrenome"]);
        assert_eq!(result["nome"], "Maria");
        assert_eq!(result["sobrenome"], "");
    }

    #[test]
    fn normalize_treats_null_and_non_strings_as_absent() {
        let fields = spec(&["a", "b", "c"]);
        let reply = json!({ "a": null, "b": 42, "c": "ok" });
        let result = normalize(&fields, &reply);
        assert_eq!(result["a"], "");
        assert_eq!(result["b"], "");
        assert_eq!(result["c"], "ok");
    }

    #[test]
    fn normalize_handles_non_object_replies() {
        let fields = spec(&["nome"]);
        let result = normalize(&fields, &json!("not an object"));
        assert_eq!(keys(&result), ["nome"]);
        assert_eq!(result["nome"], "");
    }

    #[test]
    fn normalize_preserves_request_order() {
        let fields = spec(&["z", "a", "m"]);
        let result = normalize(&fields, &json!({ "a": "1", "m": "2", "z": "3" }));
        assert_eq!(keys(&result), ["z", "a", "m"]);
    }

    #[test]
    fn token_budget_scales_with_field_count() {
        assert_eq!(completion_token_budget(&spec(&["a"])), 180);
        assert_eq!(
            completion_token_budget(&FieldSpec::default()),
            120 + 3 * 60
        );
    }

    /// A service that always fails, for exercising the degradation path.
    #[derive(Debug)]
    struct BrokenService;

    #[async_trait]
    impl CompletionService for BrokenService {
        async fn complete(&self, _: &str, _: &str, _: &FieldSpec) -> Result<Value> {
            anyhow::bail!("service unavailable")
        }
    }

    #[tokio::test]
    async fn extractor_degrades_to_empty_fields_on_service_failure() {
        let extractor = Extractor::new(Arc::new(BrokenService));
        let fields = spec(&["nome", "cpf"]);
        let result = extractor.extract("some text", &fields, "req-x").await;
        assert_eq!(keys(&result), ["nome", "cpf"]);
        assert!(result.values().all(|v| v == ""));
    }
}
