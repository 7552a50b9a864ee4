//! The request orchestrator.
//!
//! Sequences one request through validate -> recognize -> extract ->
//! assemble. Each invocation owns all of its state; nothing is shared
//! between concurrent requests except the read-only handles in [`AppState`].

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::PipelineError,
    extract::Extractor,
    fields::{ExtractionResult, FieldSpec},
    ocr::{RecognitionBackend, recognize_image},
    prelude::*,
};

/// Default recognition language.
pub const DEFAULT_LANGUAGE: &str = "por";

/// Process-wide, read-only service handles, built once at startup.
#[derive(Debug, Clone)]
pub struct AppState {
    pub backend: Arc<dyn RecognitionBackend>,
    pub extractor: Arc<Extractor>,
}

/// What the ingress layer hands the orchestrator, before validation.
#[derive(Debug, Default)]
pub struct IngressRequest {
    /// Raw uploaded image bytes, if the `image` field was present.
    pub image: Option<Vec<u8>>,

    /// Original filename, if the client sent one.
    pub filename: Option<String>,

    /// The `idioma` form field.
    pub language: Option<String>,

    /// The raw `campos` form field, still JSON-encoded.
    pub fields_json: Option<String>,
}

/// The terminal artifact of one request. Wire names match the public API.
#[derive(Debug, Serialize)]
pub struct ResponseEnvelope {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub texto_original: String,
    pub dados_extraidos: ExtractionResult,
    pub campos_solicitados: FieldSpec,
    pub confianca: f32,
    pub palavras: usize,
    pub idioma: String,
    pub arquivo: Option<String>,
    pub tamanho: usize,
    pub timestamp: String,
}

/// Generate a fresh, high-entropy correlation id.
pub fn new_request_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Drive one request through the pipeline.
///
/// Fails with [`PipelineError::Validation`] on malformed caller input and
/// [`PipelineError::Recognition`] when the OCR backend fails. Extraction
/// cannot fail; at worst it contributes all-empty fields.
#[instrument(level = "debug", skip_all, fields(request_id = %request_id))]
pub async fn handle_request(
    state: &AppState,
    request: IngressRequest,
    request_id: &str,
) -> Result<ResponseEnvelope, PipelineError> {
    let timestamp = Utc::now().to_rfc3339();

    // Start -> Validated.
    let image = match request.image {
        Some(image) if !image.is_empty() => image,
        _ => {
            return Err(PipelineError::validation(
                r#"campo "image" é obrigatório"#,
            ));
        }
    };
    let fields = match &request.fields_json {
        Some(raw) => FieldSpec::parse_json(raw)?,
        None => FieldSpec::default(),
    };
    let language = request
        .language
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| DEFAULT_LANGUAGE.to_owned());
    let size = image.len();
    info!(
        %request_id,
        file = request.filename.as_deref().unwrap_or("<unnamed>"),
        size,
        %language,
        field_count = fields.len(),
        "request started"
    );

    // Validated -> Recognized.
    let recognition = recognize_image(
        Arc::clone(&state.backend),
        image,
        language.clone(),
        request_id.to_owned(),
    )
    .await?;

    // Recognized -> Extracted. By the extractor's contract this step always
    // succeeds, possibly with an all-empty result.
    let extracted = state
        .extractor
        .extract(&recognition.text, &fields, request_id)
        .await;

    // Extracted -> Assembled -> Done.
    info!(
        %request_id,
        confidence = recognition.confidence,
        words = recognition.word_count,
        "request completed"
    );
    Ok(ResponseEnvelope {
        request_id: request_id.to_owned(),
        texto_original: recognition.text,
        dados_extraidos: extracted,
        campos_solicitados: fields,
        confianca: recognition.confidence,
        palavras: recognition.word_count,
        idioma: language,
        arquivo: request.filename,
        tamanho: size,
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{Value, json};

    use super::*;
    use crate::{
        error::RecognitionError,
        extract::CompletionService,
        ocr::{RawRecognition, RecognitionContext},
    };

    #[derive(Debug)]
    struct FixedTextBackend {
        text: &'static str,
        fail: bool,
    }

    struct FixedTextContext {
        text: &'static str,
        fail: bool,
    }

    impl RecognitionBackend for FixedTextBackend {
        fn open_context(
            &self,
            _language: &str,
        ) -> Result<Box<dyn RecognitionContext>, RecognitionError> {
            Ok(Box::new(FixedTextContext {
                text: self.text,
                fail: self.fail,
            }))
        }
    }

    impl RecognitionContext for FixedTextContext {
        fn recognize(&mut self, _image: &[u8]) -> Result<RawRecognition, RecognitionError> {
            if self.fail {
                return Err(RecognitionError::Engine("broken engine".to_owned()));
            }
            Ok(RawRecognition {
                text: self.text.to_owned(),
                confidence: 91.0,
            })
        }

        fn release(&mut self) -> Result<(), RecognitionError> {
            Ok(())
        }
    }

    #[derive(Debug)]
    struct CannedService(Value);

    #[async_trait]
    impl CompletionService for CannedService {
        async fn complete(&self, _: &str, _: &str, _: &FieldSpec) -> Result<Value> {
            Ok(self.0.clone())
        }
    }

    fn state(text: &'static str, fail: bool, reply: Value) -> AppState {
        AppState {
            backend: Arc::new(FixedTextBackend { text, fail }),
            extractor: Arc::new(Extractor::new(Arc::new(CannedService(reply)))),
        }
    }

    fn upload(image: &[u8]) -> IngressRequest {
        IngressRequest {
            image: Some(image.to_vec()),
            filename: Some("doc.png".to_owned()),
            ..IngressRequest::default()
        }
    }

    #[tokio::test]
    async fn missing_image_is_a_validation_error() {
        let state = state("x", false, json!({}));
        let err = handle_request(&state, IngressRequest::default(), "req-1")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));

        let err = handle_request(&state, upload(b""), "req-2")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[tokio::test]
    async fn malformed_campos_is_a_validation_error() {
        let state = state("x", false, json!({}));
        let mut request = upload(b"img");
        request.fields_json = Some("not-json".to_owned());
        let err = handle_request(&state, request, "req-3").await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[tokio::test]
    async fn recognition_failure_is_a_processing_error() {
        let state = state("x", true, json!({}));
        let err = handle_request(&state, upload(b"img"), "req-4")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Recognition(_)));
    }

    #[tokio::test]
    async fn defaults_are_applied_and_echoed() {
        let state = state(
            "JOANA SILVA nascida em 01/02/1990",
            false,
            json!({ "nome": "Joana", "sobrenome": "Silva", "data_nascimento": "01/02/1990" }),
        );
        let envelope = handle_request(&state, upload(b"img"), "req-5")
            .await
            .unwrap();

        assert_eq!(envelope.request_id, "req-5");
        assert_eq!(envelope.idioma, "por");
        assert_eq!(
            envelope.campos_solicitados.names(),
            &["nome", "sobrenome", "data_nascimento"]
        );
        assert_eq!(envelope.dados_extraidos["nome"], "Joana");
        assert_eq!(envelope.palavras, 5);
        assert_eq!(envelope.tamanho, 3);
        assert_eq!(envelope.arquivo.as_deref(), Some("doc.png"));
    }

    #[tokio::test]
    async fn caller_fields_shape_the_result() {
        let state = state(
            "CPF 123.456.789-00",
            false,
            json!({ "cpf": "123.456.789-00", "extra": "dropped" }),
        );
        let mut request = upload(b"img");
        request.fields_json = Some(r#"["cpf", "rg"]"#.to_owned());
        let envelope = handle_request(&state, request, "req-6").await.unwrap();

        assert_eq!(envelope.campos_solicitados.names(), &["cpf", "rg"]);
        let keys: Vec<_> = envelope.dados_extraidos.keys().collect();
        assert_eq!(keys, ["cpf", "rg"]);
        assert_eq!(envelope.dados_extraidos["rg"], "");
    }
}
