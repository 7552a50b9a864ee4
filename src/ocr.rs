//! The recognition session manager.
//!
//! Every request gets a brand-new, exclusive OCR execution context. Contexts
//! are never pooled or shared between requests, even for the same language:
//! a corrupted or stuck engine in one request must never be observable from
//! another. The per-request creation cost is the accepted price of that
//! isolation guarantee.

use std::{fmt, sync::Arc};

use leptess::LepTess;

use crate::{error::RecognitionError, prelude::*};

/// What the backend hands back before normalization.
pub struct RawRecognition {
    /// Recognized text, untrimmed.
    pub text: String,

    /// Aggregate confidence, 0-100.
    pub confidence: f32,
}

/// The result of one recognition session.
#[derive(Debug, Clone)]
pub struct RecognitionResult {
    /// Recognized text, trimmed.
    pub text: String,

    /// Aggregate confidence, 0-100.
    pub confidence: f32,

    /// Number of whitespace-separated tokens in the trimmed text.
    pub word_count: usize,
}

/// A factory for exclusive recognition contexts. The process holds exactly
/// one backend; it must never hold state that leaks between contexts.
pub trait RecognitionBackend: fmt::Debug + Send + Sync + 'static {
    /// Create a fresh execution context loaded with the given language data.
    fn open_context(
        &self,
        language: &str,
    ) -> Result<Box<dyn RecognitionContext>, RecognitionError>;
}

/// An owned, request-scoped handle to the OCR engine.
///
/// Contexts are created and consumed entirely on the blocking thread that
/// runs the session, so they don't need to be `Send`.
pub trait RecognitionContext {
    /// Run recognition over raw image bytes.
    fn recognize(&mut self, image: &[u8]) -> Result<RawRecognition, RecognitionError>;

    /// Tear down the engine. Called exactly once per context, on every exit
    /// path. Errors here are logged by the session manager, never surfaced.
    fn release(&mut self) -> Result<(), RecognitionError>;
}

/// Run one isolated recognition session.
///
/// Acquires a context, recognizes, and releases the context before
/// returning, whether recognition succeeded or failed. Recognition is
/// CPU-bound, so the whole session runs on the blocking pool and only the
/// calling request's continuation waits on it.
#[instrument(level = "debug", skip_all, fields(request_id = %request_id, language = %language))]
pub async fn recognize_image(
    backend: Arc<dyn RecognitionBackend>,
    image: Vec<u8>,
    language: String,
    request_id: String,
) -> Result<RecognitionResult, RecognitionError> {
    tokio::task::spawn_blocking(move || {
        debug!(%request_id, %language, "creating exclusive recognition context");
        let mut context = backend.open_context(&language)?;
        debug!(%request_id, "context created, starting recognition");
        let outcome = context.recognize(&image);

        // Release on every exit path. A release failure must never mask the
        // recognition outcome, so it is logged and dropped.
        if let Err(err) = context.release() {
            warn!(%request_id, error = %err, "failed to release recognition context");
        } else {
            debug!(%request_id, "recognition context released");
        }

        let raw = outcome?;
        let text = raw.text.trim().to_owned();
        let word_count = text.split_whitespace().count();
        debug!(%request_id, word_count, confidence = raw.confidence, "recognition finished");
        Ok(RecognitionResult {
            text,
            confidence: raw.confidence.clamp(0.0, 100.0),
            word_count,
        })
    })
    .await
    .map_err(|err| RecognitionError::Engine(format!("recognition task panicked: {err}")))?
}

/// Tesseract backend. Creates one `LepTess` engine per context.
#[derive(Debug, Default)]
pub struct TesseractBackend {
    /// Override for the tessdata directory. `None` lets Tesseract use its
    /// compiled-in default or `TESSDATA_PREFIX`.
    data_path: Option<String>,
}

impl TesseractBackend {
    pub fn new(data_path: Option<String>) -> Self {
        Self { data_path }
    }
}

impl RecognitionBackend for TesseractBackend {
    fn open_context(
        &self,
        language: &str,
    ) -> Result<Box<dyn RecognitionContext>, RecognitionError> {
        let engine = LepTess::new(self.data_path.as_deref(), language)
            .map_err(|err| RecognitionError::Init(err.to_string()))?;
        Ok(Box::new(TesseractContext {
            engine: Some(engine),
        }))
    }
}

struct TesseractContext {
    engine: Option<LepTess>,
}

impl RecognitionContext for TesseractContext {
    fn recognize(&mut self, image: &[u8]) -> Result<RawRecognition, RecognitionError> {
        let engine = self
            .engine
            .as_mut()
            .ok_or_else(|| RecognitionError::Engine("context already released".to_owned()))?;
        engine
            .set_image_from_mem(image)
            .map_err(|err| RecognitionError::ImageDecode(err.to_string()))?;
        let text = engine
            .get_utf8_text()
            .map_err(|err| RecognitionError::Engine(err.to_string()))?;
        let confidence = engine.mean_text_conf() as f32;
        Ok(RawRecognition { text, confidence })
    }

    fn release(&mut self) -> Result<(), RecognitionError> {
        // Dropping the engine frees the underlying Tesseract API handle.
        // Taking it out makes release explicit and idempotent.
        self.engine.take();
        Ok(())
    }
}
