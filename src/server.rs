//! Ingress layer: the HTTP surface over the orchestrator.
//!
//! Routing, multipart parsing, size limits, and CORS live here; the
//! orchestrator only ever sees raw bytes plus optional language and field
//! parameters.

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State, multipart::Field},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use crate::{
    error::PipelineError,
    pipeline::{self, AppState, IngressRequest, ResponseEnvelope},
    prelude::*,
};

/// Upload limit. Matches the documented 50 MB contract.
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Image types the ingress accepts, per the declared multipart content type.
const ALLOWED_IMAGE_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/bmp",
    "image/webp",
];

/// Build the router with all routes and layers configured.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ocr", post(ocr_handler))
        .route("/health", get(health_handler))
        .route("/", get(index_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(RequestBodyLimitLayer::new(MAX_UPLOAD_BYTES))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
///
/// Known constraint: there is no admission control or request queueing.
/// Every concurrent upload creates its own OCR context, bounded only by
/// what the host can sustain.
pub async fn serve(host: &str, port: u16, state: AppState) -> Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("campo-ocr listening on http://{addr}");
    info!("usage: curl -X POST http://{addr}/ocr -F \"image=@image.png\" -F \"idioma=por\"");
    axum::serve(listener, create_router(state))
        .await
        .context("server error")?;
    Ok(())
}

/// An error response. The body always carries the request's correlation id
/// and a human-readable message, never an internal backtrace.
struct ApiError {
    status: StatusCode,
    erro: String,
    mensagem: Option<String>,
    request_id: String,
}

impl ApiError {
    fn from_pipeline(err: PipelineError, request_id: &str) -> Self {
        match err {
            PipelineError::Validation(message) => ApiError {
                status: StatusCode::BAD_REQUEST,
                erro: message,
                mensagem: Some(
                    r#"use form-data com o campo "image" contendo o arquivo de imagem"#
                        .to_owned(),
                ),
                request_id: request_id.to_owned(),
            },
            PipelineError::Recognition(err) => ApiError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                erro: "erro ao processar imagem".to_owned(),
                mensagem: Some(err.to_string()),
                request_id: request_id.to_owned(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "erro": self.erro,
            "mensagem": self.mensagem,
            "requestId": self.request_id,
            "timestamp": Utc::now().to_rfc3339(),
        });
        (self.status, Json(body)).into_response()
    }
}

/// `POST /ocr`: the whole pipeline behind one multipart upload.
async fn ocr_handler(State(state): State<AppState>, multipart: Multipart) -> Response {
    let request_id = pipeline::new_request_id();
    match process_upload(&state, multipart, &request_id).await {
        Ok(envelope) => (StatusCode::OK, Json(envelope)).into_response(),
        Err(err) => {
            warn!(%request_id, error = %err, "request failed");
            ApiError::from_pipeline(err, &request_id).into_response()
        }
    }
}

async fn process_upload(
    state: &AppState,
    mut multipart: Multipart,
    request_id: &str,
) -> Result<ResponseEnvelope, PipelineError> {
    let mut request = IngressRequest::default();
    while let Some(field) = multipart.next_field().await.map_err(|err| {
        PipelineError::validation(format!("malformed multipart body: {err}"))
    })? {
        let name = field.name().unwrap_or("").to_owned();
        match name.as_str() {
            "image" => {
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_owned();
                if !ALLOWED_IMAGE_TYPES.contains(&content_type.as_str()) {
                    return Err(PipelineError::validation(
                        "formato de arquivo não suportado; use JPEG, PNG, GIF, BMP ou WebP",
                    ));
                }
                request.filename = field.file_name().map(str::to_owned);
                let data = field.bytes().await.map_err(|err| {
                    PipelineError::validation(format!("failed to read image field: {err}"))
                })?;
                request.image = Some(data.to_vec());
            }
            "idioma" => request.language = Some(text_field(field).await?),
            "campos" => request.fields_json = Some(text_field(field).await?),
            _ => {}
        }
    }
    pipeline::handle_request(state, request, request_id).await
}

async fn text_field(field: Field<'_>) -> Result<String, PipelineError> {
    let name = field.name().unwrap_or("").to_owned();
    field.text().await.map_err(|err| {
        PipelineError::validation(format!("failed to read field {name:?}: {err}"))
    })
}

/// `GET /health`: liveness probe, no pipeline interaction.
async fn health_handler() -> Response {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
    .into_response()
}

/// `GET /`: static capability description.
async fn index_handler() -> Response {
    Json(json!({
        "status": "online",
        "versao": env!("CARGO_PKG_VERSION"),
        "nome": "API de OCR - conversor de imagem para texto com extração de dados via IA",
        "endpoints": {
            "ocr": {
                "metodo": "POST",
                "url": "/ocr",
                "content_type": "multipart/form-data",
                "parametros": {
                    "image": "file (imagem) - obrigatório",
                    "idioma": "string - opcional (padrão: \"por\")",
                    "campos": "array JSON de nomes de campos - opcional",
                },
                "formatos_suportados": ["JPEG", "PNG", "GIF", "BMP", "WebP"],
                "tamanho_maximo": "50MB",
            },
        },
        "idiomas_suportados": ["por", "eng", "spa", "fra", "deu", "ita", "por+eng"],
        "campos_padrao": crate::fields::DEFAULT_FIELDS,
    }))
    .into_response()
}
