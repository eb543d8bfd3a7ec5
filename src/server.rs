//! HTTP server for document review.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/upload` | Multipart upload (field `file`): extract, chunk, analyze |
//! | `POST` | `/analyze` | JSON `{ "text": "..." }`: chunk and analyze plain text |
//! | `GET`  | `/health` | Health check (version and corpus size) |
//!
//! Both analysis endpoints respond with one entry per chunk, in document
//! order:
//!
//! ```json
//! { "chunks": [
//!   { "index": 0, "chunk": "...", "comment": "<ul>...</ul>", "error": null },
//!   { "index": 1, "chunk": "...", "comment": null,
//!     "error": { "kind": "generation_service", "message": "..." } }
//! ] }
//! ```
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "unsupported_file_type", "message": "..." } }
//! ```
//!
//! Error codes: `unsupported_file_type` (415), `bad_request` (400),
//! `extraction_failed` (422), `chunking_unavailable` (503),
//! `corpus_unavailable` (500), `internal` (500).
//!
//! # CORS
//!
//! Only the origins listed in `[server].cors_origins` are allowed, with
//! credentials. Methods and headers are mirrored from the preflight request.

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

use compliance_harness_core::models::{AnalysisResult, Finding};
use compliance_harness_core::Error;

use crate::analysis::AnalysisContext;
use crate::config::{Config, ServerConfig};
use crate::extract::{extract_text, DocumentKind, ExtractError};

#[derive(Clone)]
struct AppState {
    ctx: AnalysisContext,
}

/// Load the corpus and clients from `config`, then serve until the process
/// is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let ctx = AnalysisContext::from_config(config)?;
    let app = router(ctx, &config.server)?;

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the application router around an existing [`AnalysisContext`].
pub fn router(ctx: AnalysisContext, server: &ServerConfig) -> anyhow::Result<Router> {
    let cors = cors_layer(&server.cors_origins)?;

    Ok(Router::new()
        .route("/upload", post(handle_upload))
        .route("/analyze", post(handle_analyze))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(server.max_upload_bytes))
        .layer(cors)
        .with_state(AppState { ctx }))
}

fn cors_layer(origins: &[String]) -> anyhow::Result<CorsLayer> {
    let origins = origins
        .iter()
        .map(|o| {
            HeaderValue::from_str(o).map_err(|_| anyhow::anyhow!("Invalid CORS origin: {}", o))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true))
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<ExtractError> for AppError {
    fn from(err: ExtractError) -> Self {
        let (status, code) = match err {
            ExtractError::UnsupportedFileType(_) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_file_type")
            }
            _ => (StatusCode::UNPROCESSABLE_ENTITY, "extraction_failed"),
        };
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let (status, code) = match err {
            Error::ChunkingUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "chunking_unavailable")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "corpus_unavailable"),
        };
        tracing::error!(code, error = %err, "request failed");
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

// ============ Analysis responses ============

#[derive(Serialize)]
struct AnalysisResponse {
    chunks: Vec<ChunkResponse>,
}

#[derive(Serialize)]
struct ChunkResponse {
    index: usize,
    chunk: String,
    comment: Option<String>,
    error: Option<ChunkError>,
}

#[derive(Serialize)]
struct ChunkError {
    kind: String,
    message: String,
}

impl From<AnalysisResult> for ChunkResponse {
    fn from(result: AnalysisResult) -> Self {
        let (comment, error) = match result.finding {
            Finding::Ok { text } => (Some(text), None),
            Finding::Error { kind, message } => (None, Some(ChunkError { kind, message })),
        };
        ChunkResponse {
            index: result.chunk_index,
            chunk: result.chunk_text,
            comment,
            error,
        }
    }
}

async fn review(ctx: &AnalysisContext, text: &str) -> Result<Json<AnalysisResponse>, AppError> {
    let results = ctx.analyze_text(text).await?;
    Ok(Json(AnalysisResponse {
        chunks: results.into_iter().map(ChunkResponse::from).collect(),
    }))
}

// ============ POST /upload ============

/// Handler for `POST /upload`.
///
/// Reads the `file` field, extracts its text according to the file name's
/// extension, and analyzes it.
async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<AnalysisResponse>, AppError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| bad_request("file field has no file name"))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(e.body_text()))?;
        upload = Some((file_name, bytes));
        break;
    }

    let (file_name, bytes) = upload.ok_or_else(|| bad_request("missing multipart field: file"))?;
    let kind = DocumentKind::from_file_name(&file_name)?;
    tracing::info!(file = %file_name, bytes = bytes.len(), "document uploaded");

    let text = tokio::task::spawn_blocking(move || extract_text(&bytes, kind))
        .await
        .map_err(|e| AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: e.to_string(),
        })??;

    review(&state.ctx, &text).await
}

// ============ POST /analyze ============

#[derive(Deserialize)]
struct AnalyzeRequest {
    text: String,
}

/// Handler for `POST /analyze`.
async fn handle_analyze(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<Json<AnalysisResponse>, AppError> {
    let Json(request) = payload.map_err(|e| bad_request(e.body_text()))?;
    review(&state.ctx, &request.text).await
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    corpus_entries: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        corpus_entries: state.ctx.index().len(),
    })
}
