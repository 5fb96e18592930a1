//! # Transcription Endpoint
//!
//! `POST /transcribe` accepts one multipart audio upload and returns the
//! recognized text synchronously. The whole pipeline (temp files,
//! conversion, inference) runs on a blocking worker thread; the async
//! executor is never tied up by model work.
//!
//! ## Request:
//! Multipart form with a `file` field. Optional query parameters:
//! - `model`: model identifier ("tiny", "base", "small", "medium",
//!   "large"); defaults to the configured default model
//! - `language`: language hint ("en", "de", ...); omitted means the engine
//!   decides
//!
//! ## Response:
//! ```json
//! {"text": "Hello world.", "language": "en", "duration": 2.5}
//! ```

use crate::error::AppError;
use crate::state::AppState;
use actix_multipart::form::bytes::Bytes;
use actix_multipart::form::MultipartForm;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use tracing::info;

/// Multipart payload: one audio file under the `file` field.
#[derive(MultipartForm)]
pub struct TranscribeUpload {
    #[multipart(rename = "file")]
    pub file: Bytes,
}

/// Optional per-request overrides.
#[derive(Debug, Deserialize)]
pub struct TranscribeQuery {
    pub model: Option<String>,
    pub language: Option<String>,
}

pub async fn transcribe(
    state: web::Data<AppState>,
    query: web::Query<TranscribeQuery>,
    form: MultipartForm<TranscribeUpload>,
) -> Result<HttpResponse, AppError> {
    let form = form.into_inner();

    let filename = form
        .file
        .file_name
        .clone()
        .ok_or_else(|| AppError::Validation("upload is missing a filename".to_string()))?;

    let model_id = query
        .model
        .clone()
        .unwrap_or_else(|| state.get_config().models.default_model);
    let language = query.language.clone();

    info!(
        filename = %filename,
        model = %model_id,
        language = ?language,
        "Received transcription upload"
    );

    // Everything below persist-to-disk is blocking work; hand it to the
    // worker pool and await the result.
    let service = state.service.clone();
    let outcome = web::block(move || {
        service.transcribe(
            &form.file.data,
            &filename,
            &model_id,
            language.as_deref(),
        )
    })
    .await
    .map_err(|e| AppError::Internal(format!("blocking task failed: {}", e)))??;

    Ok(HttpResponse::Ok().json(outcome))
}
