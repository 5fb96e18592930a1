//! # Error Handling
//!
//! Defines the failure taxonomy for the transcription service and how each
//! kind is converted to an HTTP response.
//!
//! ## Failure kinds:
//! - **Validation** (400): the client sent a bad upload (missing filename,
//!   unsupported extension); nothing to clean up
//! - **ModelLoad** (500): constructing the recognition engine failed,
//!   potentially transient (weights download, device init)
//! - **Conversion** (500): the external audio converter failed or exited
//!   nonzero; carries the captured diagnostic output
//! - **Transcription** (500): the engine raised while processing the audio
//! - **Internal** (500): anything unexpected, caught at the boundary
//!
//! Temp-file cleanup failures are deliberately NOT represented here: they are
//! logged where they happen and never surfaced to the caller.
//!
//! All failure responses share one JSON shape: `{"error": ..., "detail": ...}`.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Application-level error type covering every request failure kind.
#[derive(Debug)]
pub enum AppError {
    /// Client sent an invalid upload (missing filename, unsupported format)
    Validation(String),

    /// Recognition engine construction failed for the requested model
    ModelLoad(String),

    /// External audio conversion process failed; message holds its diagnostics
    Conversion(String),

    /// The recognition engine raised while processing the audio
    Transcription(String),

    /// Unexpected server-side failure
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(msg) => write!(f, "Validation error: {}", msg),
            AppError::ModelLoad(msg) => write!(f, "Model load error: {}", msg),
            AppError::Conversion(msg) => write!(f, "Conversion error: {}", msg),
            AppError::Transcription(msg) => write!(f, "Transcription error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        // Map each failure kind to (status, stable label, diagnostic detail).
        // The label is what clients key on; the detail carries the underlying
        // message when one exists.
        let (status, error, detail) = match self {
            AppError::Validation(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                msg.clone(),
                None,
            ),
            AppError::ModelLoad(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "model load failed".to_string(),
                Some(msg.clone()),
            ),
            AppError::Conversion(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "audio conversion failed".to_string(),
                Some(msg.clone()),
            ),
            AppError::Transcription(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "transcription failed".to_string(),
                Some(msg.clone()),
            ),
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
                Some(msg.clone()),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": error,
            "detail": detail,
        }))
    }
}

/// Anything that bubbles up as an anyhow error without a more specific kind
/// is reported as a generic internal failure.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Malformed JSON bodies (runtime config updates) are the client's fault.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Validation(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Filesystem failures in the request pipeline (temp-file writes) have no
/// client-facing meaning beyond "something broke server-side".
impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_validation_maps_to_bad_request() {
        let err = AppError::Validation("unsupported audio format 'txt'".to_string());
        assert_eq!(err.error_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_server_side_kinds_map_to_internal_error() {
        for err in [
            AppError::ModelLoad("weights download failed".to_string()),
            AppError::Conversion("ffmpeg exited with code 1".to_string()),
            AppError::Transcription("decoder failure".to_string()),
            AppError::Internal("oops".to_string()),
        ] {
            assert_eq!(
                err.error_response().status(),
                StatusCode::INTERNAL_SERVER_ERROR,
                "wrong status for {:?}",
                err
            );
        }
    }

    #[test]
    fn test_anyhow_conversion_is_internal() {
        let err: AppError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, AppError::Internal(msg) if msg == "boom"));
    }
}
