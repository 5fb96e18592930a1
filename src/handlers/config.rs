//! # Configuration Endpoints
//!
//! Read and update the runtime configuration. Updates are partial JSON
//! merges validated before they take effect; a rejected update leaves the
//! running configuration untouched.

use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port
            },
            "models": {
                "default_model": config.models.default_model,
                "device": config.models.device,
                "preload": config.models.preload
            },
            "audio": {
                "ffmpeg_path": config.audio.ffmpeg_path,
                "max_upload_mb": config.audio.max_upload_mb
            }
        }
    })))
}

pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config.update_from_json(&json_str)
        .map_err(|e| AppError::Validation(e.to_string()))?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::Validation)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": {
            "server": {
                "host": current_config.server.host,
                "port": current_config.server.port
            },
            "models": {
                "default_model": current_config.models.default_model,
                "device": current_config.models.device,
                "preload": current_config.models.preload
            },
            "audio": {
                "ffmpeg_path": current_config.audio.ffmpeg_path,
                "max_upload_mb": current_config.audio.max_upload_mb
            }
        }
    })))
}
