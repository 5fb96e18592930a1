//! # Model Listing Endpoint
//!
//! `GET /models` lists the available model identifiers plus which one currently
//! occupies the registry slot. Loading happens implicitly on the first
//! transcription request that names a model; there is no explicit load
//! endpoint.

use crate::state::AppState;
use crate::transcription::ModelSize;
use actix_web::{web, HttpResponse};
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Serialize)]
pub struct ModelInfoResponse {
    pub id: String,
    pub repo: String,
    pub description: String,
    pub size_mb: u32,
    pub loaded: bool,
}

pub async fn list_models(state: web::Data<AppState>) -> HttpResponse {
    let config = state.get_config();
    let loaded = state.registry.current_model_id();

    let models: Vec<ModelInfoResponse> = ModelSize::ALL
        .iter()
        .map(|size| {
            let id = size.to_string();
            ModelInfoResponse {
                repo: size.repo_name().to_string(),
                description: size.description().to_string(),
                size_mb: size.size_mb(),
                loaded: loaded.as_deref() == Some(id.as_str()),
                id,
            }
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "models": models,
        "current_loaded": loaded,
        "default_model": config.models.default_model
    }))
}
