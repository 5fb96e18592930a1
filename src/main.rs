//! # Audio Transcribe Backend - Main Application Entry Point
//!
//! A synchronous speech-to-text HTTP service: clients upload an audio file
//! and receive its transcription in the same response.
//!
//! ## Application Architecture:
//! - **config**: configuration loading (TOML file + environment variables)
//! - **state**: shared application state and request metrics
//! - **error**: the failure taxonomy and HTTP error mapping
//! - **device**: compute device selection for model inference
//! - **audio**: format normalization via an external converter
//! - **transcription**: model loading, the engine cache, and the pipeline
//!   orchestrator
//! - **handlers**: HTTP request handlers
//! - **health**: liveness and metrics endpoints
//! - **middleware**: per-endpoint request metrics

mod audio;
mod config;
mod device;
mod error;
mod handlers;
mod health;
mod middleware;
mod state;
mod transcription;

use actix_cors::Cors;
use actix_multipart::form::MultipartFormConfig;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use audio::FfmpegConverter;
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcription::{ModelRegistry, TranscriptionService, WhisperLoader};

/// Global shutdown flag set by the signal handler task.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!(
        "Starting audio-transcribe-backend v{}",
        env!("CARGO_PKG_VERSION")
    );
    info!(
        "Configuration loaded: {}:{}",
        config.server.host, config.server.port
    );

    // Build the transcription pipeline: device -> loader -> registry ->
    // orchestrator. These live behind Arcs inside the shared state.
    let compute_device = device::device_from_config(&config.models.device);
    info!("Compute device: {}", device::device_label(&compute_device));

    let registry = Arc::new(ModelRegistry::new(Box::new(WhisperLoader::new(
        compute_device,
    ))));
    let converter = Arc::new(FfmpegConverter::new(config.audio.ffmpeg_path.clone()));
    let service = Arc::new(TranscriptionService::new(registry.clone(), converter));

    if config.models.preload {
        let warm_registry = registry.clone();
        let model_id = config.models.default_model.clone();
        // Weights download and device init are blocking work.
        tokio::task::spawn_blocking(move || warm_registry.warm_up(&model_id))
            .await
            .context("model preload task panicked")?
            .context("model preload failed")?;
    }

    let app_state = AppState::new(config.clone(), registry, service);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let upload_limit_bytes = config.audio.max_upload_mb * 1024 * 1024;

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(
                MultipartFormConfig::default()
                    .total_limit(upload_limit_bytes)
                    .memory_limit(upload_limit_bytes),
            )
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/models", web::get().to(handlers::list_models))
                    .route("/transcribe", web::post().to(handlers::transcribe)),
            )
            // Root-level routes for clients that skip the API prefix
            .route("/health", web::get().to(health::health_check))
            .route("/transcribe", web::post().to(handlers::transcribe))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Console logging via tracing. `RUST_LOG` overrides the default filter.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audio_transcribe_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Flip the shutdown flag on SIGTERM or SIGINT so in-flight requests can
/// finish before the server stops.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
