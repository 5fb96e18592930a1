//! # Application State Management
//!
//! Shared state handed to every HTTP request handler: the runtime
//! configuration, request metrics, and the transcription pipeline itself
//! (registry + orchestrator).
//!
//! Configuration and metrics sit behind `Arc<RwLock<_>>`: many readers or
//! one writer. The registry and service carry their own interior locking,
//! so plain `Arc` handles suffice for them.

use crate::config::AppConfig;
use crate::transcription::{ModelRegistry, TranscriptionService};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// State shared across all HTTP request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration, updatable at runtime
    pub config: Arc<RwLock<AppConfig>>,

    /// Request counters, updated by the metrics middleware
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Single-slot cache of the loaded recognition engine
    pub registry: Arc<ModelRegistry>,

    /// Transcription orchestrator driving each upload end to end
    pub service: Arc<TranscriptionService>,

    /// Server start time, for uptime reporting
    pub start_time: Instant,
}

/// Counters collected across all HTTP requests.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total requests processed since server start
    pub request_count: u64,

    /// Total failed requests since server start
    pub error_count: u64,

    /// Per-endpoint statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Counters for a single endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        registry: Arc<ModelRegistry>,
        service: Arc<TranscriptionService>,
    ) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            registry,
            service,
            start_time: Instant::now(),
        }
    }

    /// Copy of the current configuration. Cloning releases the lock
    /// immediately so other requests are not blocked.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Non-panicking variant for the health endpoint: a poisoned lock is
    /// reported instead of taking the whole handler down.
    pub fn try_get_config(&self) -> Result<AppConfig, String> {
        self.config
            .read()
            .map(|config| config.clone())
            .map_err(|_| "configuration lock poisoned".to_string())
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    /// Record one finished request: bumps the global counters and the
    /// endpoint's own counters under a single lock acquisition.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();

        metrics.request_count += 1;
        if is_error {
            metrics.error_count += 1;
        }

        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Consistent copy of the metrics, taken under the read lock so the
    /// counters do not shift while being serialized.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    /// Non-panicking variant for the health endpoint, mirroring
    /// `try_get_config`.
    pub fn try_get_metrics_snapshot(&self) -> Result<AppMetrics, String> {
        self.metrics
            .read()
            .map(|metrics| AppMetrics {
                request_count: metrics.request_count,
                error_count: metrics.error_count,
                endpoint_metrics: metrics.endpoint_metrics.clone(),
            })
            .map_err(|_| "metrics lock poisoned".to_string())
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate in [0.0, 1.0]; 0.0 when no requests were seen.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
