//! # Metrics Middleware
//!
//! Records every request into the shared state once it finishes: global
//! request/error counters plus per-endpoint durations, all through a
//! single `record_endpoint_request` call. A request counts as an error
//! when the response is 4xx/5xx or the handler itself failed.

use crate::state::AppState;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};

pub struct MetricsMiddleware;

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService { service }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let started = Instant::now();
        let endpoint = format!("{} {}", req.method(), req.uri().path());

        // Grab the state handle up front so the request is counted even
        // when the handler errors out and no response exists.
        let state = req.app_data::<web::Data<AppState>>().cloned();

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;

            if let Some(state) = state {
                let is_error = match &result {
                    Ok(response) => {
                        response.status().is_client_error()
                            || response.status().is_server_error()
                    }
                    Err(_) => true,
                };
                let duration_ms = started.elapsed().as_millis() as u64;
                state.record_endpoint_request(&endpoint, duration_ms, is_error);
            }

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{ConversionOutcome, FormatNormalizer};
    use crate::config::AppConfig;
    use crate::transcription::engine::{EngineLoader, RecognitionEngine};
    use crate::transcription::{ModelRegistry, TranscriptionService};
    use actix_web::{test, App, HttpResponse};
    use anyhow::{anyhow, Result};
    use std::path::Path;
    use std::sync::Arc;

    struct NoopLoader;

    impl EngineLoader for NoopLoader {
        fn load(&self, model_id: &str) -> Result<Arc<dyn RecognitionEngine>> {
            Err(anyhow!("no engine in tests for '{}'", model_id))
        }
    }

    struct NoopNormalizer;

    impl FormatNormalizer for NoopNormalizer {
        fn normalize(&self, _source: &Path, _target: &Path) -> std::io::Result<ConversionOutcome> {
            Ok(ConversionOutcome {
                success: true,
                stderr: String::new(),
            })
        }
    }

    fn test_state() -> AppState {
        let registry = Arc::new(ModelRegistry::new(Box::new(NoopLoader)));
        let service = Arc::new(TranscriptionService::new(
            registry.clone(),
            Arc::new(NoopNormalizer),
        ));
        AppState::new(AppConfig::default(), registry, service)
    }

    #[actix_web::test]
    async fn test_requests_and_errors_are_recorded() {
        let state = test_state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .wrap(MetricsMiddleware)
                .route("/ok", web::get().to(|| async { HttpResponse::Ok().finish() }))
                .route(
                    "/boom",
                    web::get().to(|| async { HttpResponse::InternalServerError().finish() }),
                ),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/ok").to_request()).await;
        assert!(resp.status().is_success());
        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/boom").to_request()).await;
        assert!(resp.status().is_server_error());

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.request_count, 2);
        assert_eq!(snapshot.error_count, 1);
        assert_eq!(snapshot.endpoint_metrics["GET /ok"].request_count, 1);
        assert_eq!(snapshot.endpoint_metrics["GET /ok"].error_count, 0);
        assert_eq!(snapshot.endpoint_metrics["GET /boom"].error_count, 1);
    }
}
