//! Per-request tracing and metrics.
//!
//! Logs every request with its outcome and records the duration against the
//! endpoint in [`AppState`]. Metrics are keyed on the matched route pattern, so
//! requests that match no route share the [`UNMATCHED_ENDPOINT`] entry. Request
//! bodies are never logged: they carry phone numbers and customer names.

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
use tracing::{error, info, warn};

/// Metrics key for requests that match no registered route.
pub const UNMATCHED_ENDPOINT: &str = "unmatched";

pub struct RequestTracing;

impl<S, B> Transform<S, ServiceRequest> for RequestTracing
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestTracingMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestTracingMiddleware { service }))
    }
}

pub struct RequestTracingMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for RequestTracingMiddleware<S>
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
        let start_time = Instant::now();
        let endpoint = format!("{} {}", req.method(), req.path());
        let metric_key = match req.match_pattern() {
            Some(pattern) => format!("{} {}", req.method(), pattern),
            None => UNMATCHED_ENDPOINT.to_string(),
        };
        let state = req.app_data::<web::Data<AppState>>().cloned();

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = start_time.elapsed().as_millis() as u64;

            let is_error = match &result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_server_error() {
                        warn!(endpoint = %endpoint, status = status.as_u16(), duration_ms, "Request failed");
                    } else {
                        info!(endpoint = %endpoint, status = status.as_u16(), duration_ms, "Request completed");
                    }
                    status.is_client_error() || status.is_server_error()
                }
                Err(err) => {
                    error!(endpoint = %endpoint, duration_ms, error = %err, "Request errored");
                    true
                }
            };

            if let Some(state) = state {
                state.record_request(&metric_key, duration_ms, is_error);
            }

            result
        })
    }
}
