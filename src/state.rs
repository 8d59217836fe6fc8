//! # Application State Management
//!
//! Shared state for the relay server's request handlers.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: Allows every worker's copy of the app to share the same data
//! - **Memory safety**: Data is freed when the last reference is dropped
//!
//! ### RwLock (Reader-Writer Lock)
//! - **Purpose**: Many readers OR one writer at a time
//! - **Why needed**: Every request updates the metrics while `/metrics` reads them
//!
//! The configuration and the remote API client never change after startup, so
//! they are shared without a lock.

use crate::config::AppConfig;
use crate::vapi::VapiClient;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The main application state that's shared across all HTTP request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Configuration loaded at startup (read-only afterwards)
    pub config: Arc<AppConfig>,

    /// Client for the remote calling API; cheap to clone, pools connections internally
    pub vapi: VapiClient,

    /// Request and relay counters, updated by middleware and handlers
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Counters collected across all HTTP requests.
///
/// ## Why these metrics matter:
/// - **request_count / error_count**: Overall load and reliability
/// - **calls_initiated**: Real phone calls placed through the relay
/// - **control_messages_sent**: Messages injected into live calls
/// - **remote_failures**: Requests the remote API rejected or never answered
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub calls_initiated: u64,
    pub control_messages_sent: u64,
    pub remote_failures: u64,

    /// Key: endpoint name (e.g., "POST /initiate-call")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

/// Which relay outcome a handler reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEvent {
    CallInitiated,
    ControlSent,
    RemoteFailure,
}

impl AppState {
    /// Create a new AppState, building the remote API client from the config.
    pub fn new(config: AppConfig) -> Self {
        let vapi = VapiClient::new(&config.vapi);
        Self {
            config: Arc::new(config),
            vapi,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Record one finished request.
    ///
    /// ## Poisoned locks:
    /// A panic while holding the lock only leaves counters half-updated, so the
    /// poisoned guard is recovered instead of failing the request.
    pub fn record_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap_or_else(|e| e.into_inner());
        metrics.request_count += 1;
        if is_error {
            metrics.error_count += 1;
        }

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Count a relay outcome reported by a handler.
    pub fn record_relay(&self, event: RelayEvent) {
        let mut metrics = self.metrics.write().unwrap_or_else(|e| e.into_inner());
        match event {
            RelayEvent::CallInitiated => metrics.calls_initiated += 1,
            RelayEvent::ControlSent => metrics.control_messages_sent += 1,
            RelayEvent::RemoteFailure => metrics.remote_failures += 1,
        }
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    ///
    /// Cloning releases the lock before the response is serialized.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Get server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average = Total Duration ÷ Number of Requests
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error Rate = Number of Errors ÷ Total Requests (0.0 to 1.0)
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
