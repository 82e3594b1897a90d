//! # Application State Management
//!
//! Shared state accessed by every HTTP handler and every bridge actor:
//! the configuration, the call registry, and process-wide metrics.
//!
//! ## Thread Safety Pattern:
//! `Arc<RwLock<T>>` for everything mutable — many readers or one writer,
//! clones taken to keep lock hold times short. The registry carries its
//! own interior locking and is shared as a plain `Arc`.

use crate::config::AppConfig;
use crate::registry::CallRegistry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The main application state shared across all request handlers and
/// bridge actors.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be reloaded at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Process-wide call-session table
    pub registry: Arc<CallRegistry>,

    /// Performance metrics (updated by every request and relayed frame)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Counters collected across the process lifetime.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total HTTP requests processed since start
    pub request_count: u64,

    /// Total HTTP errors since start
    pub error_count: u64,

    /// Calls that reached the streaming phase
    pub calls_started: u64,

    /// Calls fully torn down
    pub calls_completed: u64,

    /// Caller audio frames accepted from the telephony leg
    pub frames_from_caller: u64,

    /// Caller frames withheld from the agent by the voice gate
    pub frames_gated: u64,

    /// Agent audio frames relayed back to the telephony leg
    pub frames_to_caller: u64,

    /// Per-endpoint statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let registry = Arc::new(CallRegistry::new(config.audio.buffer_window_ms));

        Self {
            config: Arc::new(RwLock::new(config)),
            registry,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration. Cloning releases the lock
    /// immediately so readers never block each other for long.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    pub fn increment_request_count(&self) {
        self.metrics.write().unwrap().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics.write().unwrap().error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();
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

    pub fn record_call_started(&self) {
        self.metrics.write().unwrap().calls_started += 1;
    }

    pub fn record_call_completed(&self) {
        self.metrics.write().unwrap().calls_completed += 1;
    }

    pub fn record_frame_from_caller(&self) {
        self.metrics.write().unwrap().frames_from_caller += 1;
    }

    pub fn record_frame_gated(&self) {
        self.metrics.write().unwrap().frames_gated += 1;
    }

    pub fn record_frame_to_caller(&self) {
        self.metrics.write().unwrap().frames_to_caller += 1;
    }

    /// Consistent snapshot of the metrics for the operational endpoints.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            calls_started: metrics.calls_started,
            calls_completed: metrics.calls_completed,
            frames_from_caller: metrics.frames_from_caller,
            frames_gated: metrics.frames_gated,
            frames_to_caller: metrics.frames_to_caller,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
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

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
