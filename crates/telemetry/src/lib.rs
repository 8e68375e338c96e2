//! Request metrics for the CMP runtime.
//!
//! Every [`Metrics`] owns its own Prometheus registry, so independent
//! server instances (and tests) never share counters.

pub mod metrics;

pub use metrics::{CONTENT_TYPE, InFlightGuard, Metrics};

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("metrics output is not UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}
