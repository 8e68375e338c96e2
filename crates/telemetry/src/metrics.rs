//! Prometheus collectors for request latency, in-flight load, per-component
//! stage timings and security outcomes.

use crate::TelemetryError;
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Content type of [`Metrics::encode`] output.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

pub struct Metrics {
    registry: Registry,
    request_duration: HistogramVec,
    in_flight: IntGauge,
    prompt_render_duration: HistogramVec,
    memory_search_duration: HistogramVec,
    drift_score: GaugeVec,
    prompt_injection_detections: IntCounter,
    policy_violations: IntCounter,
    blocked_responses: IntCounter,
    rate_limited: IntCounter,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("in_flight", &self.in_flight.get())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create and register every collector in a fresh registry.
    pub fn new() -> Result<Self, TelemetryError> {
        let registry = Registry::new();

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "cmp_http_request_duration_seconds",
                "Duration of HTTP requests.",
            ),
            &["route", "status"],
        )?;
        let in_flight = IntGauge::new(
            "cmp_http_in_flight_requests",
            "Number of HTTP requests being served.",
        )?;
        let prompt_render_duration = HistogramVec::new(
            HistogramOpts::new(
                "cmp_prompt_render_duration_seconds",
                "Duration of prompt template rendering.",
            ),
            &["component"],
        )?;
        let memory_search_duration = HistogramVec::new(
            HistogramOpts::new(
                "cmp_memory_search_duration_seconds",
                "Duration of memory store searches.",
            ),
            &["component"],
        )?;
        let drift_score = GaugeVec::new(
            Opts::new("cmp_drift_score", "Latest drift score per component."),
            &["component"],
        )?;
        let prompt_injection_detections = IntCounter::new(
            "cmp_security_prompt_injection_detections_total",
            "Total number of detected potential prompt injection attempts.",
        )?;
        let policy_violations = IntCounter::new(
            "cmp_security_policy_violations_total",
            "Total number of responses blocked due to policy violations.",
        )?;
        let blocked_responses = IntCounter::new(
            "cmp_security_blocked_responses_total",
            "Total number of blocked responses.",
        )?;
        let rate_limited = IntCounter::new(
            "cmp_security_rate_limited_total",
            "Total number of requests rejected by the rate limiter.",
        )?;

        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(in_flight.clone()))?;
        registry.register(Box::new(prompt_render_duration.clone()))?;
        registry.register(Box::new(memory_search_duration.clone()))?;
        registry.register(Box::new(drift_score.clone()))?;
        registry.register(Box::new(prompt_injection_detections.clone()))?;
        registry.register(Box::new(policy_violations.clone()))?;
        registry.register(Box::new(blocked_responses.clone()))?;
        registry.register(Box::new(rate_limited.clone()))?;

        Ok(Self {
            registry,
            request_duration,
            in_flight,
            prompt_render_duration,
            memory_search_duration,
            drift_score,
            prompt_injection_detections,
            policy_violations,
            blocked_responses,
            rate_limited,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn observe_request(&self, route: &str, status: u16, elapsed: Duration) {
        self.request_duration
            .with_label_values(&[route, &status.to_string()])
            .observe(elapsed.as_secs_f64());
    }

    /// Count a request as in flight until the guard drops.
    pub fn track_in_flight(&self) -> InFlightGuard {
        self.in_flight.inc();
        InFlightGuard {
            gauge: self.in_flight.clone(),
        }
    }

    pub fn in_flight(&self) -> i64 {
        self.in_flight.get()
    }

    pub fn observe_render(&self, component: &str, elapsed: Duration) {
        self.prompt_render_duration
            .with_label_values(&[component])
            .observe(elapsed.as_secs_f64());
    }

    pub fn observe_memory_search(&self, component: &str, elapsed: Duration) {
        self.memory_search_duration
            .with_label_values(&[component])
            .observe(elapsed.as_secs_f64());
    }

    pub fn set_drift_score(&self, component: &str, score: f64) {
        self.drift_score.with_label_values(&[component]).set(score);
    }

    pub fn inc_prompt_injection(&self) {
        self.prompt_injection_detections.inc();
    }

    pub fn inc_policy_violation(&self) {
        self.policy_violations.inc();
    }

    pub fn inc_blocked_response(&self) {
        self.blocked_responses.inc();
    }

    pub fn inc_rate_limited(&self) {
        self.rate_limited.inc();
    }

    /// Prometheus text exposition of every collector.
    pub fn encode(&self) -> Result<String, TelemetryError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Decrements the in-flight gauge on drop.
#[must_use = "the request stops counting as in flight when the guard drops"]
pub struct InFlightGuard {
    gauge: IntGauge,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}
