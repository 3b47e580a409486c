//! Prometheus metrics for the access gate.
//!
//! Exposes the private registry at `/metrics`. A private registry (rather
//! than the process-global default) lets several `AppState`s coexist, as
//! they do in tests.

use std::time::Duration;

use prometheus::{
    histogram_opts, opts, CounterVec, Encoder, HistogramVec, Registry, TextEncoder,
};

pub struct PrometheusRecorder {
    registry: Registry,
    rate_limit_decisions: CounterVec,
    credential_operations: CounterVec,
    request_duration_seconds: HistogramVec,
}

impl PrometheusRecorder {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let rate_limit_decisions = CounterVec::new(
            opts!(
                "maskgate_rate_limit_decisions_total",
                "Token bucket decisions by scope and outcome"
            ),
            &["scope", "outcome"],
        )?;
        let credential_operations = CounterVec::new(
            opts!(
                "maskgate_credential_operations_total",
                "Credential lifecycle operations by outcome"
            ),
            &["operation", "outcome"],
        )?;
        let request_duration_seconds = HistogramVec::new(
            histogram_opts!(
                "maskgate_request_duration_seconds",
                "Request latency in seconds",
                vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
            ),
            &["route", "status"],
        )?;

        registry.register(Box::new(rate_limit_decisions.clone()))?;
        registry.register(Box::new(credential_operations.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            rate_limit_decisions,
            credential_operations,
            request_duration_seconds,
        })
    }

    /// `scope` is `ip` or `credential`; `outcome` is `allowed`, `denied` or `error`.
    pub fn rate_limit(&self, scope: &str, outcome: &str) {
        self.rate_limit_decisions
            .with_label_values(&[scope, outcome])
            .inc();
    }

    pub fn credential_op(&self, operation: &str, ok: bool) {
        let outcome = if ok { "ok" } else { "error" };
        self.credential_operations
            .with_label_values(&[operation, outcome])
            .inc();
    }

    pub fn request(&self, route: &str, status: u16, elapsed: Duration) {
        self.request_duration_seconds
            .with_label_values(&[route, &status.to_string()])
            .observe(elapsed.as_secs_f64());
    }

    /// Prometheus text exposition of everything recorded so far.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .unwrap_or_default();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorders_are_independent() {
        let a = PrometheusRecorder::new().unwrap();
        let b = PrometheusRecorder::new().unwrap();
        a.rate_limit("ip", "denied");
        assert!(a.encode().contains("maskgate_rate_limit_decisions_total"));
        assert!(!b.encode().contains("outcome=\"denied\""));
    }

    #[test]
    fn test_encode_includes_labels() {
        let rec = PrometheusRecorder::new().unwrap();
        rec.credential_op("rotate", true);
        rec.request("/mask", 200, Duration::from_millis(3));
        let text = rec.encode();
        assert!(text.contains("operation=\"rotate\""));
        assert!(text.contains("maskgate_request_duration_seconds"));
    }
}
