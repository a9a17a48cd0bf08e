// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Prometheus collectors of the registry server. One instance per process,
//! passed around explicitly.

use std::time::Duration;

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

pub struct ServerMetrics {
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration_seconds: HistogramVec,
    messages_registered_total: IntCounterVec,
    messages_delivered_total: IntCounterVec,
    messages_failed_total: IntCounterVec,
    certificates_issued_total: IntCounter,
    certificates_revoked_total: IntCounter,
}

impl ServerMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("requests_total", "HTTP requests served"),
            &["method", "endpoint", "status"],
        )?;
        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new("request_duration_seconds", "HTTP request latency"),
            &["method", "endpoint"],
        )?;
        let messages_registered_total = IntCounterVec::new(
            Opts::new("messages_registered_total", "Messages registered"),
            &["client_id"],
        )?;
        let messages_delivered_total = IntCounterVec::new(
            Opts::new("messages_delivered_total", "Messages confirmed delivered"),
            &["client_id"],
        )?;
        let messages_failed_total = IntCounterVec::new(
            Opts::new("messages_failed_total", "Messages moved to failed"),
            &["client_id", "reason"],
        )?;
        let certificates_issued_total = IntCounter::new(
            "certificates_issued_total",
            "Client certificates registered",
        )?;
        let certificates_revoked_total = IntCounter::new(
            "certificates_revoked_total",
            "Client certificates revoked",
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;
        registry.register(Box::new(messages_registered_total.clone()))?;
        registry.register(Box::new(messages_delivered_total.clone()))?;
        registry.register(Box::new(messages_failed_total.clone()))?;
        registry.register(Box::new(certificates_issued_total.clone()))?;
        registry.register(Box::new(certificates_revoked_total.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            request_duration_seconds,
            messages_registered_total,
            messages_delivered_total,
            messages_failed_total,
            certificates_issued_total,
            certificates_revoked_total,
        })
    }

    pub fn observe_request(
        &self,
        method: &str,
        endpoint: &str,
        status: u16,
        duration: Duration,
    ) {
        self.requests_total
            .with_label_values(&[method, endpoint, &status.to_string()])
            .inc();
        self.request_duration_seconds
            .with_label_values(&[method, endpoint])
            .observe(duration.as_secs_f64());
    }

    pub fn message_registered(&self, client_id: &str) {
        self.messages_registered_total
            .with_label_values(&[client_id])
            .inc();
    }

    pub fn message_delivered(&self, client_id: &str) {
        self.messages_delivered_total
            .with_label_values(&[client_id])
            .inc();
    }

    pub fn message_failed(&self, client_id: &str, reason: &str) {
        self.messages_failed_total
            .with_label_values(&[client_id, reason])
            .inc();
    }

    pub fn certificate_issued(&self) {
        self.certificates_issued_total.inc();
    }

    pub fn certificate_revoked(&self) {
        self.certificates_revoked_total.inc();
    }

    /// Text exposition for `GET /metrics`.
    pub fn encode(&self) -> String {
        TextEncoder::new()
            .encode_to_string(&self.registry.gather())
            .unwrap_or_default()
    }
}

/// Bounded label for the failure counter; free-form worker errors would
/// explode the series cardinality.
pub fn failure_reason_label(error_message: Option<&str>) -> &'static str {
    match error_message {
        Some(message) if message.contains("max attempts") => "max_attempts_exceeded",
        Some(_) => "delivery_error",
        None => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposition_contains_registered_series() {
        let metrics = ServerMetrics::new().unwrap();
        metrics.message_registered("client_alpha");
        metrics.message_delivered("client_alpha");
        metrics.message_failed("client_alpha", "delivery_error");
        metrics.certificate_issued();
        metrics.observe_request("POST", "/internal/messages/register", 200, Duration::from_millis(5));

        let text = metrics.encode();
        assert!(text.contains("messages_registered_total"));
        assert!(text.contains("client_alpha"));
        assert!(text.contains("requests_total"));
        assert!(text.contains("request_duration_seconds"));
        assert!(text.contains("certificates_issued_total"));
    }

    #[test]
    fn failure_reasons_are_bounded() {
        assert_eq!(
            failure_reason_label(Some("max attempts exceeded")),
            "max_attempts_exceeded"
        );
        assert_eq!(
            failure_reason_label(Some("connection reset by peer")),
            "delivery_error"
        );
        assert_eq!(failure_reason_label(None), "unknown");
    }
}
