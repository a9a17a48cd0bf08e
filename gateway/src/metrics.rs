// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::time::Duration;

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub struct GatewayMetrics {
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration_seconds: HistogramVec,
    queue_size: IntGauge,
}

impl GatewayMetrics {
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
        let queue_size = IntGauge::new("queue_size", "Work queue length after last enqueue")?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;
        registry.register(Box::new(queue_size.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            request_duration_seconds,
            queue_size,
        })
    }

    pub fn observe_request(&self, method: &str, endpoint: &str, status: u16, duration: Duration) {
        self.requests_total
            .with_label_values(&[method, endpoint, &status.to_string()])
            .inc();
        self.request_duration_seconds
            .with_label_values(&[method, endpoint])
            .observe(duration.as_secs_f64());
    }

    pub fn set_queue_size(&self, length: u64) {
        self.queue_size.set(length as i64);
    }

    pub fn encode(&self) -> String {
        TextEncoder::new()
            .encode_to_string(&self.registry.gather())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposition_contains_queue_size() {
        let metrics = GatewayMetrics::new().unwrap();
        metrics.set_queue_size(17);
        metrics.observe_request("POST", "/api/v1/messages", 202, Duration::from_millis(3));
        let text = metrics.encode();
        assert!(text.contains("queue_size 17"));
        assert!(text.contains("requests_total"));
    }
}
