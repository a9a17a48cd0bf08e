// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::time::Duration;

use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

pub struct WorkerMetrics {
    registry: Registry,
    delivered_total: IntCounterVec,
    failed_total: IntCounterVec,
    orphaned_total: IntCounterVec,
    delivery_duration_seconds: HistogramVec,
    queue_size: IntGauge,
    active_workers: IntGauge,
}

impl WorkerMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let delivered_total = IntCounterVec::new(
            Opts::new("worker_messages_delivered_total", "Deliveries confirmed"),
            &["worker_id"],
        )?;
        let failed_total = IntCounterVec::new(
            Opts::new("worker_messages_failed_total", "Deliveries given up"),
            &["worker_id", "reason"],
        )?;
        let orphaned_total = IntCounterVec::new(
            Opts::new(
                "worker_messages_orphaned_total",
                "Queue items without a registry row",
            ),
            &["worker_id"],
        )?;
        let delivery_duration_seconds = HistogramVec::new(
            HistogramOpts::new("worker_delivery_duration_seconds", "Delivery latency"),
            &["worker_id"],
        )?;
        let queue_size = IntGauge::new("queue_size", "Work queue length at last poll")?;
        let active_workers = IntGauge::new("active_workers", "Deliveries in flight")?;

        registry.register(Box::new(delivered_total.clone()))?;
        registry.register(Box::new(failed_total.clone()))?;
        registry.register(Box::new(orphaned_total.clone()))?;
        registry.register(Box::new(delivery_duration_seconds.clone()))?;
        registry.register(Box::new(queue_size.clone()))?;
        registry.register(Box::new(active_workers.clone()))?;

        Ok(Self {
            registry,
            delivered_total,
            failed_total,
            orphaned_total,
            delivery_duration_seconds,
            queue_size,
            active_workers,
        })
    }

    pub fn delivered(&self, worker_id: &str) {
        self.delivered_total.with_label_values(&[worker_id]).inc();
    }

    pub fn failed(&self, worker_id: &str, reason: &str) {
        self.failed_total
            .with_label_values(&[worker_id, reason])
            .inc();
    }

    pub fn orphaned(&self, worker_id: &str) {
        self.orphaned_total.with_label_values(&[worker_id]).inc();
    }

    pub fn observe_delivery(&self, worker_id: &str, duration: Duration) {
        self.delivery_duration_seconds
            .with_label_values(&[worker_id])
            .observe(duration.as_secs_f64());
    }

    pub fn set_queue_size(&self, length: u64) {
        self.queue_size.set(length as i64);
    }

    pub fn task_started(&self) {
        self.active_workers.inc();
    }

    pub fn task_finished(&self) {
        self.active_workers.dec();
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
    fn exposition_contains_worker_series() {
        let metrics = WorkerMetrics::new().unwrap();
        metrics.delivered("worker-1");
        metrics.failed("worker-1", "max_attempts_exceeded");
        metrics.orphaned("worker-1");
        metrics.observe_delivery("worker-1", Duration::from_millis(12));
        metrics.set_queue_size(3);
        metrics.task_started();

        let text = metrics.encode();
        assert!(text.contains("worker_messages_delivered_total"));
        assert!(text.contains("worker_messages_failed_total"));
        assert!(text.contains("worker_delivery_duration_seconds"));
        assert!(text.contains("queue_size 3"));
        assert!(text.contains("active_workers 1"));
    }
}
