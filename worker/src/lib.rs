// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Relay delivery worker pool.
//!
//! One polling loop feeds a bounded set of in-flight delivery tasks. No
//! ordering is guaranteed across workers; messages from the same client may
//! overtake each other.

pub mod metrics;

use std::{net::TcpListener, sync::Arc, time::Duration};

use actix_web::{
    dev::Server,
    web::{self, Data},
    App, HttpResponse, HttpServer, Responder,
};
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use relayapiclient::{DeliverError, RegistryApi, UpdateStatusError};
use relaybackend::{queue::WorkQueue, settings::WorkerSettings};
use relaycommon::{
    endpoint_paths::{ENDPOINT_HEALTH, ENDPOINT_METRICS},
    identifiers::WorkerId,
    messages::{DeliverMessageRequest, HealthReport, UpdateStatusRequest, WorkItem},
    status::MessageStatus,
};

use crate::metrics::WorkerMetrics;

/// Error recorded when a message exhausts its attempt budget.
pub const MAX_ATTEMPTS_ERROR: &str = "max attempts exceeded";

#[derive(Clone)]
pub struct WorkerPoolConfig {
    pub worker_id: WorkerId,
    pub concurrency: usize,
    pub retry_interval: Duration,
    pub max_attempts: i32,
    pub pop_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl From<&WorkerSettings> for WorkerPoolConfig {
    fn from(settings: &WorkerSettings) -> Self {
        Self {
            worker_id: WorkerId::new(settings.worker_id.clone()),
            concurrency: settings.concurrency,
            retry_interval: Duration::from_secs(settings.retry_interval_secs),
            max_attempts: settings.max_attempts,
            pop_timeout: Duration::from_secs(settings.pop_timeout_secs),
            shutdown_grace: Duration::from_secs(settings.shutdown_grace_secs),
        }
    }
}

/// The bounded delivery pool.
pub struct WorkerPool {
    context: DeliveryContext,
    concurrency: usize,
    pop_timeout: Duration,
    shutdown_grace: Duration,
}

impl WorkerPool {
    pub fn new(
        config: WorkerPoolConfig,
        queue: Arc<dyn WorkQueue>,
        api: Arc<dyn RegistryApi>,
        metrics: Arc<WorkerMetrics>,
    ) -> Self {
        Self {
            concurrency: config.concurrency,
            pop_timeout: config.pop_timeout,
            shutdown_grace: config.shutdown_grace,
            context: DeliveryContext {
                worker_id: config.worker_id,
                max_attempts: config.max_attempts,
                retry_interval: config.retry_interval,
                queue,
                api,
                metrics,
            },
        }
    }

    /// Consume the queue until `shutdown` fires. The poll loop stops taking
    /// new items immediately; in-flight deliveries get the grace period,
    /// after which they are abandoned (their rows stay `queued` or
    /// `processing` and reappear after a restart or operator requeue).
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            worker_id = %self.context.worker_id,
            concurrency = self.concurrency,
            "delivery worker pool starting"
        );
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let tracker = TaskTracker::new();

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            if let Ok(length) = self.context.queue.len().await {
                self.context.metrics.set_queue_size(length);
            }

            let popped = tokio::select! {
                _ = shutdown.cancelled() => break,
                popped = self.context.queue.blocking_pop(self.pop_timeout) => popped,
            };
            match popped {
                Ok(Some(record)) => {
                    let context = self.context.clone();
                    let item_shutdown = shutdown.clone();
                    tracker.spawn(async move {
                        context.metrics.task_started();
                        let outcome = context.handle_record(record).await;
                        context.metrics.task_finished();
                        if let Outcome::Retry(item) = outcome {
                            // The permit must not be held through the
                            // retry sleep.
                            let retry_context = context.clone();
                            tokio::spawn(async move {
                                retry_context.schedule_retry(item, item_shutdown).await;
                            });
                        }
                        drop(permit);
                    });
                }
                Ok(None) => drop(permit),
                Err(e) => {
                    warn!(error = %e, "queue pop failed");
                    drop(permit);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }

        tracker.close();
        if tokio::time::timeout(self.shutdown_grace, tracker.wait())
            .await
            .is_err()
        {
            warn!("grace period elapsed; abandoning in-flight deliveries");
        }
        info!("delivery worker pool stopped");
    }
}

/// Result of one popped record.
#[derive(Debug)]
enum Outcome {
    /// Confirmed now, or already confirmed by someone else.
    Delivered,
    /// No registry row; dropped without retry.
    Orphaned,
    /// Attempt budget exhausted; moved to terminal `failed`.
    Failed,
    /// Transient failure; the carried item has the incremented count.
    Retry(WorkItem),
    /// The record did not parse; dropped.
    Malformed,
}

#[derive(Clone)]
struct DeliveryContext {
    worker_id: WorkerId,
    max_attempts: i32,
    retry_interval: Duration,
    queue: Arc<dyn WorkQueue>,
    api: Arc<dyn RegistryApi>,
    metrics: Arc<WorkerMetrics>,
}

impl DeliveryContext {
    async fn handle_record(&self, record: Vec<u8>) -> Outcome {
        let item = match WorkItem::from_bytes(&record) {
            Ok(item) => item,
            Err(e) => {
                warn!(error = %e, "dropping unparseable queue record");
                return Outcome::Malformed;
            }
        };
        debug!(
            message_id = %item.message_id,
            attempt = item.attempt_count,
            queue_wait_secs = item.queue_wait(Utc::now()).num_seconds(),
            "picked up work item"
        );

        if item.attempt_count >= self.max_attempts {
            return self.give_up(&item).await;
        }

        let started = std::time::Instant::now();
        let result = self
            .api
            .deliver_message(&DeliverMessageRequest {
                message_id: item.message_id,
                worker_id: self.worker_id.clone(),
            })
            .await;
        self.metrics
            .observe_delivery(self.worker_id.as_str(), started.elapsed());

        match result {
            Ok(response) => {
                self.metrics.delivered(self.worker_id.as_str());
                info!(
                    message_id = %item.message_id,
                    delivered_at = %response.delivered_at,
                    "delivery confirmed"
                );
                Outcome::Delivered
            }
            Err(DeliverError::AlreadyCompleted) => {
                // At-most-one confirmation: someone else won the race.
                debug!(message_id = %item.message_id, "message already completed");
                Outcome::Delivered
            }
            Err(DeliverError::NotFound) => {
                self.metrics.orphaned(self.worker_id.as_str());
                warn!(message_id = %item.message_id, "orphan queue item dropped");
                Outcome::Orphaned
            }
            Err(DeliverError::Transient(error)) => self.prepare_retry(item, error).await,
        }
    }

    async fn prepare_retry(&self, mut item: WorkItem, error: String) -> Outcome {
        item.attempt_count += 1;
        let update = UpdateStatusRequest {
            status: MessageStatus::Queued,
            attempt_count: item.attempt_count,
            error_message: Some(error.clone()),
        };
        match self.api.update_status(item.message_id, &update).await {
            Ok(_) => {}
            Err(UpdateStatusError::NotFound) => {
                self.metrics.orphaned(self.worker_id.as_str());
                warn!(message_id = %item.message_id, "orphan queue item dropped on retry");
                return Outcome::Orphaned;
            }
            Err(e) => {
                // The item still carries the new attempt count; the next
                // update reconciles the registry.
                warn!(message_id = %item.message_id, error = %e, "status update failed");
            }
        }
        warn!(
            message_id = %item.message_id,
            attempt = item.attempt_count,
            error = %error,
            "delivery failed, scheduling retry"
        );
        Outcome::Retry(item)
    }

    async fn give_up(&self, item: &WorkItem) -> Outcome {
        let update = UpdateStatusRequest {
            status: MessageStatus::Failed,
            attempt_count: item.attempt_count,
            error_message: Some(MAX_ATTEMPTS_ERROR.to_owned()),
        };
        if let Err(e) = self.api.update_status(item.message_id, &update).await {
            warn!(message_id = %item.message_id, error = %e, "failed to mark message failed");
        }
        self.metrics
            .failed(self.worker_id.as_str(), "max_attempts_exceeded");
        warn!(
            message_id = %item.message_id,
            attempt = item.attempt_count,
            "attempt budget exhausted, message failed"
        );
        Outcome::Failed
    }

    /// Push the item back after the retry interval. Nothing is rescheduled
    /// once shutdown has begun.
    async fn schedule_retry(&self, item: WorkItem, shutdown: CancellationToken) {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!(message_id = %item.message_id, "shutdown in progress, not rescheduling");
                return;
            }
            _ = tokio::time::sleep(self.retry_interval) => {}
        }
        match item.to_bytes() {
            Ok(record) => {
                if let Err(e) = self.queue.push(&record).await {
                    warn!(message_id = %item.message_id, error = %e, "failed to requeue item");
                }
            }
            Err(e) => warn!(message_id = %item.message_id, error = %e, "failed to serialize item"),
        }
    }
}

// Operational endpoints of the worker process.

async fn ops_health(queue: Data<dyn WorkQueue>) -> impl Responder {
    let report = HealthReport::from_components(vec![("queue".to_owned(), queue.healthy().await)]);
    if report.is_healthy() {
        HttpResponse::Ok().json(report)
    } else {
        HttpResponse::ServiceUnavailable().json(report)
    }
}

async fn ops_metrics(metrics: Data<WorkerMetrics>) -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics.encode())
}

/// Health and metrics listener next to the pool.
pub fn run_ops_server(
    listener: TcpListener,
    queue: Arc<dyn WorkQueue>,
    metrics: Arc<WorkerMetrics>,
) -> Result<Server, std::io::Error> {
    let queue_data: Data<dyn WorkQueue> = Data::from(queue);
    let metrics_data: Data<WorkerMetrics> = Data::from(metrics);
    let server = HttpServer::new(move || {
        App::new()
            .app_data(queue_data.clone())
            .app_data(metrics_data.clone())
            .route(ENDPOINT_HEALTH, web::get().to(ops_health))
            .route(ENDPOINT_METRICS, web::get().to(ops_metrics))
    })
    .listen(listener)?
    .run();
    Ok(server)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use relayapiclient::{RegisterError, UpdateStatusError};
    use relaybackend::queue::MemoryWorkQueue;
    use relaycommon::{
        identifiers::MessageId,
        messages::{
            DeliverMessageResponse, RegisterMessageRequest, RegisterMessageResponse,
            UpdateStatusResponse,
        },
    };

    use super::*;

    #[derive(Default)]
    struct StubApi {
        deliver_script: Mutex<VecDeque<Result<(), DeliverError>>>,
        deliver_calls: Mutex<Vec<DeliverMessageRequest>>,
        status_calls: Mutex<Vec<(MessageId, UpdateStatusRequest)>>,
    }

    impl StubApi {
        fn scripted(results: Vec<Result<(), DeliverError>>) -> Self {
            Self {
                deliver_script: Mutex::new(results.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl RegistryApi for StubApi {
        async fn register_message(
            &self,
            _request: &RegisterMessageRequest,
        ) -> Result<RegisterMessageResponse, RegisterError> {
            unimplemented!("workers never register messages")
        }

        async fn deliver_message(
            &self,
            request: &DeliverMessageRequest,
        ) -> Result<DeliverMessageResponse, DeliverError> {
            self.deliver_calls.lock().await.push(request.clone());
            let scripted = self.deliver_script.lock().await.pop_front();
            match scripted.unwrap_or(Ok(())) {
                Ok(()) => Ok(DeliverMessageResponse {
                    message_id: request.message_id,
                    delivered_at: Utc::now(),
                }),
                Err(e) => Err(e),
            }
        }

        async fn update_status(
            &self,
            message_id: MessageId,
            request: &UpdateStatusRequest,
        ) -> Result<UpdateStatusResponse, UpdateStatusError> {
            self.status_calls
                .lock()
                .await
                .push((message_id, request.clone()));
            Ok(UpdateStatusResponse {
                message_id,
                status: request.status,
                attempt_count: request.attempt_count,
            })
        }
    }

    fn item(attempt_count: i32) -> WorkItem {
        WorkItem {
            message_id: MessageId::random(),
            client_id: "client_alpha".parse().unwrap(),
            sender_number: "+491521234567".parse().unwrap(),
            message_body: "hello".to_owned(),
            domain: "default".to_owned(),
            queued_at: Utc::now(),
            attempt_count,
        }
    }

    fn context(api: Arc<StubApi>, queue: Arc<MemoryWorkQueue>, max_attempts: i32) -> DeliveryContext {
        DeliveryContext {
            worker_id: WorkerId::new("worker-test"),
            max_attempts,
            retry_interval: Duration::from_millis(20),
            queue,
            api,
            metrics: Arc::new(WorkerMetrics::new().unwrap()),
        }
    }

    #[tokio::test]
    async fn successful_delivery_confirms_once() {
        let api = Arc::new(StubApi::default());
        let queue = Arc::new(MemoryWorkQueue::new());
        let context = context(api.clone(), queue.clone(), 10);

        let outcome = context
            .handle_record(item(0).to_bytes().unwrap())
            .await;
        assert!(matches!(outcome, Outcome::Delivered));
        assert_eq!(api.deliver_calls.lock().await.len(), 1);
        assert!(api.status_calls.lock().await.is_empty());
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn transient_failure_updates_status_and_carries_the_next_attempt() {
        let api = Arc::new(StubApi::scripted(vec![Err(DeliverError::Transient(
            "registry answered 503".into(),
        ))]));
        let queue = Arc::new(MemoryWorkQueue::new());
        let context = context(api.clone(), queue.clone(), 10);

        let work_item = item(3);
        let message_id = work_item.message_id;
        let outcome = context
            .handle_record(work_item.to_bytes().unwrap())
            .await;

        let Outcome::Retry(retry_item) = outcome else {
            panic!("expected a retry outcome");
        };
        assert_eq!(retry_item.attempt_count, 4);

        let status_calls = api.status_calls.lock().await;
        assert_eq!(status_calls.len(), 1);
        let (updated_id, update) = &status_calls[0];
        assert_eq!(*updated_id, message_id);
        assert_eq!(update.status, MessageStatus::Queued);
        assert_eq!(update.attempt_count, 4);
        assert_eq!(update.error_message.as_deref(), Some("registry answered 503"));
    }

    #[tokio::test]
    async fn retry_reappears_on_the_queue_after_the_interval() {
        let api = Arc::new(StubApi::default());
        let queue = Arc::new(MemoryWorkQueue::new());
        let context = context(api, queue.clone(), 10);

        let retry_item = item(4);
        context
            .schedule_retry(retry_item.clone(), CancellationToken::new())
            .await;

        let record = queue
            .blocking_pop(Duration::from_millis(100))
            .await
            .unwrap()
            .expect("item should reappear");
        let popped = WorkItem::from_bytes(&record).unwrap();
        assert_eq!(popped.message_id, retry_item.message_id);
        assert_eq!(popped.attempt_count, 4);
    }

    #[tokio::test]
    async fn exhausted_attempts_fail_without_a_delivery_call() {
        let api = Arc::new(StubApi::default());
        let queue = Arc::new(MemoryWorkQueue::new());
        let max_attempts = 5;
        let context = context(api.clone(), queue.clone(), max_attempts);

        let outcome = context
            .handle_record(item(max_attempts).to_bytes().unwrap())
            .await;
        assert!(matches!(outcome, Outcome::Failed));

        // No deliver call, one terminal status update, no requeue.
        assert!(api.deliver_calls.lock().await.is_empty());
        let status_calls = api.status_calls.lock().await;
        assert_eq!(status_calls.len(), 1);
        let (_, update) = &status_calls[0];
        assert_eq!(update.status, MessageStatus::Failed);
        assert_eq!(update.attempt_count, max_attempts);
        assert_eq!(update.error_message.as_deref(), Some(MAX_ATTEMPTS_ERROR));
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn orphan_items_are_dropped_without_retry() {
        let api = Arc::new(StubApi::scripted(vec![Err(DeliverError::NotFound)]));
        let queue = Arc::new(MemoryWorkQueue::new());
        let context = context(api.clone(), queue.clone(), 10);

        let outcome = context
            .handle_record(item(0).to_bytes().unwrap())
            .await;
        assert!(matches!(outcome, Outcome::Orphaned));
        assert!(api.status_calls.lock().await.is_empty());
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn already_completed_counts_as_success() {
        let api = Arc::new(StubApi::scripted(vec![Err(DeliverError::AlreadyCompleted)]));
        let queue = Arc::new(MemoryWorkQueue::new());
        let context = context(api.clone(), queue.clone(), 10);

        let outcome = context
            .handle_record(item(1).to_bytes().unwrap())
            .await;
        assert!(matches!(outcome, Outcome::Delivered));
        assert!(api.status_calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn no_reschedule_during_shutdown() {
        let api = Arc::new(StubApi::default());
        let queue = Arc::new(MemoryWorkQueue::new());
        let context = context(api, queue.clone(), 10);

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        context.schedule_retry(item(2), shutdown).await;
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn malformed_records_are_dropped() {
        let api = Arc::new(StubApi::default());
        let queue = Arc::new(MemoryWorkQueue::new());
        let context = context(api.clone(), queue.clone(), 10);

        let outcome = context.handle_record(b"not json".to_vec()).await;
        assert!(matches!(outcome, Outcome::Malformed));
        assert!(api.deliver_calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn pool_drains_the_queue_and_stops_on_cancel() {
        let api = Arc::new(StubApi::default());
        let queue = Arc::new(MemoryWorkQueue::new());
        for _ in 0..3 {
            queue.push(&item(0).to_bytes().unwrap()).await.unwrap();
        }

        let pool = WorkerPool::new(
            WorkerPoolConfig {
                worker_id: WorkerId::new("worker-test"),
                concurrency: 2,
                retry_interval: Duration::from_millis(20),
                max_attempts: 10,
                pop_timeout: Duration::from_millis(20),
                shutdown_grace: Duration::from_millis(200),
            },
            queue.clone(),
            api.clone(),
            Arc::new(WorkerMetrics::new().unwrap()),
        );

        let shutdown = CancellationToken::new();
        let pool_shutdown = shutdown.clone();
        let runner = tokio::spawn(async move { pool.run(pool_shutdown).await });

        // Give the pool a few poll cycles to drain everything.
        tokio::time::sleep(Duration::from_millis(150)).await;
        shutdown.cancel();
        runner.await.unwrap();

        assert_eq!(api.deliver_calls.lock().await.len(), 3);
        assert_eq!(queue.len().await.unwrap(), 0);
    }
}
