// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The submission endpoint and the gateway's operational endpoints.

use actix_web::{
    web::{self, Data},
    HttpRequest, HttpResponse, Responder,
};
use chrono::{DateTime, Utc};
use tracing::{error, warn};

use relaybackend::{
    queue::WorkQueue,
    rate_limiter::RateLimiter,
    registry::{AuditEntry, AuditEvent},
};
use relaycommon::{
    identifiers::{ClientId, MessageId},
    messages::{
        validate_message_body, ErrorBody, HealthReport, RegisterMessageRequest,
        SubmitMessageRequest, SubmitMessageResponse, WorkItem,
    },
    status::{AuditSeverity, ClientStatus, MessageStatus},
};

use crate::{
    client_auth::resolve_client,
    metrics::GatewayMetrics,
    providers::{AuditRecorder, ClientDirectory, MessageRegistrar},
};

/// Gateway behavior switches derived from the settings.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub trusted_header_auth: bool,
}

async fn record_audit<A: AuditRecorder>(audit: &A, entry: AuditEntry) {
    if let Err(e) = audit.record(entry).await {
        error!(error = %e, "failed to record audit entry");
    }
}

fn unauthorized(message: &str) -> HttpResponse {
    HttpResponse::Unauthorized().json(ErrorBody::new("unauthenticated", message))
}

/// `POST /api/v1/messages`.
///
/// Register first (the registry is the authoritative record), then enqueue.
/// A registration failure leaves nothing behind; an enqueue failure leaves
/// the row `queued` for operators to see and returns 503 so the client may
/// retry with a fresh submission.
pub(crate) async fn submit_message<D, A, R>(
    req: HttpRequest,
    options: Data<GatewayOptions>,
    directory: Data<D>,
    audit: Data<A>,
    registrar: Data<R>,
    queue: Data<dyn WorkQueue>,
    rate_limiter: Data<RateLimiter>,
    metrics: Data<GatewayMetrics>,
    payload: web::Json<SubmitMessageRequest>,
) -> HttpResponse
where
    D: ClientDirectory,
    A: AuditRecorder,
    R: MessageRegistrar,
{
    let source = req.peer_addr().map(|addr| addr.ip().to_string());

    // Who is calling?
    let auth = match resolve_client(&req, options.trusted_header_auth) {
        Ok(auth) => auth,
        Err(reason) => {
            let mut entry = AuditEntry::new(AuditEvent::AuthRejected, AuditSeverity::Warning)
                .with_details(serde_json::json!({ "reason": reason }));
            if let Some(source) = &source {
                entry = entry.with_source(source.clone());
            }
            record_audit(audit.get_ref(), entry).await;
            return unauthorized(reason);
        }
    };
    if auth.via_trusted_header() {
        let mut entry = AuditEntry::new(AuditEvent::TrustedHeaderUsed, AuditSeverity::Warning)
            .with_client(auth.client_id().clone());
        if let Some(source) = &source {
            entry = entry.with_source(source.clone());
        }
        record_audit(audit.get_ref(), entry).await;
    }

    // Does the identity resolve to an ACTIVE client?
    let client_id = auth.client_id().clone();
    let entry = match directory.lookup(&client_id).await {
        Ok(entry) => entry,
        Err(e) => {
            error!(error = %e, "client lookup failed");
            return HttpResponse::InternalServerError()
                .json(ErrorBody::new("internal_error", "internal error"));
        }
    };
    let Some(entry) = entry else {
        reject_client(audit.get_ref(), &client_id, source, "unknown client").await;
        return unauthorized("client is not registered");
    };
    if entry.status != ClientStatus::Active {
        let reason = if entry.status == ClientStatus::Revoked {
            "client is revoked"
        } else {
            "client certificate is expired"
        };
        reject_client(audit.get_ref(), &client_id, source, reason).await;
        return unauthorized(reason);
    }
    // The presented certificate must be the registered one, not merely one
    // with the same CN.
    if let Some(fingerprint) = auth.certificate_fingerprint() {
        if !entry.cert_fingerprint.eq_ignore_ascii_case(fingerprint) {
            let reason = "certificate fingerprint mismatch";
            reject_client(audit.get_ref(), &client_id, source, reason).await;
            return unauthorized(reason);
        }
    }

    // Backpressure per client.
    if !rate_limiter.allowed(&client_id).await {
        return HttpResponse::TooManyRequests().json(ErrorBody::new(
            "rate_limited",
            "submission budget for this window is exhausted",
        ));
    }

    // Payload validation. The sender number was already validated during
    // deserialization.
    let message_body = match validate_message_body(&payload.message_body) {
        Ok(body) => body.to_owned(),
        Err(e) => {
            return HttpResponse::BadRequest().json(ErrorBody::new("bad_request", e.to_string()))
        }
    };

    let message_id = MessageId::random();
    let queued_at = Utc::now();
    let metadata = enrich_metadata(payload.metadata.clone(), &client_id, queued_at);

    // Authoritative record first.
    let register_request = RegisterMessageRequest {
        message_id,
        client_id: client_id.clone(),
        sender_number: payload.sender_number.clone(),
        message_body: message_body.clone(),
        domain: entry.domain.clone(),
        queued_at,
        metadata: Some(metadata),
    };
    if let Err(e) = registrar.register(&register_request).await {
        warn!(%message_id, error = %e, "registration failed, nothing enqueued");
        return HttpResponse::ServiceUnavailable().json(ErrorBody::new(
            "registry_unavailable",
            "message was not accepted; retry the submission",
        ));
    }

    // Then the delivery buffer.
    let work_item = WorkItem {
        message_id,
        client_id: client_id.clone(),
        sender_number: payload.sender_number.clone(),
        message_body,
        domain: entry.domain,
        queued_at,
        attempt_count: 0,
    };
    let record = match work_item.to_bytes() {
        Ok(record) => record,
        Err(e) => {
            error!(error = %e, "failed to serialize work item");
            return HttpResponse::InternalServerError()
                .json(ErrorBody::new("internal_error", "internal error"));
        }
    };
    if let Err(e) = queue.push(&record).await {
        warn!(%message_id, error = %e, "registered but not enqueued");
        return HttpResponse::ServiceUnavailable().json(ErrorBody::new(
            "queue_unavailable",
            "message was not queued; retry the submission",
        ));
    }

    let position = queue.len().await.ok();
    if let Some(position) = position {
        metrics.set_queue_size(position);
    }

    HttpResponse::Accepted().json(SubmitMessageResponse {
        message_id,
        status: MessageStatus::Queued,
        client_id,
        queued_at,
        position,
    })
}

async fn reject_client<A: AuditRecorder>(
    audit: &A,
    client_id: &ClientId,
    source: Option<String>,
    reason: &str,
) {
    let mut entry = AuditEntry::new(AuditEvent::AuthRejected, AuditSeverity::Warning)
        .with_client(client_id.clone())
        .with_details(serde_json::json!({ "reason": reason }));
    if let Some(source) = source {
        entry = entry.with_source(source);
    }
    record_audit(audit, entry).await;
}

/// Fold the server-side context into the caller's metadata.
fn enrich_metadata(
    metadata: Option<serde_json::Value>,
    client_id: &ClientId,
    received_at: DateTime<Utc>,
) -> serde_json::Value {
    let mut enriched = match metadata {
        Some(serde_json::Value::Object(map)) => serde_json::Value::Object(map),
        Some(other) => serde_json::json!({ "payload": other }),
        None => serde_json::json!({}),
    };
    enriched["client_id"] = serde_json::json!(client_id);
    enriched["received_at"] = serde_json::json!(received_at);
    enriched
}

pub(crate) async fn health_check<D: ClientDirectory>(
    directory: Data<D>,
    queue: Data<dyn WorkQueue>,
) -> impl Responder {
    let report = HealthReport::from_components(vec![
        ("database".to_owned(), directory.healthy().await),
        ("queue".to_owned(), queue.healthy().await),
    ]);
    if report.is_healthy() {
        HttpResponse::Ok().json(report)
    } else {
        HttpResponse::ServiceUnavailable().json(report)
    }
}

pub(crate) async fn metrics_endpoint(metrics: Data<GatewayMetrics>) -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics.encode())
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc, time::Duration as StdDuration};

    use actix_web::{http::StatusCode, test, App};
    use async_trait::async_trait;
    use chrono::TimeDelta;
    use tokio::sync::Mutex;

    use relayapiclient::RegisterError;
    use relaybackend::{
        errors::{IdentityError, StorageError},
        queue::{MemoryWorkQueue, QueueError},
        rate_limiter::RateLimiterConfig,
    };
    use relaycommon::messages::RegisterMessageResponse;

    use crate::providers::ClientEntry;

    use super::*;

    #[::core::prelude::v1::test]
    fn metadata_enrichment_preserves_caller_fields() {
        let client_id: ClientId = "client_alpha".parse().unwrap();
        let now = Utc::now();
        let enriched = enrich_metadata(
            Some(serde_json::json!({ "campaign": "spring" })),
            &client_id,
            now,
        );
        assert_eq!(enriched["campaign"], "spring");
        assert_eq!(enriched["client_id"], "client_alpha");
        assert!(enriched.get("received_at").is_some());
    }

    #[::core::prelude::v1::test]
    fn non_object_metadata_is_wrapped() {
        let client_id: ClientId = "client_alpha".parse().unwrap();
        let enriched = enrich_metadata(
            Some(serde_json::json!([1, 2, 3])),
            &client_id,
            Utc::now(),
        );
        assert_eq!(enriched["payload"], serde_json::json!([1, 2, 3]));
        assert_eq!(enriched["client_id"], "client_alpha");
    }

    // In-memory providers

    struct MemoryDirectory {
        clients: HashMap<ClientId, ClientEntry>,
    }

    impl MemoryDirectory {
        fn with_client(client_id: &str, status: ClientStatus) -> Self {
            let client_id: ClientId = client_id.parse().unwrap();
            let entry = ClientEntry {
                client_id: client_id.clone(),
                domain: "default".to_owned(),
                status,
                cert_fingerprint: "ab".repeat(32),
            };
            Self {
                clients: HashMap::from([(client_id, entry)]),
            }
        }
    }

    #[async_trait]
    impl ClientDirectory for MemoryDirectory {
        async fn lookup(
            &self,
            client_id: &ClientId,
        ) -> Result<Option<ClientEntry>, IdentityError> {
            Ok(self.clients.get(client_id).cloned())
        }

        async fn healthy(&self) -> bool {
            true
        }
    }

    #[derive(Default)]
    struct MemoryAudit {
        entries: Mutex<Vec<AuditEntry>>,
    }

    #[async_trait]
    impl AuditRecorder for MemoryAudit {
        async fn record(&self, entry: AuditEntry) -> Result<(), StorageError> {
            self.entries.lock().await.push(entry);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryRegistrar {
        requests: Mutex<Vec<RegisterMessageRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl MessageRegistrar for MemoryRegistrar {
        async fn register(
            &self,
            request: &RegisterMessageRequest,
        ) -> Result<RegisterMessageResponse, RegisterError> {
            if self.fail {
                return Err(RegisterError::Unavailable("registry is down".into()));
            }
            let mut requests = self.requests.lock().await;
            requests.push(request.clone());
            Ok(RegisterMessageResponse {
                id: requests.len() as i64,
                message_id: request.message_id,
                registered_at: Utc::now(),
            })
        }
    }

    struct BrokenQueue;

    #[async_trait]
    impl WorkQueue for BrokenQueue {
        async fn push(&self, _record: &[u8]) -> Result<(), QueueError> {
            Err(QueueError::Unavailable("queue is down".into()))
        }

        async fn blocking_pop(
            &self,
            _timeout: StdDuration,
        ) -> Result<Option<Vec<u8>>, QueueError> {
            Err(QueueError::Unavailable("queue is down".into()))
        }

        async fn len(&self) -> Result<u64, QueueError> {
            Err(QueueError::Unavailable("queue is down".into()))
        }

        async fn healthy(&self) -> bool {
            false
        }
    }

    struct Harness {
        audit: Arc<MemoryAudit>,
        registrar: Arc<MemoryRegistrar>,
        queue: Arc<MemoryWorkQueue>,
    }

    fn rate_limiter(max_requests: u64) -> RateLimiter {
        RateLimiter::new(RateLimiterConfig {
            max_requests,
            time_window: TimeDelta::seconds(60),
        })
    }

    macro_rules! gateway_app {
        ($directory:expr, $harness:expr, $queue:expr, $limit:expr) => {{
            let queue_dyn: Arc<dyn WorkQueue> = $queue;
            test::init_service(
                App::new()
                    .app_data(crate::json_error_handler())
                    .app_data(Data::new(GatewayOptions {
                        trusted_header_auth: true,
                    }))
                    .app_data(Data::from($directory))
                    .app_data(Data::from($harness.audit.clone()))
                    .app_data(Data::from($harness.registrar.clone()))
                    .app_data(Data::from(queue_dyn))
                    .app_data(Data::new(rate_limiter($limit)))
                    .app_data(Data::new(GatewayMetrics::new().unwrap()))
                    .route(
                        "/api/v1/messages",
                        web::post()
                            .to(submit_message::<MemoryDirectory, MemoryAudit, MemoryRegistrar>),
                    ),
            )
        }};
    }

    fn harness() -> Harness {
        Harness {
            audit: Arc::new(MemoryAudit::default()),
            registrar: Arc::new(MemoryRegistrar::default()),
            queue: Arc::new(MemoryWorkQueue::new()),
        }
    }

    fn submission() -> serde_json::Value {
        serde_json::json!({
            "sender_number": "+491521234567",
            "message_body": "hello",
        })
    }

    #[actix_web::test]
    async fn happy_path_registers_then_enqueues() {
        let harness = harness();
        let directory = Arc::new(MemoryDirectory::with_client(
            "client_alpha",
            ClientStatus::Active,
        ));
        let app =
            gateway_app!(directory, harness, harness.queue.clone(), 100).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/messages")
            .insert_header(("X-Client-ID", "client_alpha"))
            .set_json(submission())
            .to_request();
        let response: SubmitMessageResponse =
            test::call_and_read_body_json(&app, req).await;

        assert_eq!(response.status, MessageStatus::Queued);
        assert_eq!(response.client_id, "client_alpha".parse().unwrap());
        assert_eq!(response.position, Some(1));

        // Registered before enqueued, with the same message id.
        let registered = harness.registrar.requests.lock().await;
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].message_id, response.message_id);
        assert_eq!(harness.queue.len().await.unwrap(), 1);

        let record = harness
            .queue
            .blocking_pop(StdDuration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        let item = WorkItem::from_bytes(&record).unwrap();
        assert_eq!(item.message_id, response.message_id);
        assert_eq!(item.attempt_count, 0);
        assert_eq!(item.message_body, "hello");
    }

    #[actix_web::test]
    async fn revoked_client_is_rejected_with_audit() {
        let harness = harness();
        let directory = Arc::new(MemoryDirectory::with_client(
            "client_beta",
            ClientStatus::Revoked,
        ));
        let app =
            gateway_app!(directory, harness, harness.queue.clone(), 100).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/messages")
            .insert_header(("X-Client-ID", "client_beta"))
            .set_json(submission())
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        // No queue write, no registration.
        assert_eq!(harness.queue.len().await.unwrap(), 0);
        assert!(harness.registrar.requests.lock().await.is_empty());
        // A WARNING audit entry for the rejection (plus the header-use one).
        let entries = harness.audit.entries.lock().await;
        assert!(entries
            .iter()
            .any(|e| e.event() == AuditEvent::AuthRejected
                && e.severity() == AuditSeverity::Warning));
    }

    #[actix_web::test]
    async fn unknown_client_is_rejected() {
        let harness = harness();
        let directory = Arc::new(MemoryDirectory::with_client(
            "client_alpha",
            ClientStatus::Active,
        ));
        let app =
            gateway_app!(directory, harness, harness.queue.clone(), 100).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/messages")
            .insert_header(("X-Client-ID", "client_gamma"))
            .set_json(submission())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn missing_identity_is_rejected() {
        let harness = harness();
        let directory = Arc::new(MemoryDirectory::with_client(
            "client_alpha",
            ClientStatus::Active,
        ));
        let app =
            gateway_app!(directory, harness, harness.queue.clone(), 100).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/messages")
            .set_json(submission())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let entries = harness.audit.entries.lock().await;
        assert!(entries
            .iter()
            .any(|e| e.event() == AuditEvent::AuthRejected));
    }

    #[actix_web::test]
    async fn malformed_sender_number_is_a_bad_request() {
        let harness = harness();
        let directory = Arc::new(MemoryDirectory::with_client(
            "client_alpha",
            ClientStatus::Active,
        ));
        let app =
            gateway_app!(directory, harness, harness.queue.clone(), 100).await;

        for bad_sender in ["+1", "+01234567890", "491521234567"] {
            let req = test::TestRequest::post()
                .uri("/api/v1/messages")
                .insert_header(("X-Client-ID", "client_alpha"))
                .set_json(serde_json::json!({
                    "sender_number": bad_sender,
                    "message_body": "hello",
                }))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{bad_sender}");
        }
        assert_eq!(harness.queue.len().await.unwrap(), 0);
    }

    #[actix_web::test]
    async fn oversize_body_is_a_bad_request() {
        let harness = harness();
        let directory = Arc::new(MemoryDirectory::with_client(
            "client_alpha",
            ClientStatus::Active,
        ));
        let app =
            gateway_app!(directory, harness, harness.queue.clone(), 100).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/messages")
            .insert_header(("X-Client-ID", "client_alpha"))
            .set_json(serde_json::json!({
                "sender_number": "+491521234567",
                "message_body": "x".repeat(1001),
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(harness.registrar.requests.lock().await.is_empty());
    }

    #[actix_web::test]
    async fn rate_limit_returns_429_without_enqueueing() {
        let harness = harness();
        let directory = Arc::new(MemoryDirectory::with_client(
            "client_alpha",
            ClientStatus::Active,
        ));
        let app = gateway_app!(directory, harness, harness.queue.clone(), 3).await;

        for _ in 0..3 {
            let req = test::TestRequest::post()
                .uri("/api/v1/messages")
                .insert_header(("X-Client-ID", "client_alpha"))
                .set_json(submission())
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::ACCEPTED);
        }
        let req = test::TestRequest::post()
            .uri("/api/v1/messages")
            .insert_header(("X-Client-ID", "client_alpha"))
            .set_json(submission())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(harness.queue.len().await.unwrap(), 3);
    }

    #[actix_web::test]
    async fn registry_failure_leaves_nothing_behind() {
        let harness = Harness {
            registrar: Arc::new(MemoryRegistrar {
                fail: true,
                ..Default::default()
            }),
            ..self::harness()
        };
        let directory = Arc::new(MemoryDirectory::with_client(
            "client_alpha",
            ClientStatus::Active,
        ));
        let app =
            gateway_app!(directory, harness, harness.queue.clone(), 100).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/messages")
            .insert_header(("X-Client-ID", "client_alpha"))
            .set_json(submission())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(harness.queue.len().await.unwrap(), 0);
    }

    #[actix_web::test]
    async fn queue_failure_after_registration_is_503() {
        let harness = harness();
        let directory = Arc::new(MemoryDirectory::with_client(
            "client_alpha",
            ClientStatus::Active,
        ));
        let broken: Arc<dyn WorkQueue> = Arc::new(BrokenQueue);
        let app = gateway_app!(directory, harness, broken, 100).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/messages")
            .insert_header(("X-Client-ID", "client_alpha"))
            .set_json(submission())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        // The authoritative record exists; only the buffer write failed.
        assert_eq!(harness.registrar.requests.lock().await.len(), 1);
    }
}
