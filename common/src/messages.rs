// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Wire messages of the ingestion and delivery pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identifiers::{ClientId, MessageId, PhoneNumber, WorkerId};
use crate::status::MessageStatus;
use crate::MAX_MESSAGE_BODY_CHARS;

/// Client submission payload accepted by the gateway.
#[derive(Clone, Serialize, Deserialize)]
pub struct SubmitMessageRequest {
    pub sender_number: PhoneNumber,
    pub message_body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl std::fmt::Debug for SubmitMessageRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmitMessageRequest")
            .field("sender_number", &self.sender_number)
            .field("message_body", &redacted(&self.message_body))
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Placeholder printed instead of plaintext bodies in `Debug` output.
fn redacted(body: &str) -> String {
    format!("<redacted, {} chars>", body.chars().count())
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageBodyError {
    #[error("message body is empty")]
    Empty,
    #[error("message body exceeds {MAX_MESSAGE_BODY_CHARS} characters")]
    TooLong,
}

/// Validate a message body: non-empty after trimming and bounded in length.
/// Returns the trimmed body.
pub fn validate_message_body(body: &str) -> Result<&str, MessageBodyError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(MessageBodyError::Empty);
    }
    if trimmed.chars().count() > MAX_MESSAGE_BODY_CHARS {
        return Err(MessageBodyError::TooLong);
    }
    Ok(trimmed)
}

/// Gateway response for an accepted submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitMessageResponse {
    pub message_id: MessageId,
    pub status: MessageStatus,
    pub client_id: ClientId,
    pub queued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
}

/// Registration call from the gateway to the registry.
#[derive(Clone, Serialize, Deserialize)]
pub struct RegisterMessageRequest {
    pub message_id: MessageId,
    pub client_id: ClientId,
    pub sender_number: PhoneNumber,
    pub message_body: String,
    #[serde(default = "default_domain")]
    pub domain: String,
    pub queued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

fn default_domain() -> String {
    crate::DEFAULT_DOMAIN.to_owned()
}

impl std::fmt::Debug for RegisterMessageRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterMessageRequest")
            .field("message_id", &self.message_id)
            .field("client_id", &self.client_id)
            .field("sender_number", &self.sender_number)
            .field("message_body", &redacted(&self.message_body))
            .field("domain", &self.domain)
            .field("queued_at", &self.queued_at)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterMessageResponse {
    /// Row id assigned by the registry.
    pub id: i64,
    pub message_id: MessageId,
    pub registered_at: DateTime<Utc>,
}

/// Delivery confirmation from a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverMessageRequest {
    pub message_id: MessageId,
    pub worker_id: WorkerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverMessageResponse {
    pub message_id: MessageId,
    pub delivered_at: DateTime<Utc>,
}

/// Status rewrite from a worker; attempt counts may never go backwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: MessageStatus,
    pub attempt_count: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusResponse {
    pub message_id: MessageId,
    pub status: MessageStatus,
    pub attempt_count: i32,
}

/// Error shape returned by every HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Health probe response: overall verdict plus per-component detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: std::collections::BTreeMap<String, HealthStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl HealthReport {
    pub fn from_components<I>(components: I) -> Self
    where
        I: IntoIterator<Item = (String, bool)>,
    {
        let components: std::collections::BTreeMap<_, _> = components
            .into_iter()
            .map(|(name, healthy)| {
                let status = if healthy {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Unhealthy
                };
                (name, status)
            })
            .collect();
        let status = if components.values().all(|s| *s == HealthStatus::Healthy) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        Self { status, components }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// The self-describing record travelling through the work queue. Carries
/// everything a worker needs for one delivery attempt; the plaintext fields
/// exist only until confirmation, the registry never stores them.
#[derive(Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub message_id: MessageId,
    pub client_id: ClientId,
    pub sender_number: PhoneNumber,
    pub message_body: String,
    #[serde(default = "default_domain")]
    pub domain: String,
    pub queued_at: DateTime<Utc>,
    #[serde(default)]
    pub attempt_count: i32,
}

impl WorkItem {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Time the item has spent queued, measured against the wall clock.
    pub fn queue_wait(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.queued_at
    }
}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("message_id", &self.message_id)
            .field("client_id", &self.client_id)
            .field("sender_number", &self.sender_number)
            .field("message_body", &redacted(&self.message_body))
            .field("domain", &self.domain)
            .field("queued_at", &self.queued_at)
            .field("attempt_count", &self.attempt_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_boundaries() {
        assert_eq!(validate_message_body("hello"), Ok("hello"));
        assert_eq!(validate_message_body("  hi  "), Ok("hi"));
        assert_eq!(validate_message_body("   "), Err(MessageBodyError::Empty));
        let exactly = "x".repeat(MAX_MESSAGE_BODY_CHARS);
        assert!(validate_message_body(&exactly).is_ok());
        let over = "x".repeat(MAX_MESSAGE_BODY_CHARS + 1);
        assert_eq!(validate_message_body(&over), Err(MessageBodyError::TooLong));
    }

    #[test]
    fn body_length_counts_characters_not_bytes() {
        let umlauts = "ü".repeat(MAX_MESSAGE_BODY_CHARS);
        assert!(validate_message_body(&umlauts).is_ok());
    }

    #[test]
    fn work_item_round_trips() {
        let item = WorkItem {
            message_id: MessageId::random(),
            client_id: "client_alpha".parse().unwrap(),
            sender_number: "+491521234567".parse().unwrap(),
            message_body: "hello".to_owned(),
            domain: crate::DEFAULT_DOMAIN.to_owned(),
            queued_at: Utc::now(),
            attempt_count: 3,
        };
        let bytes = item.to_bytes().unwrap();
        let back = WorkItem::from_bytes(&bytes).unwrap();
        assert_eq!(back.message_id, item.message_id);
        assert_eq!(back.attempt_count, 3);
        assert_eq!(back.sender_number, item.sender_number);
    }

    #[test]
    fn work_item_defaults_attempt_count() {
        let json = serde_json::json!({
            "message_id": "11111111-1111-1111-1111-111111111111",
            "client_id": "client_alpha",
            "sender_number": "+4915200000000",
            "message_body": "Test message",
            "queued_at": "2025-06-01T12:00:00Z",
        });
        let item = WorkItem::from_bytes(json.to_string().as_bytes()).unwrap();
        assert_eq!(item.attempt_count, 0);
        assert_eq!(item.domain, crate::DEFAULT_DOMAIN);
    }

    #[test]
    fn debug_output_redacts_bodies_and_masks_senders() {
        let item = WorkItem {
            message_id: MessageId::random(),
            client_id: "client_alpha".parse().unwrap(),
            sender_number: "+491521234567".parse().unwrap(),
            message_body: "a very private note".to_owned(),
            domain: crate::DEFAULT_DOMAIN.to_owned(),
            queued_at: Utc::now(),
            attempt_count: 0,
        };
        let debug = format!("{item:?}");
        assert!(!debug.contains("a very private note"));
        assert!(!debug.contains("491521234567"));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn health_report_aggregates() {
        let healthy = HealthReport::from_components(vec![
            ("database".to_owned(), true),
            ("queue".to_owned(), true),
        ]);
        assert!(healthy.is_healthy());
        let degraded = HealthReport::from_components(vec![
            ("database".to_owned(), true),
            ("queue".to_owned(), false),
        ]);
        assert!(!degraded.is_healthy());
    }

    #[test]
    fn error_body_shape() {
        let body = ErrorBody::new("bad_request", "sender number is not E.164");
        let value = serde_json::to_value(&body).unwrap();
        assert!(value.get("error").is_some());
        assert!(value.get("message").is_some());
        assert!(value.get("timestamp").is_some());
    }
}
