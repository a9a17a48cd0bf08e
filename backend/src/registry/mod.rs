// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Message registry: the authoritative, encrypted store of messages and
//! their delivery lifecycle, plus the audit trail.

use std::sync::Arc;

use sqlx::PgPool;
use tracing::{info, warn};

use relaycommon::{
    identifiers::{ClientId, MessageId, WorkerId},
    messages::{DeliverMessageResponse, RegisterMessageRequest, RegisterMessageResponse},
    portal::{MessageListResponse, StatsResponse},
    status::{AuditSeverity, MessageStatus},
};

use crate::{
    crypto::{MessageCipher, PhoneHasher},
    errors::RegistryError,
};

mod audit;
mod message_record;

pub use audit::{AuditEntry, AuditEvent};
pub use message_record::{MessageRecord, MessageStats};

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 500;

/// Outcome of a successful delivery confirmation.
#[derive(Debug, Clone)]
pub struct DeliveredMessage {
    pub client_id: ClientId,
    pub response: DeliverMessageResponse,
}

/// The registry service. Construct once at startup and share via handles;
/// all state lives in Postgres and the keyring.
#[derive(Clone)]
pub struct MessageRegistry {
    db_pool: PgPool,
    cipher: Arc<MessageCipher>,
    phone_hasher: PhoneHasher,
}

impl MessageRegistry {
    pub fn from_pool(db_pool: PgPool, cipher: Arc<MessageCipher>, phone_hasher: PhoneHasher) -> Self {
        Self {
            db_pool,
            cipher,
            phone_hasher,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.db_pool
    }

    /// Register a message: hash the sender, encrypt the body, insert the
    /// row and append the audit entry, all in one transaction. A duplicate
    /// `message_id` rolls everything back and surfaces
    /// [`RegistryError::AlreadyRegistered`] without a second audit entry.
    pub async fn register(
        &self,
        request: &RegisterMessageRequest,
    ) -> Result<RegisterMessageResponse, RegistryError> {
        let sender_number_hashed = self.phone_hasher.hash(&request.sender_number);
        let (encrypted_body, encryption_key_version) = self.cipher.encrypt(&request.message_body)?;

        let mut transaction = self.db_pool.begin().await?;
        let record = MessageRecord::store(
            &mut *transaction,
            request.message_id,
            &request.client_id,
            &sender_number_hashed,
            &encrypted_body,
            encryption_key_version,
            &request.domain,
            request.queued_at,
        )
        .await?;

        let mut details = serde_json::json!({
            "message_id": record.message_id,
            "domain": record.domain,
            "key_version": record.encryption_key_version,
        });
        if let Some(metadata) = &request.metadata {
            details["metadata"] = metadata.clone();
        }
        AuditEntry::new(AuditEvent::MessageRegistered, AuditSeverity::Info)
            .with_client(request.client_id.clone())
            .with_details(details)
            .insert(&mut *transaction)
            .await?;
        transaction.commit().await?;

        info!(message_id = %record.message_id, client_id = %record.client_id, "message registered");
        Ok(RegisterMessageResponse {
            id: record.id,
            message_id: record.message_id,
            registered_at: record.created_at,
        })
    }

    /// Confirm delivery. At most one confirmation succeeds per message;
    /// repeats observe [`RegistryError::InvalidTransition`] and callers
    /// treat that as success for already-delivered rows.
    pub async fn deliver(
        &self,
        message_id: MessageId,
        worker_id: &WorkerId,
    ) -> Result<DeliveredMessage, RegistryError> {
        let mut transaction = self.db_pool.begin().await?;
        let record = MessageRecord::mark_delivered(&mut *transaction, message_id).await?;
        // The UPDATE just set delivered_at; the fallback never fires.
        let delivered_at = record.delivered_at.unwrap_or_else(chrono::Utc::now);
        AuditEntry::new(AuditEvent::MessageDelivered, AuditSeverity::Info)
            .with_client(record.client_id.clone())
            .with_details(serde_json::json!({
                "message_id": message_id,
                "worker_id": worker_id,
            }))
            .insert(&mut *transaction)
            .await?;
        transaction.commit().await?;

        info!(%message_id, %worker_id, "message delivered");
        Ok(DeliveredMessage {
            client_id: record.client_id,
            response: DeliverMessageResponse {
                message_id,
                delivered_at,
            },
        })
    }

    /// Rewrite lifecycle state on behalf of a worker. `failed` is terminal
    /// and carries the final error.
    pub async fn update_status(
        &self,
        message_id: MessageId,
        status: MessageStatus,
        attempt_count: i32,
        error_message: Option<&str>,
    ) -> Result<MessageRecord, RegistryError> {
        let mut transaction = self.db_pool.begin().await?;
        let record = MessageRecord::update_status(
            &mut *transaction,
            message_id,
            status,
            attempt_count,
            error_message,
        )
        .await?;
        if status == MessageStatus::Failed {
            AuditEntry::new(AuditEvent::MessageFailed, AuditSeverity::Warning)
                .with_client(record.client_id.clone())
                .with_details(serde_json::json!({
                    "message_id": message_id,
                    "attempt_count": attempt_count,
                    "error": error_message,
                }))
                .insert(&mut *transaction)
                .await?;
        }
        transaction.commit().await?;

        if status == MessageStatus::Failed {
            warn!(%message_id, attempt_count, "message moved to failed");
        }
        Ok(record)
    }

    /// Paginated, role-scoped listing for the portal.
    pub async fn list_messages(
        &self,
        scope: Option<&ClientId>,
        status: Option<MessageStatus>,
        page: Option<i64>,
        page_size: Option<i64>,
    ) -> Result<MessageListResponse, RegistryError> {
        let page = page.unwrap_or(1).max(1);
        let page_size = page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let offset = (page - 1) * page_size;

        let records =
            MessageRecord::list(&self.db_pool, scope, status, page_size, offset).await?;
        let total = MessageRecord::count(&self.db_pool, scope, status).await?;
        Ok(MessageListResponse {
            messages: records.iter().map(MessageRecord::summary).collect(),
            total,
            page,
            page_size,
        })
    }

    pub async fn load_message(
        &self,
        message_id: MessageId,
    ) -> Result<Option<MessageRecord>, RegistryError> {
        MessageRecord::load(&self.db_pool, message_id).await
    }

    /// Decrypt a stored body with the key version recorded on the row.
    pub async fn decrypt_body(&self, message_id: MessageId) -> Result<String, RegistryError> {
        let record = MessageRecord::load(&self.db_pool, message_id)
            .await?
            .ok_or(RegistryError::NotFound)?;
        let plaintext = self
            .cipher
            .decrypt(&record.encrypted_body, record.encryption_key_version)?;
        Ok(plaintext)
    }

    pub async fn stats(&self) -> Result<StatsResponse, RegistryError> {
        let stats = MessageRecord::stats(&self.db_pool).await?;
        Ok(StatsResponse {
            total: stats.total,
            queued: stats.queued,
            processing: stats.processing,
            delivered: stats.delivered,
            failed: stats.failed,
            last_hour: stats.last_hour,
            last_day: stats.last_day,
        })
    }

    /// Delete delivered messages older than the retention window.
    pub async fn cleanup_delivered(&self, older_than_days: i32) -> Result<u64, RegistryError> {
        let deleted =
            MessageRecord::delete_delivered_older_than(&self.db_pool, older_than_days).await?;
        AuditEntry::new(AuditEvent::RetentionCleanup, AuditSeverity::Info)
            .with_details(serde_json::json!({
                "older_than_days": older_than_days,
                "deleted": deleted,
            }))
            .insert(&self.db_pool)
            .await?;
        info!(older_than_days, deleted, "retention cleanup");
        Ok(deleted)
    }

    /// Append a standalone audit entry outside a registry transaction.
    pub async fn record_audit(&self, entry: AuditEntry) -> Result<(), RegistryError> {
        entry.insert(&self.db_pool).await?;
        Ok(())
    }

    /// Store reachability probe.
    pub async fn healthy(&self) -> bool {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.db_pool)
            .await
            .is_ok()
    }

    /// Smoke-check the keyring with a throwaway round trip.
    pub fn keys_loaded(&self) -> bool {
        self.cipher
            .encrypt("health probe")
            .and_then(|(blob, version)| self.cipher.decrypt(&blob, version))
            .is_ok()
    }

}
