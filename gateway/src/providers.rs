// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Provider seams of the gateway: identity lookups, audit recording and
//! message registration. Production wires Postgres and the registry API
//! behind these; tests use in-memory stand-ins.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use relayapiclient::{ApiClient, RegisterError, RegistryApi};
use relaybackend::{
    errors::{IdentityError, StorageError},
    identity::IdentityService,
    registry::AuditEntry,
};
use relaycommon::{
    identifiers::ClientId,
    messages::{RegisterMessageRequest, RegisterMessageResponse},
    status::ClientStatus,
};

/// What the gateway needs to know about a client identity. The status is
/// the effective one, with expiry already applied.
#[derive(Debug, Clone)]
pub struct ClientEntry {
    pub client_id: ClientId,
    pub domain: String,
    pub status: ClientStatus,
    pub cert_fingerprint: String,
}

/// Client identity lookups against C2.
#[async_trait]
pub trait ClientDirectory: Send + Sync {
    async fn lookup(&self, client_id: &ClientId) -> Result<Option<ClientEntry>, IdentityError>;

    /// Store reachability, for the health probe.
    async fn healthy(&self) -> bool;
}

/// Append-only audit sink.
#[async_trait]
pub trait AuditRecorder: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<(), StorageError>;
}

/// Registration call into the registry (C7).
#[async_trait]
pub trait MessageRegistrar: Send + Sync {
    async fn register(
        &self,
        request: &RegisterMessageRequest,
    ) -> Result<RegisterMessageResponse, RegisterError>;
}

/// Directory backed by the identity store.
pub struct PgClientDirectory {
    identity: IdentityService,
}

impl PgClientDirectory {
    pub fn new(identity: IdentityService) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl ClientDirectory for PgClientDirectory {
    async fn lookup(&self, client_id: &ClientId) -> Result<Option<ClientEntry>, IdentityError> {
        let record = self.identity.lookup_client(client_id).await?;
        Ok(record.map(|record| ClientEntry {
            status: record.effective_status(Utc::now()),
            client_id: record.client_id,
            domain: record.domain,
            cert_fingerprint: record.cert_fingerprint,
        }))
    }

    async fn healthy(&self) -> bool {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(self.identity.pool())
            .await
            .is_ok()
    }
}

/// Audit sink writing straight to the store.
pub struct PgAuditRecorder {
    db_pool: PgPool,
}

impl PgAuditRecorder {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl AuditRecorder for PgAuditRecorder {
    async fn record(&self, entry: AuditEntry) -> Result<(), StorageError> {
        entry.insert(&self.db_pool).await
    }
}

#[async_trait]
impl MessageRegistrar for ApiClient {
    async fn register(
        &self,
        request: &RegisterMessageRequest,
    ) -> Result<RegisterMessageResponse, RegisterError> {
        self.register_message(request).await
    }
}
