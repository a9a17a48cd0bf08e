// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use relaycommon::{identifiers::ClientId, status::AuditSeverity};

/// Security-relevant events recorded in the append-only audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEvent {
    MessageRegistered,
    MessageDelivered,
    MessageFailed,
    LoginSuccess,
    LoginFailed,
    TokenRefreshed,
    AuthRejected,
    TrustedHeaderUsed,
    RateLimited,
    ClientRegistered,
    ClientRevoked,
    OperatorCreated,
    OperatorRoleChanged,
    OperatorStatusChanged,
    PasswordChanged,
    PasswordResetRequested,
    PasswordResetCompleted,
    RetentionCleanup,
    MessageBodyDecrypted,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEvent::MessageRegistered => "message_registered",
            AuditEvent::MessageDelivered => "message_delivered",
            AuditEvent::MessageFailed => "message_failed",
            AuditEvent::LoginSuccess => "login_success",
            AuditEvent::LoginFailed => "login_failed",
            AuditEvent::TokenRefreshed => "token_refreshed",
            AuditEvent::AuthRejected => "auth_rejected",
            AuditEvent::TrustedHeaderUsed => "trusted_header_used",
            AuditEvent::RateLimited => "rate_limited",
            AuditEvent::ClientRegistered => "cert_issue",
            AuditEvent::ClientRevoked => "cert_revoke",
            AuditEvent::OperatorCreated => "user_created",
            AuditEvent::OperatorRoleChanged => "user_role_changed",
            AuditEvent::OperatorStatusChanged => "user_status_changed",
            AuditEvent::PasswordChanged => "password_changed",
            AuditEvent::PasswordResetRequested => "password_reset_requested",
            AuditEvent::PasswordResetCompleted => "password_reset_completed",
            AuditEvent::RetentionCleanup => "retention_cleanup",
            AuditEvent::MessageBodyDecrypted => "message_body_decrypted",
        }
    }
}

/// One entry of the audit trail. Build with the `with_*` methods, then
/// [`AuditEntry::insert`]. Entries are never updated or deleted; deleting an
/// operator only nulls the reference.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    event: AuditEvent,
    severity: AuditSeverity,
    operator_id: Option<i64>,
    client_id: Option<ClientId>,
    source_address: Option<String>,
    details: Option<serde_json::Value>,
}

impl AuditEntry {
    pub fn new(event: AuditEvent, severity: AuditSeverity) -> Self {
        Self {
            event,
            severity,
            operator_id: None,
            client_id: None,
            source_address: None,
            details: None,
        }
    }

    pub fn with_operator(mut self, operator_id: i64) -> Self {
        self.operator_id = Some(operator_id);
        self
    }

    pub fn with_client(mut self, client_id: ClientId) -> Self {
        self.client_id = Some(client_id);
        self
    }

    pub fn with_source(mut self, source_address: impl Into<String>) -> Self {
        self.source_address = Some(source_address.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn event(&self) -> AuditEvent {
        self.event
    }

    pub fn severity(&self) -> AuditSeverity {
        self.severity
    }
}

pub(crate) mod persistence {
    use sqlx::PgExecutor;

    use crate::errors::StorageError;

    use super::*;

    impl AuditEntry {
        pub async fn insert(
            &self,
            connection: impl PgExecutor<'_>,
        ) -> Result<(), StorageError> {
            sqlx::query(
                "INSERT INTO audit_log
                    (event_type, user_id, client_id, ip_address, event_data, severity)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(self.event.as_str())
            .bind(self.operator_id)
            .bind(&self.client_id)
            .bind(&self.source_address)
            .bind(&self.details)
            .bind(self.severity)
            .execute(connection)
            .await?;
            Ok(())
        }
    }
}
