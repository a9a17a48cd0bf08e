// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Identity store: client certificate identities and portal operators.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use relaycommon::{identifiers::ClientId, status::UserRole};

use crate::{
    crypto::{hash_password, meets_length_policy, verify_password},
    errors::{IdentityError, ServiceCreationError},
    infra_service::InfraService,
};

mod client_record;
mod operator_record;
mod reset_ticket;

pub use client_record::ClientRecord;
pub use operator_record::OperatorRecord;
pub use reset_ticket::ResetTicket;

/// Persistent registry of client identities and operators.
#[derive(Clone)]
pub struct IdentityService {
    db_pool: PgPool,
}

#[async_trait]
impl InfraService for IdentityService {
    async fn initialize(db_pool: PgPool) -> Result<Self, ServiceCreationError> {
        Ok(Self { db_pool })
    }
}

impl IdentityService {
    pub fn from_pool(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.db_pool
    }

    // Client identities

    /// Register a new ACTIVE client identity. Fails with
    /// [`IdentityError::ClientExists`] when the client id or certificate
    /// fingerprint is already taken.
    pub async fn register_client(
        &self,
        client_id: ClientId,
        cert_fingerprint: String,
        domain: Option<String>,
        issued_at: chrono::DateTime<Utc>,
        expires_at: chrono::DateTime<Utc>,
    ) -> Result<ClientRecord, IdentityError> {
        ClientRecord::store(
            &self.db_pool,
            client_id,
            cert_fingerprint,
            domain.unwrap_or_else(|| relaycommon::DEFAULT_DOMAIN.to_owned()),
            issued_at,
            expires_at,
        )
        .await
    }

    /// Revoke a client identity. Terminal: a second revocation fails with
    /// [`IdentityError::AlreadyRevoked`].
    pub async fn revoke_client(
        &self,
        client_id: &ClientId,
        reason: &str,
    ) -> Result<ClientRecord, IdentityError> {
        let mut connection = self.db_pool.acquire().await?;
        ClientRecord::revoke(connection.as_mut(), client_id, reason).await
    }

    pub async fn lookup_client(
        &self,
        client_id: &ClientId,
    ) -> Result<Option<ClientRecord>, IdentityError> {
        ClientRecord::load(&self.db_pool, client_id).await
    }

    pub async fn lookup_client_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<ClientRecord>, IdentityError> {
        ClientRecord::load_by_fingerprint(&self.db_pool, fingerprint).await
    }

    pub async fn list_clients(&self) -> Result<Vec<ClientRecord>, IdentityError> {
        ClientRecord::list(&self.db_pool).await
    }

    pub async fn list_expiring(
        &self,
        within_days: i32,
    ) -> Result<Vec<ClientRecord>, IdentityError> {
        ClientRecord::list_expiring(&self.db_pool, within_days).await
    }

    // Operators

    pub async fn create_operator(
        &self,
        email: &str,
        password: &str,
        role: UserRole,
        client_id: Option<&ClientId>,
    ) -> Result<OperatorRecord, IdentityError> {
        if !meets_length_policy(password) {
            return Err(IdentityError::WeakPassword);
        }
        let password_hash = hash_password(password)?;
        OperatorRecord::store(&self.db_pool, email, &password_hash, role, client_id).await
    }

    /// Authenticate an operator by email and password.
    ///
    /// Unknown email, wrong password and deactivated accounts all fail with
    /// the same [`IdentityError::AuthFailed`]; callers must not be able to
    /// tell them apart.
    pub async fn authenticate(
        &self,
        email: &str,
        password: &str,
    ) -> Result<OperatorRecord, IdentityError> {
        let record = OperatorRecord::load_by_email(&self.db_pool, email).await?;
        let Some(record) = record else {
            let _ = verify_password(password, DUMMY_HASH);
            return Err(IdentityError::AuthFailed);
        };
        if !verify_password(password, &record.password_hash) || !record.is_active {
            return Err(IdentityError::AuthFailed);
        }
        OperatorRecord::touch_login(&self.db_pool, record.id).await?;
        Ok(record)
    }

    pub async fn lookup_operator(&self, id: i64) -> Result<Option<OperatorRecord>, IdentityError> {
        OperatorRecord::load(&self.db_pool, id).await
    }

    pub async fn update_operator_role(
        &self,
        operator_id: i64,
        role: UserRole,
    ) -> Result<(), IdentityError> {
        OperatorRecord::update_role(&self.db_pool, operator_id, role).await
    }

    /// Toggle an operator's active flag. Operators may not change their own.
    pub async fn update_operator_status(
        &self,
        caller_id: i64,
        operator_id: i64,
        is_active: bool,
    ) -> Result<(), IdentityError> {
        if caller_id == operator_id {
            return Err(IdentityError::SelfStatusChange);
        }
        OperatorRecord::set_active(&self.db_pool, operator_id, is_active).await
    }

    pub async fn change_password(
        &self,
        operator_id: i64,
        new_password: &str,
    ) -> Result<(), IdentityError> {
        if !meets_length_policy(new_password) {
            return Err(IdentityError::WeakPassword);
        }
        let password_hash = hash_password(new_password)?;
        OperatorRecord::set_password_hash(&self.db_pool, operator_id, &password_hash).await
    }

    /// Issue a password reset ticket.
    ///
    /// Always succeeds from the caller's point of view; a ticket is only
    /// materialized when the email belongs to an operator (enumeration
    /// defense). Dispatching the ticket by email is an external concern.
    pub async fn issue_reset_ticket(
        &self,
        email: &str,
    ) -> Result<Option<ResetTicket>, IdentityError> {
        let Some(operator) = OperatorRecord::load_by_email(&self.db_pool, email).await? else {
            return Ok(None);
        };
        let token = reset_ticket::generate_token();
        let expires_at = Utc::now() + reset_ticket::ticket_validity();
        let ticket = ResetTicket::store(&self.db_pool, operator.id, &token, expires_at).await?;
        Ok(Some(ticket))
    }

    /// Redeem a reset ticket and set the new password. The ticket burns on
    /// the first successful redemption.
    pub async fn redeem_reset_ticket(
        &self,
        token: &str,
        new_password: &str,
    ) -> Result<(), IdentityError> {
        if !meets_length_policy(new_password) {
            return Err(IdentityError::WeakPassword);
        }
        let password_hash = hash_password(new_password)?;
        let mut transaction = self.db_pool.begin().await?;
        let user_id = ResetTicket::redeem(&mut *transaction, token).await?;
        OperatorRecord::set_password_hash(&mut *transaction, user_id, &password_hash).await?;
        transaction.commit().await?;
        Ok(())
    }
}

// Valid bcrypt hash used to burn comparable verification time when the
// email is unknown. Never compared against a stored credential.
const DUMMY_HASH: &str = "$2b$12$LQv3c1yqBWVHxkd0LHAkCOYz6TtxMQJqhN8/LewY5MQgCLrPEiB7m";
