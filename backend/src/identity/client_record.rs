// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use chrono::{DateTime, Utc};

use relaycommon::{
    identifiers::ClientId,
    portal::ClientInfo,
    status::ClientStatus,
};

/// A client machine's certificate identity.
///
/// Only `Active` and `Revoked` are ever stored; expiry is computed from the
/// validity window whenever the record is consulted.
#[derive(Debug, Clone, sqlx::FromRow)]
#[cfg_attr(test, derive(PartialEq))]
pub struct ClientRecord {
    pub client_id: ClientId,
    pub cert_fingerprint: String,
    pub domain: String,
    pub status: ClientStatus,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revocation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ClientRecord {
    /// Revocation is terminal; anything else expires with its certificate.
    pub fn effective_status(&self, now: DateTime<Utc>) -> ClientStatus {
        match self.status {
            ClientStatus::Revoked => ClientStatus::Revoked,
            _ if now >= self.expires_at => ClientStatus::Expired,
            stored => stored,
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.effective_status(now) == ClientStatus::Active
    }

    pub fn into_info(self, now: DateTime<Utc>) -> ClientInfo {
        let status = self.effective_status(now);
        ClientInfo {
            client_id: self.client_id,
            cert_fingerprint: self.cert_fingerprint,
            domain: self.domain,
            status,
            issued_at: self.issued_at,
            expires_at: self.expires_at,
            revoked_at: self.revoked_at,
            revocation_reason: self.revocation_reason,
        }
    }
}

pub(crate) mod persistence {
    use sqlx::PgExecutor;

    use crate::errors::IdentityError;

    use super::*;

    const COLUMNS: &str = "client_id, cert_fingerprint, domain, status, issued_at, \
         expires_at, revoked_at, revocation_reason, created_at";

    impl ClientRecord {
        /// Insert a fresh ACTIVE record. The unique constraints on
        /// `client_id` and `cert_fingerprint` reject duplicates.
        pub(crate) async fn store(
            connection: impl PgExecutor<'_>,
            client_id: ClientId,
            cert_fingerprint: String,
            domain: String,
            issued_at: DateTime<Utc>,
            expires_at: DateTime<Utc>,
        ) -> Result<ClientRecord, IdentityError> {
            let record = sqlx::query_as::<_, ClientRecord>(&format!(
                "INSERT INTO clients
                    (client_id, cert_fingerprint, domain, status, issued_at, expires_at)
                 VALUES ($1, $2, $3, 'active', $4, $5)
                 RETURNING {COLUMNS}"
            ))
            .bind(&client_id)
            .bind(&cert_fingerprint)
            .bind(&domain)
            .bind(issued_at)
            .bind(expires_at)
            .fetch_one(connection)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    IdentityError::ClientExists
                }
                _ => IdentityError::from(e),
            })?;
            Ok(record)
        }

        pub(crate) async fn load(
            connection: impl PgExecutor<'_>,
            client_id: &ClientId,
        ) -> Result<Option<ClientRecord>, IdentityError> {
            let record = sqlx::query_as::<_, ClientRecord>(&format!(
                "SELECT {COLUMNS} FROM clients WHERE client_id = $1"
            ))
            .bind(client_id)
            .fetch_optional(connection)
            .await?;
            Ok(record)
        }

        pub(crate) async fn load_by_fingerprint(
            connection: impl PgExecutor<'_>,
            fingerprint: &str,
        ) -> Result<Option<ClientRecord>, IdentityError> {
            let record = sqlx::query_as::<_, ClientRecord>(&format!(
                "SELECT {COLUMNS} FROM clients WHERE cert_fingerprint = $1"
            ))
            .bind(fingerprint)
            .fetch_optional(connection)
            .await?;
            Ok(record)
        }

        pub(crate) async fn list(
            connection: impl PgExecutor<'_>,
        ) -> Result<Vec<ClientRecord>, IdentityError> {
            let records = sqlx::query_as::<_, ClientRecord>(&format!(
                "SELECT {COLUMNS} FROM clients ORDER BY created_at DESC"
            ))
            .fetch_all(connection)
            .await?;
            Ok(records)
        }

        /// Active records whose certificate runs out within the window.
        pub(crate) async fn list_expiring(
            connection: impl PgExecutor<'_>,
            within_days: i32,
        ) -> Result<Vec<ClientRecord>, IdentityError> {
            let records = sqlx::query_as::<_, ClientRecord>(&format!(
                "SELECT {COLUMNS} FROM clients
                 WHERE status = 'active'
                   AND expires_at >= now()
                   AND expires_at < now() + make_interval(days => $1)
                 ORDER BY expires_at ASC"
            ))
            .bind(within_days)
            .fetch_all(connection)
            .await?;
            Ok(records)
        }

        /// Transition ACTIVE → REVOKED. Exactly one of the error variants
        /// fires when the guarded update matches no row.
        pub(crate) async fn revoke(
            connection: &mut sqlx::PgConnection,
            client_id: &ClientId,
            reason: &str,
        ) -> Result<ClientRecord, IdentityError> {
            let revoked = sqlx::query_as::<_, ClientRecord>(&format!(
                "UPDATE clients
                 SET status = 'revoked', revoked_at = now(), revocation_reason = $2,
                     updated_at = now()
                 WHERE client_id = $1 AND status = 'active'
                 RETURNING {COLUMNS}"
            ))
            .bind(client_id)
            .bind(reason)
            .fetch_optional(&mut *connection)
            .await?;

            match revoked {
                Some(record) => Ok(record),
                None => match Self::load(&mut *connection, client_id).await? {
                    Some(_) => Err(IdentityError::AlreadyRevoked),
                    None => Err(IdentityError::ClientNotFound),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn record(status: ClientStatus, expires_in: Duration) -> ClientRecord {
        let now = Utc::now();
        ClientRecord {
            client_id: "client_alpha".parse().unwrap(),
            cert_fingerprint: "ab".repeat(32),
            domain: "default".into(),
            status,
            issued_at: now - Duration::days(1),
            expires_at: now + expires_in,
            revoked_at: None,
            revocation_reason: None,
            created_at: now - Duration::days(1),
        }
    }

    #[test]
    fn active_within_validity_window() {
        let record = record(ClientStatus::Active, Duration::days(30));
        assert!(record.is_active(Utc::now()));
        assert_eq!(record.effective_status(Utc::now()), ClientStatus::Active);
    }

    #[test]
    fn expiry_is_computed_lazily() {
        let record = record(ClientStatus::Active, Duration::days(30));
        let after_expiry = Utc::now() + Duration::days(31);
        assert_eq!(record.effective_status(after_expiry), ClientStatus::Expired);
        assert!(!record.is_active(after_expiry));
    }

    #[test]
    fn revocation_trumps_expiry() {
        let record = record(ClientStatus::Revoked, Duration::days(-5));
        assert_eq!(record.effective_status(Utc::now()), ClientStatus::Revoked);
        assert!(!record.is_active(Utc::now()));
    }
}
