// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use chrono::{DateTime, Utc};

use relaycommon::{
    identifiers::{ClientId, MessageId},
    portal::MessageSummary,
    status::MessageStatus,
};

/// A message row as stored by the registry: hashed sender, encrypted body,
/// lifecycle state and the delivery ledger columns.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageRecord {
    pub id: i64,
    pub message_id: MessageId,
    pub client_id: ClientId,
    pub sender_number_hashed: String,
    pub encrypted_body: String,
    pub encryption_key_version: i16,
    pub status: MessageStatus,
    pub domain: String,
    pub attempt_count: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub queued_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl MessageRecord {
    pub fn summary(&self) -> MessageSummary {
        MessageSummary {
            message_id: self.message_id,
            client_id: self.client_id.clone(),
            sender_number_hashed: self.sender_number_hashed.clone(),
            status: self.status,
            domain: self.domain.clone(),
            attempt_count: self.attempt_count,
            retryable: !self.status.is_terminal(),
            error_message: self.error_message.clone(),
            created_at: self.created_at,
            delivered_at: self.delivered_at,
        }
    }
}

/// Aggregate counts for the operator stats view.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageStats {
    pub total: i64,
    pub queued: i64,
    pub processing: i64,
    pub delivered: i64,
    pub failed: i64,
    pub last_hour: i64,
    pub last_day: i64,
}

pub(crate) mod persistence {
    use sqlx::{PgConnection, PgExecutor, QueryBuilder};

    use crate::errors::RegistryError;

    use super::*;

    const COLUMNS: &str = "id, message_id, client_id, sender_number_hashed, encrypted_body, \
         encryption_key_version, status, domain, attempt_count, error_message, \
         created_at, queued_at, delivered_at, last_attempt_at";

    #[allow(clippy::too_many_arguments)]
    impl MessageRecord {
        /// Insert a new row with status `queued`. The unique index on
        /// `message_id` turns a repeated registration into
        /// [`RegistryError::AlreadyRegistered`] without side effects.
        pub(crate) async fn store(
            connection: impl PgExecutor<'_>,
            message_id: MessageId,
            client_id: &ClientId,
            sender_number_hashed: &str,
            encrypted_body: &str,
            encryption_key_version: i16,
            domain: &str,
            queued_at: DateTime<Utc>,
        ) -> Result<MessageRecord, RegistryError> {
            let record = sqlx::query_as::<_, MessageRecord>(&format!(
                "INSERT INTO messages
                    (message_id, client_id, sender_number_hashed, encrypted_body,
                     encryption_key_version, status, domain, queued_at)
                 VALUES ($1, $2, $3, $4, $5, 'queued', $6, $7)
                 RETURNING {COLUMNS}"
            ))
            .bind(message_id)
            .bind(client_id)
            .bind(sender_number_hashed)
            .bind(encrypted_body)
            .bind(encryption_key_version)
            .bind(domain)
            .bind(queued_at)
            .fetch_one(connection)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    RegistryError::AlreadyRegistered
                }
                _ => RegistryError::from(e),
            })?;
            Ok(record)
        }

        pub(crate) async fn load(
            connection: impl PgExecutor<'_>,
            message_id: MessageId,
        ) -> Result<Option<MessageRecord>, RegistryError> {
            let record = sqlx::query_as::<_, MessageRecord>(&format!(
                "SELECT {COLUMNS} FROM messages WHERE message_id = $1"
            ))
            .bind(message_id)
            .fetch_optional(connection)
            .await?;
            Ok(record)
        }

        /// Transition (`queued` ∨ `processing`) → `delivered`. The guard in
        /// the UPDATE makes the transition race-free under concurrent
        /// confirmations: exactly one caller wins, later ones observe
        /// [`RegistryError::InvalidTransition`].
        pub(crate) async fn mark_delivered(
            connection: &mut PgConnection,
            message_id: MessageId,
        ) -> Result<MessageRecord, RegistryError> {
            let delivered = sqlx::query_as::<_, MessageRecord>(&format!(
                "UPDATE messages
                 SET status = 'delivered', delivered_at = now(), last_attempt_at = now()
                 WHERE message_id = $1 AND status IN ('queued', 'processing')
                 RETURNING {COLUMNS}"
            ))
            .bind(message_id)
            .fetch_optional(&mut *connection)
            .await?;

            match delivered {
                Some(record) => Ok(record),
                None => match Self::load(&mut *connection, message_id).await? {
                    Some(record) => Err(RegistryError::InvalidTransition {
                        current: record.status,
                    }),
                    None => Err(RegistryError::NotFound),
                },
            }
        }

        /// Rewrite status and attempt count. Attempt counts are monotone;
        /// the guard refuses regressions.
        pub(crate) async fn update_status(
            connection: &mut PgConnection,
            message_id: MessageId,
            status: MessageStatus,
            attempt_count: i32,
            error_message: Option<&str>,
        ) -> Result<MessageRecord, RegistryError> {
            let updated = sqlx::query_as::<_, MessageRecord>(&format!(
                "UPDATE messages
                 SET status = $2, attempt_count = $3, error_message = $4,
                     last_attempt_at = now()
                 WHERE message_id = $1 AND attempt_count <= $3
                 RETURNING {COLUMNS}"
            ))
            .bind(message_id)
            .bind(status)
            .bind(attempt_count)
            .bind(error_message)
            .fetch_optional(&mut *connection)
            .await?;

            match updated {
                Some(record) => Ok(record),
                None => match Self::load(&mut *connection, message_id).await? {
                    Some(record) => Err(RegistryError::AttemptCountRegression {
                        stored: record.attempt_count,
                        requested: attempt_count,
                    }),
                    None => Err(RegistryError::NotFound),
                },
            }
        }

        pub(crate) async fn list<'a>(
            connection: impl PgExecutor<'a>,
            client_id: Option<&ClientId>,
            status: Option<MessageStatus>,
            limit: i64,
            offset: i64,
        ) -> Result<Vec<MessageRecord>, RegistryError> {
            let mut query = QueryBuilder::new(format!("SELECT {COLUMNS} FROM messages WHERE 1=1"));
            if let Some(client_id) = client_id {
                query.push(" AND client_id = ");
                query.push_bind(client_id.clone());
            }
            if let Some(status) = status {
                query.push(" AND status = ");
                query.push_bind(status);
            }
            query.push(" ORDER BY created_at DESC LIMIT ");
            query.push_bind(limit);
            query.push(" OFFSET ");
            query.push_bind(offset);

            let records = query
                .build_query_as::<MessageRecord>()
                .fetch_all(connection)
                .await?;
            Ok(records)
        }

        pub(crate) async fn count<'a>(
            connection: impl PgExecutor<'a>,
            client_id: Option<&ClientId>,
            status: Option<MessageStatus>,
        ) -> Result<i64, RegistryError> {
            let mut query = QueryBuilder::new("SELECT count(*) FROM messages WHERE 1=1");
            if let Some(client_id) = client_id {
                query.push(" AND client_id = ");
                query.push_bind(client_id.clone());
            }
            if let Some(status) = status {
                query.push(" AND status = ");
                query.push_bind(status);
            }
            let count: i64 = query.build_query_scalar().fetch_one(connection).await?;
            Ok(count)
        }

        pub(crate) async fn stats(
            connection: impl PgExecutor<'_>,
        ) -> Result<MessageStats, RegistryError> {
            let stats = sqlx::query_as::<_, MessageStats>(
                "SELECT
                    count(*) AS total,
                    count(*) FILTER (WHERE status = 'queued') AS queued,
                    count(*) FILTER (WHERE status = 'processing') AS processing,
                    count(*) FILTER (WHERE status = 'delivered') AS delivered,
                    count(*) FILTER (WHERE status = 'failed') AS failed,
                    count(*) FILTER (WHERE created_at >= now() - interval '1 hour')
                        AS last_hour,
                    count(*) FILTER (WHERE created_at >= now() - interval '1 day')
                        AS last_day
                 FROM messages",
            )
            .fetch_one(connection)
            .await?;
            Ok(stats)
        }

        /// Retention sweep: delivered messages older than the window are
        /// removed, everything else is kept.
        pub(crate) async fn delete_delivered_older_than(
            connection: impl PgExecutor<'_>,
            days: i32,
        ) -> Result<u64, RegistryError> {
            let result = sqlx::query(
                "DELETE FROM messages
                 WHERE status = 'delivered'
                   AND created_at < now() - make_interval(days => $1)",
            )
            .bind(days)
            .execute(connection)
            .await?;
            Ok(result.rows_affected())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_marks_terminal_states() {
        let now = Utc::now();
        let mut record = MessageRecord {
            id: 1,
            message_id: MessageId::random(),
            client_id: "client_alpha".parse().unwrap(),
            sender_number_hashed: "ab".repeat(32),
            encrypted_body: "blob".into(),
            encryption_key_version: 1,
            status: MessageStatus::Queued,
            domain: "default".into(),
            attempt_count: 2,
            error_message: None,
            created_at: now,
            queued_at: now,
            delivered_at: None,
            last_attempt_at: None,
        };
        assert!(record.summary().retryable);
        record.status = MessageStatus::Failed;
        assert!(!record.summary().retryable);
        record.status = MessageStatus::Delivered;
        assert!(!record.summary().retryable);
    }
}
