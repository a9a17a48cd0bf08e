// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use chrono::{DateTime, Utc};

use relaycommon::{
    identifiers::ClientId,
    portal::OperatorProfile,
    status::UserRole,
};

/// A portal operator account.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OperatorRecord {
    pub id: i64,
    pub email: String,
    pub(crate) password_hash: String,
    pub role: UserRole,
    pub client_id: Option<ClientId>,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl OperatorRecord {
    pub fn profile(&self) -> OperatorProfile {
        OperatorProfile {
            email: self.email.clone(),
            role: self.role,
            client_id: self.client_id.clone(),
            created_at: self.created_at,
            last_login: self.last_login,
        }
    }
}

pub(crate) mod persistence {
    use sqlx::PgExecutor;

    use crate::errors::IdentityError;

    use super::*;

    const COLUMNS: &str =
        "id, email, password_hash, role, client_id, is_active, last_login, created_at";

    impl OperatorRecord {
        pub(crate) async fn store(
            connection: impl PgExecutor<'_>,
            email: &str,
            password_hash: &str,
            role: UserRole,
            client_id: Option<&ClientId>,
        ) -> Result<OperatorRecord, IdentityError> {
            let record = sqlx::query_as::<_, OperatorRecord>(&format!(
                "INSERT INTO users (email, password_hash, role, client_id)
                 VALUES ($1, $2, $3, $4)
                 RETURNING {COLUMNS}"
            ))
            .bind(email)
            .bind(password_hash)
            .bind(role)
            .bind(client_id)
            .fetch_one(connection)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    IdentityError::OperatorExists
                }
                _ => IdentityError::from(e),
            })?;
            Ok(record)
        }

        pub(crate) async fn load(
            connection: impl PgExecutor<'_>,
            id: i64,
        ) -> Result<Option<OperatorRecord>, IdentityError> {
            let record = sqlx::query_as::<_, OperatorRecord>(&format!(
                "SELECT {COLUMNS} FROM users WHERE id = $1"
            ))
            .bind(id)
            .fetch_optional(connection)
            .await?;
            Ok(record)
        }

        pub(crate) async fn load_by_email(
            connection: impl PgExecutor<'_>,
            email: &str,
        ) -> Result<Option<OperatorRecord>, IdentityError> {
            let record = sqlx::query_as::<_, OperatorRecord>(&format!(
                "SELECT {COLUMNS} FROM users WHERE email = $1"
            ))
            .bind(email)
            .fetch_optional(connection)
            .await?;
            Ok(record)
        }

        pub(crate) async fn update_role(
            connection: impl PgExecutor<'_>,
            id: i64,
            role: UserRole,
        ) -> Result<(), IdentityError> {
            let result = sqlx::query(
                "UPDATE users SET role = $2, updated_at = now() WHERE id = $1",
            )
            .bind(id)
            .bind(role)
            .execute(connection)
            .await?;
            if result.rows_affected() == 0 {
                return Err(IdentityError::OperatorNotFound);
            }
            Ok(())
        }

        pub(crate) async fn set_active(
            connection: impl PgExecutor<'_>,
            id: i64,
            is_active: bool,
        ) -> Result<(), IdentityError> {
            let result = sqlx::query(
                "UPDATE users SET is_active = $2, updated_at = now() WHERE id = $1",
            )
            .bind(id)
            .bind(is_active)
            .execute(connection)
            .await?;
            if result.rows_affected() == 0 {
                return Err(IdentityError::OperatorNotFound);
            }
            Ok(())
        }

        pub(crate) async fn set_password_hash(
            connection: impl PgExecutor<'_>,
            id: i64,
            password_hash: &str,
        ) -> Result<(), IdentityError> {
            let result = sqlx::query(
                "UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1",
            )
            .bind(id)
            .bind(password_hash)
            .execute(connection)
            .await?;
            if result.rows_affected() == 0 {
                return Err(IdentityError::OperatorNotFound);
            }
            Ok(())
        }

        pub(crate) async fn touch_login(
            connection: impl PgExecutor<'_>,
            id: i64,
        ) -> Result<(), IdentityError> {
            sqlx::query("UPDATE users SET last_login = now() WHERE id = $1")
                .bind(id)
                .execute(connection)
                .await?;
            Ok(())
        }
    }
}
