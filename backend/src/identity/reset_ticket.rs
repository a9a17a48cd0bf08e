// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;

/// A single-use password reset ticket.
///
/// The token is high-entropy and opaque; tickets are valid until their
/// expiry and burn on first redemption.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ResetTicket {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

/// Tickets stay redeemable for one hour.
pub fn ticket_validity() -> Duration {
    Duration::hours(1)
}

pub(crate) fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub(crate) mod persistence {
    use sqlx::PgExecutor;

    use crate::errors::IdentityError;

    use super::*;

    impl ResetTicket {
        pub(crate) async fn store(
            connection: impl PgExecutor<'_>,
            user_id: i64,
            token: &str,
            expires_at: DateTime<Utc>,
        ) -> Result<ResetTicket, IdentityError> {
            let ticket = sqlx::query_as::<_, ResetTicket>(
                "INSERT INTO password_resets (user_id, token, expires_at)
                 VALUES ($1, $2, $3)
                 RETURNING id, user_id, token, expires_at, used_at",
            )
            .bind(user_id)
            .bind(token)
            .bind(expires_at)
            .fetch_one(connection)
            .await?;
            Ok(ticket)
        }

        /// Burn the ticket and return its owner. The guarded update makes
        /// redemption first-come-first-served: a second call, an expired
        /// token and an unknown token are indistinguishable to the caller.
        pub(crate) async fn redeem(
            connection: impl PgExecutor<'_>,
            token: &str,
        ) -> Result<i64, IdentityError> {
            let user_id: Option<i64> = sqlx::query_scalar(
                "UPDATE password_resets
                 SET used_at = now()
                 WHERE token = $1 AND used_at IS NULL AND expires_at > now()
                 RETURNING user_id",
            )
            .bind(token)
            .fetch_optional(connection)
            .await?;
            user_id.ok_or(IdentityError::InvalidResetToken)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_long_and_unique() {
        let first = generate_token();
        let second = generate_token();
        assert_eq!(first.len(), 64);
        assert!(first.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_ne!(first, second);
    }
}
