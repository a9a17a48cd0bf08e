// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use thiserror::Error;

use relaycommon::status::MessageStatus;

use crate::crypto::CryptoError;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error("Error deserializing column: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        Self::Database(e.into())
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for StorageError {
    fn from(e: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::Database(e.into())
    }
}

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Dynamic(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Failures of the message registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No row for the given message id.
    #[error("message not found")]
    NotFound,
    /// A row with this message id already exists.
    #[error("message already registered")]
    AlreadyRegistered,
    /// The row is in a terminal state; the requested transition is illegal.
    #[error("invalid transition from {current}")]
    InvalidTransition { current: MessageStatus },
    /// Attempt counts are monotonically non-decreasing.
    #[error("attempt count regression: stored {stored}, requested {requested}")]
    AttemptCountRegression { stored: i32, requested: i32 },
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<sqlx::Error> for RegistryError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.into())
    }
}

/// Failures of the identity store operations.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// An ACTIVE record already exists for this client id (or the
    /// fingerprint is already registered).
    #[error("client already registered")]
    ClientExists,
    #[error("client not found")]
    ClientNotFound,
    /// Revocation is terminal; a second revoke is refused.
    #[error("client already revoked")]
    AlreadyRevoked,
    #[error("operator already exists")]
    OperatorExists,
    #[error("operator not found")]
    OperatorNotFound,
    /// Uniform failure for unknown email, wrong password and inactive
    /// accounts alike.
    #[error("authentication failed")]
    AuthFailed,
    /// Operators may not toggle their own active flag.
    #[error("operators cannot change their own status")]
    SelfStatusChange,
    #[error("password does not meet the minimum length policy")]
    WeakPassword,
    /// Unknown, expired or already used reset token.
    #[error("invalid reset token")]
    InvalidResetToken,
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<sqlx::Error> for IdentityError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.into())
    }
}

#[derive(Debug, Error)]
pub enum ServiceCreationError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Service initialization failed: {0}")]
    InitializationFailed(Box<dyn std::error::Error + Send + Sync>),
}

impl<T: Into<sqlx::Error>> From<T> for ServiceCreationError {
    fn from(e: T) -> Self {
        Self::Storage(StorageError::from(e.into()))
    }
}
