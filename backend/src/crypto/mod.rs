// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Crypto engine: versioned authenticated encryption for message bodies,
//! salted hashing for sender numbers and bcrypt password handling.

use thiserror::Error;

mod cipher;
mod password;
mod phone;

pub use cipher::{KeyVersion, MessageCipher};
pub use password::{
    hash_password, meets_length_policy, verify_password, MIN_PASSWORD_CHARS,
};
pub use phone::PhoneHasher;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// No key material has been loaded.
    #[error("encryption keys not loaded")]
    KeysNotLoaded,
    /// The referenced key version is not part of the keyring.
    #[error("unknown key version {0}")]
    UnknownKeyVersion(i16),
    /// Authentication of the ciphertext failed; the engine fails closed.
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("malformed key material: {0}")]
    MalformedKey(String),
    #[error("password hashing failed: {0}")]
    PasswordHash(#[from] bcrypt::BcryptError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
