// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use sha2::{Digest, Sha256};

use relaycommon::identifiers::PhoneNumber;

/// Deterministic salted hashing of sender numbers.
///
/// Identical senders produce identical hashes so the portal can group
/// messages, while the process-wide salt keeps precomputed tables useless.
#[derive(Clone)]
pub struct PhoneHasher {
    salt: String,
}

impl PhoneHasher {
    pub fn new(salt: impl Into<String>) -> Self {
        Self { salt: salt.into() }
    }

    /// `hex(SHA-256(salt ‖ number))`, 64 hex digits.
    pub fn hash(&self, number: &PhoneNumber) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.salt.as_bytes());
        hasher.update(number.as_str().as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number(raw: &str) -> PhoneNumber {
        raw.parse().unwrap()
    }

    #[test]
    fn hash_is_64_hex_digits() {
        let hasher = PhoneHasher::new("pepper");
        let digest = hasher.hash(&number("+491521234567"));
        assert_eq!(digest.len(), 64);
        assert!(digest.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_ne!(digest, "+491521234567");
    }

    #[test]
    fn hashing_is_deterministic_per_salt() {
        let hasher = PhoneHasher::new("pepper");
        assert_eq!(
            hasher.hash(&number("+491521234567")),
            hasher.hash(&number("+491521234567"))
        );
        assert_ne!(
            hasher.hash(&number("+491521234567")),
            hasher.hash(&number("+491521234568"))
        );
    }

    #[test]
    fn different_salts_produce_different_hashes() {
        let first = PhoneHasher::new("pepper");
        let second = PhoneHasher::new("sea salt");
        assert_ne!(
            first.hash(&number("+491521234567")),
            second.hash(&number("+491521234567"))
        );
    }
}
