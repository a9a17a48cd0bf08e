// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use bcrypt::DEFAULT_COST;

use super::CryptoError;

/// Minimum operator password length, enforced at call sites.
pub const MIN_PASSWORD_CHARS: usize = 8;

// bcrypt only processes the first 72 bytes of input. Hasher and verifier
// must truncate identically, otherwise verification silently fails for long
// passwords.
const BCRYPT_MAX_BYTES: usize = 72;

fn truncated(password: &str) -> &[u8] {
    let bytes = password.as_bytes();
    &bytes[..bytes.len().min(BCRYPT_MAX_BYTES)]
}

/// Hash a password with bcrypt and a per-password random salt.
pub fn hash_password(password: &str) -> Result<String, CryptoError> {
    Ok(bcrypt::hash(truncated(password), DEFAULT_COST)?)
}

/// Verify a password against a stored bcrypt hash. Malformed hashes count
/// as a failed verification.
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(truncated(password), hash).unwrap_or(false)
}

pub fn meets_length_policy(password: &str) -> bool {
    password.chars().count() >= MIN_PASSWORD_CHARS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_accepts_the_original_password() {
        let hash = hash_password("correct horse battery").unwrap();
        assert!(verify_password("correct horse battery", &hash));
        assert!(!verify_password("correct horse battery!", &hash));
    }

    #[test]
    fn hashes_are_salted() {
        let first = hash_password("hunter22").unwrap();
        let second = hash_password("hunter22").unwrap();
        assert_ne!(first, second);
        assert!(verify_password("hunter22", &first));
        assert!(verify_password("hunter22", &second));
    }

    #[test]
    fn long_passwords_truncate_identically() {
        let long = "x".repeat(100);
        let hash = hash_password(&long).unwrap();
        assert!(verify_password(&long, &hash));
        // Beyond 72 bytes the suffix no longer matters.
        let mut same_prefix = "x".repeat(BCRYPT_MAX_BYTES);
        same_prefix.push_str("completely different tail");
        assert!(verify_password(&same_prefix, &hash));
        // A difference inside the first 72 bytes does.
        let mut differing = "y".to_owned();
        differing.push_str(&"x".repeat(99));
        assert!(!verify_password(&differing, &hash));
    }

    #[test]
    fn malformed_hash_fails_verification() {
        assert!(!verify_password("whatever1", "not-a-bcrypt-hash"));
    }

    #[test]
    fn length_policy() {
        assert!(!meets_length_policy("seven77"));
        assert!(meets_length_policy("eight888"));
        assert!(meets_length_policy(&"x".repeat(100)));
    }
}
