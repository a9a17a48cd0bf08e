// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{collections::HashMap, fs, path::Path};

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use super::CryptoError;

/// Version tag stored next to each ciphertext. Rotation adds versions and
/// never removes one, so every stored row stays readable.
pub type KeyVersion = i16;

const KEY_BYTES: usize = 32;
const NONCE_BYTES: usize = 12;

/// Versioned AES-256-GCM keyring for message bodies.
///
/// Keys live in a directory of `v<N>.key` files (base64-encoded 32-byte
/// keys). The whole directory is loaded at startup; the configured current
/// version is used for new encryptions. Decryption is parameterized by the
/// version recorded with the ciphertext; an unknown version falls back to
/// the current key and fails closed if authentication fails.
pub struct MessageCipher {
    keys: HashMap<KeyVersion, Aes256Gcm>,
    current_version: KeyVersion,
}

impl MessageCipher {
    /// Load every `v<N>.key` file from `key_dir`.
    pub fn from_dir(key_dir: &Path, current_version: KeyVersion) -> Result<Self, CryptoError> {
        let mut keys = HashMap::new();
        for entry in fs::read_dir(key_dir)? {
            let entry = entry?;
            let Some(version) = parse_key_file_name(&entry.file_name().to_string_lossy()) else {
                continue;
            };
            let encoded = fs::read_to_string(entry.path())?;
            let key_material = decode_key(encoded.trim())?;
            keys.insert(version, Aes256Gcm::new((&key_material).into()));
        }
        Self::from_parts(keys, current_version)
    }

    /// Build a keyring from raw key material. Used by tests and key tooling.
    pub fn from_raw_keys(
        raw: impl IntoIterator<Item = (KeyVersion, [u8; KEY_BYTES])>,
        current_version: KeyVersion,
    ) -> Result<Self, CryptoError> {
        let keys = raw
            .into_iter()
            .map(|(version, material)| (version, Aes256Gcm::new((&material).into())))
            .collect();
        Self::from_parts(keys, current_version)
    }

    fn from_parts(
        keys: HashMap<KeyVersion, Aes256Gcm>,
        current_version: KeyVersion,
    ) -> Result<Self, CryptoError> {
        if keys.is_empty() {
            return Err(CryptoError::KeysNotLoaded);
        }
        if !keys.contains_key(&current_version) {
            return Err(CryptoError::UnknownKeyVersion(current_version));
        }
        Ok(Self {
            keys,
            current_version,
        })
    }

    pub fn current_version(&self) -> KeyVersion {
        self.current_version
    }

    /// Encrypt with the current key. Returns the base64 of nonce followed by
    /// ciphertext, and the version that must be stored alongside.
    pub fn encrypt(&self, plaintext: &str) -> Result<(String, KeyVersion), CryptoError> {
        let cipher = self
            .keys
            .get(&self.current_version)
            .ok_or(CryptoError::KeysNotLoaded)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::EncryptionFailed)?;
        let mut blob = Vec::with_capacity(NONCE_BYTES + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok((BASE64.encode(blob), self.current_version))
    }

    /// Decrypt a stored blob with the key of the recorded version. A version
    /// no longer in the ring falls back to the current key; authentication
    /// failure is surfaced as [`CryptoError::DecryptionFailed`] either way.
    pub fn decrypt(&self, encrypted_b64: &str, version: KeyVersion) -> Result<String, CryptoError> {
        let cipher = self
            .keys
            .get(&version)
            .or_else(|| self.keys.get(&self.current_version))
            .ok_or(CryptoError::KeysNotLoaded)?;
        let blob = BASE64
            .decode(encrypted_b64)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        if blob.len() <= NONCE_BYTES {
            return Err(CryptoError::DecryptionFailed);
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_BYTES);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptionFailed)
    }

    /// Generate fresh key material in the on-disk encoding.
    pub fn generate_key() -> String {
        let material = Aes256Gcm::generate_key(&mut OsRng);
        BASE64.encode(material)
    }
}

fn parse_key_file_name(name: &str) -> Option<KeyVersion> {
    name.strip_prefix('v')?.strip_suffix(".key")?.parse().ok()
}

fn decode_key(encoded: &str) -> Result<[u8; KEY_BYTES], CryptoError> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| CryptoError::MalformedKey("key is not 32 bytes".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> MessageCipher {
        MessageCipher::from_raw_keys([(1, [7u8; KEY_BYTES]), (2, [9u8; KEY_BYTES])], 2).unwrap()
    }

    #[test]
    fn round_trip_with_current_key() {
        let cipher = test_cipher();
        let (blob, version) = cipher.encrypt("hello").unwrap();
        assert_eq!(version, 2);
        assert_eq!(cipher.decrypt(&blob, version).unwrap(), "hello");
    }

    #[test]
    fn decrypt_with_wrong_version_fails_closed() {
        let cipher = test_cipher();
        let (blob, _) = cipher.encrypt("hello").unwrap();
        // Version 1 holds different key material; authentication must fail
        // rather than produce garbage.
        assert!(matches!(
            cipher.decrypt(&blob, 1),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn unknown_version_falls_back_to_current() {
        let cipher = test_cipher();
        let (blob, _) = cipher.encrypt("hello").unwrap();
        // Version 42 was never loaded; the current key decrypts the blob.
        assert_eq!(cipher.decrypt(&blob, 42).unwrap(), "hello");
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let cipher = test_cipher();
        let (blob, version) = cipher.encrypt("hello").unwrap();
        let mut bytes = BASE64.decode(&blob).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = BASE64.encode(bytes);
        assert!(matches!(
            cipher.decrypt(&tampered, version),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn old_versions_stay_readable_after_rotation() {
        let old = MessageCipher::from_raw_keys([(1, [7u8; KEY_BYTES])], 1).unwrap();
        let (blob, version) = old.encrypt("archived").unwrap();

        // Rotation adds version 2 and makes it current.
        let rotated =
            MessageCipher::from_raw_keys([(1, [7u8; KEY_BYTES]), (2, [9u8; KEY_BYTES])], 2)
                .unwrap();
        assert_eq!(rotated.decrypt(&blob, version).unwrap(), "archived");
    }

    #[test]
    fn loads_keys_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("v1.key"), MessageCipher::generate_key()).unwrap();
        std::fs::write(dir.path().join("v2.key"), MessageCipher::generate_key()).unwrap();
        std::fs::write(dir.path().join("README"), "not a key").unwrap();

        let cipher = MessageCipher::from_dir(dir.path(), 2).unwrap();
        let (blob, version) = cipher.encrypt("from disk").unwrap();
        assert_eq!(version, 2);
        assert_eq!(cipher.decrypt(&blob, version).unwrap(), "from disk");
    }

    #[test]
    fn missing_current_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("v1.key"), MessageCipher::generate_key()).unwrap();
        assert!(matches!(
            MessageCipher::from_dir(dir.path(), 3),
            Err(CryptoError::UnknownKeyVersion(3))
        ));
    }

    #[test]
    fn empty_directory_means_no_keys() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            MessageCipher::from_dir(dir.path(), 1),
            Err(CryptoError::KeysNotLoaded)
        ));
    }

    #[test]
    fn key_file_names() {
        assert_eq!(parse_key_file_name("v1.key"), Some(1));
        assert_eq!(parse_key_file_name("v12.key"), Some(12));
        assert_eq!(parse_key_file_name("w1.key"), None);
        assert_eq!(parse_key_file_name("v1.pem"), None);
    }
}
