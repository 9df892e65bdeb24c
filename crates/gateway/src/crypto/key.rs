//! [`EncryptionKey`] derivation from operator-supplied secret material.
//!
//! Accepted formats, tried in order:
//! 1. exactly 64 hex characters → the raw key bytes;
//! 2. a base64 string of at least 40 characters → the decoded bytes when they
//!    are exactly [`KEY_LEN`] long, otherwise SHA-256 of the decoded bytes;
//! 3. anything else → SHA-256 of the string exactly as supplied (passphrase).
//!
//! Surrounding whitespace is ignored when detecting hex and base64, but is part
//! of a passphrase.
//!
//! A blank or missing secret yields `None`: running without a key is a valid,
//! fail-open configuration.

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine as _,
};
use sha2::{Digest, Sha256};
use tracing::info;
use zeroize::Zeroizing;

/// Byte length of an AES-256 key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;

/// Minimum length for a secret to be treated as base64 key material.
const MIN_BASE64_LEN: usize = 40;

/// Standard alphabet, padding optional. Operators paste keys with and without `=`.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// How a key was obtained from the configured secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// 64 hex characters decoded directly.
    Hex,
    /// Base64 that decoded to exactly 32 bytes.
    Base64,
    /// Base64 of another length, folded through SHA-256.
    Base64Folded,
    /// Arbitrary passphrase hashed with SHA-256.
    Passphrase,
}

/// Fixed-size key buffer holding exactly [`KEY_LEN`] bytes.
///
/// Built once at startup and shared read-only. The bytes are zeroized on drop.
#[derive(Clone)]
pub struct EncryptionKey {
    bytes: Zeroizing<[u8; KEY_LEN]>,
    source: KeySource,
}

impl EncryptionKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
            source: KeySource::Hex,
        }
    }

    /// Derive a key from configured secret material.
    ///
    /// Returns `None` when the secret is absent or blank.
    pub fn derive(secret: Option<&str>) -> Option<Self> {
        let raw = secret?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let (bytes, source) = derive_bytes(trimmed, raw);
        info!(source = ?source, "encryption key derived");
        Some(Self {
            bytes: Zeroizing::new(bytes),
            source,
        })
    }

    /// Raw key bytes. Never log these.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    /// Which accepted format the key was derived from.
    pub fn source(&self) -> KeySource {
        self.source
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncryptionKey({:?}, [REDACTED])", self.source)
    }
}

fn derive_bytes(secret: &str, raw: &str) -> ([u8; KEY_LEN], KeySource) {
    if secret.len() == KEY_LEN * 2 && secret.bytes().all(|b| b.is_ascii_hexdigit()) {
        if let Ok(raw) = const_hex::decode(secret) {
            if let Ok(bytes) = <[u8; KEY_LEN]>::try_from(raw.as_slice()) {
                return (bytes, KeySource::Hex);
            }
        }
    }

    if looks_like_base64(secret) {
        if let Ok(raw) = LENIENT_BASE64.decode(secret) {
            return match <[u8; KEY_LEN]>::try_from(raw.as_slice()) {
                Ok(bytes) => (bytes, KeySource::Base64),
                Err(_) => (sha256(&raw), KeySource::Base64Folded),
            };
        }
    }

    (sha256(raw.as_bytes()), KeySource::Passphrase)
}

fn looks_like_base64(s: &str) -> bool {
    s.len() >= MIN_BASE64_LEN
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=')
}

fn sha256(data: &[u8]) -> [u8; KEY_LEN] {
    Sha256::digest(data).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;

    #[test]
    fn absent_or_blank_secret_yields_no_key() {
        assert!(EncryptionKey::derive(None).is_none());
        assert!(EncryptionKey::derive(Some("")).is_none());
        assert!(EncryptionKey::derive(Some("   ")).is_none());
    }

    #[test]
    fn hex_secret_is_decoded_directly() {
        let key = EncryptionKey::derive(Some("0".repeat(64).as_str())).unwrap();
        assert_eq!(key.source(), KeySource::Hex);
        assert_eq!(key.as_bytes(), &[0u8; KEY_LEN]);

        let key = EncryptionKey::derive(Some("ab".repeat(32).as_str())).unwrap();
        assert_eq!(key.as_bytes(), &[0xABu8; KEY_LEN]);
    }

    #[test]
    fn base64_of_32_bytes_is_used_directly() {
        let raw = [7u8; KEY_LEN];
        let encoded = STANDARD.encode(raw);
        let key = EncryptionKey::derive(Some(encoded.as_str())).unwrap();
        assert_eq!(key.source(), KeySource::Base64);
        assert_eq!(key.as_bytes(), &raw);
    }

    #[test]
    fn base64_of_other_length_is_folded() {
        let raw = [9u8; 48];
        let encoded = STANDARD.encode(raw);
        let key = EncryptionKey::derive(Some(encoded.as_str())).unwrap();
        assert_eq!(key.source(), KeySource::Base64Folded);
        assert_eq!(key.as_bytes(), &sha256(&raw));
    }

    #[test]
    fn short_or_non_base64_secret_is_hashed() {
        let key = EncryptionKey::derive(Some("correct horse battery staple")).unwrap();
        assert_eq!(key.source(), KeySource::Passphrase);
        assert_eq!(key.as_bytes(), &sha256(b"correct horse battery staple"));

        let short = EncryptionKey::derive(Some("c2hvcnQ=")).unwrap();
        assert_eq!(short.source(), KeySource::Passphrase);
    }

    #[test]
    fn passphrase_keeps_surrounding_whitespace() {
        let padded = EncryptionKey::derive(Some("  tenant secret \n")).unwrap();
        assert_eq!(padded.source(), KeySource::Passphrase);
        assert_eq!(padded.as_bytes(), &sha256(b"  tenant secret \n"));

        let bare = EncryptionKey::derive(Some("tenant secret")).unwrap();
        assert_ne!(padded.as_bytes(), bare.as_bytes());
    }

    #[test]
    fn padded_hex_is_still_hex() {
        let padded = format!(" {} ", "ab".repeat(32));
        let key = EncryptionKey::derive(Some(padded.as_str())).unwrap();
        assert_eq!(key.source(), KeySource::Hex);
        assert_eq!(key.as_bytes(), &[0xABu8; KEY_LEN]);
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = EncryptionKey::derive(Some("tenant-secret")).unwrap();
        let b = EncryptionKey::derive(Some("tenant-secret")).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn clone_outlives_original() {
        let original = EncryptionKey::from_bytes([0x5A; KEY_LEN]);
        let copy = original.clone();
        drop(original);
        assert_eq!(copy.as_bytes(), &[0x5A; KEY_LEN]);
    }

    #[test]
    fn key_redacted_in_debug() {
        let key = EncryptionKey::from_bytes([0xFF; KEY_LEN]);
        let printed = format!("{key:?}");
        assert!(printed.contains("REDACTED"));
        assert!(!printed.contains("255"));
    }
}
