//! Authenticated encryption of single field values.
//!
//! Every encrypted value is stored as an [`Envelope`] string:
//!
//! ```text
//! enc:v1:<base64(nonce)>:<base64(tag)>:<base64(ciphertext)>
//! ```
//!
//! Sealed with AES-256-GCM. The tag is carried apart from the ciphertext, so
//! envelopes written by other services using the same key interoperate.
//!
//! The plaintext is the canonical JSON text of the value, so numbers, booleans,
//! objects and arrays survive the round trip with their type.
//!
//! Both directions fail open: a missing key stores plaintext, and anything that
//! cannot be opened is handed back untouched. Decryption failures are reported
//! as [`PassThrough`] reasons to the diagnostics target and counted in
//! [`CipherStats`].

use std::sync::atomic::{AtomicU64, Ordering};

use aes_gcm::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::key::EncryptionKey;

/// Byte length of the AEAD nonce (12 bytes = 96 bits).
pub const NONCE_LEN: usize = 12;

/// Byte length of the AEAD authentication tag.
pub const TAG_LEN: usize = 16;

/// Version marker that opens every envelope.
pub const ENVELOPE_MARKER: &str = "enc:v1";

const ENVELOPE_PREFIX: &str = "enc:v1:";

/// Tracing target for pass-through outcomes.
pub const DIAGNOSTICS_TARGET: &str = "gateway::diagnostics";

/// A parsed envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub nonce: [u8; NONCE_LEN],
    pub tag: [u8; TAG_LEN],
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// Encode to `enc:v1:<iv>:<tag>:<ciphertext>`.
    pub fn to_string_repr(&self) -> String {
        format!(
            "{ENVELOPE_MARKER}:{}:{}:{}",
            STANDARD.encode(self.nonce),
            STANDARD.encode(self.tag),
            STANDARD.encode(&self.ciphertext),
        )
    }

    /// Parse an envelope string.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::InvalidFormat`] unless the string is the marker
    /// followed by exactly three non-empty base64 segments of the right sizes.
    pub fn parse(s: &str) -> Result<Self, CipherError> {
        let rest = s
            .strip_prefix(ENVELOPE_PREFIX)
            .ok_or(CipherError::InvalidFormat)?;
        let parts: Vec<&str> = rest.split(':').collect();
        let [iv, tag, ciphertext] = parts.as_slice() else {
            return Err(CipherError::InvalidFormat);
        };

        let nonce = decode_fixed::<NONCE_LEN>(iv)?;
        let tag = decode_fixed::<TAG_LEN>(tag)?;
        let ciphertext = STANDARD
            .decode(ciphertext)
            .map_err(|_| CipherError::InvalidFormat)?;
        if ciphertext.is_empty() {
            return Err(CipherError::InvalidFormat);
        }

        Ok(Self {
            nonce,
            tag,
            ciphertext,
        })
    }
}

fn decode_fixed<const N: usize>(segment: &str) -> Result<[u8; N], CipherError> {
    let raw = STANDARD
        .decode(segment)
        .map_err(|_| CipherError::InvalidFormat)?;
    <[u8; N]>::try_from(raw.as_slice()).map_err(|_| CipherError::InvalidFormat)
}

/// Errors produced inside the cipher. Never surfaced past [`FieldCipher`].
#[derive(Debug, Error)]
pub enum CipherError {
    /// AEAD encryption or tag verification failed.
    #[error("aead operation failed")]
    AeadFailure,

    /// The string is not a well-formed envelope.
    #[error("invalid envelope format")]
    InvalidFormat,

    /// The value could not be rendered to JSON text.
    #[error("value serialisation failed: {0}")]
    Serialisation(#[from] serde_json::Error),
}

/// Why a value came back from decryption unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassThrough {
    /// Not a string starting with the envelope marker: ordinary plaintext.
    NotEnvelope,
    /// An envelope was found but no key is configured.
    NoKey,
    /// The marker was present but the segments did not parse.
    Malformed,
    /// Tag verification failed: wrong key or tampered data.
    Authentication,
    /// The decrypted bytes were not UTF-8 text.
    InvalidText,
}

/// Outcome of [`FieldCipher::open`].
#[derive(Debug, Clone, PartialEq)]
pub enum Decryption {
    Decrypted(Value),
    PassedThrough(PassThrough),
}

/// Counters for cipher outcomes, readable while the gateway runs.
#[derive(Debug, Default)]
pub struct CipherStats {
    decrypted: AtomicU64,
    passed_through: AtomicU64,
    plaintext_writes: AtomicU64,
}

/// Point-in-time copy of [`CipherStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CipherStatsSnapshot {
    /// Envelopes opened successfully.
    pub decrypted: u64,
    /// Envelopes that could not be opened and were returned as-is.
    pub passed_through: u64,
    /// Values written without encryption because no key is configured.
    pub plaintext_writes: u64,
}

impl CipherStats {
    pub fn snapshot(&self) -> CipherStatsSnapshot {
        CipherStatsSnapshot {
            decrypted: self.decrypted.load(Ordering::Relaxed),
            passed_through: self.passed_through.load(Ordering::Relaxed),
            plaintext_writes: self.plaintext_writes.load(Ordering::Relaxed),
        }
    }
}

/// Field-level encryptor bound to the process key.
#[derive(Debug)]
pub struct FieldCipher {
    key: Option<EncryptionKey>,
    stats: CipherStats,
}

impl FieldCipher {
    /// Build a cipher around the startup key. `None` means fail-open plaintext.
    pub fn new(key: Option<EncryptionKey>) -> Self {
        if key.is_none() {
            warn!(
                target: DIAGNOSTICS_TARGET,
                "no encryption key configured; field values will be stored in plaintext"
            );
        }
        Self {
            key,
            stats: CipherStats::default(),
        }
    }

    /// `true` when a key is configured.
    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    pub fn stats(&self) -> &CipherStats {
        &self.stats
    }

    /// `true` iff `value` is a string holding a well-formed envelope.
    pub fn is_encrypted(value: &Value) -> bool {
        matches!(value, Value::String(s) if Envelope::parse(s).is_ok())
    }

    /// Encrypt one value into an envelope string.
    ///
    /// Returns `value` unchanged when there is no key, when it is null, or when
    /// it already is an envelope.
    pub fn encrypt(&self, value: Value) -> Value {
        if value.is_null() || Self::is_encrypted(&value) {
            return value;
        }
        let Some(key) = &self.key else {
            self.stats.plaintext_writes.fetch_add(1, Ordering::Relaxed);
            return value;
        };

        match seal(&value, key) {
            Ok(envelope) => Value::String(envelope.to_string_repr()),
            Err(e) => {
                self.stats.plaintext_writes.fetch_add(1, Ordering::Relaxed);
                warn!(target: DIAGNOSTICS_TARGET, error = %e, "field encryption failed; storing plaintext");
                value
            }
        }
    }

    /// Decrypt one value, returning the original untouched when it cannot be opened.
    pub fn decrypt(&self, value: Value) -> Value {
        match self.open(&value) {
            Decryption::Decrypted(plain) => plain,
            Decryption::PassedThrough(_) => value,
        }
    }

    /// Decrypt one value and report what happened.
    ///
    /// Failed envelopes are logged on the diagnostics target and counted;
    /// ordinary plaintext is not.
    pub fn open(&self, value: &Value) -> Decryption {
        let outcome = self.try_open(value);
        match &outcome {
            Decryption::Decrypted(_) => {
                self.stats.decrypted.fetch_add(1, Ordering::Relaxed);
            }
            Decryption::PassedThrough(PassThrough::NotEnvelope) => {}
            Decryption::PassedThrough(reason) => {
                self.stats.passed_through.fetch_add(1, Ordering::Relaxed);
                debug!(target: DIAGNOSTICS_TARGET, reason = ?reason, "envelope passed through unchanged");
            }
        }
        outcome
    }

    fn try_open(&self, value: &Value) -> Decryption {
        let Value::String(s) = value else {
            return Decryption::PassedThrough(PassThrough::NotEnvelope);
        };
        if !s.starts_with(ENVELOPE_MARKER) {
            return Decryption::PassedThrough(PassThrough::NotEnvelope);
        }
        let Some(key) = &self.key else {
            return Decryption::PassedThrough(PassThrough::NoKey);
        };
        let Ok(envelope) = Envelope::parse(s) else {
            return Decryption::PassedThrough(PassThrough::Malformed);
        };
        let Ok(plaintext) = unseal(&envelope, key) else {
            return Decryption::PassedThrough(PassThrough::Authentication);
        };
        let Ok(text) = String::from_utf8(plaintext) else {
            return Decryption::PassedThrough(PassThrough::InvalidText);
        };

        // Values written by other tools may be bare text rather than JSON.
        let restored = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Decryption::Decrypted(restored)
    }
}

fn build_cipher(key: &EncryptionKey) -> Aes256Gcm {
    Aes256Gcm::new(key.as_bytes().into())
}

fn seal(value: &Value, key: &EncryptionKey) -> Result<Envelope, CipherError> {
    let plaintext = serde_json::to_vec(value)?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    seal_bytes(&plaintext, key, nonce)
}

fn seal_bytes(
    plaintext: &[u8],
    key: &EncryptionKey,
    nonce: [u8; NONCE_LEN],
) -> Result<Envelope, CipherError> {
    let mut sealed = build_cipher(key)
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CipherError::AeadFailure)?;

    // The AEAD output is ciphertext || tag.
    let split = sealed
        .len()
        .checked_sub(TAG_LEN)
        .ok_or(CipherError::AeadFailure)?;
    let tag_bytes = sealed.split_off(split);
    let tag =
        <[u8; TAG_LEN]>::try_from(tag_bytes.as_slice()).map_err(|_| CipherError::AeadFailure)?;

    Ok(Envelope {
        nonce,
        tag,
        ciphertext: sealed,
    })
}

fn unseal(envelope: &Envelope, key: &EncryptionKey) -> Result<Vec<u8>, CipherError> {
    let mut sealed = Vec::with_capacity(envelope.ciphertext.len() + TAG_LEN);
    sealed.extend_from_slice(&envelope.ciphertext);
    sealed.extend_from_slice(&envelope.tag);

    build_cipher(key)
        .decrypt(Nonce::from_slice(&envelope.nonce), sealed.as_slice())
        .map_err(|_| CipherError::AeadFailure)
}
