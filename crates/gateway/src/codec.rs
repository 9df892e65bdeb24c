//! Record-level encryption: the [`FieldCipher`] applied across whole records
//! under the [`FieldPolicy`].

use common::Fields;
use serde_json::Value;

use crate::crypto::{CipherStatsSnapshot, FieldCipher};
use crate::policy::FieldPolicy;

/// Encrypts outgoing records and decrypts incoming ones.
#[derive(Debug)]
pub struct RecordCodec {
    cipher: FieldCipher,
    policy: FieldPolicy,
}

impl RecordCodec {
    pub fn new(cipher: FieldCipher, policy: FieldPolicy) -> Self {
        Self { cipher, policy }
    }

    pub fn cipher(&self) -> &FieldCipher {
        &self.cipher
    }

    pub fn policy(&self) -> &FieldPolicy {
        &self.policy
    }

    /// Encrypt every field not on the plaintext whitelist.
    ///
    /// `_table` is the logical table the record belongs to; one global policy
    /// applies to every table for now.
    pub fn encrypt_record(&self, _table: &str, fields: Fields) -> Fields {
        fields
            .into_iter()
            .map(|(name, value)| {
                let value = if self.policy.is_plaintext(&name) {
                    value
                } else {
                    self.cipher.encrypt(value)
                };
                (name, value)
            })
            .collect()
    }

    /// Decrypt every field. Plaintext values pass through unchanged.
    pub fn decrypt_record(&self, fields: Fields) -> Fields {
        fields
            .into_iter()
            .map(|(name, value)| (name, self.cipher.decrypt(value)))
            .collect()
    }

    /// Decrypt every string leaf of an arbitrarily nested value.
    pub fn decrypt_deep(&self, value: Value) -> Value {
        match value {
            Value::String(_) => self.cipher.decrypt(value),
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|v| self.decrypt_deep(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, self.decrypt_deep(v)))
                    .collect(),
            ),
            other => other,
        }
    }

    pub fn stats(&self) -> CipherStatsSnapshot {
        self.cipher.stats().snapshot()
    }
}
