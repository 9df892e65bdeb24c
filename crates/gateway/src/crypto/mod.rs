//! Field encryption primitives: key derivation and the envelope cipher.
//!
//! # Envelope format
//!
//! ```text
//! enc:v1:<base64(nonce)>:<base64(tag)>:<base64(ciphertext)>
//! ```
//!
//! The `enc:v1` marker enables future algorithm or key-version migration
//! without breaking stored values.

pub mod cipher;
pub mod key;

pub use cipher::{CipherStatsSnapshot, Decryption, FieldCipher, PassThrough};
pub use key::{EncryptionKey, KeySource, KEY_LEN};
