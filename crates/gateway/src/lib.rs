//! Tenant-aware encrypted data-access gateway.
//!
//! Sits between application CRUD endpoints and a remote tabular store:
//!
//! - [`crypto`]: key derivation and per-field AEAD envelopes.
//! - [`policy`] / [`codec`]: which fields stay plaintext, and record-level
//!   encryption.
//! - [`store`]: the remote store client.
//! - [`registry`]: logical tables, allowlists and defaults.
//! - [`gateway`]: CRUD with transparent encryption.
//! - [`admission`]: subscription-plan limits.
//! - [`service`]: the facade handed to the endpoint layer.

pub mod admission;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod gateway;
pub mod policy;
pub mod registry;
pub mod service;
pub mod store;
pub mod telemetry;

pub use admission::AdmissionGuard;
pub use codec::RecordCodec;
pub use gateway::{RecordFilter, TableGateway};
pub use registry::{TableKind, TableRegistry};
pub use service::DataService;
