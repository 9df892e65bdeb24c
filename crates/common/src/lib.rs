//! Shared types for the gateway crates: the caller-visible error, the remote
//! store wire contract and the upward result envelope.

pub mod error;
pub mod protocol;

pub use error::ServiceError;
pub use protocol::{Fields, Record, WriteResponse};
