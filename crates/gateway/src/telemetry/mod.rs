//! Structured logging and optional OTLP trace export.
//!
//! # Telemetry invariants
//!
//! - **No field values or key material** in any span attribute or log field.
//!   Events carry table names, counts and outcome reasons only.
//! - Cipher pass-through outcomes are emitted on the `gateway::diagnostics`
//!   target so they can be filtered independently.
//! - Log level is configurable via `LOG_LEVEL` (default: `info`); `RUST_LOG`
//!   takes precedence when set.

pub mod init;

pub use init::{init_telemetry, shutdown_telemetry};
