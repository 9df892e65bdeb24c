//! Transport seam to the remote tabular store.
//!
//! [`RecordStore`] speaks the store's wire types only; encryption happens one
//! layer up in the gateway. [`HttpRecordStore`] is the production client.
//!
//! # Module invariants
//!
//! - **No crypto dependencies.** Nothing here imports `crate::crypto` or
//!   `crate::codec`; values cross this boundary already sealed.
//! - **No retries, no timeouts.** A call either completes or fails with a
//!   transport error.

pub mod http;

pub use http::HttpRecordStore;

use async_trait::async_trait;
use common::protocol::{RecordPage, StoreRecord};
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The request never produced an HTTP response.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The store answered with a non-2xx status.
    #[error("store returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body was not the expected JSON shape.
    #[error("invalid store response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The table URL could not be built from the configured base.
    #[error("invalid store url: {0}")]
    Url(String),
}

/// Parameters for one list call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    /// Native equality filter in the store's formula syntax.
    pub filter_formula: Option<String>,
    /// Cursor returned by the previous page.
    pub offset: Option<String>,
}

impl ListQuery {
    /// Same query, continuing from `offset`.
    pub fn next_page(&self, offset: String) -> Self {
        Self {
            filter_formula: self.filter_formula.clone(),
            offset: Some(offset),
        }
    }
}

/// CRUD against remote tables, addressed by remote table name.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch one page of `table`.
    async fn list(&self, table: &str, query: &ListQuery) -> Result<RecordPage, StoreError>;

    /// Create every record in one call; returns the created rows (possibly none
    /// when the store answers with an empty body).
    async fn create(
        &self,
        table: &str,
        records: Vec<StoreRecord>,
    ) -> Result<Vec<StoreRecord>, StoreError>;

    /// Partially update rows addressed by their `id`.
    async fn update(
        &self,
        table: &str,
        records: Vec<StoreRecord>,
    ) -> Result<Vec<StoreRecord>, StoreError>;

    /// Delete rows by id.
    async fn delete(&self, table: &str, ids: Vec<String>) -> Result<(), StoreError>;
}

/// Build a native equality formula, `{field}='value'`.
pub fn equality_formula(field: &str, value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("{{{field}}}='{escaped}'")
}
