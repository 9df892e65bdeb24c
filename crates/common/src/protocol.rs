//! Wire types for the remote tabular store and the result envelope handed to
//! the endpoint layer.
//!
//! The store speaks `{records: [{id, fields}]}` for list/create/update and
//! `{ids: [...]}` for delete.

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// A flat record body: field name → JSON value.
pub type Fields = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Store wire contract
// ---------------------------------------------------------------------------

/// One row as the store sends and receives it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreRecord {
    /// Store-assigned identifier. Absent on create requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Field values, possibly containing encrypted envelopes.
    #[serde(default)]
    pub fields: Fields,
}

impl StoreRecord {
    /// A record body without an identifier, as sent on create.
    pub fn new(fields: Fields) -> Self {
        Self { id: None, fields }
    }

    /// A record body addressed to an existing row, as sent on update.
    pub fn with_id(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: Some(id.into()),
            fields,
        }
    }
}

/// Request body for create and update calls; also the shape of their responses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordBatch {
    #[serde(default)]
    pub records: Vec<StoreRecord>,
}

/// One page of a list response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordPage {
    #[serde(default)]
    pub records: Vec<StoreRecord>,
    /// Cursor for the next page; absent on the last page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<String>,
}

/// Request body for delete calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub ids: Vec<String>,
}

// ---------------------------------------------------------------------------
// Upward record shape
// ---------------------------------------------------------------------------

/// A decrypted row as handed to the endpoint layer: `{id, ...fields}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub fields: Fields,
}

impl Record {
    /// Pair a row id with its fields. A stored `id` field would shadow the row
    /// id once flattened, so it is dropped whenever the row has one.
    pub fn new(id: Option<String>, mut fields: Fields) -> Self {
        if id.is_some() {
            fields.remove("id");
        }
        Self { id, fields }
    }
}

impl From<StoreRecord> for Record {
    fn from(r: StoreRecord) -> Self {
        Self::new(r.id, r.fields)
    }
}

// ---------------------------------------------------------------------------
// Upward result envelope
// ---------------------------------------------------------------------------

/// Uniform `{success, data?, error?}` body for mutating operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// HTTP status the endpoint layer should answer with.
    #[serde(skip)]
    pub status: u16,
}

impl WriteResponse {
    /// A successful result carrying `data`.
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            status: 200,
        }
    }

    /// A failed result carrying the error message.
    pub fn failed(err: &ServiceError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.to_string()),
            status: err.http_status(),
        }
    }
}

impl<T: Serialize> From<Result<T, ServiceError>> for WriteResponse {
    fn from(result: Result<T, ServiceError>) -> Self {
        match result {
            Ok(value) => match serde_json::to_value(value) {
                Ok(data) => WriteResponse::ok(data),
                Err(e) => WriteResponse::failed(&ServiceError::Internal(e.to_string())),
            },
            Err(e) => WriteResponse::failed(&e),
        }
    }
}
