//! [`DataService`]: the contract handed to the endpoint layer.
//!
//! Runs every write through lookup, sanitisation, defaults, cross-field
//! validation and admission before it reaches the [`TableGateway`]. Mutations
//! answer with a [`WriteResponse`] so callers never see a raised store error.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use common::{Fields, Record, ServiceError, WriteResponse};
use serde_json::{json, Value};
use tracing::{error, info, instrument};

use crate::admission::{counts_toward_limit, is_gated, AdmissionGuard, TENANT_FIELD};
use crate::gateway::{RecordFilter, TableGateway};
use crate::registry::sanitize::parse_date;
use crate::registry::TableConfig;

/// Start/end pairs whose order is enforced on write.
const DATE_RANGES: &[(&str, &str)] = &[("start_date", "end_date")];
const INSTANT_RANGES: &[(&str, &str)] = &[("starts_at", "ends_at")];

#[derive(Debug, Clone)]
pub struct DataService {
    gateway: TableGateway,
    admission: AdmissionGuard,
}

impl DataService {
    pub fn new(gateway: TableGateway) -> Self {
        let admission = AdmissionGuard::new(gateway.clone());
        Self { gateway, admission }
    }

    pub fn gateway(&self) -> &TableGateway {
        &self.gateway
    }

    /// Table configuration by logical key.
    pub fn table(&self, key: &str) -> Result<&TableConfig, ServiceError> {
        self.gateway.table(key)
    }

    /// Decrypted rows of `key`, narrowed by `filter`.
    pub async fn list(
        &self,
        key: &str,
        filter: &RecordFilter,
    ) -> Result<Vec<Record>, ServiceError> {
        self.gateway.fetch_all(key, filter).await
    }

    #[instrument(skip(self, input))]
    pub async fn create(&self, key: &str, input: Fields) -> WriteResponse {
        respond("create", key, self.try_create(key, input).await)
    }

    #[instrument(skip(self, input))]
    pub async fn update(&self, key: &str, id: &str, input: Fields) -> WriteResponse {
        respond("update", key, self.try_update(key, id, input).await)
    }

    #[instrument(skip(self))]
    pub async fn remove(&self, key: &str, id: &str) -> WriteResponse {
        let result: Result<Value, ServiceError> = async {
            let id = require_id(id)?;
            self.gateway.remove(key, id).await?;
            Ok(json!({ "id": id, "deleted": true }))
        }
        .await;
        respond("delete", key, result)
    }

    #[instrument(skip(self, inputs), fields(count = inputs.len()))]
    pub async fn bulk_create(&self, key: &str, inputs: Vec<Fields>) -> WriteResponse {
        respond("bulk create", key, self.try_bulk_create(key, inputs).await)
    }

    async fn try_create(&self, key: &str, input: Fields) -> Result<Record, ServiceError> {
        let table = self.gateway.table(key)?;
        let prepared = table.prepare_create(input);
        validate_ranges(&prepared)?;
        self.admission.check(table.kind(), &prepared).await?;
        self.gateway.create(key, prepared).await
    }

    async fn try_update(
        &self,
        key: &str,
        id: &str,
        input: Fields,
    ) -> Result<Record, ServiceError> {
        let table = self.gateway.table(key)?;
        let id = require_id(id)?;
        let mut clean = table.sanitize(input);
        if clean.is_empty() {
            return Err(ServiceError::BadRequest("no updatable fields supplied".into()));
        }
        // Only pairs supplied together are checked; the stored half is unknown.
        validate_ranges(&clean)?;
        clean.insert(
            "updated_at".into(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        self.gateway.update(key, id, clean).await
    }

    async fn try_bulk_create(
        &self,
        key: &str,
        inputs: Vec<Fields>,
    ) -> Result<Vec<Record>, ServiceError> {
        let table = self.gateway.table(key)?;
        let prepared = inputs
            .into_iter()
            .map(|input| {
                let record = table.prepare_create(input);
                validate_ranges(&record).map(|()| record)
            })
            .collect::<Result<Vec<_>, _>>()?;

        if is_gated(table.kind()) {
            // One check per tenant, counting the rest of the batch as pending.
            // Rows that never use capacity (owners) are left out of the tally.
            let mut per_tenant: HashMap<String, (usize, u64)> = HashMap::new();
            for (idx, record) in prepared.iter().enumerate() {
                if let Some(tenant) = record.get(TENANT_FIELD).and_then(tenant_key) {
                    let counted = u64::from(counts_toward_limit(table.kind(), record));
                    per_tenant.entry(tenant).or_insert((idx, 0)).1 += counted;
                }
            }
            for (first, count) in per_tenant.into_values() {
                self.admission
                    .check_batch(table.kind(), &prepared[first], count.saturating_sub(1))
                    .await?;
            }
        }

        self.gateway.bulk_create(key, prepared).await
    }
}

fn respond<T: serde::Serialize>(
    op: &str,
    table: &str,
    result: Result<T, ServiceError>,
) -> WriteResponse {
    match &result {
        Err(e) if e.is_client_error() => info!(op, table, reason = %e, "write rejected"),
        Err(e) => error!(op, table, error = %e, "write failed"),
        Ok(_) => {}
    }
    result.into()
}

fn require_id(id: &str) -> Result<&str, ServiceError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(ServiceError::BadRequest("record id must not be empty".into()));
    }
    Ok(id)
}

fn tenant_key(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Reject records whose end precedes their start.
pub fn validate_ranges(fields: &Fields) -> Result<(), ServiceError> {
    for &(start, end) in DATE_RANGES {
        if let (Some(s), Some(e)) = (
            text(fields, start).and_then(parse_date),
            text(fields, end).and_then(parse_date),
        ) {
            if e < s {
                return Err(inverted(start, end));
            }
        }
    }
    for &(start, end) in INSTANT_RANGES {
        if let (Some(s), Some(e)) = (
            text(fields, start).and_then(|v| DateTime::parse_from_rfc3339(v).ok()),
            text(fields, end).and_then(|v| DateTime::parse_from_rfc3339(v).ok()),
        ) {
            if e < s {
                return Err(inverted(start, end));
            }
        }
    }
    Ok(())
}

fn text<'a>(fields: &'a Fields, name: &str) -> Option<&'a str> {
    fields.get(name).and_then(Value::as_str)
}

fn inverted(start: &str, end: &str) -> ServiceError {
    ServiceError::BadRequest(format!("{end} must not be earlier than {start}"))
}
