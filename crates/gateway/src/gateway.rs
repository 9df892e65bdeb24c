//! [`TableGateway`]: CRUD on logical tables with transparent field encryption.
//!
//! # Failure model
//!
//! - An unknown logical table is rejected before any network call.
//! - Reads degrade to an empty result when the store fails. An empty result is
//!   therefore ambiguous between "no rows" and "fetch failed"; the failure is
//!   logged but not reported to the caller.
//! - Writes map store failures to [`ServiceError::Store`].

use std::sync::Arc;

use chrono::NaiveDate;
use common::protocol::StoreRecord;
use common::{Fields, Record, ServiceError};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::codec::RecordCodec;
use crate::registry::sanitize::parse_date;
use crate::registry::{TableConfig, TableRegistry};
use crate::store::{equality_formula, ListQuery, RecordStore, StoreError};

/// Field the date-range filter applies to.
pub const DATE_FIELD: &str = "date";

/// Equality condition on one field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldEquals {
    pub field: String,
    pub value: Value,
}

/// Optional narrowing applied to [`TableGateway::fetch_all`].
///
/// Both conditions are evaluated after decryption. The equality filter is also
/// pushed down to the store when the field is stored in plaintext, but the
/// result never depends on the store honouring it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub equals: Option<FieldEquals>,
    /// Inclusive lower bound on the `date` field.
    pub date_from: Option<NaiveDate>,
    /// Inclusive upper bound on the `date` field.
    pub date_to: Option<NaiveDate>,
}

impl RecordFilter {
    pub fn field_equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            equals: Some(FieldEquals {
                field: field.into(),
                value: value.into(),
            }),
            ..Self::default()
        }
    }

    pub fn with_date_range(mut self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        self.date_from = from;
        self.date_to = to;
        self
    }

    fn has_date_range(&self) -> bool {
        self.date_from.is_some() || self.date_to.is_some()
    }

    /// `true` when `record` satisfies every condition.
    pub fn matches(&self, record: &Record) -> bool {
        if let Some(eq) = &self.equals {
            let actual = if eq.field == "id" {
                record.id.clone().map(Value::String)
            } else {
                record.fields.get(&eq.field).cloned()
            };
            match actual {
                Some(actual) if loose_eq(&actual, &eq.value) => {}
                _ => return false,
            }
        }
        if self.has_date_range() {
            let Some(day) = record
                .fields
                .get(DATE_FIELD)
                .and_then(Value::as_str)
                .and_then(parse_date)
            else {
                return false;
            };
            if self.date_from.is_some_and(|from| day < from) {
                return false;
            }
            if self.date_to.is_some_and(|to| day > to) {
                return false;
            }
        }
        true
    }
}

/// Equality that treats `5` and `"5"` as the same scalar.
fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (scalar_text(a), scalar_text(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Encrypting facade over a [`RecordStore`].
#[derive(Clone)]
pub struct TableGateway {
    store: Arc<dyn RecordStore>,
    codec: Arc<RecordCodec>,
    registry: Arc<TableRegistry>,
}

impl std::fmt::Debug for TableGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableGateway")
            .field("codec", &self.codec)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl TableGateway {
    pub fn new(
        store: Arc<dyn RecordStore>,
        codec: Arc<RecordCodec>,
        registry: Arc<TableRegistry>,
    ) -> Self {
        Self {
            store,
            codec,
            registry,
        }
    }

    pub fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    pub fn codec(&self) -> &RecordCodec {
        &self.codec
    }

    /// Resolve a logical key to its table configuration.
    pub fn table(&self, key: &str) -> Result<&TableConfig, ServiceError> {
        self.registry.lookup(key)
    }

    /// Every record of `table`, decrypted and narrowed by `filter`.
    ///
    /// # Errors
    ///
    /// Only for an unknown table. Store failures yield an empty vector.
    #[instrument(skip(self, filter), fields(remote = tracing::field::Empty))]
    pub async fn fetch_all(
        &self,
        table: &str,
        filter: &RecordFilter,
    ) -> Result<Vec<Record>, ServiceError> {
        let config = self.registry.lookup(table)?;
        tracing::Span::current().record("remote", config.remote_name());

        let query = ListQuery {
            filter_formula: self.native_formula(filter),
            offset: None,
        };
        let rows = match self.list_all(config.remote_name(), query).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "fetch failed, returning no records");
                return Ok(Vec::new());
            }
        };

        let fetched = rows.len();
        let records: Vec<Record> = rows
            .into_iter()
            .map(|row| self.open_record(row))
            .filter(|record| filter.matches(record))
            .collect();
        debug!(fetched, returned = records.len(), "records fetched");
        Ok(records)
    }

    /// Encrypt and create one record; returns the decrypted created row.
    #[instrument(skip(self, data))]
    pub async fn create(&self, table: &str, data: Fields) -> Result<Record, ServiceError> {
        let config = self.registry.lookup(table)?;
        let sealed = self.codec.encrypt_record(config.logical_key(), data.clone());
        let created = self
            .store
            .create(config.remote_name(), vec![StoreRecord::new(sealed)])
            .await
            .map_err(|e| write_failure("create", config, e))?;

        Ok(match created.into_iter().next() {
            Some(row) => self.open_record(row),
            None => {
                debug!("empty create response, echoing input");
                Record::new(None, self.codec.decrypt_record(data))
            }
        })
    }

    /// Encrypt the changed fields and patch the row `id`.
    #[instrument(skip(self, data))]
    pub async fn update(
        &self,
        table: &str,
        id: &str,
        data: Fields,
    ) -> Result<Record, ServiceError> {
        let config = self.registry.lookup(table)?;
        let sealed = self.codec.encrypt_record(config.logical_key(), data.clone());
        let updated = self
            .store
            .update(config.remote_name(), vec![StoreRecord::with_id(id, sealed)])
            .await
            .map_err(|e| write_failure("update", config, e))?;

        Ok(match updated.into_iter().next() {
            Some(row) => self.open_record(row),
            None => {
                debug!("empty update response, echoing input");
                Record::new(Some(id.to_owned()), self.codec.decrypt_record(data))
            }
        })
    }

    /// Delete the row `id`.
    #[instrument(skip(self))]
    pub async fn remove(&self, table: &str, id: &str) -> Result<(), ServiceError> {
        let config = self.registry.lookup(table)?;
        self.store
            .delete(config.remote_name(), vec![id.to_owned()])
            .await
            .map_err(|e| write_failure("delete", config, e))
    }

    /// Create every record in a single store call.
    ///
    /// An empty batch succeeds without contacting the store.
    #[instrument(skip(self, records), fields(count = records.len()))]
    pub async fn bulk_create(
        &self,
        table: &str,
        records: Vec<Fields>,
    ) -> Result<Vec<Record>, ServiceError> {
        let config = self.registry.lookup(table)?;
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let sealed = records
            .iter()
            .map(|fields| {
                StoreRecord::new(self.codec.encrypt_record(config.logical_key(), fields.clone()))
            })
            .collect();
        let created = self
            .store
            .create(config.remote_name(), sealed)
            .await
            .map_err(|e| write_failure("bulk create", config, e))?;

        if created.is_empty() {
            debug!("empty bulk create response, echoing input");
            return Ok(records
                .into_iter()
                .map(|fields| Record::new(None, self.codec.decrypt_record(fields)))
                .collect());
        }
        Ok(created.into_iter().map(|row| self.open_record(row)).collect())
    }

    /// First raw page of `table`, deep-decrypted. Diagnostics only.
    ///
    /// # Errors
    ///
    /// Unknown table, or any store failure. Unlike [`Self::fetch_all`] this
    /// reports the failure so a readiness probe can act on it.
    #[instrument(skip(self))]
    pub async fn inspect(&self, table: &str) -> Result<Value, ServiceError> {
        let config = self.registry.lookup(table)?;
        let page = self
            .store
            .list(config.remote_name(), &ListQuery::default())
            .await
            .map_err(|e| ServiceError::Store(e.to_string()))?;
        let raw = serde_json::to_value(page).map_err(|e| ServiceError::Internal(e.to_string()))?;
        Ok(self.codec.decrypt_deep(raw))
    }

    async fn list_all(
        &self,
        remote: &str,
        mut query: ListQuery,
    ) -> Result<Vec<StoreRecord>, StoreError> {
        let mut rows = Vec::new();
        loop {
            let page = self.store.list(remote, &query).await?;
            rows.extend(page.records);
            match page.offset {
                Some(offset) if query.offset.as_deref() == Some(offset.as_str()) => {
                    warn!(remote, offset = %offset, "store repeated page cursor, stopping");
                    break;
                }
                Some(offset) if !offset.is_empty() => query = query.next_page(offset),
                _ => break,
            }
        }
        Ok(rows)
    }

    /// Push the equality filter down when the field is stored in plaintext.
    fn native_formula(&self, filter: &RecordFilter) -> Option<String> {
        let eq = filter.equals.as_ref()?;
        if eq.field == "id" || !self.codec.policy().is_plaintext(&eq.field) {
            return None;
        }
        scalar_text(&eq.value).map(|v| equality_formula(&eq.field, &v))
    }

    fn open_record(&self, row: StoreRecord) -> Record {
        Record::new(row.id, self.codec.decrypt_record(row.fields))
    }
}

fn write_failure(op: &str, table: &TableConfig, err: StoreError) -> ServiceError {
    warn!(op, table = table.logical_key(), error = %err, "store write failed");
    ServiceError::Store(format!("{op} on {} failed: {err}", table.logical_key()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{EncryptionKey, FieldCipher};
    use crate::policy::FieldPolicy;
    use crate::store::MockRecordStore;
    use common::protocol::RecordPage;
    use serde_json::json;

    fn codec() -> Arc<RecordCodec> {
        let key = EncryptionKey::derive(Some("gateway-test-passphrase"));
        Arc::new(RecordCodec::new(FieldCipher::new(key), FieldPolicy::default()))
    }

    fn gateway(store: MockRecordStore) -> TableGateway {
        TableGateway::new(Arc::new(store), codec(), Arc::new(TableRegistry::default()))
    }

    fn fields(v: Value) -> Fields {
        v.as_object().cloned().unwrap()
    }

    fn row(id: &str, v: Value) -> StoreRecord {
        StoreRecord::with_id(id, fields(v))
    }

    fn transport_error() -> StoreError {
        StoreError::Status {
            status: 503,
            body: "unavailable".into(),
        }
    }

    #[tokio::test]
    async fn unknown_table_never_reaches_store() {
        let mut store = MockRecordStore::new();
        store.expect_list().never();
        store.expect_create().never();
        let gw = gateway(store);

        let err = gw.fetch_all("invoices", &RecordFilter::default()).await.unwrap_err();
        assert_eq!(err.http_status(), 400);
        let err = gw.create("invoices", Fields::new()).await.unwrap_err();
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn repeated_cursor_ends_pagination() {
        let mut store = MockRecordStore::new();
        store.expect_list().times(2).returning(|_, query| {
            let id = query.offset.clone().unwrap_or_else(|| "first".into());
            Ok(RecordPage {
                records: vec![row(&id, json!({"business_id": 5}))],
                offset: Some("itr1".into()),
            })
        });
        let gw = gateway(store);

        let rows = gw.fetch_all("customers", &RecordFilter::default()).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["first", "itr1"]);
    }

    #[tokio::test]
    async fn create_seals_non_whitelisted_fields() {
        let mut store = MockRecordStore::new();
        store
            .expect_create()
            .withf(|table, records| {
                let f = &records[0].fields;
                table == "Customers"
                    && records.len() == 1
                    && f["business_id"] == json!(5)
                    && FieldCipher::is_encrypted(&f["name"])
            })
            .times(1)
            .returning(|_, records| {
                let mut rows = records;
                rows[0].id = Some("rec1".into());
                Ok(rows)
            });
        let gw = gateway(store);

        let created = gw
            .create("customers", fields(json!({"business_id": 5, "name": "Alice"})))
            .await
            .unwrap();
        assert_eq!(created.id.as_deref(), Some("rec1"));
        assert_eq!(created.fields["name"], json!("Alice"));
    }

    #[tokio::test]
    async fn create_echoes_input_on_empty_response() {
        let mut store = MockRecordStore::new();
        store.expect_create().returning(|_, _| Ok(Vec::new()));
        let gw = gateway(store);

        let created = gw
            .create("customers", fields(json!({"name": "Alice"})))
            .await
            .unwrap();
        assert_eq!(created.id, None);
        assert_eq!(created.fields, fields(json!({"name": "Alice"})));
    }

    #[tokio::test]
    async fn update_echoes_id_and_data_on_empty_response() {
        let mut store = MockRecordStore::new();
        store
            .expect_update()
            .withf(|_, records| records[0].id.as_deref() == Some("rec7"))
            .returning(|_, _| Ok(Vec::new()));
        let gw = gateway(store);

        let updated = gw
            .update("staff", "rec7", fields(json!({"phone": "555"})))
            .await
            .unwrap();
        assert_eq!(updated.id.as_deref(), Some("rec7"));
        assert_eq!(updated.fields["phone"], json!("555"));
    }

    #[tokio::test]
    async fn write_failures_become_store_errors() {
        let mut store = MockRecordStore::new();
        store.expect_create().returning(|_, _| Err(transport_error()));
        store.expect_delete().returning(|_, _| Err(transport_error()));
        let gw = gateway(store);

        let err = gw.create("staff", Fields::new()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Store(_)));
        assert_eq!(err.http_status(), 502);
        let err = gw.remove("staff", "rec1").await.unwrap_err();
        assert!(!err.is_client_error());
    }

    #[tokio::test]
    async fn fetch_failure_degrades_to_empty() {
        let mut store = MockRecordStore::new();
        store.expect_list().returning(|_, _| Err(transport_error()));
        let gw = gateway(store);

        let rows = gw.fetch_all("staff", &RecordFilter::default()).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn fetch_all_follows_offsets_and_decrypts() {
        let codec = codec();
        let sealed = codec.cipher().encrypt(json!("Alice"));
        let mut store = MockRecordStore::new();
        store
            .expect_list()
            .withf(|_, q| q.offset.is_none())
            .times(1)
            .returning(move |_, _| {
                Ok(RecordPage {
                    records: vec![row("a", json!({"name": sealed.clone()}))],
                    offset: Some("itr1".into()),
                })
            });
        store
            .expect_list()
            .withf(|_, q| q.offset.as_deref() == Some("itr1"))
            .times(1)
            .returning(|_, _| {
                Ok(RecordPage {
                    records: vec![row("b", json!({"name": "Legacy"}))],
                    offset: None,
                })
            });
        let gw = TableGateway::new(Arc::new(store), codec, Arc::new(TableRegistry::default()));

        let rows = gw.fetch_all("customers", &RecordFilter::default()).await.unwrap();
        let names: Vec<_> = rows.iter().map(|r| r.fields["name"].clone()).collect();
        assert_eq!(names, vec![json!("Alice"), json!("Legacy")]);
    }

    #[tokio::test]
    async fn equality_filter_is_pushed_down_and_reapplied() {
        let mut store = MockRecordStore::new();
        store
            .expect_list()
            .withf(|_, q| q.filter_formula.as_deref() == Some("{business_id}='5'"))
            .returning(|_, _| {
                // The store ignored the formula.
                Ok(RecordPage {
                    records: vec![
                        row("a", json!({"business_id": 5})),
                        row("b", json!({"business_id": "5"})),
                        row("c", json!({"business_id": 6})),
                    ],
                    offset: None,
                })
            });
        let gw = gateway(store);

        let rows = gw
            .fetch_all("staff", &RecordFilter::field_equals("business_id", 5))
            .await
            .unwrap();
        let ids: Vec<_> = rows.iter().filter_map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn encrypted_field_filter_is_not_pushed_down() {
        let mut store = MockRecordStore::new();
        store
            .expect_list()
            .withf(|_, q| q.filter_formula.is_none())
            .returning(|_, _| Ok(RecordPage::default()));
        let gw = gateway(store);

        let rows = gw
            .fetch_all("customers", &RecordFilter::field_equals("email", "a@b.c"))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn date_range_is_inclusive_and_requires_a_date() {
        let from = NaiveDate::from_ymd_opt(2024, 3, 1);
        let to = NaiveDate::from_ymd_opt(2024, 3, 31);
        let filter = RecordFilter::default().with_date_range(from, to);
        let rec = |v: Value| Record {
            id: None,
            fields: fields(v),
        };
        assert!(filter.matches(&rec(json!({"date": "2024-03-01"}))));
        assert!(filter.matches(&rec(json!({"date": "2024-03-31"}))));
        assert!(!filter.matches(&rec(json!({"date": "2024-04-01"}))));
        assert!(!filter.matches(&rec(json!({"amount": 3}))));
        assert!(RecordFilter::default().matches(&rec(json!({"amount": 3}))));
    }

    #[tokio::test]
    async fn bulk_create_is_one_call() {
        let mut store = MockRecordStore::new();
        store
            .expect_create()
            .withf(|_, records| records.len() == 3)
            .times(1)
            .returning(|_, records| Ok(records));
        let gw = gateway(store);

        let batch = (0..3).map(|i| fields(json!({"name": format!("c{i}")}))).collect();
        let rows = gw.bulk_create("customers", batch).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].fields["name"], json!("c2"));
    }

    #[tokio::test]
    async fn empty_bulk_create_skips_store() {
        let mut store = MockRecordStore::new();
        store.expect_create().never();
        let gw = gateway(store);
        assert!(gw.bulk_create("customers", Vec::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn inspect_deep_decrypts_first_page() {
        let codec = codec();
        let sealed = codec.cipher().encrypt(json!({"nested": true}));
        let mut store = MockRecordStore::new();
        store.expect_list().times(1).returning(move |_, _| {
            Ok(RecordPage {
                records: vec![row("a", json!({"meta": sealed.clone()}))],
                offset: Some("more".into()),
            })
        });
        let gw = TableGateway::new(Arc::new(store), codec, Arc::new(TableRegistry::default()));

        let page = gw.inspect("customers").await.unwrap();
        assert_eq!(page["records"][0]["fields"]["meta"], json!({"nested": true}));
        assert_eq!(page["offset"], json!("more"));
    }
}
