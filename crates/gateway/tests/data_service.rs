//! End-to-end behaviour of [`DataService`] over an in-memory store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use common::protocol::{RecordPage, StoreRecord};
use common::{Fields, WriteResponse};
use serde_json::{json, Value};

use gateway::crypto::{EncryptionKey, FieldCipher};
use gateway::policy::FieldPolicy;
use gateway::store::{ListQuery, RecordStore, StoreError};
use gateway::{DataService, RecordCodec, RecordFilter, TableGateway, TableRegistry};

const PAGE_SIZE: usize = 2;

/// Tables keyed by remote name; pages of [`PAGE_SIZE`] with numeric cursors.
#[derive(Default)]
struct MemoryStore {
    tables: Mutex<HashMap<String, Vec<StoreRecord>>>,
}

impl MemoryStore {
    fn raw(&self, table: &str) -> Vec<StoreRecord> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    fn seed(&self, table: &str, rows: Vec<StoreRecord>) {
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_owned())
            .or_default()
            .extend(rows);
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn list(&self, table: &str, query: &ListQuery) -> Result<RecordPage, StoreError> {
        let rows = self.raw(table);
        let start: usize = query
            .offset
            .as_deref()
            .map(|o| o.parse().unwrap())
            .unwrap_or(0);
        let end = (start + PAGE_SIZE).min(rows.len());
        Ok(RecordPage {
            records: rows[start..end].to_vec(),
            offset: (end < rows.len()).then(|| end.to_string()),
        })
    }

    async fn create(
        &self,
        table: &str,
        records: Vec<StoreRecord>,
    ) -> Result<Vec<StoreRecord>, StoreError> {
        let created: Vec<StoreRecord> = records
            .into_iter()
            .map(|r| {
                let id = format!("rec{}", uuid::Uuid::new_v4().simple());
                StoreRecord::with_id(id, r.fields)
            })
            .collect();
        self.seed(table, created.clone());
        Ok(created)
    }

    async fn update(
        &self,
        table: &str,
        records: Vec<StoreRecord>,
    ) -> Result<Vec<StoreRecord>, StoreError> {
        let mut tables = self.tables.lock().unwrap();
        let rows = tables.entry(table.to_owned()).or_default();
        let mut updated = Vec::new();
        for patch in records {
            if let Some(row) = rows.iter_mut().find(|r| r.id == patch.id) {
                row.fields.extend(patch.fields);
                updated.push(row.clone());
            }
        }
        Ok(updated)
    }

    async fn delete(&self, table: &str, ids: Vec<String>) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(rows) = tables.get_mut(table) {
            rows.retain(|r| r.id.as_ref().map_or(true, |id| !ids.contains(id)));
        }
        Ok(())
    }
}

fn fields(v: Value) -> Fields {
    v.as_object().cloned().unwrap()
}

fn setup() -> (Arc<MemoryStore>, DataService) {
    let store = Arc::new(MemoryStore::default());
    let key = EncryptionKey::derive(Some("ab".repeat(32).as_str()));
    let codec = RecordCodec::new(FieldCipher::new(key), FieldPolicy::new(["email"]));
    let gateway = TableGateway::new(
        store.clone(),
        Arc::new(codec),
        Arc::new(TableRegistry::default()),
    );
    (store, DataService::new(gateway))
}

fn created_id(resp: &WriteResponse) -> String {
    assert!(resp.success, "{resp:?}");
    resp.data.as_ref().unwrap()["id"].as_str().unwrap().to_owned()
}

#[tokio::test]
async fn values_are_encrypted_at_rest_and_decrypted_on_read() {
    let (store, svc) = setup();
    let resp = svc
        .create(
            "customers",
            fields(json!({
                "business_id": 5,
                "name": "Alice",
                "phone": "+15550100",
                "tags": ["vip"]
            })),
        )
        .await;
    let id = created_id(&resp);

    let raw = store.raw("Customers");
    assert_eq!(raw.len(), 1);
    let at_rest = &raw[0].fields;
    assert_eq!(at_rest["business_id"], json!(5));
    for field in ["name", "phone", "tags"] {
        assert!(FieldCipher::is_encrypted(&at_rest[field]), "{field} stored in clear");
    }
    assert!(at_rest["created_at"].is_string());

    let rows = svc.list("customers", &RecordFilter::default()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id.as_deref(), Some(id.as_str()));
    assert_eq!(rows[0].fields["name"], json!("Alice"));
    assert_eq!(rows[0].fields["tags"], json!(["vip"]));
}

#[tokio::test]
async fn legacy_plaintext_rows_are_readable() {
    let (store, svc) = setup();
    store.seed(
        "Customers",
        vec![StoreRecord::with_id("old1", fields(json!({"name": "Legacy Bob"})))],
    );
    let rows = svc.list("customers", &RecordFilter::default()).await.unwrap();
    assert_eq!(rows[0].fields["name"], json!("Legacy Bob"));
}

#[tokio::test]
async fn staff_limit_blocks_third_member() {
    let (store, svc) = setup();
    let plan = created_id(
        &svc.create("plans", fields(json!({"name": "Basic", "limit_max_staff": 2})))
            .await,
    );
    created_id(
        &svc.create("subscriptions", fields(json!({"business_id": 5, "plan_id": plan})))
            .await,
    );

    for (name, role) in [("Olga", "owner"), ("Sam", "staff"), ("Kim", "staff")] {
        created_id(
            &svc.create(
                "staff",
                fields(json!({"business_id": 5, "name": name, "role": role})),
            )
            .await,
        );
    }
    // Another tenant's staff never counts.
    created_id(
        &svc.create("staff", fields(json!({"business_id": 6, "name": "Eve"})))
            .await,
    );

    let resp = svc
        .create("staff", fields(json!({"business_id": 5, "name": "Lee"})))
        .await;
    assert!(!resp.success);
    assert_eq!(resp.status, 403);
    let msg = resp.error.unwrap();
    assert!(msg.contains("limit reached"), "{msg}");
    assert!(msg.contains('2'), "{msg}");
    assert_eq!(store.raw("Staff").len(), 4);
}

#[tokio::test]
async fn update_merges_and_remove_deletes() {
    let (store, svc) = setup();
    let id = created_id(
        &svc.create("customers", fields(json!({"name": "Alice", "email": "al@example.com"})))
            .await,
    );

    let resp = svc
        .update("customers", &id, fields(json!({"phone": "555-0199"})))
        .await;
    assert!(resp.success, "{resp:?}");
    let data = resp.data.unwrap();
    assert_eq!(data["name"], json!("Alice"));
    assert_eq!(data["phone"], json!("555-0199"));
    assert!(data["updated_at"].is_string());

    // Configured extra plaintext field is stored in clear.
    let at_rest = &store.raw("Customers")[0].fields;
    assert_eq!(at_rest["email"], json!("al@example.com"));
    assert!(FieldCipher::is_encrypted(&at_rest["phone"]));

    let resp = svc.remove("customers", &id).await;
    assert!(resp.success);
    assert!(store.raw("Customers").is_empty());
}

#[tokio::test]
async fn list_filters_span_pages() {
    let (_store, svc) = setup();
    let batch = [
        ("2024-02-28", 5),
        ("2024-03-01", 5),
        ("2024-03-15", 6),
        ("2024-03-31", 5),
        ("2024-04-01", 5),
    ]
    .into_iter()
    .map(|(date, tenant)| {
        fields(json!({"business_id": tenant, "date": date, "amount": 10, "description": "rent"}))
    })
    .collect();
    let resp = svc.bulk_create("expenses", batch).await;
    assert!(resp.success, "{resp:?}");

    let filter = RecordFilter::field_equals("business_id", "5").with_date_range(
        NaiveDate::from_ymd_opt(2024, 3, 1),
        NaiveDate::from_ymd_opt(2024, 3, 31),
    );
    let rows = svc.list("expenses", &filter).await.unwrap();
    let dates: Vec<_> = rows.iter().map(|r| r.fields["date"].clone()).collect();
    assert_eq!(dates, vec![json!("2024-03-01"), json!("2024-03-31")]);
    assert_eq!(rows[0].fields["description"], json!("rent"));
}

#[tokio::test]
async fn unknown_table_and_bad_ranges_are_client_errors() {
    let (store, svc) = setup();
    assert!(svc.list("invoices", &RecordFilter::default()).await.is_err());

    let resp = svc
        .create(
            "appointments",
            fields(json!({
                "business_id": 5,
                "starts_at": "2024-06-02T15:00:00Z",
                "ends_at": "2024-06-02T14:00:00Z"
            })),
        )
        .await;
    assert_eq!(resp.status, 400);
    assert!(store.raw("Appointments").is_empty());
}
