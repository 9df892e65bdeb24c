//! Per-entity rules: allowed fields and server-assigned defaults.

use chrono::{DateTime, SecondsFormat, Utc};
use common::Fields;
use serde_json::Value;

use super::sanitize::{FieldKind::*, FieldRule};

/// Pure defaults builder: `(input, now) -> defaults`.
pub type DefaultsFn = fn(&Fields, DateTime<Utc>) -> Fields;

/// Allowlist and defaults for one table.
pub struct TableRules {
    pub fields: &'static [FieldRule],
    pub defaults: DefaultsFn,
}

pub static BUSINESSES: TableRules = TableRules {
    fields: &[
        FieldRule::new("name", Text),
        FieldRule::new("owner_name", Text),
        FieldRule::new("email", Text),
        FieldRule::new("phone", Text),
        FieldRule::new("address", Text),
        FieldRule::new("currency", Text),
        FieldRule::new("timezone", Text),
        FieldRule::new("is_active", Boolean),
    ],
    defaults: active_entity,
};

pub static BRANCHES: TableRules = TableRules {
    fields: &[
        FieldRule::new("business_id", Reference),
        FieldRule::new("name", Text),
        FieldRule::new("address", Text),
        FieldRule::new("phone", Text),
        FieldRule::new("is_active", Boolean),
    ],
    defaults: active_entity,
};

pub static STAFF: TableRules = TableRules {
    fields: &[
        FieldRule::new("business_id", Reference),
        FieldRule::new("branch_id", Reference),
        FieldRule::new("name", Text),
        FieldRule::new("email", Text),
        FieldRule::new("phone", Text),
        FieldRule::new("role", Text),
        FieldRule::new("commission_rate", Number),
        FieldRule::new("is_active", Boolean),
    ],
    defaults: staff_defaults,
};

pub static CUSTOMERS: TableRules = TableRules {
    fields: &[
        FieldRule::new("business_id", Reference),
        FieldRule::new("branch_id", Reference),
        FieldRule::new("name", Text),
        FieldRule::new("email", Text),
        FieldRule::new("phone", Text),
        FieldRule::new("birth_date", Date),
        FieldRule::new("notes", Text),
        FieldRule::new("tags", Json),
    ],
    defaults: created_only,
};

pub static SERVICES: TableRules = TableRules {
    fields: &[
        FieldRule::new("business_id", Reference),
        FieldRule::new("name", Text),
        FieldRule::new("description", Text),
        FieldRule::new("category", Text),
        FieldRule::new("price", Number),
        FieldRule::new("duration_minutes", Integer),
        FieldRule::new("is_active", Boolean),
    ],
    defaults: active_entity,
};

pub static APPOINTMENTS: TableRules = TableRules {
    fields: &[
        FieldRule::new("business_id", Reference),
        FieldRule::new("branch_id", Reference),
        FieldRule::new("staff_id", Reference),
        FieldRule::new("customer_id", Reference),
        FieldRule::new("service_id", Reference),
        FieldRule::new("date", Date),
        FieldRule::new("starts_at", Timestamp),
        FieldRule::new("ends_at", Timestamp),
        FieldRule::new("status", Text),
        FieldRule::new("price", Number),
        FieldRule::new("notes", Text),
    ],
    defaults: appointment_defaults,
};

pub static EXPENSES: TableRules = TableRules {
    fields: &[
        FieldRule::new("business_id", Reference),
        FieldRule::new("branch_id", Reference),
        FieldRule::new("category", Text),
        FieldRule::new("description", Text),
        FieldRule::new("amount", Number),
        FieldRule::new("date", Date),
    ],
    defaults: expense_defaults,
};

pub static SUBSCRIPTIONS: TableRules = TableRules {
    fields: &[
        FieldRule::new("business_id", Reference),
        FieldRule::new("plan_id", Reference),
        FieldRule::new("status", Text),
        FieldRule::new("start_date", Date),
        FieldRule::new("end_date", Date),
        FieldRule::new("amount", Number),
    ],
    defaults: subscription_defaults,
};

pub static PLANS: TableRules = TableRules {
    fields: &[
        FieldRule::new("name", Text),
        FieldRule::new("price", Number),
        FieldRule::new("limit_max_staff", Integer),
        FieldRule::new("limit_max_branches", Integer),
        FieldRule::new("is_active", Boolean),
    ],
    defaults: active_entity,
};

fn timestamp(now: DateTime<Utc>) -> Value {
    Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn today(now: DateTime<Utc>) -> Value {
    Value::String(now.format("%Y-%m-%d").to_string())
}

fn created_only(_input: &Fields, now: DateTime<Utc>) -> Fields {
    let mut out = Fields::new();
    out.insert("created_at".into(), timestamp(now));
    out
}

fn active_entity(input: &Fields, now: DateTime<Utc>) -> Fields {
    let mut out = created_only(input, now);
    out.insert("is_active".into(), Value::Bool(true));
    out
}

fn staff_defaults(input: &Fields, now: DateTime<Utc>) -> Fields {
    let mut out = active_entity(input, now);
    out.insert("role".into(), Value::String("staff".into()));
    out
}

fn appointment_defaults(input: &Fields, now: DateTime<Utc>) -> Fields {
    let mut out = created_only(input, now);
    out.insert("status".into(), Value::String("scheduled".into()));
    // Derive the day from the start instant when the caller left it out.
    if let Some(day) = input
        .get("starts_at")
        .and_then(Value::as_str)
        .and_then(|s| s.get(..10))
    {
        out.insert("date".into(), Value::String(day.to_owned()));
    }
    out
}

fn expense_defaults(input: &Fields, now: DateTime<Utc>) -> Fields {
    let mut out = created_only(input, now);
    out.insert("date".into(), today(now));
    out
}

fn subscription_defaults(input: &Fields, now: DateTime<Utc>) -> Fields {
    let mut out = created_only(input, now);
    out.insert("status".into(), Value::String("active".into()));
    out.insert("start_date".into(), today(now));
    out
}
