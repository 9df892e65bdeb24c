//! Logical table registry: remote name resolution, input sanitisation and
//! server-assigned defaults per entity.
//!
//! # Module invariants
//!
//! - **Generic.** Rules are per-field only. Cross-field checks (date ordering)
//!   belong to the caller, see [`crate::service`].
//! - **Pure.** Sanitisers and defaults builders never touch the network.

pub mod sanitize;
pub mod tables;

pub use sanitize::{FieldKind, FieldRule};

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{Fields, ServiceError};

use tables::TableRules;

/// Identity of every table the gateway knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    Businesses,
    Branches,
    Staff,
    Customers,
    Services,
    Appointments,
    Expenses,
    Subscriptions,
    Plans,
}

impl TableKind {
    pub const ALL: [TableKind; 9] = [
        TableKind::Businesses,
        TableKind::Branches,
        TableKind::Staff,
        TableKind::Customers,
        TableKind::Services,
        TableKind::Appointments,
        TableKind::Expenses,
        TableKind::Subscriptions,
        TableKind::Plans,
    ];

    /// Application-level name callers use.
    pub fn logical_key(self) -> &'static str {
        match self {
            TableKind::Businesses => "businesses",
            TableKind::Branches => "branches",
            TableKind::Staff => "staff",
            TableKind::Customers => "customers",
            TableKind::Services => "services",
            TableKind::Appointments => "appointments",
            TableKind::Expenses => "expenses",
            TableKind::Subscriptions => "subscriptions",
            TableKind::Plans => "plans",
        }
    }

    /// Remote table name used when configuration does not override it.
    pub fn default_remote_name(self) -> &'static str {
        match self {
            TableKind::Businesses => "Businesses",
            TableKind::Branches => "Branches",
            TableKind::Staff => "Staff",
            TableKind::Customers => "Customers",
            TableKind::Services => "Services",
            TableKind::Appointments => "Appointments",
            TableKind::Expenses => "Expenses",
            TableKind::Subscriptions => "Subscriptions",
            TableKind::Plans => "Plans",
        }
    }

    /// Case-insensitive lookup by logical key.
    pub fn parse(key: &str) -> Option<Self> {
        let key = key.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.logical_key().eq_ignore_ascii_case(key))
    }

    fn rules(self) -> &'static TableRules {
        match self {
            TableKind::Businesses => &tables::BUSINESSES,
            TableKind::Branches => &tables::BRANCHES,
            TableKind::Staff => &tables::STAFF,
            TableKind::Customers => &tables::CUSTOMERS,
            TableKind::Services => &tables::SERVICES,
            TableKind::Appointments => &tables::APPOINTMENTS,
            TableKind::Expenses => &tables::EXPENSES,
            TableKind::Subscriptions => &tables::SUBSCRIPTIONS,
            TableKind::Plans => &tables::PLANS,
        }
    }
}

impl std::fmt::Display for TableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.logical_key())
    }
}

/// Resolved configuration of one logical table.
#[derive(Clone)]
pub struct TableConfig {
    kind: TableKind,
    remote_name: String,
    rules: &'static TableRules,
}

impl std::fmt::Debug for TableConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableConfig")
            .field("kind", &self.kind)
            .field("remote_name", &self.remote_name)
            .finish()
    }
}

impl TableConfig {
    pub fn kind(&self) -> TableKind {
        self.kind
    }

    pub fn logical_key(&self) -> &'static str {
        self.kind.logical_key()
    }

    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }

    /// Allowed fields for this table.
    pub fn fields(&self) -> &'static [FieldRule] {
        self.rules.fields
    }

    /// Keep and coerce exactly the allowed fields.
    pub fn sanitize(&self, input: Fields) -> Fields {
        sanitize::sanitize(input, self.rules.fields)
    }

    /// Server-assigned defaults for a new row, stamped with the current time.
    pub fn build_defaults(&self, input: &Fields) -> Fields {
        self.build_defaults_at(input, Utc::now())
    }

    pub fn build_defaults_at(&self, input: &Fields, now: DateTime<Utc>) -> Fields {
        (self.rules.defaults)(input, now)
    }

    /// Sanitised input laid over the defaults; caller-supplied values win.
    pub fn prepare_create(&self, input: Fields) -> Fields {
        let clean = self.sanitize(input);
        let mut merged = self.build_defaults(&clean);
        merged.extend(clean);
        merged
    }
}

/// Map from logical key to [`TableConfig`].
#[derive(Debug, Clone)]
pub struct TableRegistry {
    tables: HashMap<TableKind, TableConfig>,
}

impl TableRegistry {
    /// Build the registry, applying remote-name overrides keyed by logical key.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::BadRequest`] if an override names an unknown
    /// logical table or maps to a blank remote name.
    pub fn new(overrides: &HashMap<String, String>) -> Result<Self, ServiceError> {
        let mut remote: HashMap<TableKind, String> = HashMap::new();
        for (key, name) in overrides {
            let kind = TableKind::parse(key)
                .ok_or_else(|| ServiceError::BadRequest(format!("unknown table: {key}")))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(ServiceError::BadRequest(format!(
                    "remote table name for {kind} must not be empty"
                )));
            }
            remote.insert(kind, name.to_owned());
        }
        Ok(Self::with_remote_names(remote))
    }

    fn with_remote_names(mut remote: HashMap<TableKind, String>) -> Self {
        let tables = TableKind::ALL
            .into_iter()
            .map(|kind| {
                let remote_name = remote
                    .remove(&kind)
                    .unwrap_or_else(|| kind.default_remote_name().to_owned());
                let config = TableConfig {
                    kind,
                    remote_name,
                    rules: kind.rules(),
                };
                (kind, config)
            })
            .collect();
        Self { tables }
    }

    /// Resolve a logical key, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::BadRequest`] when no table matches.
    pub fn lookup(&self, key: &str) -> Result<&TableConfig, ServiceError> {
        TableKind::parse(key)
            .map(|kind| self.get(kind))
            .ok_or_else(|| ServiceError::BadRequest(format!("unknown table: {key}")))
    }

    pub fn get(&self, kind: TableKind) -> &TableConfig {
        // Every kind is inserted in `new`.
        &self.tables[&kind]
    }

    /// All tables in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &TableConfig> {
        TableKind::ALL.into_iter().map(|kind| self.get(kind))
    }
}

impl Default for TableRegistry {
    fn default() -> Self {
        Self::with_remote_names(HashMap::new())
    }
}
