//! Plaintext whitelist: field names the store must be able to filter, sort or
//! display without a key.

use std::collections::HashSet;

/// Field names stored in plaintext unless configuration adds more.
///
/// Identifiers, timestamps, monetary and numeric columns, status flags.
pub const DEFAULT_PLAINTEXT_FIELDS: &[&str] = &[
    // identifiers
    "id",
    "business_id",
    "branch_id",
    "staff_id",
    "customer_id",
    "service_id",
    "appointment_id",
    "plan_id",
    "subscription_id",
    // timestamps and dates
    "created_at",
    "updated_at",
    "date",
    "start_date",
    "end_date",
    "starts_at",
    "ends_at",
    // monetary / numeric
    "amount",
    "price",
    "total",
    "quantity",
    "duration_minutes",
    "limit_max_staff",
    "limit_max_branches",
    // status flags
    "status",
    "is_active",
    "role",
    "category",
];

/// Exact-name lookup set of plaintext fields.
#[derive(Debug, Clone)]
pub struct FieldPolicy {
    plaintext: HashSet<String>,
}

impl FieldPolicy {
    /// Policy with the defaults plus `extra` names from configuration.
    ///
    /// Extra names only ever widen the set.
    pub fn new<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut plaintext: HashSet<String> = DEFAULT_PLAINTEXT_FIELDS
            .iter()
            .map(|f| (*f).to_owned())
            .collect();
        plaintext.extend(
            extra
                .into_iter()
                .map(|f| f.as_ref().trim().to_owned())
                .filter(|f| !f.is_empty()),
        );
        Self { plaintext }
    }

    /// `true` when `field` is stored without encryption.
    pub fn is_plaintext(&self, field: &str) -> bool {
        self.plaintext.contains(field)
    }

    pub fn len(&self) -> usize {
        self.plaintext.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plaintext.is_empty()
    }
}

impl Default for FieldPolicy {
    fn default() -> Self {
        Self::new(std::iter::empty::<&str>())
    }
}
