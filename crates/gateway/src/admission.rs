//! Subscription-plan ceilings on tenant-scoped entities.
//!
//! The check is a read-count-then-create sequence against the remote store with
//! no reservation in between. Two concurrent creates for the same tenant can
//! both pass and briefly exceed the plan limit. This race is accepted; closing
//! it would need a compare-and-swap primitive the store does not offer.

use common::{Fields, ServiceError};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::gateway::{RecordFilter, TableGateway};
use crate::registry::sanitize::parse_date;
use crate::registry::TableKind;

/// Field carrying the tenant identifier.
pub const TENANT_FIELD: &str = "business_id";

/// Staff rows with this role never count against the staff limit.
pub const PRIVILEGED_ROLE: &str = "owner";

const ACTIVE_STATUS: &str = "active";

/// Which plan field limits which entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Gate {
    limit_field: &'static str,
    entity: &'static str,
}

fn gate(kind: TableKind) -> Option<Gate> {
    match kind {
        TableKind::Staff => Some(Gate {
            limit_field: "limit_max_staff",
            entity: "staff",
        }),
        TableKind::Branches => Some(Gate {
            limit_field: "limit_max_branches",
            entity: "branches",
        }),
        _ => None,
    }
}

/// `true` when creates on `kind` go through the admission check.
pub fn is_gated(kind: TableKind) -> bool {
    gate(kind).is_some()
}

/// `true` when a `kind` row with these fields uses up plan capacity.
pub fn counts_toward_limit(kind: TableKind, fields: &Fields) -> bool {
    kind != TableKind::Staff || !is_privileged(fields)
}

/// Pre-create plan limit check.
#[derive(Debug, Clone)]
pub struct AdmissionGuard {
    gateway: TableGateway,
}

impl AdmissionGuard {
    pub fn new(gateway: TableGateway) -> Self {
        Self { gateway }
    }

    /// Check whether one more `kind` row may be created for the tenant named in
    /// `input`.
    pub async fn check(&self, kind: TableKind, input: &Fields) -> Result<(), ServiceError> {
        self.check_batch(kind, input, 0).await
    }

    /// Like [`Self::check`], with `pending` rows for the same tenant already
    /// queued ahead of this one in the same batch.
    ///
    /// Missing tenant, missing plan and missing limit all admit. A failed read
    /// counts as zero rows.
    ///
    /// # Errors
    ///
    /// [`ServiceError::LimitReached`] when existing plus pending rows are at or
    /// above the plan limit.
    #[instrument(skip(self, input), fields(entity = %kind))]
    pub async fn check_batch(
        &self,
        kind: TableKind,
        input: &Fields,
        pending: u64,
    ) -> Result<(), ServiceError> {
        let Some(gate) = gate(kind) else {
            return Ok(());
        };
        let Some(tenant) = tenant_of(input) else {
            debug!("no tenant on payload, skipping admission");
            return Ok(());
        };

        let Some(plan_id) = self.active_plan(tenant).await? else {
            debug!("no active subscription, admitting");
            return Ok(());
        };
        let Some(limit) = self.plan_limit(&plan_id, gate.limit_field).await? else {
            debug!(plan_id = %plan_id, "plan has no limit, admitting");
            return Ok(());
        };

        let existing = self.count_rows(kind, tenant).await?;
        if existing.saturating_add(pending) >= limit {
            info!(existing, pending, limit, "plan limit reached, rejecting create");
            return Err(ServiceError::LimitReached {
                entity: gate.entity.to_owned(),
                limit,
            });
        }
        debug!(existing, pending, limit, "admitted");
        Ok(())
    }

    /// `plan_id` of the tenant's active subscription with the latest start.
    async fn active_plan(&self, tenant: &Value) -> Result<Option<String>, ServiceError> {
        let subscriptions = self
            .gateway
            .fetch_all(
                TableKind::Subscriptions.logical_key(),
                &RecordFilter::field_equals(TENANT_FIELD, tenant.clone()),
            )
            .await?;

        let latest = subscriptions
            .into_iter()
            .filter(|s| {
                s.fields
                    .get("status")
                    .and_then(Value::as_str)
                    .is_some_and(|status| status.trim().eq_ignore_ascii_case(ACTIVE_STATUS))
            })
            .max_by_key(|s| {
                s.fields
                    .get("start_date")
                    .and_then(Value::as_str)
                    .and_then(parse_date)
            });

        Ok(latest.and_then(|s| s.fields.get("plan_id").and_then(id_text)))
    }

    /// Numeric `limit_field` of the plan row whose id is `plan_id`.
    async fn plan_limit(
        &self,
        plan_id: &str,
        limit_field: &str,
    ) -> Result<Option<u64>, ServiceError> {
        let plans = self
            .gateway
            .fetch_all(
                TableKind::Plans.logical_key(),
                &RecordFilter::field_equals("id", plan_id),
            )
            .await?;
        Ok(plans
            .first()
            .and_then(|plan| plan.fields.get(limit_field))
            .and_then(as_limit))
    }

    async fn count_rows(&self, kind: TableKind, tenant: &Value) -> Result<u64, ServiceError> {
        let rows = self
            .gateway
            .fetch_all(
                kind.logical_key(),
                &RecordFilter::field_equals(TENANT_FIELD, tenant.clone()),
            )
            .await?;
        let counted = rows
            .iter()
            .filter(|row| counts_toward_limit(kind, &row.fields))
            .count();
        Ok(counted as u64)
    }
}

fn tenant_of(input: &Fields) -> Option<&Value> {
    input.get(TENANT_FIELD).filter(|v| match v {
        Value::String(s) => !s.trim().is_empty(),
        Value::Number(_) => true,
        _ => false,
    })
}

fn is_privileged(fields: &Fields) -> bool {
    fields
        .get("role")
        .and_then(Value::as_str)
        .is_some_and(|role| role.trim().eq_ignore_ascii_case(PRIVILEGED_ROLE))
}

fn id_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A non-negative whole number, or a string holding one.
fn as_limit(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.floor() as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
