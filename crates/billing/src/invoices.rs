//! Per-cycle invoices: creation, status propagation, metadata merge.
//!
//! Each billing cycle gets one invoice snapshotting amount, status and due
//! date at the moment the cycle opened. The snapshot is only touched again
//! when the parent charge's status changes.

use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::PgPool;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use quadra_shared::types::ChargeStatus;

use crate::error::{BillingError, BillingResult};

/// An invoice row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub charge_id: Uuid,
    pub owner_id: Uuid,
    pub user_id: Uuid,
    pub invoice_number: String,
    pub amount_cents: i64,
    pub status: String,
    pub due_date: OffsetDateTime,
    pub metadata: Value,
    pub paid_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Fields for the invoice that opens a billing cycle.
#[derive(Debug, Clone)]
pub struct NewCycleInvoice {
    pub charge_id: Uuid,
    pub owner_id: Uuid,
    pub user_id: Uuid,
    pub invoice_number: String,
    pub amount_cents: i64,
    pub due_date: OffsetDateTime,
}

#[derive(Clone)]
pub struct InvoiceService {
    pool: PgPool,
}

impl InvoiceService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert the opening invoice for a new cycle: status pending, empty
    /// metadata.
    pub async fn create_for_cycle(&self, new: &NewCycleInvoice) -> BillingResult<Invoice> {
        sqlx::query_as::<_, Invoice>(
            r#"
            INSERT INTO invoices
                (charge_id, owner_id, user_id, invoice_number, amount_cents, status, due_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, charge_id, owner_id, user_id, invoice_number, amount_cents,
                      status, due_date, metadata, paid_at, created_at, updated_at
            "#,
        )
        .bind(new.charge_id)
        .bind(new.owner_id)
        .bind(new.user_id)
        .bind(&new.invoice_number)
        .bind(new.amount_cents)
        .bind(ChargeStatus::Pending.as_str())
        .bind(new.due_date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))
    }

    /// The invoice for the charge's current cycle (the most recent one).
    pub async fn latest_for_charge(&self, charge_id: Uuid) -> BillingResult<Option<Invoice>> {
        sqlx::query_as::<_, Invoice>(
            r#"
            SELECT id, charge_id, owner_id, user_id, invoice_number, amount_cents,
                   status, due_date, metadata, paid_at, created_at, updated_at
            FROM invoices
            WHERE charge_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(charge_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))
    }

    /// Mirror a charge status change onto the current cycle's invoice,
    /// folding the caller's metadata into what is already stored.
    pub async fn apply_charge_status(
        &self,
        charge_id: Uuid,
        status: ChargeStatus,
        paid_at: Option<OffsetDateTime>,
        caller_metadata: Option<Map<String, Value>>,
        updated_by: Uuid,
        now: OffsetDateTime,
    ) -> BillingResult<Option<Invoice>> {
        let Some(invoice) = self.latest_for_charge(charge_id).await? else {
            // A charge whose first cycle never opened has no invoice yet;
            // the status change still stands on the charge.
            tracing::warn!(charge_id = %charge_id, "No invoice to sync for charge");
            return Ok(None);
        };

        let metadata = merge_metadata(&invoice.metadata, caller_metadata, updated_by, now);

        let updated = sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices
            SET status = $2, paid_at = COALESCE($3, paid_at), metadata = $4, updated_at = $5
            WHERE id = $1
            RETURNING id, charge_id, owner_id, user_id, invoice_number, amount_cents,
                      status, due_date, metadata, paid_at, created_at, updated_at
            "#,
        )
        .bind(invoice.id)
        .bind(status.as_str())
        .bind(paid_at)
        .bind(&metadata)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        Ok(Some(updated))
    }
}

/// Build the number for a cycle invoice: millisecond timestamp plus the
/// head of the charge id. Two invoices minted in the same millisecond for
/// different charges still differ in the id suffix.
pub fn invoice_number(charge_id: Uuid, now: OffsetDateTime) -> String {
    let millis = now.unix_timestamp_nanos() / 1_000_000;
    let id = charge_id.simple().to_string();
    format!("{}-{}", millis, &id[..8])
}

/// Merge caller metadata over the stored map (caller wins per key), then
/// stamp the audit keys. The stamp happens last, so callers cannot forge
/// `last_updated` or `updated_by`.
pub fn merge_metadata(
    existing: &Value,
    caller: Option<Map<String, Value>>,
    updated_by: Uuid,
    now: OffsetDateTime,
) -> Value {
    let mut merged = match existing {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };

    if let Some(caller) = caller {
        for (key, value) in caller {
            merged.insert(key, value);
        }
    }

    let timestamp = now
        .format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string());
    merged.insert("last_updated".to_string(), Value::String(timestamp));
    merged.insert("updated_by".to_string(), Value::String(updated_by.to_string()));

    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    #[test]
    fn invoice_numbers_in_the_same_millisecond_differ_by_charge() {
        let now = datetime!(2026-01-05 00:00:00 UTC);
        let a = invoice_number(Uuid::new_v4(), now);
        let b = invoice_number(Uuid::new_v4(), now);
        assert_ne!(a, b);
    }

    #[test]
    fn invoice_number_embeds_the_millisecond_timestamp() {
        let now = datetime!(2026-01-05 00:00:00.123 UTC);
        let charge_id = Uuid::new_v4();
        let number = invoice_number(charge_id, now);
        let millis = now.unix_timestamp_nanos() / 1_000_000;
        assert!(number.starts_with(&format!("{millis}-")));
        assert!(number.ends_with(&charge_id.simple().to_string()[..8]));
    }

    #[test]
    fn merge_preserves_keys_the_caller_does_not_touch() {
        let existing = json!({"origin": "cycle-2026-01", "note": "keep me"});
        let mut caller = Map::new();
        caller.insert("note".to_string(), json!("overwritten"));

        let merged = merge_metadata(
            &existing,
            Some(caller),
            Uuid::new_v4(),
            datetime!(2026-02-01 09:30 UTC),
        );

        assert_eq!(merged["origin"], "cycle-2026-01");
        assert_eq!(merged["note"], "overwritten");
    }

    #[test]
    fn merge_always_stamps_audit_keys() {
        let owner = Uuid::new_v4();
        let merged = merge_metadata(&json!({}), None, owner, datetime!(2026-02-01 09:30 UTC));

        assert_eq!(merged["updated_by"], owner.to_string());
        assert_eq!(merged["last_updated"], "2026-02-01T09:30:00Z");
    }

    #[test]
    fn callers_cannot_forge_audit_keys() {
        let owner = Uuid::new_v4();
        let mut caller = Map::new();
        caller.insert("last_updated".to_string(), json!("1970-01-01T00:00:00Z"));
        caller.insert("updated_by".to_string(), json!("someone-else"));

        let merged = merge_metadata(&json!({}), Some(caller), owner, datetime!(2026-02-01 09:30 UTC));

        assert_eq!(merged["last_updated"], "2026-02-01T09:30:00Z");
        assert_eq!(merged["updated_by"], owner.to_string());
    }

    #[test]
    fn merge_tolerates_non_object_stored_metadata() {
        let merged = merge_metadata(&Value::Null, None, Uuid::new_v4(), datetime!(2026-02-01 09:30 UTC));
        assert!(merged.is_object());
        assert!(merged.get("last_updated").is_some());
    }
}
