//! Recurring charges: cycle generation and the owner-confirmed status
//! update.
//!
//! A charge is the recurring obligation behind a recurring court
//! reservation. The cycle generator reopens it when `next_due_at` passes;
//! the status update settles the open cycle and mirrors the change onto
//! the cycle's invoice.

use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use quadra_shared::types::ChargeStatus;

use crate::error::{BillingError, BillingResult};
use crate::invoices::{invoice_number, InvoiceService, NewCycleInvoice};

/// Days between recurring cycles.
pub const CYCLE_PERIOD_DAYS: i64 = 30;

/// Days the subscriber has to settle a freshly opened cycle.
const CYCLE_DUE_IN_DAYS: i64 = 7;

/// A recurring charge row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Charge {
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub court_id: Uuid,
    pub owner_id: Uuid,
    pub user_id: Uuid,
    pub amount_cents: i64,
    pub kind: String,
    pub status: String,
    pub next_due_at: OffsetDateTime,
    pub paid_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// What happened to one charge during a cycle-generation run.
#[derive(Debug)]
pub enum CycleOutcome {
    Opened {
        charge_id: Uuid,
        invoice_id: Uuid,
        invoice_number: String,
    },
    Failed {
        charge_id: Uuid,
        error: String,
    },
}

#[derive(Clone)]
pub struct ChargeService {
    pool: PgPool,
    invoices: InvoiceService,
}

impl ChargeService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            invoices: InvoiceService::new(pool.clone()),
            pool,
        }
    }

    /// Open a new billing cycle for every charge whose due date has passed
    /// and that is not already mid-cycle. One bad charge never aborts the
    /// batch.
    pub async fn open_due_cycles(&self) -> BillingResult<Vec<CycleOutcome>> {
        let due = self.fetch_due_charges().await?;
        let mut outcomes = Vec::with_capacity(due.len());

        for charge in due {
            let charge_id = charge.id;
            match self.open_cycle(&charge).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    tracing::error!(charge_id = %charge_id, error = %e, "Cycle open failed");
                    outcomes.push(CycleOutcome::Failed {
                        charge_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(outcomes)
    }

    async fn fetch_due_charges(&self) -> BillingResult<Vec<Charge>> {
        sqlx::query_as::<_, Charge>(
            r#"
            SELECT id, reservation_id, court_id, owner_id, user_id, amount_cents,
                   kind, status, next_due_at, paid_at, created_at, updated_at
            FROM charges
            WHERE next_due_at <= NOW() AND status <> $1
            ORDER BY next_due_at ASC
            "#,
        )
        .bind(ChargeStatus::Pending.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))
    }

    /// Insert the cycle invoice first, then flip the charge. `next_due_at`
    /// only advances after both writes, so a failure here leaves the
    /// charge selectable and the open is retried on the next run.
    async fn open_cycle(&self, charge: &Charge) -> BillingResult<CycleOutcome> {
        let now = OffsetDateTime::now_utc();
        let number = invoice_number(charge.id, now);

        let invoice = self
            .invoices
            .create_for_cycle(&NewCycleInvoice {
                charge_id: charge.id,
                owner_id: charge.owner_id,
                user_id: charge.user_id,
                invoice_number: number.clone(),
                amount_cents: charge.amount_cents,
                due_date: now + Duration::days(CYCLE_DUE_IN_DAYS),
            })
            .await?;

        // Cycles advance from the stored due date, so a long-overdue
        // charge opens one catch-up cycle per run until it is current.
        let next_due = charge.next_due_at + Duration::days(CYCLE_PERIOD_DAYS);
        sqlx::query(
            r#"
            UPDATE charges
            SET status = $2, next_due_at = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(charge.id)
        .bind(ChargeStatus::Pending.as_str())
        .bind(next_due)
        .execute(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        tracing::info!(
            charge_id = %charge.id,
            invoice_id = %invoice.id,
            invoice_number = %number,
            "Billing cycle opened"
        );

        Ok(CycleOutcome::Opened {
            charge_id: charge.id,
            invoice_id: invoice.id,
            invoice_number: number,
        })
    }

    pub async fn find_charge(&self, charge_id: Uuid) -> BillingResult<Option<Charge>> {
        sqlx::query_as::<_, Charge>(
            r#"
            SELECT id, reservation_id, court_id, owner_id, user_id, amount_cents,
                   kind, status, next_due_at, paid_at, created_at, updated_at
            FROM charges
            WHERE id = $1
            "#,
        )
        .bind(charge_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))
    }

    /// Apply an owner-confirmed status to a charge and mirror it onto the
    /// cycle's invoice. The caller must own the charge; a mismatch is
    /// forbidden, which is distinct from the charge not existing. `status`
    /// arrives as the client sent it and unknown values are rejected.
    pub async fn update_charge_status(
        &self,
        owner_id: Uuid,
        charge_id: Uuid,
        status: &str,
        metadata: Option<Map<String, Value>>,
    ) -> BillingResult<Charge> {
        let target = parse_target(status)?;
        let charge = self
            .find_charge(charge_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("charge".to_string()))?;

        ensure_owned(&charge, owner_id)?;

        let now = OffsetDateTime::now_utc();
        let paid_at = paid_timestamp(target, now);

        let updated = sqlx::query_as::<_, Charge>(
            r#"
            UPDATE charges
            SET status = $2, paid_at = COALESCE($3, paid_at), updated_at = $4
            WHERE id = $1
            RETURNING id, reservation_id, court_id, owner_id, user_id, amount_cents,
                      kind, status, next_due_at, paid_at, created_at, updated_at
            "#,
        )
        .bind(charge_id)
        .bind(target.as_str())
        .bind(paid_at)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        self.invoices
            .apply_charge_status(charge_id, target, paid_at, metadata, owner_id, now)
            .await?;

        tracing::info!(
            charge_id = %charge_id,
            owner_id = %owner_id,
            status = %target,
            "Charge status updated"
        );

        Ok(updated)
    }
}

/// Client-supplied status strings must name a known charge status.
fn parse_target(status: &str) -> BillingResult<ChargeStatus> {
    ChargeStatus::parse(status).ok_or_else(|| BillingError::InvalidStatus(status.to_string()))
}

/// Ownership check shared by the charge mutations.
fn ensure_owned(charge: &Charge, owner_id: Uuid) -> BillingResult<()> {
    if charge.owner_id != owner_id {
        return Err(BillingError::Forbidden(
            "charge does not belong to the requesting owner".to_string(),
        ));
    }
    Ok(())
}

/// Paid variants stamp `paid_at`; pending leaves it untouched.
fn paid_timestamp(status: ChargeStatus, now: OffsetDateTime) -> Option<OffsetDateTime> {
    status.is_paid().then_some(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn charge_owned_by(owner_id: Uuid) -> Charge {
        let now = datetime!(2026-02-01 09:30 UTC);
        Charge {
            id: Uuid::new_v4(),
            reservation_id: Uuid::new_v4(),
            court_id: Uuid::new_v4(),
            owner_id,
            user_id: Uuid::new_v4(),
            amount_cents: 10050,
            kind: "presencial".to_string(),
            status: "pending".to_string(),
            next_due_at: now,
            paid_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn owner_mismatch_is_forbidden() {
        let owner = Uuid::new_v4();
        let charge = charge_owned_by(owner);

        let err = ensure_owned(&charge, Uuid::new_v4()).unwrap_err();
        assert_eq!(err.code(), "forbidden");
        assert!(ensure_owned(&charge, owner).is_ok());
    }

    #[test]
    fn unknown_status_strings_are_rejected() {
        let err = parse_target("estornado").unwrap_err();
        assert_eq!(err.code(), "invalid_status");

        assert_eq!(parse_target("pago_quadra").unwrap(), ChargeStatus::PaidOnline);
        assert_eq!(
            parse_target("pago_presencialmente").unwrap(),
            ChargeStatus::PaidInPerson
        );
    }

    #[test]
    fn paid_variants_stamp_paid_at() {
        let now = datetime!(2026-02-01 09:30 UTC);
        assert_eq!(paid_timestamp(ChargeStatus::PaidOnline, now), Some(now));
        assert_eq!(paid_timestamp(ChargeStatus::PaidInPerson, now), Some(now));
        assert_eq!(paid_timestamp(ChargeStatus::Pending, now), None);
    }

    #[test]
    fn cycle_advance_is_one_period_from_the_stored_due_date() {
        let charge = charge_owned_by(Uuid::new_v4());
        let next = charge.next_due_at + Duration::days(CYCLE_PERIOD_DAYS);
        assert_eq!(next, datetime!(2026-03-03 09:30 UTC));
    }
}
