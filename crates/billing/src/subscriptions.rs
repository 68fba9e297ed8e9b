//! Subscription-side queries and billing-date bookkeeping for
//! subscribers.
//!
//! Subscription state lives on the user row: plan reference, trial end,
//! and the last/next billing timestamps the issuance job advances.

use sqlx::PgPool;
use stripe::{Subscription, SubscriptionId, UpdateSubscription};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

/// Days between renewals.
pub const BILLING_PERIOD_DAYS: i64 = 30;

/// Boletos are issued during the last week of a trial so payment can
/// clear before access would lapse.
const TRIAL_ISSUE_WINDOW_DAYS: i64 = 7;

/// A subscriber due for billing, as selected by the candidate queries.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BillingCandidate {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub plan_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct SubscriptionService {
    stripe: StripeClient,
    pool: PgPool,
}

impl SubscriptionService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self { stripe, pool }
    }

    /// Users in the last week of their trial who have never been billed.
    pub async fn trial_ending_candidates(&self) -> BillingResult<Vec<BillingCandidate>> {
        sqlx::query_as::<_, BillingCandidate>(
            r#"
            SELECT id, name, email, plan_id
            FROM users
            WHERE trial_ends_at IS NOT NULL
              AND trial_ends_at <= NOW() + $1 * INTERVAL '1 day'
              AND next_billing_at IS NULL
            ORDER BY trial_ends_at ASC
            "#,
        )
        .bind(TRIAL_ISSUE_WINDOW_DAYS)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))
    }

    /// Users whose regular renewal date has passed.
    pub async fn renewal_candidates(&self) -> BillingResult<Vec<BillingCandidate>> {
        sqlx::query_as::<_, BillingCandidate>(
            r#"
            SELECT id, name, email, plan_id
            FROM users
            WHERE next_billing_at IS NOT NULL
              AND next_billing_at <= NOW()
            ORDER BY next_billing_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))
    }

    /// Move the user's billing window forward one period from now.
    pub async fn advance_billing_dates(&self, user_id: Uuid) -> BillingResult<()> {
        let now = OffsetDateTime::now_utc();
        let next = now + Duration::days(BILLING_PERIOD_DAYS);
        sqlx::query(
            r#"
            UPDATE users
            SET last_billing_at = $2, next_billing_at = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(now)
        .bind(next)
        .execute(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        tracing::debug!(user_id = %user_id, next_billing_at = %next, "Billing dates advanced");
        Ok(())
    }

    /// Flag the user's processor subscription to lapse at period end.
    pub async fn cancel_renewal(&self, user_id: Uuid) -> BillingResult<()> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT stripe_subscription_id FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| BillingError::Database(e.to_string()))?;

        let subscription_id = row
            .ok_or_else(|| BillingError::NotFound("user".to_string()))?
            .0
            .ok_or_else(|| BillingError::NotFound("subscription".to_string()))?;

        let sub_id = subscription_id
            .parse::<SubscriptionId>()
            .map_err(|e| BillingError::Processor(format!("Invalid subscription id: {e}")))?;

        let params = UpdateSubscription {
            cancel_at_period_end: Some(true),
            ..Default::default()
        };
        Subscription::update(self.stripe.inner(), &sub_id, params).await?;

        tracing::info!(user_id = %user_id, "Subscription set to cancel at period end");
        Ok(())
    }
}
