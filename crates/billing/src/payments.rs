//! Payment attempts: boleto issuance and processor reconciliation.
//!
//! Two scheduled routines live here. Issuance mints a boleto payment
//! intent for every subscriber due for billing and records it locally.
//! Reconciliation polls the processor for every open boleto and applies
//! the resulting transitions, because boletos settle out of band days
//! after issuance. The processor is the source of truth; local rows only
//! ever catch up to it.

use serde::Serialize;
use sqlx::PgPool;
use stripe::{PaymentIntent, PaymentIntentId, PaymentIntentStatus};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use quadra_shared::types::{PaymentMethod, PaymentStatus};

use crate::client::StripeClient;
use crate::directory::{BillingProfile, OwnerDirectory, VenueAddress};
use crate::email::{format_brl, format_date, EmailService};
use crate::error::{BillingError, BillingResult};
use crate::notifications::NotificationService;
use crate::subscriptions::{BillingCandidate, SubscriptionService};

/// Boletos are payable for seven days after issuance.
pub const BOLETO_EXPIRES_AFTER_DAYS: i64 = 7;

/// A persisted payment attempt.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub stripe_payment_intent_id: String,
    pub amount_cents: i64,
    pub method: String,
    pub status: String,
    pub boleto_expires_at: Option<OffsetDateTime>,
    pub voucher_url: Option<String>,
    pub voucher_pdf_url: Option<String>,
    pub paid_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Voucher details returned by the processor when an intent is created.
#[derive(Debug, Clone)]
pub struct IssuedIntent {
    pub reference: String,
    pub voucher_url: Option<String>,
    pub voucher_pdf_url: Option<String>,
    pub expires_at: Option<OffsetDateTime>,
}

/// What happened to one candidate during an issuance run.
#[derive(Debug)]
pub enum IssueOutcome {
    Issued {
        user_id: Uuid,
        payment_id: Uuid,
        amount_cents: i64,
    },
    SkippedPendingBoleto {
        user_id: Uuid,
    },
    SkippedMissingTaxId {
        user_id: Uuid,
    },
    SkippedMissingVenue {
        user_id: Uuid,
    },
    Failed {
        user_id: Uuid,
        error: String,
    },
}

/// What happened to one open boleto during a reconciliation run.
#[derive(Debug)]
pub enum ReconcileOutcome {
    Transitioned {
        payment_id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
    },
    Unchanged {
        payment_id: Uuid,
    },
    Failed {
        payment_id: Uuid,
        error: String,
    },
}

#[derive(Clone)]
pub struct PaymentService {
    stripe: StripeClient,
    pool: PgPool,
    email: EmailService,
    notifications: NotificationService,
    directory: OwnerDirectory,
    subscriptions: SubscriptionService,
}

impl PaymentService {
    pub fn new(stripe: StripeClient, pool: PgPool, email: EmailService) -> Self {
        Self {
            notifications: NotificationService::new(pool.clone()),
            directory: OwnerDirectory::new(pool.clone()),
            subscriptions: SubscriptionService::new(stripe.clone(), pool.clone()),
            stripe,
            pool,
            email,
        }
    }

    /// Issue a boleto for one subscriber now. Synchronous entry point;
    /// precondition failures surface as typed errors instead of batch
    /// skips.
    pub async fn request_boleto(&self, user_id: Uuid) -> BillingResult<Payment> {
        self.issue_boleto(user_id).await
    }

    /// Issue boletos for every subscriber due for billing: the
    /// trial-ending set first, then regular renewals, both through the
    /// same per-user procedure. Per-user failures are recorded and the
    /// batch continues.
    pub async fn issue_due_boletos(&self) -> BillingResult<Vec<IssueOutcome>> {
        let trial = self.subscriptions.trial_ending_candidates().await?;
        let renewals = self.subscriptions.renewal_candidates().await?;

        let mut outcomes = Vec::with_capacity(trial.len() + renewals.len());
        for candidate in trial.into_iter().chain(renewals) {
            outcomes.push(self.issue_for_candidate(&candidate).await);
        }

        Ok(outcomes)
    }

    async fn issue_for_candidate(&self, candidate: &BillingCandidate) -> IssueOutcome {
        let user_id = candidate.id;
        match self.issue_boleto(user_id).await {
            Ok(payment) => IssueOutcome::Issued {
                user_id,
                payment_id: payment.id,
                amount_cents: payment.amount_cents,
            },
            Err(BillingError::PendingBoletoExists) => {
                tracing::info!(user_id = %user_id, "Skipping issuance, open boleto already exists");
                IssueOutcome::SkippedPendingBoleto { user_id }
            }
            Err(BillingError::MissingTaxId) => {
                tracing::info!(user_id = %user_id, "Skipping issuance, no tax document on file");
                IssueOutcome::SkippedMissingTaxId { user_id }
            }
            Err(BillingError::MissingVenue) => {
                tracing::info!(user_id = %user_id, "Skipping issuance, no registered venue");
                IssueOutcome::SkippedMissingVenue { user_id }
            }
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Boleto issuance failed");
                IssueOutcome::Failed {
                    user_id,
                    error: e.to_string(),
                }
            }
        }
    }

    /// The per-user issuance procedure: duplicate and precondition checks,
    /// processor call, local record, notifications, date advancement.
    async fn issue_boleto(&self, user_id: Uuid) -> BillingResult<Payment> {
        if self.find_pending_boleto(user_id).await?.is_some() {
            return Err(BillingError::PendingBoletoExists);
        }

        let profile = self.directory.billing_profile(user_id).await?;
        let tax_id = profile.tax_id.clone().ok_or(BillingError::MissingTaxId)?;
        let venue = profile.venue.clone().ok_or(BillingError::MissingVenue)?;
        let plan_id = profile
            .plan_id
            .ok_or_else(|| BillingError::NotFound("plan".to_string()))?;
        let plan = self.directory.plan(plan_id).await?;

        let now = OffsetDateTime::now_utc();
        let due_date = now + Duration::days(BOLETO_EXPIRES_AFTER_DAYS);

        let intent = self
            .create_boleto_intent(&profile, &venue, &tax_id, plan.amount_cents)
            .await?;
        let payment = self
            .insert_payment(user_id, &intent, plan.amount_cents, due_date)
            .await?;

        let expires = payment.boleto_expires_at.unwrap_or(due_date);
        if let Err(e) = self
            .email
            .send_boleto_issued(
                &profile.email,
                &profile.name,
                plan.amount_cents,
                expires,
                payment.voucher_url.as_deref(),
            )
            .await
        {
            tracing::error!(user_id = %user_id, error = %e, "Boleto email failed");
        }
        if let Err(e) = self
            .notifications
            .record(
                user_id,
                "Boleto disponível",
                &format!(
                    "Seu boleto de {} vence em {}.",
                    format_brl(plan.amount_cents),
                    format_date(expires)
                ),
            )
            .await
        {
            tracing::error!(user_id = %user_id, error = %e, "Notification insert failed");
        }

        self.subscriptions.advance_billing_dates(user_id).await?;

        tracing::info!(
            user_id = %user_id,
            payment_id = %payment.id,
            amount_cents = payment.amount_cents,
            "Boleto issued"
        );

        Ok(payment)
    }

    /// The open boleto for a user, if one exists. The partial unique index
    /// guarantees at most one.
    pub async fn find_pending_boleto(&self, user_id: Uuid) -> BillingResult<Option<Payment>> {
        sqlx::query_as::<_, Payment>(
            r#"
            SELECT id, user_id, stripe_payment_intent_id, amount_cents, method, status,
                   boleto_expires_at, voucher_url, voucher_pdf_url, paid_at,
                   created_at, updated_at
            FROM payments
            WHERE user_id = $1 AND status = $2 AND method = $3
            "#,
        )
        .bind(user_id)
        .bind(PaymentStatus::Pending.as_str())
        .bind(PaymentMethod::Boleto.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))
    }

    /// Create a confirmed boleto payment intent. The SDK's typed params do
    /// not cover boleto payment_method_data, so this posts the
    /// form-encoded REST call directly.
    async fn create_boleto_intent(
        &self,
        profile: &BillingProfile,
        venue: &VenueAddress,
        tax_id: &str,
        amount_cents: i64,
    ) -> BillingResult<IssuedIntent> {
        let line1 = venue.line1();
        let amount = amount_cents.to_string();
        let expires_after = BOLETO_EXPIRES_AFTER_DAYS.to_string();
        let form_params = [
            ("amount", amount.as_str()),
            ("currency", "brl"),
            ("confirm", "true"),
            ("payment_method_types[]", "boleto"),
            ("payment_method_data[type]", "boleto"),
            ("payment_method_data[boleto][tax_id]", tax_id),
            ("payment_method_data[billing_details][name]", profile.name.as_str()),
            ("payment_method_data[billing_details][email]", profile.email.as_str()),
            ("payment_method_data[billing_details][address][line1]", line1.as_str()),
            ("payment_method_data[billing_details][address][city]", venue.city.as_str()),
            ("payment_method_data[billing_details][address][state]", venue.state.as_str()),
            (
                "payment_method_data[billing_details][address][postal_code]",
                venue.postal_code.as_str(),
            ),
            ("payment_method_data[billing_details][address][country]", "BR"),
            (
                "payment_method_options[boleto][expires_after_days]",
                expires_after.as_str(),
            ),
        ];

        let client = reqwest::Client::new();
        let response = client
            .post("https://api.stripe.com/v1/payment_intents")
            .bearer_auth(self.stripe.secret_key())
            .form(&form_params)
            .send()
            .await
            .map_err(|e| BillingError::Processor(format!("Failed to call Stripe API: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            tracing::error!(
                status = %status,
                error_body = %error_body,
                "Stripe payment_intents API failed"
            );
            return Err(BillingError::Processor(format!(
                "Stripe API error ({status}): {error_body}"
            )));
        }

        let intent: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BillingError::Processor(format!("Failed to parse Stripe response: {e}")))?;

        parse_issued_intent(&intent)
    }

    async fn insert_payment(
        &self,
        user_id: Uuid,
        intent: &IssuedIntent,
        amount_cents: i64,
        fallback_expiry: OffsetDateTime,
    ) -> BillingResult<Payment> {
        sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments
                (user_id, stripe_payment_intent_id, amount_cents, method, status,
                 boleto_expires_at, voucher_url, voucher_pdf_url)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, user_id, stripe_payment_intent_id, amount_cents, method, status,
                      boleto_expires_at, voucher_url, voucher_pdf_url, paid_at,
                      created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(&intent.reference)
        .bind(amount_cents)
        .bind(PaymentMethod::Boleto.as_str())
        .bind(PaymentStatus::Pending.as_str())
        .bind(intent.expires_at.unwrap_or(fallback_expiry))
        .bind(&intent.voucher_url)
        .bind(&intent.voucher_pdf_url)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            // Lost the check-then-insert race; the partial index caught it.
            sqlx::Error::Database(db)
                if db.constraint() == Some("payments_one_pending_boleto") =>
            {
                BillingError::PendingBoletoExists
            }
            _ => BillingError::Database(e.to_string()),
        })
    }

    /// Poll the processor for every open boleto and apply the resulting
    /// transitions. One failed record never blocks the rest.
    pub async fn reconcile_pending_boletos(&self) -> BillingResult<Vec<ReconcileOutcome>> {
        let pending = self.fetch_pending_boletos().await?;
        let mut outcomes = Vec::with_capacity(pending.len());

        for payment in pending {
            let payment_id = payment.id;
            match self.reconcile_one(&payment).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    tracing::error!(payment_id = %payment_id, error = %e, "Reconciliation failed");
                    outcomes.push(ReconcileOutcome::Failed {
                        payment_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(outcomes)
    }

    async fn fetch_pending_boletos(&self) -> BillingResult<Vec<Payment>> {
        sqlx::query_as::<_, Payment>(
            r#"
            SELECT id, user_id, stripe_payment_intent_id, amount_cents, method, status,
                   boleto_expires_at, voucher_url, voucher_pdf_url, paid_at,
                   created_at, updated_at
            FROM payments
            WHERE status = $1 AND method = $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(PaymentStatus::Pending.as_str())
        .bind(PaymentMethod::Boleto.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))
    }

    async fn reconcile_one(&self, payment: &Payment) -> BillingResult<ReconcileOutcome> {
        let intent_id = payment
            .stripe_payment_intent_id
            .parse::<PaymentIntentId>()
            .map_err(|e| BillingError::Processor(format!("Invalid payment intent id: {e}")))?;

        let intent = PaymentIntent::retrieve(self.stripe.inner(), &intent_id, &[]).await?;

        let now = OffsetDateTime::now_utc();
        let current = PaymentStatus::parse(&payment.status).unwrap_or(PaymentStatus::Pending);
        let Some(next) = next_status(intent.status, payment.boleto_expires_at, now) else {
            tracing::debug!(
                payment_id = %payment.id,
                processor_status = ?intent.status,
                "Pending boleto unchanged"
            );
            return Ok(ReconcileOutcome::Unchanged {
                payment_id: payment.id,
            });
        };
        if next == current {
            return Ok(ReconcileOutcome::Unchanged {
                payment_id: payment.id,
            });
        }

        self.apply_transition(payment, next, now).await?;

        match next {
            PaymentStatus::Paid => {
                self.subscriptions
                    .advance_billing_dates(payment.user_id)
                    .await?;
                self.notify_paid(payment).await;
            }
            PaymentStatus::Expired => {
                self.notify_failed(payment, "seu boleto expirou").await;
            }
            PaymentStatus::Canceled => {
                self.notify_failed(payment, "o pagamento foi cancelado").await;
            }
            PaymentStatus::Pending => {}
        }

        tracing::info!(
            payment_id = %payment.id,
            user_id = %payment.user_id,
            from = %current,
            to = %next,
            "Payment transitioned"
        );

        Ok(ReconcileOutcome::Transitioned {
            payment_id: payment.id,
            from: current,
            to: next,
        })
    }

    async fn apply_transition(
        &self,
        payment: &Payment,
        next: PaymentStatus,
        now: OffsetDateTime,
    ) -> BillingResult<()> {
        let paid_at = (next == PaymentStatus::Paid).then_some(now);
        sqlx::query(
            r#"
            UPDATE payments
            SET status = $2, paid_at = COALESCE($3, paid_at), updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(payment.id)
        .bind(next.as_str())
        .bind(paid_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;
        Ok(())
    }

    async fn notify_paid(&self, payment: &Payment) {
        let profile = match self.directory.billing_profile(payment.user_id).await {
            Ok(profile) => profile,
            Err(e) => {
                tracing::error!(
                    user_id = %payment.user_id,
                    error = %e,
                    "Profile lookup for confirmation failed"
                );
                return;
            }
        };

        if let Err(e) = self
            .email
            .send_payment_confirmed(&profile.email, &profile.name, payment.amount_cents)
            .await
        {
            tracing::error!(user_id = %payment.user_id, error = %e, "Confirmation email failed");
        }
        if let Err(e) = self
            .notifications
            .record(
                payment.user_id,
                "Pagamento confirmado",
                &format!(
                    "Recebemos o pagamento de {} da sua assinatura.",
                    format_brl(payment.amount_cents)
                ),
            )
            .await
        {
            tracing::error!(user_id = %payment.user_id, error = %e, "Notification insert failed");
        }
    }

    async fn notify_failed(&self, payment: &Payment, reason: &str) {
        let profile = match self.directory.billing_profile(payment.user_id).await {
            Ok(profile) => profile,
            Err(e) => {
                tracing::error!(
                    user_id = %payment.user_id,
                    error = %e,
                    "Profile lookup for failure notice failed"
                );
                return;
            }
        };

        if let Err(e) = self
            .email
            .send_payment_failed(&profile.email, &profile.name, payment.amount_cents, reason)
            .await
        {
            tracing::error!(user_id = %payment.user_id, error = %e, "Failure email failed");
        }
        if let Err(e) = self
            .notifications
            .record(
                payment.user_id,
                "Pagamento não concluído",
                &format!(
                    "O pagamento de {} não foi concluído: {reason}.",
                    format_brl(payment.amount_cents)
                ),
            )
            .await
        {
            tracing::error!(user_id = %payment.user_id, error = %e, "Notification insert failed");
        }
    }
}

/// Map a processor payment-intent status onto the local state machine.
///
/// Anything unlisted leaves the record untouched: an in-flight intent
/// (`processing`, `requires_action`, ...) stays locally pending rather
/// than being guessed at.
pub fn next_status(
    processor_status: PaymentIntentStatus,
    expires_at: Option<OffsetDateTime>,
    now: OffsetDateTime,
) -> Option<PaymentStatus> {
    match processor_status {
        PaymentIntentStatus::Succeeded => Some(PaymentStatus::Paid),
        PaymentIntentStatus::Canceled => Some(PaymentStatus::Canceled),
        PaymentIntentStatus::RequiresPaymentMethod => match expires_at {
            Some(expiry) if expiry < now => Some(PaymentStatus::Expired),
            _ => None,
        },
        _ => None,
    }
}

/// Pull the reference and boleto voucher details out of a payment-intent
/// response body.
fn parse_issued_intent(intent: &serde_json::Value) -> BillingResult<IssuedIntent> {
    let reference = intent["id"]
        .as_str()
        .ok_or_else(|| BillingError::Processor("Payment intent response missing id".to_string()))?
        .to_string();

    let details = &intent["next_action"]["boleto_display_details"];
    let voucher_url = details["hosted_voucher_url"].as_str().map(String::from);
    let voucher_pdf_url = details["pdf"].as_str().map(String::from);
    let expires_at = details["expires_at"]
        .as_i64()
        .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok());

    Ok(IssuedIntent {
        reference,
        voucher_url,
        voucher_pdf_url,
        expires_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2026-03-10 12:00 UTC);
    const PAST: OffsetDateTime = datetime!(2026-03-09 12:00 UTC);
    const FUTURE: OffsetDateTime = datetime!(2026-03-11 12:00 UTC);

    #[test]
    fn succeeded_maps_to_paid() {
        assert_eq!(
            next_status(PaymentIntentStatus::Succeeded, Some(FUTURE), NOW),
            Some(PaymentStatus::Paid)
        );
        // Expiry is irrelevant once the processor says it cleared.
        assert_eq!(
            next_status(PaymentIntentStatus::Succeeded, Some(PAST), NOW),
            Some(PaymentStatus::Paid)
        );
    }

    #[test]
    fn canceled_maps_to_canceled_regardless_of_expiry() {
        for expiry in [None, Some(PAST), Some(FUTURE)] {
            assert_eq!(
                next_status(PaymentIntentStatus::Canceled, expiry, NOW),
                Some(PaymentStatus::Canceled)
            );
        }
    }

    #[test]
    fn requires_payment_method_expires_only_after_the_deadline() {
        assert_eq!(
            next_status(PaymentIntentStatus::RequiresPaymentMethod, Some(PAST), NOW),
            Some(PaymentStatus::Expired)
        );
        assert_eq!(
            next_status(PaymentIntentStatus::RequiresPaymentMethod, Some(FUTURE), NOW),
            None
        );
        assert_eq!(
            next_status(PaymentIntentStatus::RequiresPaymentMethod, None, NOW),
            None
        );
    }

    #[test]
    fn expiry_at_the_exact_deadline_is_not_yet_expired() {
        assert_eq!(
            next_status(PaymentIntentStatus::RequiresPaymentMethod, Some(NOW), NOW),
            None
        );
    }

    #[test]
    fn in_flight_statuses_are_left_alone() {
        for status in [
            PaymentIntentStatus::Processing,
            PaymentIntentStatus::RequiresAction,
            PaymentIntentStatus::RequiresConfirmation,
            PaymentIntentStatus::RequiresCapture,
        ] {
            assert_eq!(next_status(status, Some(PAST), NOW), None);
        }
    }

    #[test]
    fn parse_issued_intent_reads_voucher_details() {
        let body = json!({
            "id": "pi_3OqXcd2eZvKYlo2C1kl76fJ9",
            "status": "requires_action",
            "next_action": {
                "type": "boleto_display_details",
                "boleto_display_details": {
                    "expires_at": 1767225600,
                    "hosted_voucher_url": "https://payments.stripe.com/boleto/voucher/test",
                    "number": "23790000012345678901234567890123456789012345",
                    "pdf": "https://payments.stripe.com/boleto/pdf/test"
                }
            }
        });

        let intent = parse_issued_intent(&body).unwrap();
        assert_eq!(intent.reference, "pi_3OqXcd2eZvKYlo2C1kl76fJ9");
        assert_eq!(
            intent.voucher_url.as_deref(),
            Some("https://payments.stripe.com/boleto/voucher/test")
        );
        assert_eq!(
            intent.voucher_pdf_url.as_deref(),
            Some("https://payments.stripe.com/boleto/pdf/test")
        );
        assert_eq!(intent.expires_at.unwrap().unix_timestamp(), 1767225600);
    }

    #[test]
    fn parse_issued_intent_without_next_action_still_returns_reference() {
        let body = json!({"id": "pi_123", "status": "processing"});
        let intent = parse_issued_intent(&body).unwrap();
        assert_eq!(intent.reference, "pi_123");
        assert!(intent.voucher_url.is_none());
        assert!(intent.voucher_pdf_url.is_none());
        assert!(intent.expires_at.is_none());
    }

    #[test]
    fn parse_issued_intent_without_id_is_a_processor_error() {
        let body = json!({"status": "requires_action"});
        let err = parse_issued_intent(&body).unwrap_err();
        assert_eq!(err.code(), "processor_error");
    }
}
