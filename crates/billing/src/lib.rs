#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Quadra billing: subscription charging for venue owners.
//!
//! Owners pay for their Quadra subscription by boleto. This crate holds
//! the whole money path:
//!
//! - **Charges**: reservation-derived charges and their 30-day billing
//!   cycles, including the owner-facing status update with invoice
//!   audit metadata.
//! - **Payments**: boleto issuance against the processor and the
//!   reconciliation poll that settles open boletos.
//! - **Subscriptions**: billing-date bookkeeping on the user record and
//!   renewal cancellation at the processor.
//! - **Invoices**: per-cycle invoice records with merged JSON metadata.
//! - **Email / notifications**: transactional mail via Resend plus
//!   in-app notification rows.
//!
//! [`BillingService`] wires the services together over one connection
//! pool; the worker binary and any API surface both consume it.

pub mod charges;
pub mod client;
pub mod directory;
pub mod email;
pub mod error;
pub mod invoices;
pub mod notifications;
pub mod payments;
pub mod subscriptions;

#[cfg(test)]
mod edge_case_tests;

pub use charges::{Charge, ChargeService, CycleOutcome};
pub use client::{StripeClient, StripeConfig};
pub use directory::{BillingProfile, OwnerDirectory, Plan, VenueAddress};
pub use email::{EmailConfig, EmailService};
pub use error::{BillingError, BillingResult};
pub use invoices::{Invoice, InvoiceService};
pub use notifications::NotificationService;
pub use payments::{IssueOutcome, Payment, PaymentService, ReconcileOutcome};
pub use subscriptions::{BillingCandidate, SubscriptionService};

use sqlx::PgPool;

/// Aggregated entry point over every billing service.
#[derive(Clone)]
pub struct BillingService {
    pub charges: ChargeService,
    pub directory: OwnerDirectory,
    pub email: EmailService,
    pub invoices: InvoiceService,
    pub notifications: NotificationService,
    pub payments: PaymentService,
    pub subscriptions: SubscriptionService,
}

impl BillingService {
    /// Build from `STRIPE_SECRET_KEY`, `RESEND_API_KEY` and `EMAIL_FROM`.
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        Ok(Self::build(StripeClient::from_env()?, pool))
    }

    pub fn new(config: StripeConfig, pool: PgPool) -> Self {
        Self::build(StripeClient::new(config), pool)
    }

    fn build(stripe: StripeClient, pool: PgPool) -> Self {
        let email = EmailService::from_env();
        Self {
            charges: ChargeService::new(pool.clone()),
            directory: OwnerDirectory::new(pool.clone()),
            invoices: InvoiceService::new(pool.clone()),
            notifications: NotificationService::new(pool.clone()),
            payments: PaymentService::new(stripe.clone(), pool.clone(), email.clone()),
            subscriptions: SubscriptionService::new(stripe, pool),
            email,
        }
    }
}
