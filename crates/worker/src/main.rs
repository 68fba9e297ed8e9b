//! Quadra Background Worker
//!
//! Handles scheduled billing jobs:
//! - Billing cycle generation for reservation charges (every 3 hours)
//! - Boleto issuance for subscriptions due (daily at midnight UTC)
//! - Pending boleto reconciliation against Stripe (every 6 hours)
//! - Health check heartbeat (every 5 minutes)

use std::sync::Arc;
use std::time::Duration;

use quadra_billing::{BillingService, CycleOutcome, IssueOutcome, ReconcileOutcome};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

/// Create the database pool and bring the schema up to date.
async fn create_db_pool() -> anyhow::Result<sqlx::PgPool> {
    #[allow(clippy::expect_used)] // Fail-fast on startup if required config is missing
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = quadra_shared::create_pool(&database_url).await?;
    quadra_shared::run_migrations(&pool).await?;

    info!("Database pool created");
    Ok(pool)
}

/// Log results of a billing cycle generation run
fn log_cycle_outcomes(outcomes: &[CycleOutcome]) {
    let opened = outcomes
        .iter()
        .filter(|o| matches!(o, CycleOutcome::Opened { .. }))
        .count();
    let errors = outcomes
        .iter()
        .filter(|o| matches!(o, CycleOutcome::Failed { .. }))
        .count();

    info!(opened = opened, errors = errors, "Billing cycle run complete");

    for outcome in outcomes {
        if let CycleOutcome::Failed { charge_id, error } = outcome {
            error!(charge_id = %charge_id, error = %error, "Failed to open billing cycle");
        }
    }
}

/// Log results of a boleto issuance run
fn log_issue_outcomes(outcomes: &[IssueOutcome]) {
    let issued = outcomes
        .iter()
        .filter(|o| matches!(o, IssueOutcome::Issued { .. }))
        .count();
    let skipped = outcomes
        .iter()
        .filter(|o| {
            matches!(
                o,
                IssueOutcome::SkippedPendingBoleto { .. }
                    | IssueOutcome::SkippedMissingTaxId { .. }
                    | IssueOutcome::SkippedMissingVenue { .. }
            )
        })
        .count();
    let errors = outcomes
        .iter()
        .filter(|o| matches!(o, IssueOutcome::Failed { .. }))
        .count();

    info!(
        issued = issued,
        skipped = skipped,
        errors = errors,
        "Boleto issuance run complete"
    );

    for outcome in outcomes {
        if let IssueOutcome::Failed { user_id, error } = outcome {
            error!(user_id = %user_id, error = %error, "Failed to issue boleto");
        }
    }
}

/// Log results of a reconciliation run
fn log_reconcile_outcomes(outcomes: &[ReconcileOutcome]) {
    let transitioned = outcomes
        .iter()
        .filter(|o| matches!(o, ReconcileOutcome::Transitioned { .. }))
        .count();
    let unchanged = outcomes
        .iter()
        .filter(|o| matches!(o, ReconcileOutcome::Unchanged { .. }))
        .count();
    let errors = outcomes
        .iter()
        .filter(|o| matches!(o, ReconcileOutcome::Failed { .. }))
        .count();

    info!(
        transitioned = transitioned,
        unchanged = unchanged,
        errors = errors,
        "Payment reconciliation run complete"
    );

    for outcome in outcomes {
        if let ReconcileOutcome::Failed { payment_id, error } = outcome {
            error!(payment_id = %payment_id, error = %error, "Failed to reconcile payment");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting Quadra Worker");

    let pool = create_db_pool().await?;

    let billing = match BillingService::from_env(pool.clone()) {
        Ok(b) => Arc::new(b),
        Err(e) => {
            // If Stripe isn't configured, run in minimal mode
            warn!(error = %e, "Failed to create billing service - running in minimal mode");
            info!("Worker running without Stripe integration");

            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                info!("Worker heartbeat (minimal mode)");
            }
        }
    };

    let scheduler = JobScheduler::new().await?;

    // Job 1: Open billing cycles for due charges every 3 hours
    // Cron: At minute 0 past every 3rd hour (0:00, 3:00, ... 21:00 UTC)
    let cycle_service = billing.charges.clone();
    scheduler
        .add(Job::new_async("0 0 */3 * * *", move |_uuid, _l| {
            let service = cycle_service.clone();
            Box::pin(async move {
                info!("Running billing cycle generation");
                match service.open_due_cycles().await {
                    Ok(outcomes) => log_cycle_outcomes(&outcomes),
                    Err(e) => error!(error = %e, "Billing cycle run failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Billing cycle generation (every 3 hours)");

    // Job 2: Issue boletos for subscriptions due (daily at midnight UTC)
    // Covers both trial-ending owners and regular renewals
    let issue_service = billing.payments.clone();
    scheduler
        .add(Job::new_async("0 0 0 * * *", move |_uuid, _l| {
            let service = issue_service.clone();
            Box::pin(async move {
                info!("Running scheduled boleto issuance");
                match service.issue_due_boletos().await {
                    Ok(outcomes) => log_issue_outcomes(&outcomes),
                    Err(e) => error!(error = %e, "Boleto issuance run failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Boleto issuance (daily at midnight UTC)");

    // Job 3: Reconcile pending boletos against Stripe every 6 hours
    // Boletos settle out of band, so local status only catches up here
    let reconcile_service = billing.payments.clone();
    scheduler
        .add(Job::new_async("0 0 */6 * * *", move |_uuid, _l| {
            let service = reconcile_service.clone();
            Box::pin(async move {
                info!("Running pending boleto reconciliation");
                match service.reconcile_pending_boletos().await {
                    Ok(outcomes) => log_reconcile_outcomes(&outcomes),
                    Err(e) => error!(error = %e, "Reconciliation run failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Pending boleto reconciliation (every 6 hours)");

    // Job 4: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("Quadra Worker started successfully with {} scheduled jobs", 4);

    // Keep the main task running
    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
