#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Shared infrastructure for the Quadra billing workspace.
//!
//! Holds the pieces every workspace binary needs: database pool
//! construction, embedded migrations, and the status/method enums that
//! define the payment and charge state machines.

pub mod db;
pub mod types;

pub use db::{create_pool, run_migrations};
pub use types::{ChargeKind, ChargeStatus, PaymentMethod, PaymentStatus};
