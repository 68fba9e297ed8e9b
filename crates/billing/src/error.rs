//! Uniform error type for billing operations.
//!
//! Every business-rule failure that crosses a service boundary is one of
//! these variants. `code` and `title` give callers a stable, display-ready
//! shape without string-matching `Display` output.

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Payment processor error: {0}")]
    Processor(String),

    #[error("Email delivery error: {0}")]
    Email(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("User already has an open boleto payment")]
    PendingBoletoExists,

    #[error("User has no tax document on file")]
    MissingTaxId,

    #[error("User has no registered venue")]
    MissingVenue,

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Stable machine-readable code for client display and log filtering.
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::Database(_) => "database_error",
            BillingError::Processor(_) => "processor_error",
            BillingError::Email(_) => "email_error",
            BillingError::Config(_) => "config_error",
            BillingError::NotFound(_) => "not_found",
            BillingError::Forbidden(_) => "forbidden",
            BillingError::PendingBoletoExists => "pending_boleto_exists",
            BillingError::MissingTaxId => "missing_tax_id",
            BillingError::MissingVenue => "missing_venue",
            BillingError::InvalidStatus(_) => "invalid_status",
            BillingError::Internal(_) => "internal_error",
        }
    }

    /// Short human-readable title to pair with the message.
    pub fn title(&self) -> &'static str {
        match self {
            BillingError::Database(_) | BillingError::Internal(_) => "Internal error",
            BillingError::Processor(_) => "Payment processor unavailable",
            BillingError::Email(_) => "Notification failure",
            BillingError::Config(_) => "Service misconfigured",
            BillingError::NotFound(_) => "Not found",
            BillingError::Forbidden(_) => "Forbidden",
            BillingError::PendingBoletoExists => "Boleto already open",
            BillingError::MissingTaxId => "Tax document required",
            BillingError::MissingVenue => "Registered venue required",
            BillingError::InvalidStatus(_) => "Invalid status",
        }
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(e: stripe::StripeError) -> Self {
        BillingError::Processor(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_and_not_found_have_distinct_codes() {
        let forbidden = BillingError::Forbidden("charge belongs to another owner".to_string());
        let not_found = BillingError::NotFound("charge".to_string());
        assert_eq!(forbidden.code(), "forbidden");
        assert_eq!(not_found.code(), "not_found");
        assert_ne!(forbidden.code(), not_found.code());
    }

    #[test]
    fn precondition_errors_carry_their_own_codes() {
        assert_eq!(BillingError::PendingBoletoExists.code(), "pending_boleto_exists");
        assert_eq!(BillingError::MissingTaxId.code(), "missing_tax_id");
        assert_eq!(BillingError::MissingVenue.code(), "missing_venue");
    }

    #[test]
    fn display_includes_the_wrapped_detail() {
        let err = BillingError::Database("connection reset".to_string());
        assert!(err.to_string().contains("connection reset"));
        let err = BillingError::NotFound("plan".to_string());
        assert_eq!(err.to_string(), "plan not found");
    }
}
