//! Thin wrapper around the Stripe SDK client.

use crate::error::{BillingError, BillingResult};

/// Environment-derived Stripe configuration.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
}

impl StripeConfig {
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?;
        if secret_key.is_empty() {
            return Err(BillingError::Config("STRIPE_SECRET_KEY is empty".to_string()));
        }
        Ok(Self { secret_key })
    }
}

/// Shared Stripe client handle. Cloning is cheap; every service that talks
/// to the processor holds one.
#[derive(Clone)]
pub struct StripeClient {
    client: stripe::Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let client = stripe::Client::new(config.secret_key.clone());
        Self { client, config }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    /// The underlying SDK client, for typed API calls.
    pub fn inner(&self) -> &stripe::Client {
        &self.client
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }

    /// Secret key for the form-encoded REST endpoints the SDK does not
    /// cover (boleto payment intent creation).
    pub fn secret_key(&self) -> &str {
        &self.config.secret_key
    }
}
