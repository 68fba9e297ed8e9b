//! Owner and venue lookups used when assembling billing details.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Address fields of the owner's registered venue, used as the billing
/// address on payment instruments.
#[derive(Debug, Clone)]
pub struct VenueAddress {
    pub street: String,
    pub number: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
}

impl VenueAddress {
    /// Street line the processor expects ("Rua das Laranjeiras, 120").
    pub fn line1(&self) -> String {
        match &self.number {
            Some(number) => format!("{}, {}", self.street, number),
            None => self.street.clone(),
        }
    }
}

/// Everything the processor needs to mint a payable instrument for a
/// subscriber. `tax_id` and `venue` stay optional here; issuance enforces
/// them.
#[derive(Debug, Clone)]
pub struct BillingProfile {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub tax_id: Option<String>,
    pub plan_id: Option<Uuid>,
    pub venue: Option<VenueAddress>,
}

/// A subscription plan, priced in centavos.
#[derive(Debug, Clone)]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    pub amount_cents: i64,
}

#[derive(Clone)]
pub struct OwnerDirectory {
    pool: PgPool,
}

impl OwnerDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Billing profile for one subscriber: the user row plus their first
    /// registered venue, if any.
    pub async fn billing_profile(&self, user_id: Uuid) -> BillingResult<BillingProfile> {
        let user: Option<(String, String, Option<String>, Option<Uuid>)> = sqlx::query_as(
            "SELECT name, email, tax_id, plan_id FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        let (name, email, tax_id, plan_id) =
            user.ok_or_else(|| BillingError::NotFound("user".to_string()))?;

        let venue: Option<(String, Option<String>, String, String, String)> = sqlx::query_as(
            r#"
            SELECT street, number, city, state, postal_code
            FROM venues
            WHERE owner_id = $1
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        Ok(BillingProfile {
            user_id,
            name,
            email,
            // An empty string on the row counts as no document.
            tax_id: tax_id.filter(|t| !t.is_empty()),
            plan_id,
            venue: venue.map(|(street, number, city, state, postal_code)| VenueAddress {
                street,
                number,
                city,
                state,
                postal_code,
            }),
        })
    }

    /// Plan lookup for the charge amount.
    pub async fn plan(&self, plan_id: Uuid) -> BillingResult<Plan> {
        let row: Option<(Uuid, String, i64)> =
            sqlx::query_as("SELECT id, name, amount_cents FROM plans WHERE id = $1")
                .bind(plan_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| BillingError::Database(e.to_string()))?;

        row.map(|(id, name, amount_cents)| Plan {
            id,
            name,
            amount_cents,
        })
        .ok_or_else(|| BillingError::NotFound("plan".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn venue_line1_includes_the_number_when_present() {
        let venue = VenueAddress {
            street: "Rua das Laranjeiras".to_string(),
            number: Some("120".to_string()),
            city: "São Paulo".to_string(),
            state: "SP".to_string(),
            postal_code: "01415-000".to_string(),
        };
        assert_eq!(venue.line1(), "Rua das Laranjeiras, 120");

        let no_number = VenueAddress {
            number: None,
            ..venue
        };
        assert_eq!(no_number.line1(), "Rua das Laranjeiras");
    }
}
