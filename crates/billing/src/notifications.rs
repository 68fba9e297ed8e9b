//! In-app notification rows written alongside transactional email.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

#[derive(Clone)]
pub struct NotificationService {
    pool: PgPool,
}

impl NotificationService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert one feed entry for the user. Callers treat failures as
    /// non-fatal and only log them.
    pub async fn record(&self, user_id: Uuid, title: &str, body: &str) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (user_id, title, body)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(user_id)
        .bind(title)
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;
        Ok(())
    }
}
