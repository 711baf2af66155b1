use crate::domain::{Subscription, SubscriptionPeriod, SubscriptionStatus};
use crate::infrastructure::RepositoryError;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use std::str::FromStr;

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Returns `false` when a row with the same external id already exists.
    async fn create(&self, subscription: &Subscription) -> Result<bool, RepositoryError>;
    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<Subscription>, RepositoryError>;
    async fn update_period(
        &self,
        external_id: &str,
        period: &SubscriptionPeriod,
    ) -> Result<(), RepositoryError>;
    async fn update_status(
        &self,
        external_id: &str,
        status: SubscriptionStatus,
    ) -> Result<(), RepositoryError>;
}

/// Ledger of processed payment-processor event ids, used to drop redeliveries.
#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    /// Record `event_id`; returns `false` if it had already been recorded.
    async fn record(&self, event_id: &str, event_type: &str) -> Result<bool, RepositoryError>;
    /// Drop a record so a failed event can be processed again on redelivery.
    async fn forget(&self, event_id: &str) -> Result<(), RepositoryError>;
}

pub struct PostgresSubscriptionRepository {
    pool: PgPool,
}

impl PostgresSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    async fn create(&self, subscription: &Subscription) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO subscriptions (id, user_id, influencer_id, plan_id, external_subscription_id,
                                       status, current_period_start, current_period_end,
                                       cancel_at_period_end, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (external_subscription_id) DO NOTHING
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.user_id)
        .bind(subscription.influencer_id)
        .bind(subscription.plan_id)
        .bind(&subscription.external_subscription_id)
        .bind(subscription.status.to_string())
        .bind(subscription.current_period_start)
        .bind(subscription.current_period_end)
        .bind(subscription.cancel_at_period_end)
        .bind(subscription.created_at)
        .bind(subscription.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<Subscription>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, influencer_id, plan_id, external_subscription_id, status,
                   current_period_start, current_period_end, cancel_at_period_end,
                   created_at, updated_at
            FROM subscriptions
            WHERE external_subscription_id = $1
            "#,
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(row_to_subscription(&r)?)),
            None => Ok(None),
        }
    }

    async fn update_period(
        &self,
        external_id: &str,
        period: &SubscriptionPeriod,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = $1, current_period_start = $2, current_period_end = $3,
                cancel_at_period_end = $4, updated_at = $5
            WHERE external_subscription_id = $6
            "#,
        )
        .bind(period.status.to_string())
        .bind(period.current_period_start)
        .bind(period.current_period_end)
        .bind(period.cancel_at_period_end)
        .bind(Utc::now())
        .bind(external_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_status(
        &self,
        external_id: &str,
        status: SubscriptionStatus,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = $1, updated_at = $2
            WHERE external_subscription_id = $3
            "#,
        )
        .bind(status.to_string())
        .bind(Utc::now())
        .bind(external_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_subscription(row: &sqlx::postgres::PgRow) -> Result<Subscription, RepositoryError> {
    let status_str: String = row.try_get("status")?;

    Ok(Subscription {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        influencer_id: row.try_get("influencer_id")?,
        plan_id: row.try_get("plan_id")?,
        external_subscription_id: row.try_get("external_subscription_id")?,
        status: SubscriptionStatus::from_str(&status_str).map_err(|_| {
            RepositoryError::InvalidData(format!("Unknown subscription status: {}", status_str))
        })?,
        current_period_start: row.try_get("current_period_start")?,
        current_period_end: row.try_get("current_period_end")?,
        cancel_at_period_end: row.try_get("cancel_at_period_end")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub struct PostgresWebhookEventRepository {
    pool: PgPool,
}

impl PostgresWebhookEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookEventRepository for PostgresWebhookEventRepository {
    async fn record(&self, event_id: &str, event_type: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO webhook_events (event_id, event_type, received_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn forget(&self, event_id: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM webhook_events WHERE event_id = $1")
            .bind(event_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
