use crate::domain::{AccessLevel, BillingInterval, Influencer, ModelPreset, Plan};
use crate::infrastructure::RepositoryError;
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

#[async_trait]
pub trait InfluencerRepository: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> Result<Influencer, RepositoryError>;
}

#[async_trait]
pub trait PlanRepository: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> Result<Plan, RepositoryError>;
    async fn find_by_stripe_price_id(&self, price_id: &str) -> Result<Option<Plan>, RepositoryError>;
    async fn list_active(&self) -> Result<Vec<Plan>, RepositoryError>;
}

pub struct PostgresInfluencerRepository {
    pool: PgPool,
}

impl PostgresInfluencerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InfluencerRepository for PostgresInfluencerRepository {
    async fn get_by_id(&self, id: Uuid) -> Result<Influencer, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, display_name, bio, system_prompt, temperature, max_tokens,
                   welcome_message, is_active, created_at
            FROM influencers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => RepositoryError::NotFound(format!("Influencer {}", id)),
            _ => RepositoryError::DatabaseError(e),
        })?;

        Ok(Influencer {
            id: row.try_get("id")?,
            display_name: row.try_get("display_name")?,
            bio: row.try_get("bio")?,
            system_prompt: row.try_get("system_prompt")?,
            model_preset: ModelPreset {
                temperature: row.try_get("temperature")?,
                max_tokens: row.try_get("max_tokens")?,
            },
            welcome_message: row.try_get("welcome_message")?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

pub struct PostgresPlanRepository {
    pool: PgPool,
}

impl PostgresPlanRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PlanRepository for PostgresPlanRepository {
    async fn get_by_id(&self, id: Uuid) -> Result<Plan, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, price_cents, currency, billing_interval, features, access_level,
                   stripe_price_id, stripe_product_id, is_active, created_at
            FROM plans
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => RepositoryError::NotFound(format!("Plan {}", id)),
            _ => RepositoryError::DatabaseError(e),
        })?;

        row_to_plan(&row)
    }

    async fn find_by_stripe_price_id(&self, price_id: &str) -> Result<Option<Plan>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, price_cents, currency, billing_interval, features, access_level,
                   stripe_price_id, stripe_product_id, is_active, created_at
            FROM plans
            WHERE stripe_price_id = $1
            "#,
        )
        .bind(price_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(row_to_plan(&r)?)),
            None => Ok(None),
        }
    }

    async fn list_active(&self) -> Result<Vec<Plan>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, price_cents, currency, billing_interval, features, access_level,
                   stripe_price_id, stripe_product_id, is_active, created_at
            FROM plans
            WHERE is_active
            ORDER BY price_cents ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_plan).collect()
    }
}

fn row_to_plan(row: &sqlx::postgres::PgRow) -> Result<Plan, RepositoryError> {
    let interval_str: String = row.try_get("billing_interval")?;
    let access_str: String = row.try_get("access_level")?;
    let features_json: serde_json::Value = row.try_get("features")?;

    let features: Vec<String> = serde_json::from_value(features_json).map_err(|e| {
        RepositoryError::InvalidData(format!("Failed to deserialize plan features: {}", e))
    })?;

    Ok(Plan {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        price_cents: row.try_get("price_cents")?,
        currency: row.try_get("currency")?,
        interval: BillingInterval::from_str(&interval_str).map_err(|_| {
            RepositoryError::InvalidData(format!("Unknown billing interval: {}", interval_str))
        })?,
        features,
        access_level: AccessLevel::from_str(&access_str).map_err(|_| {
            RepositoryError::InvalidData(format!("Unknown access level: {}", access_str))
        })?,
        stripe_price_id: row.try_get("stripe_price_id")?,
        stripe_product_id: row.try_get("stripe_product_id")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}
