use crate::application::{AccountService, BillingService, ChatService};
use crate::infrastructure::{
    AppConfig, HostedAuthClient, InferenceClient, PostgresConversationRepository,
    PostgresInfluencerRepository, PostgresMessageRepository, PostgresPlanRepository,
    PostgresSubscriptionRepository, PostgresUserRepository, PostgresWebhookEventRepository,
};
use anyhow::Context;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

pub type ChatServiceType = ChatService<
    PostgresUserRepository,
    PostgresConversationRepository,
    PostgresMessageRepository,
    PostgresInfluencerRepository,
    InferenceClient,
>;

pub type BillingServiceType = BillingService<
    PostgresSubscriptionRepository,
    PostgresWebhookEventRepository,
    PostgresPlanRepository,
    PostgresConversationRepository,
>;

pub type AccountServiceType =
    AccountService<PostgresUserRepository, PostgresConversationRepository, HostedAuthClient>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub influencer_id: Uuid,
    pub webhook_secret: Arc<str>,
    pub webhook_tolerance_secs: i64,
    pub influencer_repo: Arc<PostgresInfluencerRepository>,
    pub plan_repo: Arc<PostgresPlanRepository>,
    pub chat: Arc<ChatServiceType>,
    pub billing: Arc<BillingServiceType>,
    pub accounts: Arc<AccountServiceType>,
    pub cors_allowed_origin: Option<String>,
}

/// Build full state from config + an existing pool.
///
/// Intended for embedding into a larger service that already manages a `PgPool`.
pub async fn build_state_with_pool(
    config: AppConfig,
    pool: PgPool,
    run_migrations: bool,
) -> anyhow::Result<AppState> {
    if run_migrations {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("run migrations")?;
    }

    let auth = Arc::new(
        HostedAuthClient::new(config.auth_url.clone(), config.auth_anon_key.clone())
            .context("init auth client")?,
    );
    let inference = Arc::new(
        InferenceClient::new(config.inference_url.clone()).context("init inference client")?,
    );

    let user_repo = Arc::new(PostgresUserRepository::new(pool.clone()));
    let conversation_repo = Arc::new(PostgresConversationRepository::new(pool.clone()));
    let message_repo = Arc::new(PostgresMessageRepository::new(pool.clone()));
    let influencer_repo = Arc::new(PostgresInfluencerRepository::new(pool.clone()));
    let plan_repo = Arc::new(PostgresPlanRepository::new(pool.clone()));
    let subscription_repo = Arc::new(PostgresSubscriptionRepository::new(pool.clone()));
    let event_repo = Arc::new(PostgresWebhookEventRepository::new(pool.clone()));

    let settings = config.chat_settings();

    let chat = Arc::new(ChatService::new(
        user_repo.clone(),
        conversation_repo.clone(),
        message_repo,
        influencer_repo.clone(),
        inference,
        settings.clone(),
    ));

    let billing = Arc::new(BillingService::new(
        subscription_repo,
        event_repo,
        plan_repo.clone(),
        conversation_repo.clone(),
        config.influencer_id,
        settings.starting_tokens,
    ));

    let accounts = Arc::new(AccountService::new(user_repo, conversation_repo, auth));

    Ok(AppState {
        pool,
        influencer_id: config.influencer_id,
        webhook_secret: Arc::from(config.webhook_secret.as_str()),
        webhook_tolerance_secs: config.webhook_tolerance_secs,
        influencer_repo,
        plan_repo,
        chat,
        billing,
        accounts,
        cors_allowed_origin: config.cors_allowed_origin,
    })
}

/// Build state for the standalone server.
///
/// Creates the `PgPool`, runs migrations, and wires repositories/services.
pub async fn build_state_from_env(config: AppConfig) -> anyhow::Result<AppState> {
    let pool = PgPool::connect(&config.database_url)
        .await
        .context("connect database")?;
    build_state_with_pool(config, pool, true).await
}
