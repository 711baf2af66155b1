use crate::domain::{ChatMessage, Conversation, MessageContent, MessageType, ProfileUpdate, Sender, User};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert the profile row if it does not exist yet; existing rows are left untouched.
    #[must_use]
    async fn ensure(&self, user: &User) -> Result<(), RepositoryError>;
    #[must_use]
    async fn get_by_id(&self, id: Uuid) -> Result<User, RepositoryError>;
    #[must_use]
    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<User, RepositoryError>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    #[must_use]
    async fn find(
        &self,
        user_id: Uuid,
        influencer_id: Uuid,
    ) -> Result<Option<Conversation>, RepositoryError>;
    /// Insert `conversation` unless a row for the same (user, influencer) exists,
    /// and return whichever row won.
    #[must_use]
    async fn get_or_create(&self, conversation: &Conversation) -> Result<Conversation, RepositoryError>;
    /// Atomically subtract `amount` if the balance covers it. Returns the new
    /// balance, or `None` when the balance was insufficient.
    #[must_use]
    async fn try_debit(&self, id: Uuid, amount: i32) -> Result<Option<i32>, RepositoryError>;
    /// Add `amount` to the balance and return the new balance.
    #[must_use]
    async fn credit(&self, id: Uuid, amount: i32) -> Result<i32, RepositoryError>;
    #[must_use]
    async fn set_plan(&self, id: Uuid, plan_id: Option<Uuid>) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Append a message. Returns `false` when a message with the same id already exists.
    #[must_use]
    async fn insert(&self, message: &ChatMessage) -> Result<bool, RepositoryError>;
    #[must_use]
    async fn exists(&self, id: Uuid) -> Result<bool, RepositoryError>;
    /// Page of messages counted back from the newest, returned oldest-first.
    #[must_use]
    async fn list_recent(
        &self,
        conversation_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ChatMessage>, RepositoryError>;
    #[must_use]
    async fn count(&self, conversation_id: Uuid) -> Result<i64, RepositoryError>;
    #[must_use]
    async fn count_by_sender(&self, conversation_id: Uuid, sender: Sender) -> Result<i64, RepositoryError>;
}

pub struct PostgresUserRepository {
    pool: PgPool,
}

impl PostgresUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn ensure(&self, user: &User) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, username, display_name, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.display_name)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<User, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, email, username, display_name, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => RepositoryError::NotFound(format!("User {}", id)),
            _ => RepositoryError::DatabaseError(e),
        })?;

        row_to_user(&row)
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<User, RepositoryError> {
        let row = sqlx::query(
            r#"
            UPDATE users
            SET username = COALESCE($1, username),
                display_name = COALESCE($2, display_name),
                updated_at = $3
            WHERE id = $4
            RETURNING id, email, username, display_name, created_at, updated_at
            "#,
        )
        .bind(&update.username)
        .bind(&update.display_name)
        .bind(Utc::now())
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => RepositoryError::NotFound(format!("User {}", id)),
            _ => RepositoryError::DatabaseError(e),
        })?;

        row_to_user(&row)
    }
}

fn row_to_user(row: &sqlx::postgres::PgRow) -> Result<User, RepositoryError> {
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        username: row.try_get("username")?,
        display_name: row.try_get("display_name")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub struct PostgresConversationRepository {
    pool: PgPool,
}

impl PostgresConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationRepository for PostgresConversationRepository {
    async fn find(
        &self,
        user_id: Uuid,
        influencer_id: Uuid,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, influencer_id, tokens, plan_id, created_at, updated_at
            FROM conversations
            WHERE user_id = $1 AND influencer_id = $2
            "#,
        )
        .bind(user_id)
        .bind(influencer_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(row_to_conversation(&r)?)),
            None => Ok(None),
        }
    }

    async fn get_or_create(&self, conversation: &Conversation) -> Result<Conversation, RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO conversations (id, user_id, influencer_id, tokens, plan_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id, influencer_id) DO NOTHING
            "#,
        )
        .bind(conversation.id)
        .bind(conversation.user_id)
        .bind(conversation.influencer_id)
        .bind(conversation.tokens)
        .bind(conversation.plan_id)
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .execute(&self.pool)
        .await?;

        self.find(conversation.user_id, conversation.influencer_id)
            .await?
            .ok_or_else(|| {
                RepositoryError::NotFound(format!(
                    "Conversation for user {} and influencer {}",
                    conversation.user_id, conversation.influencer_id
                ))
            })
    }

    async fn try_debit(&self, id: Uuid, amount: i32) -> Result<Option<i32>, RepositoryError> {
        let remaining: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE conversations
            SET tokens = tokens - $1, updated_at = $2
            WHERE id = $3 AND tokens >= $1
            RETURNING tokens
            "#,
        )
        .bind(amount)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(remaining)
    }

    async fn credit(&self, id: Uuid, amount: i32) -> Result<i32, RepositoryError> {
        let balance: i32 = sqlx::query_scalar(
            r#"
            UPDATE conversations
            SET tokens = tokens + $1, updated_at = $2
            WHERE id = $3
            RETURNING tokens
            "#,
        )
        .bind(amount)
        .bind(Utc::now())
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => RepositoryError::NotFound(format!("Conversation {}", id)),
            _ => RepositoryError::DatabaseError(e),
        })?;

        Ok(balance)
    }

    async fn set_plan(&self, id: Uuid, plan_id: Option<Uuid>) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            UPDATE conversations
            SET plan_id = $1, updated_at = $2
            WHERE id = $3
            "#,
        )
        .bind(plan_id)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_conversation(row: &sqlx::postgres::PgRow) -> Result<Conversation, RepositoryError> {
    Ok(Conversation {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        influencer_id: row.try_get("influencer_id")?,
        tokens: row.try_get("tokens")?,
        plan_id: row.try_get("plan_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub struct PostgresMessageRepository {
    pool: PgPool,
}

impl PostgresMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PostgresMessageRepository {
    async fn insert(&self, message: &ChatMessage) -> Result<bool, RepositoryError> {
        let conversation_id = message.conversation_id.ok_or_else(|| {
            RepositoryError::InvalidData(format!("Message {} has no conversation", message.id))
        })?;

        let result = sqlx::query(
            r#"
            INSERT INTO chat_messages (id, conversation_id, user_id, influencer_id, sender,
                                       content, message_type, created_at, read_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(message.id)
        .bind(conversation_id)
        .bind(message.user_id)
        .bind(message.influencer_id)
        .bind(message.sender.to_string())
        .bind(message.content.encode())
        .bind(message.message_type().to_string())
        .bind(message.created_at)
        .bind(message.read_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn exists(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let found: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(SELECT 1 FROM chat_messages WHERE id = $1)
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(found)
    }

    async fn list_recent(
        &self,
        conversation_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        // Newest-first scan for LIMIT/OFFSET, flipped back to chronological order here
        // so every caller sees a single ordering.
        let rows = sqlx::query(
            r#"
            SELECT id, conversation_id, user_id, influencer_id, sender, content,
                   message_type, created_at, read_at
            FROM (
                SELECT id, conversation_id, user_id, influencer_id, sender, content,
                       message_type, created_at, read_at
                FROM chat_messages
                WHERE conversation_id = $1
                ORDER BY created_at DESC
                LIMIT $2 OFFSET $3
            ) page
            ORDER BY created_at ASC
            "#,
        )
        .bind(conversation_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_message).collect()
    }

    async fn count(&self, conversation_id: Uuid) -> Result<i64, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM chat_messages
            WHERE conversation_id = $1
            "#,
        )
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn count_by_sender(&self, conversation_id: Uuid, sender: Sender) -> Result<i64, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM chat_messages
            WHERE conversation_id = $1 AND sender = $2
            "#,
        )
        .bind(conversation_id)
        .bind(sender.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

fn row_to_message(row: &sqlx::postgres::PgRow) -> Result<ChatMessage, RepositoryError> {
    let sender_str: String = row.try_get("sender")?;
    let type_str: String = row.try_get("message_type")?;
    let raw_content: String = row.try_get("content")?;

    let sender = Sender::from_str(&sender_str)
        .map_err(|_| RepositoryError::InvalidData(format!("Unknown sender: {}", sender_str)))?;
    let message_type = MessageType::from_str(&type_str)
        .map_err(|_| RepositoryError::InvalidData(format!("Unknown message type: {}", type_str)))?;

    Ok(ChatMessage {
        id: row.try_get("id")?,
        conversation_id: Some(row.try_get("conversation_id")?),
        user_id: row.try_get("user_id")?,
        influencer_id: row.try_get("influencer_id")?,
        sender,
        content: MessageContent::decode(message_type, &raw_content),
        created_at: row.try_get("created_at")?,
        read_at: row.try_get("read_at")?,
        provisional: false,
    })
}
