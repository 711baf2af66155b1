use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-(user, persona) thread and token balance. Unique on `(user_id, influencer_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub influencer_id: Uuid,
    pub tokens: i32,
    pub plan_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(user_id: Uuid, influencer_id: Uuid, starting_tokens: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            influencer_id,
            tokens: starting_tokens,
            plan_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_afford(&self, cost: i32) -> bool {
        self.tokens > 0 && self.tokens >= cost
    }
}
