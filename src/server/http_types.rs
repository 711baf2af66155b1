use crate::application::MessageInput;
use crate::domain::{ChatMessage, Influencer, Plan};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

#[derive(Serialize, ToSchema)]
pub(super) struct HealthResponse {
    pub(super) status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) error: Option<String>,
}

#[derive(Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(super) struct SignUpRequest {
    #[validate(email)]
    #[schema(example = "fan@example.com")]
    pub(super) email: String,
    #[validate(length(min = 6, max = 128))]
    pub(super) password: String,
    #[validate(length(min = 3, max = 32))]
    pub(super) username: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub(super) display_name: Option<String>,
}

#[derive(Deserialize, Validate, ToSchema)]
pub(super) struct LoginRequest {
    #[validate(email)]
    pub(super) email: String,
    #[validate(length(min = 1))]
    pub(super) password: String,
}

#[derive(Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(super) struct UpdateProfileRequest {
    #[validate(length(min = 3, max = 32))]
    pub(super) username: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub(super) display_name: Option<String>,
}

#[derive(Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(super) struct SendMessageRequest {
    pub(super) influencer_id: Uuid,
    #[validate(length(max = 4000))]
    #[schema(example = "Hey, how was your day?")]
    pub(super) content: String,
    /// Optional image attachment (URL or data URI).
    #[serde(default)]
    pub(super) image: Option<String>,
    #[serde(default)]
    pub(super) wants_audio: bool,
}

impl From<SendMessageRequest> for MessageInput {
    fn from(req: SendMessageRequest) -> Self {
        MessageInput {
            text: req.content,
            image: req.image,
            wants_audio: req.wants_audio,
        }
    }
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(super) struct InitConversationRequest {
    pub(super) influencer_id: Uuid,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(super) struct SaveMessagesRequest {
    pub(super) influencer_id: Uuid,
    #[schema(value_type = Object)]
    pub(super) user_message: ChatMessage,
    #[schema(value_type = Object)]
    pub(super) ai_message: ChatMessage,
}

#[derive(Deserialize, Debug, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub(super) struct MessagesQuery {
    pub(super) influencer_id: Uuid,
    #[serde(default = "default_limit")]
    #[param(default = 20, maximum = 100)]
    pub(super) limit: i64,
    #[serde(default)]
    #[param(default = 0)]
    pub(super) offset: i64,
}

pub(super) fn default_limit() -> i64 {
    20
}

/// Persona fields safe to show to any visitor.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(super) struct InfluencerResponse {
    pub(super) id: Uuid,
    pub(super) display_name: String,
    pub(super) bio: Option<String>,
}

impl From<Influencer> for InfluencerResponse {
    fn from(influencer: Influencer) -> Self {
        Self {
            id: influencer.id,
            display_name: influencer.display_name,
            bio: influencer.bio,
        }
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(super) struct PlanResponse {
    pub(super) id: Uuid,
    pub(super) name: String,
    pub(super) price_cents: i64,
    pub(super) currency: String,
    pub(super) interval: String,
    pub(super) features: Vec<String>,
    pub(super) access_level: String,
    pub(super) token_grant: i32,
    pub(super) stripe_price_id: Option<String>,
}

impl From<Plan> for PlanResponse {
    fn from(plan: Plan) -> Self {
        Self {
            id: plan.id,
            token_grant: plan.token_grant(),
            name: plan.name,
            price_cents: plan.price_cents,
            currency: plan.currency,
            interval: plan.interval.to_string(),
            features: plan.features,
            access_level: plan.access_level.to_string(),
            stripe_price_id: plan.stripe_price_id,
        }
    }
}
