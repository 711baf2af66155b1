use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Local mirror of a payment-processor subscription. Only webhooks write it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub influencer_id: Uuid,
    pub plan_id: Uuid,
    pub external_subscription_id: String,
    pub status: SubscriptionStatus,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Incomplete,
    Unpaid,
}

impl SubscriptionStatus {
    /// Maps the processor's status string; unknown values are treated as incomplete.
    pub fn from_processor(status: &str) -> Self {
        match status {
            "active" => SubscriptionStatus::Active,
            "trialing" => SubscriptionStatus::Trialing,
            "past_due" => SubscriptionStatus::PastDue,
            "canceled" | "cancelled" | "incomplete_expired" => SubscriptionStatus::Canceled,
            "unpaid" => SubscriptionStatus::Unpaid,
            _ => SubscriptionStatus::Incomplete,
        }
    }
}

/// Period/status snapshot carried by `subscription.*` events.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionPeriod {
    pub status: SubscriptionStatus,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
}

impl Subscription {
    pub fn new(
        user_id: Uuid,
        influencer_id: Uuid,
        plan_id: Uuid,
        external_subscription_id: String,
        period: SubscriptionPeriod,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            influencer_id,
            plan_id,
            external_subscription_id,
            status: period.status,
            current_period_start: period.current_period_start,
            current_period_end: period.current_period_end,
            cancel_at_period_end: period.cancel_at_period_end,
            created_at: now,
            updated_at: now,
        }
    }
}
