use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    pub price_cents: i64,
    pub currency: String,
    pub interval: BillingInterval,
    pub features: Vec<String>,
    pub access_level: AccessLevel,
    pub stripe_price_id: Option<String>,
    pub stripe_product_id: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BillingInterval {
    Month,
    Year,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AccessLevel {
    Basic,
    Premium,
    Vip,
}

impl AccessLevel {
    /// Tokens credited to the conversation for each paid billing period.
    pub fn token_grant(&self) -> i32 {
        match self {
            AccessLevel::Basic => 500,
            AccessLevel::Premium => 2000,
            AccessLevel::Vip => 10000,
        }
    }
}

impl Plan {
    pub fn token_grant(&self) -> i32 {
        self.access_level.token_grant()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn higher_tiers_grant_more_tokens() {
        assert!(AccessLevel::Basic.token_grant() < AccessLevel::Premium.token_grant());
        assert!(AccessLevel::Premium.token_grant() < AccessLevel::Vip.token_grant());
    }

    #[test]
    fn access_level_round_trips_through_column_text() {
        assert_eq!(AccessLevel::Vip.to_string(), "vip");
        assert_eq!(AccessLevel::from_str("premium").unwrap(), AccessLevel::Premium);
        assert!(AccessLevel::from_str("gold").is_err());
    }
}
