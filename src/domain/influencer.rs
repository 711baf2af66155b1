use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The persona a deployment chats as. Seeded by setup scripts, read-only at runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Influencer {
    pub id: Uuid,
    pub display_name: String,
    pub bio: Option<String>,
    pub system_prompt: String,
    pub model_preset: ModelPreset,
    pub welcome_message: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ModelPreset {
    pub temperature: f32,
    pub max_tokens: i32,
}

impl Default for ModelPreset {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            max_tokens: 512,
        }
    }
}

impl Influencer {
    /// First message of a fresh conversation.
    pub fn welcome_text(&self) -> String {
        match self.welcome_message.as_deref().map(str::trim) {
            Some(msg) if !msg.is_empty() => msg.to_string(),
            _ => format!("Hey, it's {}! So glad you're here. What's on your mind?", self.display_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persona(welcome: Option<&str>) -> Influencer {
        Influencer {
            id: Uuid::new_v4(),
            display_name: "Luna".to_string(),
            bio: None,
            system_prompt: "You are Luna.".to_string(),
            model_preset: ModelPreset::default(),
            welcome_message: welcome.map(str::to_string),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn welcome_text_prefers_configured_message() {
        assert_eq!(persona(Some("hi babe")).welcome_text(), "hi babe");
    }

    #[test]
    fn welcome_text_ignores_blank_message() {
        assert!(persona(Some("   ")).welcome_text().contains("Luna"));
        assert!(persona(None).welcome_text().contains("Luna"));
    }
}
