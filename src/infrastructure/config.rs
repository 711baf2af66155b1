use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub cors_allowed_origin: Option<String>,

    // Hosted auth provider
    pub auth_url: String,
    pub auth_anon_key: String,

    // Inference service
    pub inference_url: String,
    pub inference_timeout_secs: u64,
    pub fast_inference_timeout_secs: u64,
    pub inference_fallback_enabled: bool,

    // Payment processor webhooks
    pub webhook_secret: String,
    pub webhook_tolerance_secs: i64,

    // Chat accounting
    pub influencer_id: Uuid,
    pub starting_tokens: i32,
    pub tokens_per_message: i32,
    pub history_window: i64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("PERSONA").try_parsing(true))
            .set_default("server_host", "0.0.0.0")?
            .set_default("server_port", 8080)?
            .set_default("inference_timeout_secs", 45)?
            .set_default("fast_inference_timeout_secs", 25)?
            .set_default("inference_fallback_enabled", true)?
            .set_default("webhook_tolerance_secs", 300)?
            .set_default("starting_tokens", 100)?
            .set_default("tokens_per_message", 1)?
            .set_default("history_window", 20)?
            .build()?;

        config.try_deserialize::<Self>()?.validate()
    }

    /// Reject settings that would switch off the token gate or break paging.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.tokens_per_message <= 0 {
            return Err(ConfigError::Message(format!(
                "tokens_per_message must be positive, got {}",
                self.tokens_per_message
            )));
        }
        if self.history_window <= 0 {
            return Err(ConfigError::Message(format!(
                "history_window must be positive, got {}",
                self.history_window
            )));
        }
        if self.starting_tokens < 0 {
            return Err(ConfigError::Message(format!(
                "starting_tokens cannot be negative, got {}",
                self.starting_tokens
            )));
        }
        Ok(self)
    }

    pub fn chat_settings(&self) -> ChatSettings {
        ChatSettings {
            starting_tokens: self.starting_tokens,
            tokens_per_message: self.tokens_per_message,
            history_window: self.history_window,
            durable_timeout: Duration::from_secs(self.inference_timeout_secs),
            fast_timeout: Duration::from_secs(self.fast_inference_timeout_secs),
            fallback_enabled: self.inference_fallback_enabled,
        }
    }
}

/// Knobs of the message-send flow, split out so services can be built without a full config.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub starting_tokens: i32,
    pub tokens_per_message: i32,
    pub history_window: i64,
    pub durable_timeout: Duration,
    pub fast_timeout: Duration,
    pub fallback_enabled: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            starting_tokens: 100,
            tokens_per_message: 1,
            history_window: 20,
            durable_timeout: Duration::from_secs(45),
            fast_timeout: Duration::from_secs(25),
            fallback_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AppConfig {
        AppConfig {
            database_url: "postgres://localhost/persona".to_string(),
            server_host: "0.0.0.0".to_string(),
            server_port: 8080,
            cors_allowed_origin: None,
            auth_url: "https://auth.example.com".to_string(),
            auth_anon_key: "anon".to_string(),
            inference_url: "https://inference.example.com".to_string(),
            inference_timeout_secs: 45,
            fast_inference_timeout_secs: 25,
            inference_fallback_enabled: true,
            webhook_secret: "whsec_test".to_string(),
            webhook_tolerance_secs: 300,
            influencer_id: Uuid::new_v4(),
            starting_tokens: 100,
            tokens_per_message: 1,
            history_window: 20,
        }
    }

    #[test]
    fn defaults_pass_validation() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn free_messages_are_rejected() {
        for cost in [0, -1] {
            let cfg = AppConfig {
                tokens_per_message: cost,
                ..config()
            };
            assert!(matches!(cfg.validate(), Err(ConfigError::Message(_))));
        }
    }

    #[test]
    fn non_positive_history_window_is_rejected() {
        let cfg = AppConfig {
            history_window: 0,
            ..config()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Message(_))));
    }
}
