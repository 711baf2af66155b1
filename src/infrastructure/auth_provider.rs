use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AuthProviderError {
    #[error("Invalid or expired credentials")]
    Unauthorized,
    #[error("Auth provider rejected request: {0}")]
    Rejected(String),
    #[error("Auth request failed: {0}")]
    RequestFailed(String),
    #[error("Invalid auth response: {0}")]
    InvalidResponse(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    pub user: AuthUser,
}

/// Signup result. `session` is absent when the provider requires email confirmation.
#[derive(Debug, Clone, PartialEq)]
pub struct SignUpOutcome {
    pub user: AuthUser,
    pub session: Option<AuthSession>,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn get_user(&self, access_token: &str) -> Result<AuthUser, AuthProviderError>;
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, AuthProviderError>;
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: serde_json::Value,
    ) -> Result<SignUpOutcome, AuthProviderError>;
    async fn sign_out(&self, access_token: &str) -> Result<(), AuthProviderError>;
}

/// HTTP adapter for the hosted auth service (GoTrue-style `/auth/v1` API).
pub struct HostedAuthClient {
    client: Client,
    base_url: String,
}

impl HostedAuthClient {
    pub fn new(base_url: String, anon_key: String) -> Result<Self, AuthProviderError> {
        let mut headers = header::HeaderMap::new();
        let key_value = header::HeaderValue::from_str(&anon_key).map_err(|e| {
            AuthProviderError::InvalidConfig(format!("Invalid anon key format: {}", e))
        })?;
        headers.insert("apikey", key_value);
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(15))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| {
                AuthProviderError::InvalidConfig(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, AuthProviderError> {
        match resp.status() {
            s if s.is_success() => Ok(resp),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AuthProviderError::Unauthorized),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                let body: serde_json::Value = resp.json().await.unwrap_or_default();
                let message = body
                    .get("error_description")
                    .or_else(|| body.get("msg"))
                    .or_else(|| body.get("message"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("Request rejected")
                    .to_string();
                if message.to_lowercase().contains("invalid login") {
                    Err(AuthProviderError::Unauthorized)
                } else {
                    Err(AuthProviderError::Rejected(message))
                }
            }
            s => Err(AuthProviderError::RequestFailed(format!(
                "Auth provider returned {}",
                s
            ))),
        }
    }
}

#[async_trait]
impl AuthProvider for HostedAuthClient {
    async fn get_user(&self, access_token: &str) -> Result<AuthUser, AuthProviderError> {
        let resp = self
            .client
            .get(format!("{}/auth/v1/user", self.base_url))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AuthProviderError::RequestFailed(e.to_string()))?;

        Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| AuthProviderError::InvalidResponse(e.to_string()))
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, AuthProviderError> {
        let resp = self
            .client
            .post(format!("{}/auth/v1/token?grant_type=password", self.base_url))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| AuthProviderError::RequestFailed(e.to_string()))?;

        Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| AuthProviderError::InvalidResponse(e.to_string()))
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: serde_json::Value,
    ) -> Result<SignUpOutcome, AuthProviderError> {
        let resp = self
            .client
            .post(format!("{}/auth/v1/signup", self.base_url))
            .json(&json!({ "email": email, "password": password, "data": metadata }))
            .send()
            .await
            .map_err(|e| AuthProviderError::RequestFailed(e.to_string()))?;

        let body: serde_json::Value = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| AuthProviderError::InvalidResponse(e.to_string()))?;

        parse_sign_up(body)
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthProviderError> {
        let resp = self
            .client
            .post(format!("{}/auth/v1/logout", self.base_url))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AuthProviderError::RequestFailed(e.to_string()))?;

        Self::check(resp).await?;
        Ok(())
    }
}

/// Signup answers with a full session, or with a bare user when confirmation is pending.
fn parse_sign_up(body: serde_json::Value) -> Result<SignUpOutcome, AuthProviderError> {
    if body.get("access_token").is_some() {
        let session: AuthSession = serde_json::from_value(body)
            .map_err(|e| AuthProviderError::InvalidResponse(e.to_string()))?;
        return Ok(SignUpOutcome {
            user: session.user.clone(),
            session: Some(session),
        });
    }

    let user_value = body.get("user").cloned().unwrap_or(body);
    let user: AuthUser = serde_json::from_value(user_value)
        .map_err(|e| AuthProviderError::InvalidResponse(e.to_string()))?;
    Ok(SignUpOutcome { user, session: None })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_up_with_session() {
        let id = Uuid::new_v4();
        let outcome = parse_sign_up(json!({
            "access_token": "tok",
            "refresh_token": "ref",
            "expires_in": 3600,
            "user": { "id": id, "email": "a@b.co" }
        }))
        .unwrap();

        assert_eq!(outcome.user.id, id);
        assert_eq!(outcome.session.unwrap().access_token, "tok");
    }

    #[test]
    fn sign_up_pending_confirmation_has_no_session() {
        let id = Uuid::new_v4();
        let outcome = parse_sign_up(json!({ "id": id, "email": "a@b.co" })).unwrap();
        assert_eq!(outcome.user.id, id);
        assert!(outcome.session.is_none());
    }
}
