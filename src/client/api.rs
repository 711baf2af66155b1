use crate::domain::ChatMessage;
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Not signed in")]
    Unauthenticated,
    #[error("Out of tokens")]
    PaymentRequired,
    #[error("Server returned {status}: {message}")]
    Http { status: u16, message: String },
    #[error("Save rejected: {0}")]
    SaveRejected(String),
    #[error("Transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub influencer_id: Uuid,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub wants_audio: bool,
}

impl SendRequest {
    pub fn text(influencer_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            influencer_id,
            content: content.into(),
            image: None,
            wants_audio: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePair {
    pub user_message: ChatMessage,
    pub ai_message: ChatMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    user_message: Option<ChatMessage>,
    #[serde(default)]
    ai_message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    messages: Vec<ChatMessage>,
}

/// Backend calls the chat UI makes. Every list is returned oldest-first.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn list_messages(
        &self,
        influencer_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ChatMessage>, ClientError>;
    async fn init_conversation(&self, influencer_id: Uuid) -> Result<Vec<ChatMessage>, ClientError>;
    async fn send_message(&self, request: &SendRequest) -> Result<MessagePair, ClientError>;
    async fn send_message_fast(&self, request: &SendRequest) -> Result<MessagePair, ClientError>;
    async fn save_messages(&self, influencer_id: Uuid, pair: &MessagePair) -> Result<MessagePair, ClientError>;
}

/// Holds the bearer token for the signed-in user.
#[derive(Debug, Default)]
pub struct SessionClient {
    token: RwLock<Option<String>>,
}

impl SessionClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_token(&self, token: String) {
        if let Ok(mut guard) = self.token.write() {
            *guard = Some(token);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.token.write() {
            *guard = None;
        }
    }

    pub fn bearer(&self) -> Result<String, ClientError> {
        self.token
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or(ClientError::Unauthenticated)
    }
}

pub struct HttpChatApi {
    client: Client,
    base_url: String,
    session: SessionClient,
}

impl HttpChatApi {
    pub fn new(base_url: String) -> Result<Self, ClientError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ClientError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session: SessionClient::new(),
        })
    }

    pub fn session(&self) -> &SessionClient {
        &self.session
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<(), ClientError> {
        #[derive(Deserialize)]
        struct LoginResponse {
            access_token: String,
        }

        let resp = self
            .client
            .post(format!("{}/auth/login", self.base_url))
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(transport)?;
        let body: LoginResponse = check(resp).await?.json().await.map_err(transport)?;
        self.session.set_token(body.access_token);
        Ok(())
    }

    pub async fn logout(&self) -> Result<(), ClientError> {
        let token = self.session.bearer()?;
        self.session.clear();
        let resp = self
            .client
            .post(format!("{}/auth/logout", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport)?;
        check(resp).await?;
        Ok(())
    }

    async fn post_pair(&self, path: &str, request: &SendRequest) -> Result<MessagePair, ClientError> {
        let resp = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(self.session.bearer()?)
            .json(request)
            .send()
            .await
            .map_err(transport)?;
        check(resp).await?.json().await.map_err(transport)
    }
}

fn transport(e: reqwest::Error) -> ClientError {
    ClientError::Transport(e.to_string())
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    match resp.status() {
        s if s.is_success() => Ok(resp),
        StatusCode::UNAUTHORIZED => Err(ClientError::Unauthenticated),
        StatusCode::PAYMENT_REQUIRED => Err(ClientError::PaymentRequired),
        s => {
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            Err(ClientError::Http {
                status: s.as_u16(),
                message: body
                    .get("error")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Request failed")
                    .to_string(),
            })
        }
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn list_messages(
        &self,
        influencer_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ChatMessage>, ClientError> {
        let resp = self
            .client
            .get(format!("{}/messages", self.base_url))
            .bearer_auth(self.session.bearer()?)
            .query(&[
                ("influencerId", influencer_id.to_string()),
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
            ])
            .send()
            .await
            .map_err(transport)?;
        let body: MessagesResponse = check(resp).await?.json().await.map_err(transport)?;
        Ok(body.messages)
    }

    async fn init_conversation(&self, influencer_id: Uuid) -> Result<Vec<ChatMessage>, ClientError> {
        let resp = self
            .client
            .post(format!("{}/conversations/init", self.base_url))
            .bearer_auth(self.session.bearer()?)
            .json(&serde_json::json!({ "influencerId": influencer_id }))
            .send()
            .await
            .map_err(transport)?;
        let body: MessagesResponse = check(resp).await?.json().await.map_err(transport)?;
        Ok(body.messages)
    }

    async fn send_message(&self, request: &SendRequest) -> Result<MessagePair, ClientError> {
        self.post_pair("/messages", request).await
    }

    async fn send_message_fast(&self, request: &SendRequest) -> Result<MessagePair, ClientError> {
        self.post_pair("/messages/fast", request).await
    }

    async fn save_messages(&self, influencer_id: Uuid, pair: &MessagePair) -> Result<MessagePair, ClientError> {
        let resp = self
            .client
            .post(format!("{}/messages/save", self.base_url))
            .bearer_auth(self.session.bearer()?)
            .json(&serde_json::json!({
                "influencerId": influencer_id,
                "userMessage": pair.user_message,
                "aiMessage": pair.ai_message,
            }))
            .send()
            .await
            .map_err(transport)?;
        let body: SaveResponse = check(resp).await?.json().await.map_err(transport)?;

        match (body.success, body.user_message, body.ai_message) {
            (true, Some(user_message), Some(ai_message)) => Ok(MessagePair {
                user_message,
                ai_message,
            }),
            (true, _, _) => Ok(pair.clone()),
            (false, _, _) => Err(ClientError::SaveRejected(
                body.error.unwrap_or_else(|| "Unknown error".to_string()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_requires_a_token() {
        let session = SessionClient::new();
        assert!(matches!(session.bearer(), Err(ClientError::Unauthenticated)));

        session.set_token("abc".to_string());
        assert_eq!(session.bearer().unwrap(), "abc");

        session.clear();
        assert!(session.bearer().is_err());
    }

    #[test]
    fn send_request_uses_camel_case() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(SendRequest::text(id, "hi")).unwrap();
        assert_eq!(json["influencerId"], id.to_string());
        assert_eq!(json["wantsAudio"], false);
        assert!(json.get("image").is_none());
    }
}
