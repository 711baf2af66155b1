use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Inference request failed: {0}")]
    RequestFailed(String),
    #[error("Inference request timed out")]
    Timeout,
    #[error("Inference service returned status {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("Invalid inference response: {0}")]
    InvalidResponse(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Role/text pair in the history window, serialized as a two-element array.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryTurn(pub &'static str, pub String);

pub const ROLE_USER: &str = "user";
pub const ROLE_ASSISTANT: &str = "assistant";

#[derive(Debug, Clone, Serialize)]
pub struct InferenceRequest {
    pub user_id: String,
    pub creator_id: String,
    pub influencer_name: String,
    pub influencer_personality_prompt: String,
    pub chat_history: Vec<HistoryTurn>,
    pub msgs_cnt_by_user: i64,
    pub msgs_cnt_total: i64,
    pub input_media_type: String,
    pub user_query: String,
    pub should_generate_tts: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i32>,
}

/// Normalized reply. `audio` is either a URL or a `data:` URI.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceReply {
    pub text: String,
    pub audio: Option<String>,
}

#[async_trait]
pub trait InferenceService: Send + Sync {
    async fn generate(&self, request: &InferenceRequest) -> Result<InferenceReply, InferenceError>;
}

#[derive(Debug, Deserialize)]
struct InferencePayload {
    response: String,
    #[serde(default)]
    audio_output_url: Option<String>,
    #[serde(default)]
    audio_base64: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EnvelopeBody {
    Payload(InferencePayload),
    Encoded(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawInferenceResponse {
    Enveloped {
        #[serde(rename = "statusCode")]
        status_code: u16,
        body: EnvelopeBody,
    },
    Direct(InferencePayload),
}

/// Collapse the direct and `{statusCode, body}` response shapes into one reply.
pub fn normalize_response(raw: serde_json::Value) -> Result<InferenceReply, InferenceError> {
    let parsed: RawInferenceResponse = serde_json::from_value(raw)
        .map_err(|e| InferenceError::InvalidResponse(e.to_string()))?;

    let payload = match parsed {
        RawInferenceResponse::Direct(payload) => payload,
        RawInferenceResponse::Enveloped { status_code, body } => {
            if status_code >= 400 {
                let message = match body {
                    EnvelopeBody::Encoded(text) => text,
                    EnvelopeBody::Payload(payload) => payload.response,
                };
                return Err(InferenceError::Upstream {
                    status: status_code,
                    message,
                });
            }
            match body {
                EnvelopeBody::Payload(payload) => payload,
                EnvelopeBody::Encoded(text) => serde_json::from_str(&text)
                    .map_err(|e| InferenceError::InvalidResponse(e.to_string()))?,
            }
        }
    };

    let text = payload.response.trim().to_string();
    if text.is_empty() {
        return Err(InferenceError::InvalidResponse("Empty response text".to_string()));
    }

    let audio = payload
        .audio_output_url
        .filter(|url| !url.trim().is_empty())
        .or_else(|| payload.audio_base64.and_then(|b64| audio_data_uri(&b64)));

    Ok(InferenceReply { text, audio })
}

fn audio_data_uri(b64: &str) -> Option<String> {
    let trimmed = b64.trim();
    if trimmed.is_empty() || BASE64.decode(trimmed).is_err() {
        return None;
    }
    Some(format!("data:audio/mpeg;base64,{}", trimmed))
}

pub struct InferenceClient {
    client: Client,
    endpoint: String,
}

impl InferenceClient {
    pub fn new(endpoint: String) -> Result<Self, InferenceError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        // The per-call deadline is applied by the caller; this only caps runaway sockets.
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| {
                InferenceError::InvalidConfig(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl InferenceService for InferenceClient {
    async fn generate(&self, request: &InferenceRequest) -> Result<InferenceReply, InferenceError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout
                } else {
                    InferenceError::RequestFailed(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(InferenceError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let json_response: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| InferenceError::InvalidResponse(e.to_string()))?;

        normalize_response(json_response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn direct_shape_is_accepted() {
        let reply = normalize_response(json!({ "response": "  hi there " })).unwrap();
        assert_eq!(reply.text, "hi there");
        assert!(reply.audio.is_none());
    }

    #[test]
    fn enveloped_string_body_is_decoded() {
        let reply = normalize_response(json!({
            "statusCode": 200,
            "body": "{\"response\":\"hello\",\"audio_output_url\":\"https://cdn.example.com/r.mp3\"}"
        }))
        .unwrap();
        assert_eq!(reply.text, "hello");
        assert_eq!(reply.audio.as_deref(), Some("https://cdn.example.com/r.mp3"));
    }

    #[test]
    fn enveloped_error_status_is_upstream_error() {
        let err = normalize_response(json!({ "statusCode": 500, "body": "boom" })).unwrap_err();
        assert!(matches!(err, InferenceError::Upstream { status: 500, .. }));
    }

    #[test]
    fn base64_audio_becomes_data_uri_and_garbage_is_dropped() {
        let reply = normalize_response(json!({ "response": "x", "audio_base64": "aGVsbG8=" })).unwrap();
        assert_eq!(reply.audio.as_deref(), Some("data:audio/mpeg;base64,aGVsbG8="));

        let reply = normalize_response(json!({ "response": "x", "audio_base64": "not base64!!" })).unwrap();
        assert!(reply.audio.is_none());
    }

    #[test]
    fn empty_text_is_invalid() {
        assert!(matches!(
            normalize_response(json!({ "response": "   " })),
            Err(InferenceError::InvalidResponse(_))
        ));
    }

    #[test]
    fn history_serializes_as_pairs() {
        let turn = HistoryTurn(ROLE_USER, "hey".to_string());
        assert_eq!(serde_json::to_value(&turn).unwrap(), json!(["user", "hey"]));
    }
}
