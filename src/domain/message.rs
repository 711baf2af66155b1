use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Sender {
    User,
    Influencer,
    System,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    Audio,
}

/// Message body, decoded once from the stored `(message_type, content)` pair.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    Text(String),
    Image { text: Option<String>, media: String },
    Audio { text: Option<String>, media: String },
}

#[derive(Serialize, Deserialize)]
struct MediaEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    audio: Option<String>,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        MessageContent::Text(text.into())
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            MessageContent::Text(_) => MessageType::Text,
            MessageContent::Image { .. } => MessageType::Image,
            MessageContent::Audio { .. } => MessageType::Audio,
        }
    }

    /// Storage/wire encoding of the body. Media with a caption is stored as
    /// `{"text": .., "image"|"audio": ..}`; bare media as the raw payload.
    pub fn encode(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Image { text: None, media } | MessageContent::Audio { text: None, media } => {
                media.clone()
            }
            MessageContent::Image { text: Some(text), media } => encode_envelope(MediaEnvelope {
                text: Some(text.clone()),
                image: Some(media.clone()),
                audio: None,
            }),
            MessageContent::Audio { text: Some(text), media } => encode_envelope(MediaEnvelope {
                text: Some(text.clone()),
                image: None,
                audio: Some(media.clone()),
            }),
        }
    }

    /// Inverse of [`MessageContent::encode`], driven by the stored type tag.
    pub fn decode(message_type: MessageType, raw: &str) -> Self {
        match message_type {
            MessageType::Text => MessageContent::Text(raw.to_string()),
            MessageType::Image => {
                let (text, media) = decode_media(raw, |env| env.image.take());
                MessageContent::Image { text, media }
            }
            MessageType::Audio => {
                let (text, media) = decode_media(raw, |env| env.audio.take());
                MessageContent::Audio { text, media }
            }
        }
    }

    /// Text forwarded to the inference service. Media payloads never leave here.
    pub fn context_text(&self) -> Option<&str> {
        let text = match self {
            MessageContent::Text(text) => Some(text.as_str()),
            MessageContent::Image { text, .. } | MessageContent::Audio { text, .. } => text.as_deref(),
        };
        text.map(str::trim).filter(|t| !t.is_empty())
    }
}

fn encode_envelope(envelope: MediaEnvelope) -> String {
    // Serializing a struct of optional strings cannot fail.
    serde_json::to_string(&envelope).unwrap_or_default()
}

fn decode_media(raw: &str, pick: impl FnOnce(&mut MediaEnvelope) -> Option<String>) -> (Option<String>, String) {
    if raw.trim_start().starts_with('{') {
        if let Ok(mut envelope) = serde_json::from_str::<MediaEnvelope>(raw) {
            if let Some(media) = pick(&mut envelope) {
                return (envelope.text.filter(|t| !t.is_empty()), media);
            }
        }
    }
    (None, raw.to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "ChatMessageWire", from = "ChatMessageWire")]
pub struct ChatMessage {
    pub id: Uuid,
    /// `None` until the message has been persisted.
    pub conversation_id: Option<Uuid>,
    pub user_id: Uuid,
    pub influencer_id: Uuid,
    pub sender: Sender,
    pub content: MessageContent,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    /// Set on optimistic and fast-path messages until a save confirms them.
    pub provisional: bool,
}

impl ChatMessage {
    pub fn new(
        conversation_id: Option<Uuid>,
        user_id: Uuid,
        influencer_id: Uuid,
        sender: Sender,
        content: MessageContent,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            user_id,
            influencer_id,
            sender,
            content,
            created_at: Utc::now(),
            read_at: None,
            provisional: false,
        }
    }

    pub fn provisional(user_id: Uuid, influencer_id: Uuid, sender: Sender, content: MessageContent) -> Self {
        Self {
            provisional: true,
            ..Self::new(None, user_id, influencer_id, sender, content)
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.content.message_type()
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatMessageWire {
    id: Uuid,
    #[serde(default)]
    conversation_id: Option<Uuid>,
    user_id: Uuid,
    influencer_id: Uuid,
    sender: Sender,
    content: String,
    #[serde(rename = "type")]
    message_type: MessageType,
    created_at: DateTime<Utc>,
    #[serde(default)]
    read_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    provisional: bool,
}

impl From<ChatMessage> for ChatMessageWire {
    fn from(msg: ChatMessage) -> Self {
        Self {
            id: msg.id,
            conversation_id: msg.conversation_id,
            user_id: msg.user_id,
            influencer_id: msg.influencer_id,
            sender: msg.sender,
            content: msg.content.encode(),
            message_type: msg.content.message_type(),
            created_at: msg.created_at,
            read_at: msg.read_at,
            provisional: msg.provisional,
        }
    }
}

impl From<ChatMessageWire> for ChatMessage {
    fn from(wire: ChatMessageWire) -> Self {
        Self {
            id: wire.id,
            conversation_id: wire.conversation_id,
            user_id: wire.user_id,
            influencer_id: wire.influencer_id,
            sender: wire.sender,
            content: MessageContent::decode(wire.message_type, &wire.content),
            created_at: wire.created_at,
            read_at: wire.read_at,
            provisional: wire.provisional,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captioned_image_flattens_to_caption_only() {
        let raw = r#"{"text":"look at this","image":"data:image/png;base64,iVBORw0KGgo="}"#;
        let content = MessageContent::decode(MessageType::Image, raw);

        assert_eq!(content.context_text(), Some("look at this"));
        assert_eq!(
            content,
            MessageContent::Image {
                text: Some("look at this".to_string()),
                media: "data:image/png;base64,iVBORw0KGgo=".to_string(),
            }
        );
    }

    #[test]
    fn bare_media_has_no_context_text() {
        let content = MessageContent::decode(MessageType::Audio, "https://cdn.example.com/a.mp3");
        assert_eq!(content.context_text(), None);
        assert_eq!(content.encode(), "https://cdn.example.com/a.mp3");
    }

    #[test]
    fn text_type_is_never_parsed_as_json() {
        let raw = r#"{"text":"not media"}"#;
        let content = MessageContent::decode(MessageType::Text, raw);
        assert_eq!(content, MessageContent::Text(raw.to_string()));
    }

    #[test]
    fn blank_text_is_dropped_from_context() {
        assert_eq!(MessageContent::text("   ").context_text(), None);
    }

    #[test]
    fn wire_format_uses_type_tag_and_encoded_content() {
        let msg = ChatMessage::new(
            Some(Uuid::new_v4()),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Sender::Influencer,
            MessageContent::Audio {
                text: Some("hey".to_string()),
                media: "https://cdn.example.com/v.mp3".to_string(),
            },
        );

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "audio");
        assert_eq!(json["sender"], "influencer");
        assert!(json["content"].as_str().unwrap().contains("\"audio\""));
        assert!(json.get("provisional").is_none());

        let back: ChatMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }
}
