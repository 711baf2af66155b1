use crate::domain::{ChatMessage, Conversation, Influencer, MessageContent, Sender, User};
use crate::infrastructure::{
    AuthUser, ChatSettings, ConversationRepository, HistoryTurn, InferenceError, InferenceReply,
    InferenceRequest, InferenceService, InfluencerRepository, MessageRepository, RepositoryError,
    UserRepository, ROLE_ASSISTANT, ROLE_USER,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

const FALLBACK_ECHO_CHARS: usize = 120;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Not enough tokens: balance is {balance}")]
    PaymentRequired { balance: i32 },
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
    #[error("Inference service unavailable: {0}")]
    UpstreamUnavailable(InferenceError),
    #[error("Internal error: {0}")]
    Internal(#[from] RepositoryError),
}

/// What the user sent: text, optionally with an image attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageInput {
    pub text: String,
    pub image: Option<String>,
    pub wants_audio: bool,
}

impl MessageInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image: None,
            wants_audio: false,
        }
    }

    fn into_content(self) -> Result<MessageContent, ChatError> {
        let text = self.text.trim().to_string();
        match self.image.filter(|img| !img.trim().is_empty()) {
            Some(media) => Ok(MessageContent::Image {
                text: Some(text).filter(|t| !t.is_empty()),
                media,
            }),
            None if text.is_empty() => {
                Err(ChatError::ValidationFailed("Message content is empty".to_string()))
            }
            None => Ok(MessageContent::Text(text)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub user_message: ChatMessage,
    pub ai_message: ChatMessage,
    /// Balance after the debit; `None` when the debit did not go through.
    pub tokens_remaining: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct ConversationThread {
    pub conversation: Conversation,
    pub messages: Vec<ChatMessage>,
}

pub struct ChatService<U, C, M, I, N>
where
    U: UserRepository,
    C: ConversationRepository,
    M: MessageRepository,
    I: InfluencerRepository,
    N: InferenceService,
{
    user_repo: Arc<U>,
    conversation_repo: Arc<C>,
    message_repo: Arc<M>,
    influencer_repo: Arc<I>,
    inference: Arc<N>,
    settings: ChatSettings,
}

impl<U, C, M, I, N> ChatService<U, C, M, I, N>
where
    U: UserRepository,
    C: ConversationRepository,
    M: MessageRepository,
    I: InfluencerRepository,
    N: InferenceService,
{
    pub fn new(
        user_repo: Arc<U>,
        conversation_repo: Arc<C>,
        message_repo: Arc<M>,
        influencer_repo: Arc<I>,
        inference: Arc<N>,
        settings: ChatSettings,
    ) -> Self {
        Self {
            user_repo,
            conversation_repo,
            message_repo,
            influencer_repo,
            inference,
            settings,
        }
    }

    /// Durable send: the user message is stored before the reply is generated,
    /// the reply is stored, then one message worth of tokens is debited.
    pub async fn send_message(
        &self,
        user: &AuthUser,
        influencer_id: Uuid,
        input: MessageInput,
    ) -> Result<SendOutcome, ChatError> {
        let wants_audio = input.wants_audio;
        let content = input.into_content()?;
        let influencer = self.load_influencer(influencer_id).await?;

        let conversation = self.resolve_conversation(user, influencer_id).await?;
        if !conversation.can_afford(self.settings.tokens_per_message) {
            return Err(ChatError::PaymentRequired {
                balance: conversation.tokens,
            });
        }

        let user_message = ChatMessage::new(
            Some(conversation.id),
            user.id,
            influencer_id,
            Sender::User,
            content,
        );
        self.message_repo.insert(&user_message).await?;

        // One extra row: the message just stored is not part of its own history.
        let recent = self
            .message_repo
            .list_recent(conversation.id, self.settings.history_window + 1, 0)
            .await?;
        let user_count = self
            .message_repo
            .count_by_sender(conversation.id, Sender::User)
            .await?;
        let total_count = self.message_repo.count(conversation.id).await?;

        let request = build_request(
            user.id,
            &influencer,
            &recent,
            &user_message,
            user_count,
            total_count,
            wants_audio,
        );
        let reply = self
            .generate_with_fallback(&request, &influencer, &user_message, self.settings.durable_timeout)
            .await?;

        let ai_message = ChatMessage::new(
            Some(conversation.id),
            user.id,
            influencer_id,
            Sender::Influencer,
            reply_content(reply, wants_audio),
        );
        self.message_repo.insert(&ai_message).await?;

        let tokens_remaining = self.debit(&conversation).await;

        info!(
            conversation_id = %conversation.id,
            user_message_id = %user_message.id,
            ai_message_id = %ai_message.id,
            "Chat turn persisted"
        );

        Ok(SendOutcome {
            user_message,
            ai_message,
            tokens_remaining,
        })
    }

    /// Fast send: generates the reply from already-stored context and returns
    /// provisional messages without writing anything. `save_fast_messages`
    /// persists them afterwards.
    pub async fn send_message_fast(
        &self,
        user: &AuthUser,
        influencer_id: Uuid,
        input: MessageInput,
    ) -> Result<(ChatMessage, ChatMessage), ChatError> {
        let wants_audio = input.wants_audio;
        let content = input.into_content()?;
        let influencer = self.load_influencer(influencer_id).await?;

        let conversation = self.conversation_repo.find(user.id, influencer_id).await?;
        let (recent, user_count, total_count) = match &conversation {
            Some(conversation) => {
                if !conversation.can_afford(self.settings.tokens_per_message) {
                    return Err(ChatError::PaymentRequired {
                        balance: conversation.tokens,
                    });
                }
                let recent = self
                    .message_repo
                    .list_recent(conversation.id, self.settings.history_window, 0)
                    .await?;
                let user_count = self
                    .message_repo
                    .count_by_sender(conversation.id, Sender::User)
                    .await?;
                let total_count = self.message_repo.count(conversation.id).await?;
                (recent, user_count, total_count)
            }
            None if self.settings.starting_tokens < self.settings.tokens_per_message => {
                return Err(ChatError::PaymentRequired {
                    balance: self.settings.starting_tokens,
                });
            }
            None => (Vec::new(), 0, 0),
        };

        let user_message = ChatMessage::provisional(user.id, influencer_id, Sender::User, content);

        // Counters include the pending user message, as they would after a durable insert.
        let request = build_request(
            user.id,
            &influencer,
            &recent,
            &user_message,
            user_count + 1,
            total_count + 1,
            wants_audio,
        );
        let reply = self
            .generate_with_fallback(&request, &influencer, &user_message, self.settings.fast_timeout)
            .await?;

        let ai_message = ChatMessage::provisional(
            user.id,
            influencer_id,
            Sender::Influencer,
            reply_content(reply, wants_audio),
        );

        Ok((user_message, ai_message))
    }

    /// Persist a fast-path pair. The charge is tied to the reply row: nothing
    /// is stored without a successful debit, and a pair whose reply is already
    /// stored is never charged again.
    pub async fn save_fast_messages(
        &self,
        user: &AuthUser,
        influencer_id: Uuid,
        user_message: ChatMessage,
        ai_message: ChatMessage,
    ) -> Result<SendOutcome, ChatError> {
        check_owned(&user_message, user.id, influencer_id, Sender::User)?;
        check_owned(&ai_message, user.id, influencer_id, Sender::Influencer)?;
        self.load_influencer(influencer_id).await?;

        let conversation = self.resolve_conversation(user, influencer_id).await?;

        let user_message = ChatMessage {
            conversation_id: Some(conversation.id),
            provisional: false,
            ..user_message
        };
        let ai_message = ChatMessage {
            conversation_id: Some(conversation.id),
            provisional: false,
            ..ai_message
        };

        if self.message_repo.exists(ai_message.id).await? {
            info!(
                conversation_id = %conversation.id,
                ai_message_id = %ai_message.id,
                "Fast-path pair already saved, skipping debit"
            );
            return Ok(SendOutcome {
                user_message,
                ai_message,
                tokens_remaining: Some(conversation.tokens),
            });
        }

        let Some(balance) = self
            .conversation_repo
            .try_debit(conversation.id, self.settings.tokens_per_message)
            .await?
        else {
            return Err(ChatError::PaymentRequired {
                balance: conversation.tokens,
            });
        };

        // The user row may already exist from an earlier attempt whose reply insert failed.
        let stored = match self.message_repo.insert(&user_message).await {
            Ok(_) => self.message_repo.insert(&ai_message).await,
            Err(e) => Err(e),
        };
        let tokens_remaining = match stored {
            Ok(true) => Some(balance),
            Ok(false) => {
                // A concurrent save of the same pair stored the reply first.
                self.refund(&conversation).await
            }
            Err(e) => {
                self.refund(&conversation).await;
                return Err(e.into());
            }
        };

        Ok(SendOutcome {
            user_message,
            ai_message,
            tokens_remaining,
        })
    }

    /// Chronological page counted back from the newest message.
    pub async fn list_messages(
        &self,
        user: &AuthUser,
        influencer_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        match self.conversation_repo.find(user.id, influencer_id).await? {
            Some(conversation) => Ok(self
                .message_repo
                .list_recent(conversation.id, limit, offset)
                .await?),
            None => Ok(Vec::new()),
        }
    }

    /// Create the conversation if needed and seed it with the persona's welcome message.
    pub async fn initialize_conversation(
        &self,
        user: &AuthUser,
        influencer_id: Uuid,
    ) -> Result<ConversationThread, ChatError> {
        let influencer = self.load_influencer(influencer_id).await?;
        let conversation = self.resolve_conversation(user, influencer_id).await?;

        if self.message_repo.count(conversation.id).await? == 0 {
            // The welcome message reuses the conversation id so concurrent
            // init calls insert it only once.
            let welcome = ChatMessage {
                id: conversation.id,
                ..ChatMessage::new(
                    Some(conversation.id),
                    user.id,
                    influencer_id,
                    Sender::Influencer,
                    MessageContent::Text(influencer.welcome_text()),
                )
            };
            if self.message_repo.insert(&welcome).await? {
                info!(conversation_id = %conversation.id, "Conversation initialized");
            }
        }

        let messages = self
            .message_repo
            .list_recent(conversation.id, self.settings.history_window, 0)
            .await?;

        Ok(ConversationThread {
            conversation,
            messages,
        })
    }

    async fn load_influencer(&self, influencer_id: Uuid) -> Result<Influencer, ChatError> {
        match self.influencer_repo.get_by_id(influencer_id).await {
            Ok(influencer) if influencer.is_active => Ok(influencer),
            Ok(_) | Err(RepositoryError::NotFound(_)) => Err(ChatError::ValidationFailed(format!(
                "Unknown influencer {}",
                influencer_id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn resolve_conversation(
        &self,
        user: &AuthUser,
        influencer_id: Uuid,
    ) -> Result<Conversation, ChatError> {
        if let Some(conversation) = self.conversation_repo.find(user.id, influencer_id).await? {
            return Ok(conversation);
        }

        // Users created outside the signup endpoint may not have a profile row yet.
        let profile = User::new(user.id, user.email.clone().unwrap_or_default(), None, None);
        self.user_repo.ensure(&profile).await?;

        let conversation = self
            .conversation_repo
            .get_or_create(&Conversation::new(
                user.id,
                influencer_id,
                self.settings.starting_tokens,
            ))
            .await?;
        info!(
            conversation_id = %conversation.id,
            user_id = %user.id,
            tokens = conversation.tokens,
            "Created conversation"
        );
        Ok(conversation)
    }

    /// Best-effort: failures are logged, never surfaced, since the reply was already produced.
    async fn debit(&self, conversation: &Conversation) -> Option<i32> {
        match self
            .conversation_repo
            .try_debit(conversation.id, self.settings.tokens_per_message)
            .await
        {
            Ok(Some(balance)) => Some(balance),
            Ok(None) => {
                warn!(
                    conversation_id = %conversation.id,
                    "Token balance exhausted by a concurrent send, debit skipped"
                );
                None
            }
            Err(e) => {
                error!(conversation_id = %conversation.id, error = %e, "Token debit failed");
                None
            }
        }
    }

    async fn refund(&self, conversation: &Conversation) -> Option<i32> {
        match self
            .conversation_repo
            .credit(conversation.id, self.settings.tokens_per_message)
            .await
        {
            Ok(balance) => Some(balance),
            Err(e) => {
                error!(conversation_id = %conversation.id, error = %e, "Token refund failed");
                None
            }
        }
    }

    async fn generate_with_fallback(
        &self,
        request: &InferenceRequest,
        influencer: &Influencer,
        user_message: &ChatMessage,
        deadline: Duration,
    ) -> Result<InferenceReply, ChatError> {
        let failure = match tokio::time::timeout(deadline, self.inference.generate(request)).await {
            Ok(Ok(reply)) => return Ok(reply),
            Ok(Err(e)) => e,
            Err(_) => InferenceError::Timeout,
        };

        if !self.settings.fallback_enabled {
            error!(error = %failure, "Inference failed and fallback is disabled");
            return Err(ChatError::UpstreamUnavailable(failure));
        }

        warn!(
            error = %failure,
            user_message_id = %user_message.id,
            "Inference failed, using fallback reply"
        );
        Ok(InferenceReply {
            text: fallback_reply(
                &influencer.display_name,
                user_message.content.context_text().unwrap_or_default(),
            ),
            audio: None,
        })
    }
}

fn check_owned(
    message: &ChatMessage,
    user_id: Uuid,
    influencer_id: Uuid,
    sender: Sender,
) -> Result<(), ChatError> {
    if message.user_id != user_id || message.influencer_id != influencer_id || message.sender != sender {
        return Err(ChatError::ValidationFailed(format!(
            "Message {} does not belong to this conversation",
            message.id
        )));
    }
    Ok(())
}

fn build_request(
    user_id: Uuid,
    influencer: &Influencer,
    recent: &[ChatMessage],
    user_message: &ChatMessage,
    user_count: i64,
    total_count: i64,
    wants_audio: bool,
) -> InferenceRequest {
    InferenceRequest {
        user_id: user_id.to_string(),
        creator_id: influencer.id.to_string(),
        influencer_name: influencer.display_name.clone(),
        influencer_personality_prompt: influencer.system_prompt.clone(),
        chat_history: history_window(recent, user_message.id),
        msgs_cnt_by_user: user_count,
        msgs_cnt_total: total_count,
        input_media_type: user_message.message_type().to_string(),
        user_query: user_message
            .content
            .context_text()
            .unwrap_or_default()
            .to_string(),
        should_generate_tts: wants_audio,
        temperature: Some(influencer.model_preset.temperature),
        max_tokens: Some(influencer.model_preset.max_tokens),
    }
}

/// Text-only history, excluding the message being answered.
pub fn history_window(recent: &[ChatMessage], current_id: Uuid) -> Vec<HistoryTurn> {
    recent
        .iter()
        .filter(|m| m.id != current_id && m.sender != Sender::System)
        .filter_map(|m| {
            let role = match m.sender {
                Sender::User => ROLE_USER,
                _ => ROLE_ASSISTANT,
            };
            m.content
                .context_text()
                .map(|text| HistoryTurn(role, text.to_string()))
        })
        .collect()
}

fn reply_content(reply: InferenceReply, wants_audio: bool) -> MessageContent {
    match reply.audio {
        Some(media) if wants_audio => MessageContent::Audio {
            text: Some(reply.text),
            media,
        },
        _ => MessageContent::Text(reply.text),
    }
}

/// Deterministic stand-in reply that echoes what the user said.
pub fn fallback_reply(persona_name: &str, user_text: &str) -> String {
    let trimmed = user_text.trim();
    if trimmed.is_empty() {
        return format!(
            "{} here! I love that you shared this with me. Tell me more?",
            persona_name
        );
    }

    let echo: String = trimmed.chars().take(FALLBACK_ECHO_CHARS).collect();
    let ellipsis = if trimmed.chars().count() > FALLBACK_ECHO_CHARS { "..." } else { "" };
    format!(
        "You said \"{}{}\" and I can't stop thinking about it. Tell me more?",
        echo, ellipsis
    )
}
