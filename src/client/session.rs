use crate::client::{ChatApi, ClientError, MessagePair, SendRequest, ThreadCache};
use crate::domain::{ChatMessage, MessageContent, Sender};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Result of a fast send. `save` resolves once the background save settles.
pub struct FastSend {
    pub pair: MessagePair,
    pub save: JoinHandle<()>,
}

/// Send orchestration for one signed-in user chatting with one persona.
pub struct ChatSession<A: ChatApi + 'static> {
    api: Arc<A>,
    cache: Arc<ThreadCache<A>>,
    influencer_id: Uuid,
    user_id: Uuid,
    unsaved: Arc<Mutex<Vec<MessagePair>>>,
}

impl<A: ChatApi + 'static> ChatSession<A> {
    pub fn new(api: Arc<A>, cache: Arc<ThreadCache<A>>, influencer_id: Uuid, user_id: Uuid) -> Self {
        Self {
            api,
            cache,
            influencer_id,
            user_id,
            unsaved: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn cache(&self) -> &Arc<ThreadCache<A>> {
        &self.cache
    }

    /// Durable send. The optimistic message is replaced by the stored pair, or
    /// removed again when the send fails.
    pub async fn send(&self, text: &str) -> Result<MessagePair, ClientError> {
        let temp = self.optimistic(text);
        self.cache
            .append_to_thread(self.influencer_id, self.user_id, temp.clone());

        match self
            .api
            .send_message(&SendRequest::text(self.influencer_id, text))
            .await
        {
            Ok(pair) => {
                self.cache.replace_optimistic(
                    self.influencer_id,
                    self.user_id,
                    temp.id,
                    vec![pair.user_message.clone(), pair.ai_message.clone()],
                );
                Ok(pair)
            }
            Err(e) => {
                warn!(error = %e, "Send failed, rolling back optimistic message");
                self.cache
                    .remove_message_by_id(self.influencer_id, self.user_id, temp.id);
                Err(e)
            }
        }
    }

    /// Fast send. The provisional pair stays visible even if the background
    /// save fails; failed pairs are kept for [`ChatSession::retry_unsaved`].
    pub async fn send_fast(&self, text: &str) -> Result<FastSend, ClientError> {
        let temp = self.optimistic(text);
        self.cache
            .append_to_thread(self.influencer_id, self.user_id, temp.clone());

        let pair = match self
            .api
            .send_message_fast(&SendRequest::text(self.influencer_id, text))
            .await
        {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "Fast send failed, rolling back optimistic message");
                self.cache
                    .remove_message_by_id(self.influencer_id, self.user_id, temp.id);
                return Err(e);
            }
        };

        self.cache.replace_optimistic(
            self.influencer_id,
            self.user_id,
            temp.id,
            vec![pair.user_message.clone(), pair.ai_message.clone()],
        );

        let save = tokio::spawn(save_in_background(
            self.api.clone(),
            self.cache.clone(),
            self.unsaved.clone(),
            self.influencer_id,
            self.user_id,
            pair.clone(),
        ));

        Ok(FastSend { pair, save })
    }

    pub fn unsaved(&self) -> Vec<MessagePair> {
        self.unsaved
            .lock()
            .map(|pending| pending.clone())
            .unwrap_or_default()
    }

    /// Retry every pending fast-path save. Returns how many went through.
    pub async fn retry_unsaved(&self) -> usize {
        let pending = match self.unsaved.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(_) => return 0,
        };

        let mut saved = 0;
        for pair in pending {
            if save_pair(&*self.api, &self.cache, self.influencer_id, self.user_id, &pair).await {
                saved += 1;
            } else if let Ok(mut still_pending) = self.unsaved.lock() {
                still_pending.push(pair);
            }
        }
        saved
    }

    fn optimistic(&self, text: &str) -> ChatMessage {
        ChatMessage::provisional(
            self.user_id,
            self.influencer_id,
            Sender::User,
            MessageContent::text(text),
        )
    }
}

async fn save_in_background<A: ChatApi>(
    api: Arc<A>,
    cache: Arc<ThreadCache<A>>,
    unsaved: Arc<Mutex<Vec<MessagePair>>>,
    influencer_id: Uuid,
    user_id: Uuid,
    pair: MessagePair,
) {
    if !save_pair(&*api, &cache, influencer_id, user_id, &pair).await {
        if let Ok(mut pending) = unsaved.lock() {
            pending.push(pair);
        }
    }
}

async fn save_pair<A: ChatApi>(
    api: &A,
    cache: &ThreadCache<A>,
    influencer_id: Uuid,
    user_id: Uuid,
    pair: &MessagePair,
) -> bool {
    match api.save_messages(influencer_id, pair).await {
        Ok(saved) => {
            cache.replace_optimistic(influencer_id, user_id, pair.user_message.id, vec![saved.user_message]);
            cache.replace_optimistic(influencer_id, user_id, pair.ai_message.id, vec![saved.ai_message]);
            info!(user_message_id = %pair.user_message.id, "Fast-path messages saved");
            true
        }
        Err(e) => {
            warn!(
                user_message_id = %pair.user_message.id,
                error = %e,
                "Background save failed, messages kept as unsaved"
            );
            false
        }
    }
}
