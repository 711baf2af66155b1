//! Client thread cache and send-session behaviour against an in-memory backend.

use async_trait::async_trait;
use persona_chat::client::{ChatApi, ChatSession, ClientError, MessagePair, SendRequest, ThreadCache};
use persona_chat::domain::{ChatMessage, MessageContent, Sender};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// In-memory backend: one conversation, stored oldest-first.
#[derive(Default)]
struct FakeBackend {
    user_id: Uuid,
    stored: Mutex<Vec<ChatMessage>>,
    welcome: Mutex<Vec<ChatMessage>>,
    list_calls: AtomicUsize,
    init_calls: AtomicUsize,
    save_calls: AtomicUsize,
    fail_list: AtomicBool,
    fail_save: AtomicBool,
    out_of_tokens: AtomicBool,
    list_delay: Option<Duration>,
}

impl FakeBackend {
    fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }

    fn message(&self, influencer_id: Uuid, sender: Sender, text: &str) -> ChatMessage {
        ChatMessage::new(
            Some(Uuid::new_v4()),
            self.user_id,
            influencer_id,
            sender,
            MessageContent::text(text),
        )
    }

    fn seed(&self, influencer_id: Uuid, count: usize) {
        let mut stored = self.stored.lock().unwrap();
        for i in 0..count {
            let sender = if i % 2 == 0 { Sender::User } else { Sender::Influencer };
            stored.push(self.message(influencer_id, sender, &format!("m{}", i)));
        }
    }

    fn pair(&self, request: &SendRequest, provisional: bool) -> MessagePair {
        let mut user_message = self.message(request.influencer_id, Sender::User, &request.content);
        let mut ai_message = self.message(
            request.influencer_id,
            Sender::Influencer,
            &format!("reply to {}", request.content),
        );
        if provisional {
            for m in [&mut user_message, &mut ai_message] {
                m.provisional = true;
                m.conversation_id = None;
            }
        }
        MessagePair {
            user_message,
            ai_message,
        }
    }
}

#[async_trait]
impl ChatApi for FakeBackend {
    async fn list_messages(
        &self,
        _influencer_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ChatMessage>, ClientError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.list_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(ClientError::Transport("connection reset".to_string()));
        }
        let stored = self.stored.lock().unwrap();
        let end = stored.len().saturating_sub(offset as usize);
        let start = end.saturating_sub(limit as usize);
        Ok(stored[start..end].to_vec())
    }

    async fn init_conversation(&self, _influencer_id: Uuid) -> Result<Vec<ChatMessage>, ClientError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        let welcome = self.welcome.lock().unwrap().clone();
        self.stored.lock().unwrap().extend(welcome.clone());
        Ok(welcome)
    }

    async fn send_message(&self, request: &SendRequest) -> Result<MessagePair, ClientError> {
        if self.out_of_tokens.load(Ordering::SeqCst) {
            return Err(ClientError::PaymentRequired);
        }
        let pair = self.pair(request, false);
        let mut stored = self.stored.lock().unwrap();
        stored.push(pair.user_message.clone());
        stored.push(pair.ai_message.clone());
        Ok(pair)
    }

    async fn send_message_fast(&self, request: &SendRequest) -> Result<MessagePair, ClientError> {
        if self.out_of_tokens.load(Ordering::SeqCst) {
            return Err(ClientError::PaymentRequired);
        }
        Ok(self.pair(request, true))
    }

    async fn save_messages(&self, _influencer_id: Uuid, pair: &MessagePair) -> Result<MessagePair, ClientError> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(ClientError::SaveRejected("database unavailable".to_string()));
        }
        let conversation_id = Some(Uuid::new_v4());
        let mut saved = pair.clone();
        for m in [&mut saved.user_message, &mut saved.ai_message] {
            m.provisional = false;
            m.conversation_id = conversation_id;
        }
        let mut stored = self.stored.lock().unwrap();
        stored.push(saved.user_message.clone());
        stored.push(saved.ai_message.clone());
        Ok(saved)
    }
}

fn ids() -> (Uuid, Uuid) {
    (Uuid::new_v4(), Uuid::new_v4())
}

// ============================================================================
// ThreadCache
// ============================================================================

#[tokio::test]
async fn concurrent_get_thread_fetches_once() {
    let (influencer_id, user_id) = ids();
    let backend = FakeBackend {
        list_delay: Some(Duration::from_millis(20)),
        ..FakeBackend::new(user_id)
    };
    backend.seed(influencer_id, 4);
    let api = Arc::new(backend);
    let cache = ThreadCache::new(api.clone());

    let (a, b, c) = tokio::join!(
        cache.get_thread(influencer_id, user_id, 20),
        cache.get_thread(influencer_id, user_id, 20),
        cache.get_thread(influencer_id, user_id, 20),
    );

    assert_eq!(api.list_calls.load(Ordering::SeqCst), 1);
    assert_eq!(a.len(), 4);
    assert_eq!(a, b);
    assert_eq!(b, c);

    // Served from cache afterwards.
    cache.get_thread(influencer_id, user_id, 20).await;
    assert_eq!(api.list_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn send_during_first_fetch_keeps_history() {
    let (influencer_id, user_id) = ids();
    let backend = FakeBackend {
        list_delay: Some(Duration::from_millis(50)),
        ..FakeBackend::new(user_id)
    };
    backend.seed(influencer_id, 6);
    let history = backend.stored.lock().unwrap().clone();
    let api = Arc::new(backend);
    let cache = ThreadCache::new(api.clone());

    let optimistic = ChatMessage::provisional(user_id, influencer_id, Sender::User, MessageContent::text("hi"));
    let (thread, _) = tokio::join!(cache.get_thread(influencer_id, user_id, 20), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.append_to_thread(influencer_id, user_id, optimistic.clone())
    });

    let mut expected = history;
    expected.push(optimistic);
    assert_eq!(thread, expected);
    assert_eq!(cache.get_thread(influencer_id, user_id, 20).await, expected);
    assert_eq!(api.list_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn fetch_failure_caches_empty_thread() {
    let (influencer_id, user_id) = ids();
    let api = Arc::new(FakeBackend::new(user_id));
    api.fail_list.store(true, Ordering::SeqCst);
    let cache = ThreadCache::new(api.clone());

    assert!(cache.get_thread(influencer_id, user_id, 20).await.is_empty());
    assert_eq!(cache.peek_thread(influencer_id, user_id), Some(Vec::new()));
    assert_eq!(api.init_calls.load(Ordering::SeqCst), 0);

    cache.get_thread(influencer_id, user_id, 20).await;
    assert_eq!(api.list_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_conversation_is_initialized_once() {
    let (influencer_id, user_id) = ids();
    let backend = FakeBackend::new(user_id);
    let welcome = backend.message(influencer_id, Sender::Influencer, "Hi, I'm Luna!");
    backend.welcome.lock().unwrap().push(welcome.clone());
    let api = Arc::new(backend);
    let cache = ThreadCache::new(api.clone());

    assert!(cache.peek_thread(influencer_id, user_id).is_none());
    let thread = cache.get_thread(influencer_id, user_id, 20).await;
    assert_eq!(thread, vec![welcome]);

    cache.get_thread(influencer_id, user_id, 20).await;
    assert_eq!(api.init_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn optimistic_append_then_replace_leaves_one_pair() {
    let (influencer_id, user_id) = ids();
    let api = Arc::new(FakeBackend::new(user_id));
    let cache = ThreadCache::new(api.clone());

    let temp = ChatMessage::provisional(user_id, influencer_id, Sender::User, MessageContent::text("hey"));
    cache.append_to_thread(influencer_id, user_id, temp.clone());
    cache.append_to_thread(influencer_id, user_id, temp.clone());
    assert_eq!(cache.peek_thread(influencer_id, user_id).unwrap().len(), 1);

    let pair = api.pair(&SendRequest::text(influencer_id, "hey"), false);
    // The stored user message may already have arrived through another path.
    cache.append_to_thread(influencer_id, user_id, pair.user_message.clone());

    let thread = cache.replace_optimistic(
        influencer_id,
        user_id,
        temp.id,
        vec![pair.user_message.clone(), pair.ai_message.clone()],
    );

    assert_eq!(thread.len(), 2);
    assert_eq!(thread[0].id, pair.user_message.id);
    assert_eq!(thread[1].id, pair.ai_message.id);
    assert!(thread.iter().all(|m| m.id != temp.id));
}

#[tokio::test]
async fn load_more_on_empty_cache_matches_first_page() {
    let (influencer_id, user_id) = ids();
    let backend = FakeBackend::new(user_id);
    backend.seed(influencer_id, 30);
    let api = Arc::new(backend);

    let first = ThreadCache::new(api.clone())
        .get_thread(influencer_id, user_id, 10)
        .await;
    let more = ThreadCache::new(api.clone())
        .load_more_messages(influencer_id, user_id, 10)
        .await;

    assert_eq!(first.len(), 10);
    assert_eq!(first, more);
}

#[tokio::test]
async fn load_more_prepends_the_previous_page() {
    let (influencer_id, user_id) = ids();
    let backend = FakeBackend::new(user_id);
    backend.seed(influencer_id, 25);
    let all = backend.stored.lock().unwrap().clone();
    let api = Arc::new(backend);
    let cache = ThreadCache::new(api.clone());

    cache.get_thread(influencer_id, user_id, 10).await;
    let thread = cache.load_more_messages(influencer_id, user_id, 10).await;
    assert_eq!(thread, all[5..].to_vec());

    let thread = cache.load_more_messages(influencer_id, user_id, 10).await;
    assert_eq!(thread, all);

    // Past the beginning nothing changes.
    let thread = cache.load_more_messages(influencer_id, user_id, 10).await;
    assert_eq!(thread, all);
}

#[tokio::test]
async fn subscribers_see_every_mutation_until_dropped() {
    let (influencer_id, user_id) = ids();
    let api = Arc::new(FakeBackend::new(user_id));
    let cache = ThreadCache::new(api.clone());

    let seen = Arc::new(Mutex::new(Vec::<usize>::new()));
    let sink = seen.clone();
    let first = cache.subscribe_thread(influencer_id, user_id, move |thread| {
        sink.lock().unwrap().push(thread.len());
    });
    let other_calls = Arc::new(AtomicUsize::new(0));
    let counter = other_calls.clone();
    let second = cache.subscribe_thread(influencer_id, user_id, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(cache.subscriber_count(influencer_id, user_id), 2);

    let message = api.message(influencer_id, Sender::User, "hello");
    cache.append_to_thread(influencer_id, user_id, message.clone());
    cache.remove_message_by_id(influencer_id, user_id, message.id);
    assert_eq!(*seen.lock().unwrap(), vec![1, 0]);
    assert_eq!(other_calls.load(Ordering::SeqCst), 2);

    drop(first);
    second.unsubscribe();
    assert_eq!(cache.subscriber_count(influencer_id, user_id), 0);

    cache.append_to_thread(influencer_id, user_id, message);
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn clear_forgets_threads_and_listeners() {
    let (influencer_id, user_id) = ids();
    let backend = FakeBackend::new(user_id);
    backend.seed(influencer_id, 2);
    let api = Arc::new(backend);
    let cache = ThreadCache::new(api.clone());

    cache.get_thread(influencer_id, user_id, 20).await;
    let _subscription = cache.subscribe_thread(influencer_id, user_id, |_| {});
    cache.clear();

    assert!(cache.peek_thread(influencer_id, user_id).is_none());
    assert_eq!(cache.subscriber_count(influencer_id, user_id), 0);
}

// ============================================================================
// ChatSession
// ============================================================================

fn session(api: Arc<FakeBackend>, influencer_id: Uuid, user_id: Uuid) -> ChatSession<FakeBackend> {
    let cache = Arc::new(ThreadCache::new(api.clone()));
    ChatSession::new(api, cache, influencer_id, user_id)
}

#[tokio::test]
async fn durable_send_replaces_optimistic_message() {
    let (influencer_id, user_id) = ids();
    let api = Arc::new(FakeBackend::new(user_id));
    let session = session(api.clone(), influencer_id, user_id);

    let pair = tokio_test::assert_ok!(session.send("hello").await);

    let thread = session.cache().peek_thread(influencer_id, user_id).unwrap();
    assert_eq!(thread, vec![pair.user_message, pair.ai_message]);
    assert!(thread.iter().all(|m| !m.provisional));
}

#[tokio::test]
async fn failed_send_rolls_back_and_surfaces_payment_required() {
    let (influencer_id, user_id) = ids();
    let api = Arc::new(FakeBackend::new(user_id));
    api.out_of_tokens.store(true, Ordering::SeqCst);
    let session = session(api.clone(), influencer_id, user_id);

    let err = session.send("hello").await.unwrap_err();
    assert!(matches!(err, ClientError::PaymentRequired));
    assert_eq!(session.cache().peek_thread(influencer_id, user_id), Some(Vec::new()));
}

#[tokio::test]
async fn fast_send_is_confirmed_by_background_save() {
    let (influencer_id, user_id) = ids();
    let api = Arc::new(FakeBackend::new(user_id));
    let session = session(api.clone(), influencer_id, user_id);

    let fast = session.send_fast("quick").await.unwrap();
    assert!(fast.pair.user_message.provisional);
    fast.save.await.unwrap();

    let thread = session.cache().peek_thread(influencer_id, user_id).unwrap();
    assert_eq!(thread.len(), 2);
    assert_eq!(thread[0].id, fast.pair.user_message.id);
    assert_eq!(thread[1].id, fast.pair.ai_message.id);
    assert!(thread.iter().all(|m| !m.provisional));
    assert!(session.unsaved().is_empty());
}

#[tokio::test]
async fn failed_background_save_keeps_messages_and_can_be_retried() {
    let (influencer_id, user_id) = ids();
    let api = Arc::new(FakeBackend::new(user_id));
    api.fail_save.store(true, Ordering::SeqCst);
    let session = session(api.clone(), influencer_id, user_id);

    let fast = session.send_fast("quick").await.unwrap();
    fast.save.await.unwrap();

    let thread = session.cache().peek_thread(influencer_id, user_id).unwrap();
    assert_eq!(thread.len(), 2);
    assert!(thread.iter().all(|m| m.provisional));
    assert_eq!(session.unsaved(), vec![fast.pair.clone()]);

    assert_eq!(session.retry_unsaved().await, 0);
    assert_eq!(session.unsaved().len(), 1);

    api.fail_save.store(false, Ordering::SeqCst);
    assert_eq!(session.retry_unsaved().await, 1);
    assert!(session.unsaved().is_empty());
    assert_eq!(api.save_calls.load(Ordering::SeqCst), 3);

    let thread = session.cache().peek_thread(influencer_id, user_id).unwrap();
    assert_eq!(thread.len(), 2);
    assert!(thread.iter().all(|m| !m.provisional));
}
