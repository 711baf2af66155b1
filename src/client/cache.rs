//! Per-session cache of conversation threads.
//!
//! Threads are keyed by `(influencer_id, user_id)` and kept oldest-first, the
//! same order the backend returns them in. Every mutation notifies the key's
//! subscribers with the full thread before returning.

use crate::client::ChatApi;
use crate::domain::ChatMessage;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use uuid::Uuid;

pub type ThreadKey = (Uuid, Uuid);

type Listener = Arc<dyn Fn(&[ChatMessage]) + Send + Sync>;

#[derive(Default)]
struct CacheState {
    threads: HashMap<ThreadKey, Vec<ChatMessage>>,
    pending: HashMap<ThreadKey, Arc<OnceCell<Vec<ChatMessage>>>>,
    listeners: HashMap<ThreadKey, HashMap<u64, Listener>>,
    next_listener_id: u64,
}

pub struct ThreadCache<A: ChatApi> {
    api: Arc<A>,
    state: Arc<Mutex<CacheState>>,
}

/// Keeps a listener registered. Dropping it unsubscribes.
pub struct ThreadSubscription {
    state: Weak<Mutex<CacheState>>,
    key: ThreadKey,
    id: u64,
}

impl ThreadSubscription {
    pub fn unsubscribe(self) {}
}

impl Drop for ThreadSubscription {
    fn drop(&mut self) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let mut state = lock(&state);
        if let Some(set) = state.listeners.get_mut(&self.key) {
            set.remove(&self.id);
            if set.is_empty() {
                state.listeners.remove(&self.key);
            }
        }
    }
}

fn lock(state: &Mutex<CacheState>) -> MutexGuard<'_, CacheState> {
    // A panicking listener must not take the whole cache down with it.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<A: ChatApi> ThreadCache<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self {
            api,
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    pub fn peek_thread(&self, influencer_id: Uuid, user_id: Uuid) -> Option<Vec<ChatMessage>> {
        lock(&self.state).threads.get(&(influencer_id, user_id)).cloned()
    }

    /// Cached thread, or the newest `limit` messages fetched once per key no
    /// matter how many callers are waiting. Fetch failures cache an empty thread.
    pub async fn get_thread(&self, influencer_id: Uuid, user_id: Uuid, limit: i64) -> Vec<ChatMessage> {
        let key = (influencer_id, user_id);
        let cell = {
            let mut state = lock(&self.state);
            if let Some(thread) = state.threads.get(&key) {
                return thread.clone();
            }
            state.pending.entry(key).or_default().clone()
        };

        let fetched = cell
            .get_or_init(|| self.fetch_first_page(influencer_id, limit))
            .await
            .clone();

        let (thread, listeners) = {
            let mut state = lock(&self.state);
            let first_to_finish = state
                .pending
                .get(&key)
                .is_some_and(|current| Arc::ptr_eq(current, &cell));
            if first_to_finish {
                state.pending.remove(&key);
            } else if let Some(thread) = state.threads.get(&key) {
                return thread.clone();
            }
            // Sends may have touched the thread while the fetch was in flight.
            // Their messages go after the fetched page.
            let merged = match state.threads.get(&key) {
                Some(existing) => {
                    let merged = merge_under(fetched, existing);
                    if &merged == existing {
                        return merged;
                    }
                    merged
                }
                None => fetched,
            };
            state.threads.insert(key, merged.clone());
            (merged, listeners_for(&state, &key))
        };
        notify(&listeners, &thread);
        thread
    }

    async fn fetch_first_page(&self, influencer_id: Uuid, limit: i64) -> Vec<ChatMessage> {
        match self.api.list_messages(influencer_id, limit, 0).await {
            Ok(messages) if !messages.is_empty() => messages,
            Ok(_) => match self.api.init_conversation(influencer_id).await {
                Ok(messages) => messages,
                Err(e) => {
                    warn!(influencer_id = %influencer_id, error = %e, "Conversation init failed");
                    Vec::new()
                }
            },
            Err(e) => {
                warn!(influencer_id = %influencer_id, error = %e, "Thread fetch failed, caching empty thread");
                Vec::new()
            }
        }
    }

    /// Fetch the page just older than what is cached and prepend it.
    pub async fn load_more_messages(&self, influencer_id: Uuid, user_id: Uuid, limit: i64) -> Vec<ChatMessage> {
        let key = (influencer_id, user_id);
        let offset = match lock(&self.state).threads.get(&key) {
            Some(thread) => thread.len() as i64,
            None => return self.get_thread(influencer_id, user_id, limit).await,
        };

        let older = match self.api.list_messages(influencer_id, limit, offset).await {
            Ok(older) => older,
            Err(e) => {
                warn!(influencer_id = %influencer_id, offset, error = %e, "Loading older messages failed");
                return self.peek_thread(influencer_id, user_id).unwrap_or_default();
            }
        };
        debug!(influencer_id = %influencer_id, offset, fetched = older.len(), "Loaded older messages");

        self.mutate(key, |thread| {
            let mut merged: Vec<ChatMessage> = older
                .into_iter()
                .filter(|m| !thread.iter().any(|existing| existing.id == m.id))
                .collect();
            merged.append(thread);
            *thread = merged;
        })
    }

    pub fn append_to_thread(&self, influencer_id: Uuid, user_id: Uuid, message: ChatMessage) -> Vec<ChatMessage> {
        self.mutate((influencer_id, user_id), |thread| {
            if !thread.iter().any(|m| m.id == message.id) {
                thread.push(message);
            }
        })
    }

    /// Swap the message `temp_id` for `replacements`, in place. Replacements
    /// already present elsewhere in the thread are moved, not duplicated.
    pub fn replace_optimistic(
        &self,
        influencer_id: Uuid,
        user_id: Uuid,
        temp_id: Uuid,
        replacements: Vec<ChatMessage>,
    ) -> Vec<ChatMessage> {
        self.mutate((influencer_id, user_id), |thread| {
            let keep = |m: &ChatMessage| m.id != temp_id && !replacements.iter().any(|r| r.id == m.id);
            let at = match thread.iter().position(|m| m.id == temp_id) {
                Some(p) => thread[..p].iter().filter(|m| keep(m)).count(),
                None => thread.iter().filter(|m| keep(m)).count(),
            };
            thread.retain(|m| keep(m));
            thread.splice(at..at, replacements);
        })
    }

    pub fn remove_message_by_id(&self, influencer_id: Uuid, user_id: Uuid, message_id: Uuid) -> Vec<ChatMessage> {
        self.mutate((influencer_id, user_id), |thread| {
            thread.retain(|m| m.id != message_id);
        })
    }

    pub fn subscribe_thread<F>(&self, influencer_id: Uuid, user_id: Uuid, listener: F) -> ThreadSubscription
    where
        F: Fn(&[ChatMessage]) + Send + Sync + 'static,
    {
        let key = (influencer_id, user_id);
        let mut state = lock(&self.state);
        let id = state.next_listener_id;
        state.next_listener_id += 1;
        state.listeners.entry(key).or_default().insert(id, Arc::new(listener));

        ThreadSubscription {
            state: Arc::downgrade(&self.state),
            key,
            id,
        }
    }

    pub fn subscriber_count(&self, influencer_id: Uuid, user_id: Uuid) -> usize {
        lock(&self.state)
            .listeners
            .get(&(influencer_id, user_id))
            .map_or(0, HashMap::len)
    }

    /// Drop every thread and listener, e.g. on logout.
    pub fn clear(&self) {
        let mut state = lock(&self.state);
        state.threads.clear();
        state.pending.clear();
        state.listeners.clear();
    }

    fn mutate(&self, key: ThreadKey, apply: impl FnOnce(&mut Vec<ChatMessage>)) -> Vec<ChatMessage> {
        let (thread, listeners) = {
            let mut state = lock(&self.state);
            let thread = state.threads.entry(key).or_default();
            apply(thread);
            let thread = thread.clone();
            (thread, listeners_for(&state, &key))
        };
        // Listeners run outside the lock so they may read the cache.
        notify(&listeners, &thread);
        thread
    }
}

/// `page` followed by whatever in `existing` it does not already contain.
fn merge_under(mut page: Vec<ChatMessage>, existing: &[ChatMessage]) -> Vec<ChatMessage> {
    let extra: Vec<ChatMessage> = existing
        .iter()
        .filter(|m| !page.iter().any(|p| p.id == m.id))
        .cloned()
        .collect();
    page.extend(extra);
    page
}

fn listeners_for(state: &CacheState, key: &ThreadKey) -> Vec<Listener> {
    state
        .listeners
        .get(key)
        .map(|set| set.values().cloned().collect())
        .unwrap_or_default()
}

fn notify(listeners: &[Listener], thread: &[ChatMessage]) {
    for listener in listeners {
        listener(thread);
    }
}
