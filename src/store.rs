//! In-memory conversation store.
//!
//! Contexts are handed out as `Arc<Mutex<_>>` so a caller can hold one
//! conversation exclusively for a whole routing call while other
//! conversations proceed. The store is bounded: when full, the least recently
//! used conversation is evicted, and with a TTL configured any conversation
//! idle for longer than the TTL is dropped on the next access. A conversation
//! that someone still holds is never evicted, so the store may briefly exceed
//! its capacity.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::context::ConversationContext;
use crate::router::Router;

pub type SharedContext = Arc<Mutex<ConversationContext>>;

pub const DEFAULT_CAPACITY: usize = 10_000;

struct Entry {
    context: SharedContext,
    last_access: Instant,
}

impl Entry {
    /// Held outside the store, or locked by a dispatch in progress
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.context) > 1 || self.context.try_lock().is_err()
    }
}

pub struct ContextStore {
    entries: Mutex<HashMap<String, Entry>>,
    capacity: usize,
    ttl: Option<Duration>,
    router: Option<Weak<Router>>,
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, None)
    }
}

impl ContextStore {
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            ttl,
            router: None,
        }
    }

    /// Contexts created from now on carry a back-reference to `router`
    pub fn with_router(mut self, router: Weak<Router>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Return the context for `conversation_id`, creating it on first sight.
    pub async fn get_or_create(&self, conversation_id: &str, user_id: &str) -> SharedContext {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        self.drop_expired(&mut entries, now);

        if let Some(entry) = entries.get_mut(conversation_id) {
            entry.last_access = now;
            return entry.context.clone();
        }

        if entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .filter(|(_, e)| !e.in_use())
                .min_by_key(|(_, e)| e.last_access)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    entries.remove(&id);
                    debug!(conversation_id = %id, "evicted least recently used conversation");
                }
                None => warn!(
                    total = entries.len(),
                    capacity = self.capacity,
                    "every conversation is in use, exceeding capacity"
                ),
            }
        }

        let mut context = ConversationContext::new(conversation_id, user_id);
        if let Some(router) = &self.router {
            context = context.with_router(router.clone());
        }
        let context = Arc::new(Mutex::new(context));
        entries.insert(
            conversation_id.to_string(),
            Entry {
                context: context.clone(),
                last_access: now,
            },
        );
        debug!(conversation_id = %conversation_id, total = entries.len(), "conversation created");
        context
    }

    /// Look up an existing context without creating one
    pub async fn get(&self, conversation_id: &str) -> Option<SharedContext> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        self.drop_expired(&mut entries, now);
        entries.get_mut(conversation_id).map(|entry| {
            entry.last_access = now;
            entry.context.clone()
        })
    }

    /// Mark a conversation as just used. Call after releasing its lock so the
    /// idle clock starts when the work ends rather than when it began.
    pub async fn touch(&self, conversation_id: &str) {
        if let Some(entry) = self.entries.lock().await.get_mut(conversation_id) {
            entry.last_access = Instant::now();
        }
    }

    pub async fn remove(&self, conversation_id: &str) -> bool {
        self.entries.lock().await.remove(conversation_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Drop every conversation idle past the TTL; returns how many were removed
    pub async fn evict_expired(&self) -> usize {
        let mut entries = self.entries.lock().await;
        self.drop_expired(&mut entries, Instant::now())
    }

    fn drop_expired(&self, entries: &mut HashMap<String, Entry>, now: Instant) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|_, e| e.in_use() || now.duration_since(e.last_access) <= ttl);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "expired idle conversations");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Role;

    #[tokio::test]
    async fn test_get_or_create_returns_same_context() {
        let store = ContextStore::default();
        let a = store.get_or_create("chat-1", "user-1").await;
        let b = store.get_or_create("chat-1", "user-1").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_distinct_conversations_are_isolated() {
        let store = ContextStore::default();
        let a = store.get_or_create("a", "u").await;
        let b = store.get_or_create("b", "u").await;

        a.lock().await.push(Role::User, "only in a", 20);
        assert_eq!(a.lock().await.history().len(), 1);
        assert!(b.lock().await.history().is_empty());
        assert_eq!(b.lock().await.conversation_id(), "b");
    }

    #[tokio::test]
    async fn test_get_does_not_create() {
        let store = ContextStore::default();
        assert!(store.get("missing").await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_least_recently_used() {
        let store = ContextStore::new(2, None);
        store.get_or_create("a", "u").await;
        tokio::time::advance(Duration::from_secs(1)).await;
        store.get_or_create("b", "u").await;
        tokio::time::advance(Duration::from_secs(1)).await;
        // touch "a" so "b" becomes the oldest
        store.get_or_create("a", "u").await;
        tokio::time::advance(Duration::from_secs(1)).await;
        store.get_or_create("c", "u").await;

        assert_eq!(store.len().await, 2);
        assert!(store.get("a").await.is_some());
        assert!(store.get("b").await.is_none());
        assert!(store.get("c").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expires_idle_conversations() {
        let store = ContextStore::new(10, Some(Duration::from_secs(60)));
        store.get_or_create("idle", "u").await;
        store.get_or_create("active", "u").await;

        tokio::time::advance(Duration::from_secs(45)).await;
        store.get("active").await;
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(store.evict_expired().await, 1);
        assert!(store.get("active").await.is_some());
        assert!(store.get("idle").await.is_none());
    }

    #[tokio::test]
    async fn test_locked_context_is_not_evicted_for_capacity() {
        let store = ContextStore::new(1, None);
        let a = store.get_or_create("a", "u").await;
        let guard = a.lock().await;

        store.get_or_create("b", "u").await;
        let again = store.get_or_create("a", "u").await;
        assert!(Arc::ptr_eq(&a, &again));
        // the second message for "a" has to wait for the first
        assert!(again.try_lock().is_err());
        drop(guard);
        assert!(again.try_lock().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_context_is_evicted_once_released() {
        let store = ContextStore::new(1, None);
        let a = store.get_or_create("a", "u").await;
        drop(a);
        tokio::time::advance(Duration::from_secs(1)).await;

        store.get_or_create("b", "u").await;
        assert_eq!(store.len().await, 1);
        assert!(store.get("a").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_skips_context_in_use_and_touch_restarts_clock() {
        let store = ContextStore::new(10, Some(Duration::from_secs(60)));
        let busy = store.get_or_create("busy", "u").await;
        let guard = busy.lock().await;

        tokio::time::advance(Duration::from_secs(90)).await;
        assert_eq!(store.evict_expired().await, 0);

        drop(guard);
        drop(busy);
        store.touch("busy").await;
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(store.evict_expired().await, 0);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(store.evict_expired().await, 1);
    }

    #[tokio::test]
    async fn test_evict_without_ttl_is_noop() {
        let store = ContextStore::default();
        store.get_or_create("a", "u").await;
        assert_eq!(store.evict_expired().await, 0);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove() {
        let store = ContextStore::default();
        store.get_or_create("a", "u").await;
        assert!(store.remove("a").await);
        assert!(!store.remove("a").await);
    }

    #[tokio::test]
    async fn test_router_back_reference_attached() {
        let router = Arc::new(Router::default());
        let store = ContextStore::default().with_router(Arc::downgrade(&router));
        let ctx = store.get_or_create("a", "u").await;
        assert!(ctx.lock().await.router().is_some());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        assert_eq!(ContextStore::new(0, None).capacity(), 1);
    }
}
