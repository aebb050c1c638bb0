//! Per-user execution contexts.
//!
//! Each authenticated user gets one context holding their private tool
//! state. Contexts are created lazily on first dispatch and evicted
//! after an idle period.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

/// State owned by a single user. Nothing in here is reachable from
/// another user's calls.
pub struct UserContext {
    pub user_id: String,
    pub username: String,
    /// Calls dispatched through this context.
    invocations: AtomicU64,
    /// Counter tool state.
    counter: AtomicI64,
    /// Key-value store tool state.
    kv: RwLock<HashMap<String, String>>,
    pub created_at: Instant,
    last_active: RwLock<Instant>,
}

impl UserContext {
    #[must_use]
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            invocations: AtomicU64::new(0),
            counter: AtomicI64::new(0),
            kv: RwLock::new(HashMap::new()),
            created_at: Instant::now(),
            last_active: RwLock::new(Instant::now()),
        }
    }

    /// Count one dispatched call. Returns the new total.
    pub fn record_invocation(&self) -> u64 {
        self.invocations.fetch_add(1, Ordering::SeqCst) + 1
    }

    #[must_use]
    pub fn invocation_count(&self) -> u64 {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Adjust the counter by `delta` and return the new value.
    pub fn increment_counter(&self, delta: i64) -> i64 {
        self.counter.fetch_add(delta, Ordering::SeqCst) + delta
    }

    #[must_use]
    pub fn counter_value(&self) -> i64 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Store a value. Returns the previous value for the key, if any.
    pub async fn kv_set(&self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.kv.write().await.insert(key.into(), value.into())
    }

    pub async fn kv_get(&self, key: &str) -> Option<String> {
        self.kv.read().await.get(key).cloned()
    }

    /// Delete a key. Returns true if it existed.
    pub async fn kv_delete(&self, key: &str) -> bool {
        self.kv.write().await.remove(key).is_some()
    }

    /// All stored keys, sorted.
    pub async fn kv_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.kv.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Update the last-activity timestamp.
    pub async fn touch(&self) {
        *self.last_active.write().await = Instant::now();
    }

    /// Check if the context has been idle longer than `timeout`.
    pub async fn is_idle(&self, timeout: Duration) -> bool {
        self.last_active.read().await.elapsed() > timeout
    }
}

impl std::fmt::Debug for UserContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserContext")
            .field("user_id", &self.user_id)
            .field("username", &self.username)
            .field("invocations", &self.invocation_count())
            .finish()
    }
}

/// Registry of live user contexts, keyed by user id.
pub struct ContextRegistry {
    contexts: RwLock<HashMap<String, Arc<UserContext>>>,
    idle_timeout: Duration,
}

impl ContextRegistry {
    #[must_use]
    pub fn new(idle_timeout: Duration) -> Self {
        Self { contexts: RwLock::new(HashMap::new()), idle_timeout }
    }

    /// Fetch the user's context, creating it on first use.
    ///
    /// Concurrent first calls for one user all receive the same context:
    /// creation happens under the write lock, and losers of the race get
    /// the winner's entry.
    pub async fn get_or_create(&self, user_id: &str, username: &str) -> Arc<UserContext> {
        {
            let contexts = self.contexts.read().await;
            if let Some(ctx) = contexts.get(user_id) {
                let ctx = Arc::clone(ctx);
                drop(contexts);
                ctx.touch().await;
                return ctx;
            }
        }

        let mut contexts = self.contexts.write().await;
        let ctx = Arc::clone(contexts.entry(user_id.to_string()).or_insert_with(|| {
            tracing::info!(user_id, "Created user context");
            Arc::new(UserContext::new(user_id, username))
        }));
        drop(contexts);
        ctx.touch().await;
        ctx
    }

    pub async fn get(&self, user_id: &str) -> Option<Arc<UserContext>> {
        self.contexts.read().await.get(user_id).cloned()
    }

    /// Drop a user's context. Returns true if one existed.
    pub async fn remove(&self, user_id: &str) -> bool {
        let removed = self.contexts.write().await.remove(user_id).is_some();
        if removed {
            tracing::info!(user_id, "Removed user context");
        }
        removed
    }

    /// Evict contexts idle past the timeout. Returns the eviction count.
    pub async fn evict_idle(&self) -> usize {
        let mut idle = Vec::new();
        {
            let contexts = self.contexts.read().await;
            for (user_id, ctx) in contexts.iter() {
                if ctx.is_idle(self.idle_timeout).await {
                    idle.push(user_id.clone());
                }
            }
        }

        let count = idle.len();
        if count > 0 {
            let mut contexts = self.contexts.write().await;
            for user_id in idle {
                contexts.remove(&user_id);
                tracing::info!(user_id = %user_id, "Evicted idle user context");
            }
        }
        count
    }

    pub async fn count(&self) -> usize {
        self.contexts.read().await.len()
    }

    /// Start the background eviction task.
    pub fn start_eviction_task(self: Arc<Self>, period: Duration) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let evicted = self.evict_idle().await;
                if evicted > 0 {
                    tracing::debug!(count = evicted, "Context eviction completed");
                }
            }
        });
    }
}

impl std::fmt::Debug for ContextRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextRegistry").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lazy_creation_and_reuse() {
        let registry = ContextRegistry::new(Duration::from_secs(60));
        assert_eq!(registry.count().await, 0);

        let first = registry.get_or_create("u1", "alice").await;
        let second = registry.get_or_create("u1", "alice").await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_isolation_between_users() {
        let registry = ContextRegistry::new(Duration::from_secs(60));
        let alice = registry.get_or_create("u1", "alice").await;
        let bob = registry.get_or_create("u2", "bob").await;

        alice.kv_set("color", "red").await;
        bob.kv_set("color", "blue").await;

        assert_eq!(alice.kv_get("color").await.as_deref(), Some("red"));
        assert_eq!(bob.kv_get("color").await.as_deref(), Some("blue"));
        assert_eq!(alice.counter_value(), 0);
        assert_eq!(bob.increment_counter(5), 5);
        assert_eq!(alice.counter_value(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_calls_share_one_context() {
        let registry = Arc::new(ContextRegistry::new(Duration::from_secs(60)));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(
                async move { registry.get_or_create("u1", "alice").await },
            ));
        }

        let mut contexts = Vec::new();
        for handle in handles {
            contexts.push(handle.await.unwrap());
        }
        assert_eq!(registry.count().await, 1);
        for ctx in &contexts[1..] {
            assert!(Arc::ptr_eq(&contexts[0], ctx));
        }
    }

    #[tokio::test]
    async fn test_idle_eviction() {
        let registry = ContextRegistry::new(Duration::from_millis(20));
        registry.get_or_create("u1", "alice").await;

        // Not idle yet.
        assert_eq!(registry.evict_idle().await, 0);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(registry.evict_idle().await, 1);
        assert_eq!(registry.count().await, 0);

        // A new call after eviction gets a fresh context.
        let fresh = registry.get_or_create("u1", "alice").await;
        assert_eq!(fresh.invocation_count(), 0);
    }

    #[tokio::test]
    async fn test_kv_operations() {
        let ctx = UserContext::new("u1", "alice");
        assert!(ctx.kv_set("b", "2").await.is_none());
        assert!(ctx.kv_set("a", "1").await.is_none());
        assert_eq!(ctx.kv_set("a", "updated").await.as_deref(), Some("1"));

        assert_eq!(ctx.kv_keys().await, vec!["a".to_string(), "b".to_string()]);
        assert!(ctx.kv_delete("a").await);
        assert!(!ctx.kv_delete("a").await);
        assert!(ctx.kv_get("a").await.is_none());
    }
}
