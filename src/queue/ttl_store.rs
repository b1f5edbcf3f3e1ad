//! In-process stand-in for the Redis `SET ... EX <ttl>` keys the original
//! system used for job status/result and DLQ. Entries are lazily swept on
//! access; there is no background reaper since job volume for a single
//! daemon is expected to be modest.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::Mutex;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// A keyed store where each entry expires `ttl` after being set.
#[derive(Clone)]
pub struct TtlStore<V: Clone + Send + Sync + 'static> {
    inner: Arc<Mutex<HashMap<String, Entry<V>>>>,
}

impl<V: Clone + Send + Sync + 'static> TtlStore<V> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let mut map = self.inner.lock().await;
        map.insert(
            key.into(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        let mut map = self.inner.lock().await;
        match map.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                map.remove(key);
                None
            }
            None => None,
        }
    }
}

impl<V: Clone + Send + Sync + 'static> Default for TtlStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_returns_value() {
        let store: TtlStore<String> = TtlStore::new();
        store.set("k", "v".to_string(), Duration::from_secs(60)).await;
        assert_eq!(store.get("k").await, Some("v".to_string()));
    }

    #[tokio::test]
    async fn expired_entry_is_absent() {
        let store: TtlStore<String> = TtlStore::new();
        store.set("k", "v".to_string(), Duration::from_millis(1)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("k").await, None);
    }

    #[tokio::test]
    async fn missing_key_returns_none() {
        let store: TtlStore<String> = TtlStore::new();
        assert_eq!(store.get("nope").await, None);
    }
}
