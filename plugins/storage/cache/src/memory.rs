use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::RwLock;

use sink_api::{BackendConfig, BackendConnector, BackendWriter, KeyValue, SinkError};

fn default_max_entries() -> usize {
    100_000
}

/// Bounded in-process cache. Overwriting an existing key always succeeds;
/// a new key is rejected once `max_entries` is reached.
#[derive(Debug)]
pub struct MemoryCache<K, V> {
    entries: Arc<RwLock<HashMap<K, V>>>,
    max_entries: usize,
}

impl<K, V> Clone for MemoryCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            max_entries: self.max_entries,
        }
    }
}

impl<K, V> Default for MemoryCache<K, V> {
    fn default() -> Self {
        Self::new(default_max_entries())
    }
}

impl<K, V> MemoryCache<K, V> {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            max_entries,
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl<K: Eq + Hash, V: Clone> MemoryCache<K, V> {
    pub async fn get(&self, key: &K) -> Option<V> {
        self.entries.read().await.get(key).cloned()
    }
}

impl<K, V> BackendConnector for MemoryCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    type Writer = MemoryCacheWriter<K, V>;

    fn open<'a>(
        &'a self,
        _config: &'a BackendConfig,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Writer, SinkError>> + Send + 'a>> {
        let cache = self.clone();
        Box::pin(async move { Ok(MemoryCacheWriter { cache }) })
    }
}

pub struct MemoryCacheWriter<K, V> {
    cache: MemoryCache<K, V>,
}

impl<K, V> BackendWriter for MemoryCacheWriter<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    type Record = KeyValue<K, V>;

    fn write<'a>(
        &'a self,
        record: &'a KeyValue<K, V>,
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>> {
        Box::pin(async move {
            let mut entries = self.cache.entries.write().await;
            if !entries.contains_key(&record.key) && entries.len() >= self.cache.max_entries {
                return Err(SinkError::io(format!(
                    "cache full ({} entries)",
                    self.cache.max_entries
                )));
            }
            entries.insert(record.key.clone(), record.value.clone());
            Ok(())
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}
