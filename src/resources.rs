//! ResourceStore: a bounded, content-addressed cache of text blobs
//! addressable by `filesystem-mcp://result/{uuid}` URIs.
//!
//! Shaped after the teacher's `GitContextCache` (a mutex-guarded map behind
//! an async getter) but with eviction, dedup-by-hash, and byte accounting on
//! top — the "single-writer discipline" the spec allows for is implemented
//! here as a plain `tokio::sync::Mutex` over the whole triplet, since
//! critical sections are pure in-memory bookkeeping with no `.await` inside.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::FsError;

#[derive(Debug, Clone)]
pub struct ResourceEntry {
    pub uri: String,
    pub name: String,
    pub mime_type: String,
    pub text: String,
    pub sha256_hex: String,
    pub size_bytes: usize,
    pub stored_at: SystemTime,
}

#[derive(Debug, Clone, Copy)]
pub struct ResourceStoreConfig {
    pub max_entries: usize,
    pub max_total_bytes: usize,
    pub max_entry_bytes: usize,
}

impl Default for ResourceStoreConfig {
    fn default() -> Self {
        Self {
            max_entries: 64,
            max_total_bytes: 25 * 1024 * 1024,
            max_entry_bytes: 10 * 1024 * 1024,
        }
    }
}

struct Inner {
    order: Vec<String>, // insertion order, oldest first — eviction order
    entries: HashMap<String, ResourceEntry>,
    hash_index: HashMap<String, String>, // sha256 -> uri
    total_bytes: usize,
}

pub struct ResourceStore {
    config: ResourceStoreConfig,
    inner: Mutex<Inner>,
}

pub struct PutTextInput {
    pub name: String,
    pub mime_type: Option<String>,
    pub text: String,
}

impl ResourceStore {
    pub fn new(config: ResourceStoreConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                order: Vec::new(),
                entries: HashMap::new(),
                hash_index: HashMap::new(),
                total_bytes: 0,
            }),
        }
    }

    pub async fn put_text(&self, input: PutTextInput) -> Result<ResourceEntry, FsError> {
        let size = input.text.len();
        if size > self.config.max_entry_bytes {
            return Err(FsError::too_large(format!(
                "entry of {size} bytes exceeds max_entry_bytes ({})",
                self.config.max_entry_bytes
            )));
        }

        let digest = Sha256::digest(input.text.as_bytes());
        let sha256_hex = hex::encode(digest);

        let mut guard = self.inner.lock().await;
        if let Some(existing_uri) = guard.hash_index.get(&sha256_hex).cloned() {
            return Ok(guard.entries.get(&existing_uri).expect("index consistent").clone());
        }

        let uri = format!("filesystem-mcp://result/{}", Uuid::new_v4());
        let entry = ResourceEntry {
            uri: uri.clone(),
            name: input.name,
            mime_type: input.mime_type.unwrap_or_else(|| "text/plain".to_string()),
            text: input.text,
            sha256_hex: sha256_hex.clone(),
            size_bytes: size,
            stored_at: SystemTime::now(),
        };

        guard.order.push(uri.clone());
        guard.total_bytes += size;
        guard.hash_index.insert(sha256_hex, uri.clone());
        guard.entries.insert(uri.clone(), entry.clone());

        evict_while_over_budget(&mut guard, &self.config);

        if !guard.entries.contains_key(&uri) {
            return Err(FsError::too_large(
                "entry was evicted immediately after insertion",
            ));
        }

        Ok(entry)
    }

    pub async fn get_text(&self, uri: &str) -> Result<ResourceEntry, FsError> {
        let guard = self.inner.lock().await;
        guard
            .entries
            .get(uri)
            .cloned()
            .ok_or_else(|| FsError::not_found(format!("resource not found: {uri}")))
    }

    pub async fn clear(&self) {
        let mut guard = self.inner.lock().await;
        guard.order.clear();
        guard.entries.clear();
        guard.hash_index.clear();
        guard.total_bytes = 0;
    }

    #[cfg(test)]
    pub async fn total_bytes(&self) -> usize {
        self.inner.lock().await.total_bytes
    }
}

fn evict_while_over_budget(inner: &mut Inner, config: &ResourceStoreConfig) {
    while inner.order.len() > config.max_entries || inner.total_bytes > config.max_total_bytes {
        if inner.order.is_empty() {
            break;
        }
        let oldest_uri = inner.order.remove(0);
        if let Some(entry) = inner.entries.remove(&oldest_uri) {
            inner.total_bytes -= entry.size_bytes;
            inner.hash_index.remove(&entry.sha256_hex);
        }
    }
}

/// Default staleness a resource is allowed to live without being touched;
/// not currently enforced as a TTL (entries live until evicted by LRU
/// pressure) but recorded here so a future time-based sweep has the constant
/// it needs.
pub const RESOURCE_IDLE_HINT: Duration = Duration::from_secs(3600);

#[cfg(test)]
mod tests {
    use super::*;

    fn input(name: &str, text: &str) -> PutTextInput {
        PutTextInput {
            name: name.to_string(),
            mime_type: None,
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let store = ResourceStore::new(ResourceStoreConfig::default());
        let entry = store.put_text(input("a", "hello")).await.unwrap();
        let fetched = store.get_text(&entry.uri).await.unwrap();
        assert_eq!(fetched.text, "hello");
    }

    #[tokio::test]
    async fn identical_content_dedups_to_same_uri() {
        let store = ResourceStore::new(ResourceStoreConfig::default());
        let a = store.put_text(input("a", "same")).await.unwrap();
        let b = store.put_text(input("b", "same")).await.unwrap();
        assert_eq!(a.uri, b.uri);
    }

    #[tokio::test]
    async fn oversized_entry_is_rejected() {
        let config = ResourceStoreConfig {
            max_entries: 64,
            max_total_bytes: 1024,
            max_entry_bytes: 10,
        };
        let store = ResourceStore::new(config);
        let err = store.put_text(input("a", "this text is definitely too long")).await.unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ETooLarge);
    }

    #[tokio::test]
    async fn lru_evicts_oldest_first() {
        let config = ResourceStoreConfig {
            max_entries: 2,
            max_total_bytes: 1024 * 1024,
            max_entry_bytes: 1024 * 1024,
        };
        let store = ResourceStore::new(config);
        let a = store.put_text(input("a", "one")).await.unwrap();
        let b = store.put_text(input("b", "two")).await.unwrap();
        let c = store.put_text(input("c", "three")).await.unwrap();

        assert!(store.get_text(&a.uri).await.is_err());
        assert_eq!(store.get_text(&b.uri).await.unwrap().text, "two");
        assert_eq!(store.get_text(&c.uri).await.unwrap().text, "three");
    }

    #[tokio::test]
    async fn total_bytes_tracks_entries() {
        let store = ResourceStore::new(ResourceStoreConfig::default());
        store.put_text(input("a", "12345")).await.unwrap();
        assert_eq!(store.total_bytes().await, 5);
    }
}
