//! State store trait - key-value persistence with TTL
//!
//! Saga records live here, outside any single worker. Values are raw JSON so
//! the store stays schema-agnostic; typed access is layered on top by
//! `saga::SagaStore`.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::Result;

/// Abstract interface for key-value storage with per-entry TTL
///
/// Reads after TTL expiry behave as if the key was never written.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Store a value, optionally with a time-to-live
    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()>;

    /// Retrieve a value (None if missing or expired)
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Delete a value
    async fn remove(&self, key: &str) -> Result<()>;

    /// Health check
    async fn health_check(&self) -> Result<bool>;
}

/// An entry with its optional expiry deadline
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process state store
///
/// Expired entries are invisible to `get` immediately; the backing map is
/// compacted by `sweep`, which callers run on a periodic tick.
#[derive(Clone, Default)]
pub struct MemoryStateStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryStateStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove expired entries, returning how many were dropped
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }

    /// Number of live (unexpired) entries
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries.values().filter(|e| !e.is_expired(now)).count()
    }

    /// Whether the store holds no live entries
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let entry = Entry {
            value,
            expires_at: ttl.map(|d| Instant::now() + d),
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| !e.is_expired(Instant::now()))
            .map(|e| e.value.clone()))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
