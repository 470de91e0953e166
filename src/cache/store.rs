//! Key/value store abstraction behind the semantic cache

use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::errors::Result;

/// A string key/value store with per-key TTL and glob-style prefix scans.
///
/// Keys are logical; implementations may add their own namespace.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write all entries with the same TTL, atomically.
    async fn set_many_ex(&self, entries: &[(String, String)], ttl: Duration) -> Result<()>;

    /// Every live key matching `pattern` (`*` wildcards only).
    async fn scan(&self, pattern: &str, count_hint: usize) -> Result<Vec<String>>;

    /// Delete keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<usize>;

    async fn ping(&self) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Match `key` against a pattern where `*` matches any run of characters.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !key.starts_with(first) || key.len() < first.len() + last.len() {
        return false;
    }

    let mut rest = &key[first.len()..];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

/// In-process store, for single-node runs and tests
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, (String, Instant)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let value = self
            .entries
            .get(key)
            .filter(|entry| entry.1 > now)
            .map(|entry| entry.0.clone());
        if value.is_none() {
            self.entries.remove_if(key, |_, (_, expires_at)| *expires_at <= now);
        }
        Ok(value)
    }

    async fn set_many_ex(&self, entries: &[(String, String)], ttl: Duration) -> Result<()> {
        let expires_at = Instant::now() + ttl;
        for (key, value) in entries {
            self.entries
                .insert(key.clone(), (value.clone(), expires_at));
        }
        Ok(())
    }

    async fn scan(&self, pattern: &str, _count_hint: usize) -> Result<Vec<String>> {
        let now = Instant::now();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
        Ok(self
            .entries
            .iter()
            .filter(|entry| glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        Ok(keys
            .iter()
            .filter(|key| self.entries.remove(*key).is_some())
            .count())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
