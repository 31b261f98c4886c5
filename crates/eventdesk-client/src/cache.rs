//! Normalized resource cache.
//!
//! One map from [`ResourceKey`] to the last-known server JSON. Two writers
//! touch it: gateway responses through [`ResourceCache::merge`] and live
//! updates through [`ResourceCache::patch`]. Neither replaces an entry
//! wholesale behind the other's back.
//!
//! Entries are reference counted by [`CacheHandle`]s; the entry disappears
//! when its last handle is dropped.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

use crate::error::Result;

const EVENT_CAPACITY: usize = 256;

/// Kind of server resource held in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Auth,
    Events,
    Attendants,
    Users,
    Units,
    Polls,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Events => "events",
            Self::Attendants => "attendants",
            Self::Users => "users",
            Self::Units => "units",
            Self::Polls => "polls",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(resource kind, id)` pair identifying one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub id: String,
}

impl ResourceKey {
    pub fn new(kind: ResourceKind, id: impl ToString) -> Self {
        Self {
            kind,
            id: id.to_string(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// Change notification for cache consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// The entry's value was written or patched.
    Updated { key: ResourceKey },
    /// The entry's value was invalidated or the entry was dropped.
    Removed { key: ResourceKey },
}

struct Entry {
    value: Option<Value>,
    ref_count: usize,
}

struct CacheInner {
    entries: DashMap<ResourceKey, Entry>,
    events: broadcast::Sender<CacheEvent>,
}

/// Thread-safe resource cache. Cloning shares the underlying map.
#[derive(Clone)]
pub struct ResourceCache {
    inner: Arc<CacheInner>,
}

impl ResourceCache {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(CacheInner {
                entries: DashMap::new(),
                events,
            }),
        }
    }

    /// Register interest in `key`, creating an empty slot on first use.
    pub fn retain(&self, key: ResourceKey) -> CacheHandle {
        self.inner
            .entries
            .entry(key.clone())
            .and_modify(|entry| entry.ref_count += 1)
            .or_insert(Entry {
                value: None,
                ref_count: 1,
            });
        CacheHandle {
            cache: self.clone(),
            key,
        }
    }

    fn release(&self, key: &ResourceKey) {
        let removed = match self.inner.entries.entry(key.clone()) {
            MapEntry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.ref_count = entry.ref_count.saturating_sub(1);
                if entry.ref_count == 0 {
                    occupied.remove();
                    true
                } else {
                    false
                }
            }
            MapEntry::Vacant(_) => false,
        };

        if removed {
            trace!(resource = %key, "Last consumer released cache entry");
            self.emit(CacheEvent::Removed { key: key.clone() });
        }
    }

    /// Write a server response into a retained entry.
    ///
    /// JSON objects are merged field by field so fields patched by live
    /// updates survive a response that omits them; any other value
    /// replaces the cached one. Keys nobody retains are not stored.
    pub fn merge(&self, key: &ResourceKey, value: Value) -> bool {
        let Some(mut entry) = self.inner.entries.get_mut(key) else {
            trace!(resource = %key, "No consumer for response, not caching");
            return false;
        };

        let merged = match (entry.value.take(), value) {
            (Some(Value::Object(mut existing)), Value::Object(incoming)) => {
                existing.extend(incoming);
                Value::Object(existing)
            }
            (_, incoming) => incoming,
        };
        entry.value = Some(merged);
        drop(entry);

        self.emit(CacheEvent::Updated { key: key.clone() });
        true
    }

    /// Mutate a cached value in place.
    ///
    /// `f` returns whether it changed anything; only then is an update
    /// emitted. Missing or empty entries are left alone.
    pub fn patch<F>(&self, key: &ResourceKey, f: F) -> bool
    where
        F: FnOnce(&mut Value) -> bool,
    {
        let changed = match self.inner.entries.get_mut(key) {
            Some(mut entry) => match entry.value.as_mut() {
                Some(value) => f(value),
                None => false,
            },
            None => false,
        };

        if changed {
            self.emit(CacheEvent::Updated { key: key.clone() });
        }
        changed
    }

    pub fn get(&self, key: &ResourceKey) -> Option<Value> {
        self.inner
            .entries
            .get(key)
            .and_then(|entry| entry.value.clone())
    }

    /// Decode the cached value as `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &ResourceKey) -> Result<Option<T>> {
        match self.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Whether `key` currently holds a value.
    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.inner
            .entries
            .get(key)
            .is_some_and(|entry| entry.value.is_some())
    }

    pub fn ref_count(&self, key: &ResourceKey) -> usize {
        self.inner
            .entries
            .get(key)
            .map(|entry| entry.ref_count)
            .unwrap_or(0)
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Drop the cached value for `key`; handles stay valid.
    pub fn invalidate(&self, key: &ResourceKey) -> bool {
        let had_value = self
            .inner
            .entries
            .get_mut(key)
            .and_then(|mut entry| entry.value.take())
            .is_some();

        if had_value {
            self.emit(CacheEvent::Removed { key: key.clone() });
        }
        had_value
    }

    /// Invalidate every entry of `kind`. Returns the invalidated keys.
    pub fn invalidate_kind(&self, kind: ResourceKind) -> Vec<ResourceKey> {
        self.invalidate_where(|key| key.kind == kind)
    }

    /// Invalidate everything, e.g. on sign-out.
    pub fn invalidate_all(&self) -> Vec<ResourceKey> {
        self.invalidate_where(|_| true)
    }

    fn invalidate_where<F>(&self, predicate: F) -> Vec<ResourceKey>
    where
        F: Fn(&ResourceKey) -> bool,
    {
        let mut invalidated = Vec::new();
        for mut entry in self.inner.entries.iter_mut() {
            if predicate(entry.key()) && entry.value_mut().value.take().is_some() {
                invalidated.push(entry.key().clone());
            }
        }

        for key in &invalidated {
            self.emit(CacheEvent::Removed { key: key.clone() });
        }
        invalidated
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    fn emit(&self, event: CacheEvent) {
        // Ignore errors - just means no subscribers currently
        let _ = self.inner.events.send(event);
    }
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new()
    }
}

/// A consumer's claim on one cache entry.
pub struct CacheHandle {
    cache: ResourceCache,
    key: ResourceKey,
}

impl CacheHandle {
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn value(&self) -> Option<Value> {
        self.cache.get(&self.key)
    }

    pub fn get_as<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        self.cache.get_as(&self.key)
    }
}

impl fmt::Debug for CacheHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheHandle").field("key", &self.key).finish()
    }
}

impl Drop for CacheHandle {
    fn drop(&mut self) {
        self.cache.release(&self.key);
    }
}
