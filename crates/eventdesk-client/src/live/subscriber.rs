//! Live update subscriptions.
//!
//! One push connection per subscribed [`ResourceKey`], shared by every
//! observer of that key. Incoming events are applied to the cached value
//! in place through [`ResourceCache::patch`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use futures::StreamExt;
use reqwest::header::HeaderValue;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::source::PushSource;
use super::sse::ServerEvent;
use crate::cache::{ResourceCache, ResourceKey};
use crate::config::ClientConfig;
use crate::credentials::CredentialState;

/// Event announcing that a participant checked in.
pub const CHECK_IN_EVENT: &str = "participant-checked-in";

/// Lifecycle of one push connection.
///
/// Closed states are terminal; subscribing again starts a new connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Idle,
    Connecting,
    Streaming,
    ClosedByTeardown,
    ClosedByError,
}

impl SubscriptionState {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ClosedByTeardown | Self::ClosedByError)
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::ClosedByTeardown => "closed-by-teardown",
            Self::ClosedByError => "closed-by-error",
        };
        f.write_str(s)
    }
}

/// Applies one server event to a cached value.
pub trait EventPatch: Send + Sync {
    /// Returns whether `value` was changed.
    fn apply(&self, event: &ServerEvent, value: &mut Value) -> bool;
}

/// Copies selected fields from an event payload onto the matching element
/// of a cached JSON array.
///
/// Elements are matched by an identity path (e.g. `user.id`). Events for
/// entities not already cached are ignored; this patch never inserts.
#[derive(Debug, Clone)]
pub struct FieldPatch {
    event_name: String,
    identity: Vec<String>,
    fields: Vec<String>,
}

impl FieldPatch {
    pub fn new(event_name: impl Into<String>, identity: &[&str], fields: &[&str]) -> Self {
        Self {
            event_name: event_name.into(),
            identity: identity.iter().map(|s| s.to_string()).collect(),
            fields: fields.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Patch applying check-in timestamps to a participant list.
    pub fn check_in() -> Self {
        Self::new(CHECK_IN_EVENT, &["user", "id"], &["check_in_time"])
    }
}

fn lookup<'a>(value: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, segment| current.get(segment))
}

impl EventPatch for FieldPatch {
    fn apply(&self, event: &ServerEvent, value: &mut Value) -> bool {
        if event.event != self.event_name {
            return false;
        }

        let payload: Value = match event.json() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(event = %event.event, error = %e, "Discarding malformed event payload");
                return false;
            }
        };
        let Some(identity) = lookup(&payload, &self.identity).filter(|id| !id.is_null()) else {
            warn!(event = %event.event, "Event payload has no identity, ignoring");
            return false;
        };
        let Some(entries) = value.as_array_mut() else {
            return false;
        };

        let Some(entry) = entries
            .iter_mut()
            .find(|entry| lookup(entry, &self.identity) == Some(identity))
        else {
            debug!(event = %event.event, %identity, "Event for uncached entity, ignoring");
            return false;
        };
        let Some(entry) = entry.as_object_mut() else {
            return false;
        };

        let mut changed = false;
        for field in &self.fields {
            if let Some(incoming) = payload.get(field)
                && entry.get(field) != Some(incoming)
            {
                entry.insert(field.clone(), incoming.clone());
                changed = true;
            }
        }
        changed
    }
}

struct ActiveSubscription {
    id: u64,
    observers: usize,
    cancel: CancellationToken,
    state: watch::Receiver<SubscriptionState>,
}

struct LiveInner {
    source: Arc<dyn PushSource>,
    credentials: CredentialState,
    cache: ResourceCache,
    config: Arc<ClientConfig>,
    active: DashMap<ResourceKey, ActiveSubscription>,
    next_id: AtomicU64,
}

/// Manages live update connections.
#[derive(Clone)]
pub struct LiveUpdates {
    inner: Arc<LiveInner>,
}

impl LiveUpdates {
    pub fn new(
        config: Arc<ClientConfig>,
        source: Arc<dyn PushSource>,
        credentials: CredentialState,
        cache: ResourceCache,
    ) -> Self {
        Self {
            inner: Arc::new(LiveInner {
                source,
                credentials,
                cache,
                config,
                active: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Start (or join) live updates for `key`.
    ///
    /// Returns `None` without opening anything when there is no access
    /// token. The connection lives until the last returned handle is
    /// dropped. Must be called from within a tokio runtime.
    pub fn subscribe(
        &self,
        key: ResourceKey,
        patch: Arc<dyn EventPatch>,
    ) -> Option<SubscriptionHandle> {
        let (authorization, _) = self.inner.credentials.authorization();
        let Some(authorization) = authorization else {
            error!(resource = %key, "No access token, live updates not started");
            return None;
        };

        let mut entry = self.inner.active.entry(key.clone());
        if let MapEntry::Occupied(occupied) = &mut entry {
            let active = occupied.get_mut();
            if !active.state.borrow().is_closed() {
                active.observers += 1;
                debug!(resource = %key, observers = active.observers, "Joined live updates");
                return Some(SubscriptionHandle {
                    inner: self.inner.clone(),
                    key,
                    id: active.id,
                    state: active.state.clone(),
                });
            }
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(SubscriptionState::Idle);

        entry.insert(ActiveSubscription {
            id,
            observers: 1,
            cancel: cancel.clone(),
            state: state_rx.clone(),
        });

        let connection = Connection {
            source: self.inner.source.clone(),
            cache: self.inner.cache.clone(),
            key: key.clone(),
            target: self.inner.config.subscribe_target(&key.id),
            authorization,
            patch,
            cancel,
            state: state_tx,
        };
        tokio::spawn(connection.run());

        Some(SubscriptionHandle {
            inner: self.inner.clone(),
            key,
            id,
            state: state_rx,
        })
    }

    /// Whether an open connection exists for `key`.
    pub fn is_active(&self, key: &ResourceKey) -> bool {
        self.inner
            .active
            .get(key)
            .is_some_and(|active| !active.state.borrow().is_closed())
    }

    pub fn observer_count(&self, key: &ResourceKey) -> usize {
        self.inner
            .active
            .get(key)
            .map(|active| active.observers)
            .unwrap_or(0)
    }

    /// Close every connection, e.g. on sign-out.
    ///
    /// Outstanding handles stay valid but closed; later subscriptions open
    /// new connections.
    pub fn shutdown(&self) {
        info!(count = self.inner.active.len(), "Closing all live updates");
        self.inner.active.retain(|_, active| {
            active.cancel.cancel();
            false
        });
    }
}

impl LiveInner {
    fn release(&self, key: &ResourceKey, id: u64) {
        if let MapEntry::Occupied(mut occupied) = self.active.entry(key.clone()) {
            let active = occupied.get_mut();
            // The slot may already belong to a newer connection.
            if active.id != id {
                return;
            }
            active.observers = active.observers.saturating_sub(1);
            if active.observers == 0 {
                let active = occupied.remove();
                active.cancel.cancel();
                debug!(resource = %key, "Last observer detached, closing live updates");
            }
        }
    }
}

/// Keeps a live update connection open while held.
pub struct SubscriptionHandle {
    inner: Arc<LiveInner>,
    key: ResourceKey,
    id: u64,
    state: watch::Receiver<SubscriptionState>,
}

impl SubscriptionHandle {
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    /// Receiver for state transitions of this connection.
    pub fn watch_state(&self) -> watch::Receiver<SubscriptionState> {
        self.state.clone()
    }

    /// Wait until the connection reaches `Streaming` or closes.
    pub async fn ready(&self) -> SubscriptionState {
        self.wait_for(|state| *state == SubscriptionState::Streaming || state.is_closed())
            .await
    }

    /// Wait until the connection closes and return how it closed.
    pub async fn closed(&self) -> SubscriptionState {
        self.wait_for(SubscriptionState::is_closed).await
    }

    async fn wait_for(&self, f: impl FnMut(&SubscriptionState) -> bool) -> SubscriptionState {
        let mut rx = self.state.clone();
        let reached = rx.wait_for(f).await.map(|state| *state);
        reached.unwrap_or_else(|_| *rx.borrow())
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("key", &self.key)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.inner.release(&self.key, self.id);
    }
}

/// Task driving one push connection.
struct Connection {
    source: Arc<dyn PushSource>,
    cache: ResourceCache,
    key: ResourceKey,
    target: String,
    authorization: HeaderValue,
    patch: Arc<dyn EventPatch>,
    cancel: CancellationToken,
    state: watch::Sender<SubscriptionState>,
}

impl Connection {
    async fn run(self) {
        let closed = self.stream().await;
        self.state.send_replace(closed);
        info!(resource = %self.key, state = %closed, "Live updates closed");
    }

    async fn stream(&self) -> SubscriptionState {
        self.state.send_replace(SubscriptionState::Connecting);

        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return SubscriptionState::ClosedByTeardown,
            opened = self.source.open(&self.target, self.authorization.clone()) => opened,
        };
        let mut events = match opened {
            Ok(events) => events,
            Err(e) => {
                error!(resource = %self.key, error = %e, "Failed to open live updates");
                return SubscriptionState::ClosedByError;
            }
        };

        self.state.send_replace(SubscriptionState::Streaming);
        info!(resource = %self.key, "Live updates streaming");

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return SubscriptionState::ClosedByTeardown,
                next = events.next() => match next {
                    Some(Ok(event)) => {
                        if self.cancel.is_cancelled() {
                            return SubscriptionState::ClosedByTeardown;
                        }
                        let patch = &self.patch;
                        if self.cache.patch(&self.key, |value| patch.apply(&event, value)) {
                            debug!(resource = %self.key, event = %event.event, "Applied live update");
                        }
                    }
                    Some(Err(e)) => {
                        error!(resource = %self.key, error = %e, "Live update stream failed");
                        return SubscriptionState::ClosedByError;
                    }
                    None => {
                        warn!(resource = %self.key, "Live update stream ended by server");
                        return SubscriptionState::ClosedByError;
                    }
                },
            }
        }
    }
}
