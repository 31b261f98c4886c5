//! Client facade wiring the gateway, cache, credentials and live updates.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{ResourceCache, ResourceKey, ResourceKind};
use crate::config::ClientConfig;
use crate::credentials::{CredentialState, CredentialStore, spawn_persistence};
use crate::error::Result;
use crate::gateway::{ApiRequest, Gateway, ReqwestTransport, Transport};
use crate::live::{HttpPushSource, LiveUpdates, PushSource};

/// Entry point for the event management API.
///
/// Typed endpoints live in [`crate::api`]. Cloning is cheap and clones share
/// credentials, cache and live connections.
#[derive(Clone)]
pub struct EventDeskClient {
    config: Arc<ClientConfig>,
    gateway: Arc<Gateway>,
    credentials: CredentialState,
    cache: ResourceCache,
    live: LiveUpdates,
}

impl EventDeskClient {
    /// Create a client backed by reqwest for both requests and push channels.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let config = Arc::new(config);
        let transport = ReqwestTransport::new(config.clone())?;
        let push = HttpPushSource::new(config.clone())?;
        Ok(Self::with_parts(
            config,
            Arc::new(transport),
            Arc::new(push),
            CredentialState::new(),
        ))
    }

    /// Assemble a client from explicit parts.
    pub fn with_parts(
        config: Arc<ClientConfig>,
        transport: Arc<dyn Transport>,
        push: Arc<dyn PushSource>,
        credentials: CredentialState,
    ) -> Self {
        let cache = ResourceCache::new();
        let gateway = Arc::new(Gateway::new(
            config.clone(),
            transport,
            credentials.clone(),
        ));
        let live = LiveUpdates::new(config.clone(), push, credentials.clone(), cache.clone());

        Self {
            config,
            gateway,
            credentials,
            cache,
            live,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn credentials(&self) -> &CredentialState {
        &self.credentials
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    pub fn live(&self) -> &LiveUpdates {
        &self.live
    }

    /// Load a previously saved credential into the shared state.
    ///
    /// Returns whether a credential was found.
    pub async fn restore_credentials(&self, store: &dyn CredentialStore) -> Result<bool> {
        match store.load().await? {
            Some(persisted) if !persisted.access_token.is_empty() => {
                self.credentials.restore(persisted);
                info!("Restored saved credential");
                Ok(true)
            }
            _ => {
                debug!("No saved credential");
                Ok(false)
            }
        }
    }

    /// Keep `store` in sync with the credential state until `cancel` fires.
    pub fn persist_credentials(
        &self,
        store: Arc<dyn CredentialStore>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        spawn_persistence(&self.credentials, store, cancel)
    }

    /// Run `request` and write the response into the cache under `key`.
    ///
    /// The value is only kept if someone retains `key`.
    pub(crate) async fn fetch_cached<T: DeserializeOwned>(
        &self,
        key: &ResourceKey,
        request: ApiRequest,
    ) -> Result<T> {
        let value: Value = self.gateway.send_json(&request).await?;
        self.cache.merge(key, value.clone());
        Ok(serde_json::from_value(value)?)
    }

    /// Invalidate entries after a mutation and reload the ones still in use.
    pub(crate) async fn invalidate(&self, keys: &[ResourceKey], kinds: &[ResourceKind]) {
        let mut invalidated: Vec<ResourceKey> = keys
            .iter()
            .filter(|key| self.cache.invalidate(key))
            .cloned()
            .collect();
        for kind in kinds {
            invalidated.extend(self.cache.invalidate_kind(*kind));
        }

        for key in invalidated {
            if self.cache.ref_count(&key) == 0 {
                continue;
            }
            let Some(target) = resource_target(&key) else {
                continue;
            };

            debug!(resource = %key, "Reloading invalidated entry");
            let request = ApiRequest::get(target);
            if let Err(e) = self.fetch_cached::<Value>(&key, request).await {
                warn!(resource = %key, error = %e, "Failed to reload invalidated entry");
            }
        }
    }
}

/// Endpoint that reloads a single cached resource.
fn resource_target(key: &ResourceKey) -> Option<String> {
    match key.kind {
        ResourceKind::Events => Some(format!("/events/{}", key.id)),
        ResourceKind::Attendants => Some(format!("/attendants/{}", key.id)),
        ResourceKind::Auth => Some("/auth/auth-user".to_string()),
        ResourceKind::Users | ResourceKind::Units | ResourceKind::Polls => None,
    }
}

impl std::fmt::Debug for EventDeskClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDeskClient")
            .field("base_url", &self.config.base_url.as_str())
            .field("credentials", &self.credentials)
            .field("cached_entries", &self.cache.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{MemoryCredentialStore, PersistedCredential, TokenResponse};

    #[test]
    fn test_resource_targets() {
        assert_eq!(
            resource_target(&ResourceKey::new(ResourceKind::Attendants, 5)).as_deref(),
            Some("/attendants/5")
        );
        assert_eq!(
            resource_target(&ResourceKey::new(ResourceKind::Events, 9)).as_deref(),
            Some("/events/9")
        );
        assert!(resource_target(&ResourceKey::new(ResourceKind::Polls, 1)).is_none());
    }

    #[tokio::test]
    async fn test_restore_and_persist_credentials() {
        let client = EventDeskClient::new(ClientConfig::default()).unwrap();
        let store = Arc::new(MemoryCredentialStore::new());

        assert!(!client.restore_credentials(store.as_ref()).await.unwrap());

        store
            .save(&PersistedCredential {
                access_token: "A".to_string(),
                token_type: "Bearer".to_string(),
                user: None,
            })
            .await
            .unwrap();
        assert!(client.restore_credentials(store.as_ref()).await.unwrap());
        assert_eq!(client.credentials().authorization().0.unwrap(), "Bearer A");

        let cancel = CancellationToken::new();
        let task = client.persist_credentials(store.clone(), cancel.clone());
        client.credentials().set_token(&TokenResponse::bearer("B"));

        for _ in 0..50 {
            if store.current().is_some_and(|c| c.access_token == "B") {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(store.current().unwrap().access_token, "B");

        cancel.cancel();
        task.await.unwrap();
    }
}
