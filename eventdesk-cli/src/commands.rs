use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use eventdesk_client::api::SortDirection;
use eventdesk_client::{
    CacheEvent, ClientConfig, CredentialStore, EventDeskClient, EventQuery, FileCredentialStore,
    PersistedCredential,
};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::output::OutputManager;

pub struct CommandExecutor {
    client: EventDeskClient,
    store: Arc<FileCredentialStore>,
    output: OutputManager,
}

impl CommandExecutor {
    /// Build the client and load the saved session, if any.
    pub async fn new(
        config: ClientConfig,
        store: FileCredentialStore,
        output: OutputManager,
    ) -> Result<Self> {
        let client = EventDeskClient::new(config)?;
        let store = Arc::new(store);
        if client.restore_credentials(store.as_ref()).await? {
            debug!(path = %store.path().display(), "Loaded saved session");
        }

        Ok(Self {
            client,
            store,
            output,
        })
    }

    /// Write the current session back to disk.
    ///
    /// Commands may refresh or clear the credential on the way.
    pub async fn save_session(&self) -> Result<()> {
        let snapshot = self.client.credentials().snapshot();
        if snapshot.is_authenticated() {
            self.store
                .save(&PersistedCredential::from(&snapshot))
                .await?;
        } else {
            self.store.clear().await?;
        }
        Ok(())
    }

    fn require_session(&self) -> Result<()> {
        if !self.client.credentials().is_authenticated() {
            bail!("not signed in; run `eventdesk login` first");
        }
        Ok(())
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<()> {
        let user = self
            .client
            .login(email, password)
            .await
            .context("login failed")?;
        info!(user_id = user.id, "Signed in");
        println!("{}", self.output.user(&user)?);
        Ok(())
    }

    pub async fn logout(&self) -> Result<()> {
        if let Err(e) = self.client.logout().await {
            warn!(error = %e, "Server rejected logout; local session removed anyway");
        }
        println!("Signed out");
        Ok(())
    }

    pub async fn whoami(&self) -> Result<()> {
        self.require_session()?;
        let user = self.client.auth_user().await?;
        println!("{}", self.output.user(&user)?);
        Ok(())
    }

    pub async fn list_events(
        &self,
        page: u32,
        size: u32,
        sort_by: String,
        desc: bool,
        status: Option<String>,
        search: Option<String>,
    ) -> Result<()> {
        self.require_session()?;
        let direction = if desc {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        };
        let mut query = EventQuery::default()
            .page(page)
            .size(size)
            .sort_by(sort_by, direction);
        if let Some(status) = status {
            query = query.status(status);
        }
        if let Some(search) = search {
            query = query.search(search);
        }

        let events = self.client.list_events(&query).await?;
        println!("{}", self.output.events(&events)?);
        Ok(())
    }

    pub async fn show_event(&self, id: i64) -> Result<()> {
        self.require_session()?;
        let event = self.client.event(id).await?;
        println!("{}", self.output.event(&event)?);
        Ok(())
    }

    pub async fn participants(&self, event_id: i64) -> Result<()> {
        self.require_session()?;
        let participants = self.client.participants(event_id).await?;
        println!("{}", self.output.participants(&participants)?);
        Ok(())
    }

    /// Print the participant list, then every check-in as it happens.
    ///
    /// Ends on Ctrl-C or when the server closes the live channel.
    pub async fn watch(&self, event_id: i64) -> Result<()> {
        self.require_session()?;
        with_persistence(
            &self.client,
            self.store.clone(),
            self.follow_check_ins(event_id),
        )
        .await
    }

    async fn follow_check_ins(&self, event_id: i64) -> Result<()> {
        let mut changes = self.client.cache().subscribe();
        let watch = self.client.watch_participants(event_id).await?;
        let Some(subscription) = watch.subscription() else {
            bail!("live updates unavailable for event {event_id}");
        };

        let participants = watch.participants()?;
        println!("{}", self.output.participants(&participants)?);
        let mut checked_in: HashSet<i64> = participants
            .iter()
            .filter(|p| p.is_checked_in())
            .map(|p| p.user.id)
            .collect();

        let closed = subscription.closed();
        tokio::pin!(closed);

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, stopping");
                    return Ok(());
                }
                state = &mut closed => {
                    bail!("live updates ended ({state})");
                }
                change = changes.recv() => match change {
                    Ok(CacheEvent::Updated { key }) if &key == watch.key() => {
                        for participant in watch.participants()? {
                            if participant.is_checked_in() && checked_in.insert(participant.user.id) {
                                println!("{}", self.output.check_in(&participant)?);
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Cache notifications lagged");
                    }
                    Err(RecvError::Closed) => return Ok(()),
                },
            }
        }
    }

    pub async fn check_in(&self, token: &str) -> Result<()> {
        self.require_session()?;
        let attendance = self.client.check_in(token).await?;
        println!("{}", self.output.value(&attendance)?);
        Ok(())
    }

    pub async fn join(&self, token: &str) -> Result<()> {
        self.require_session()?;
        let joined = self.client.join_event(token).await?;
        println!("{}", self.output.value(&joined)?);
        Ok(())
    }
}

/// Run `task` while `store` mirrors the credential state.
///
/// The mirror is stopped and joined whether `task` succeeds or not.
async fn with_persistence<F, T>(
    client: &EventDeskClient,
    store: Arc<dyn CredentialStore>,
    task: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let cancel = CancellationToken::new();
    let persistence = client.persist_credentials(store, cancel.clone());

    let result = task.await;

    cancel.cancel();
    if let Err(e) = persistence.await {
        warn!(error = %e, "Credential persistence task failed");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventdesk_client::{MemoryCredentialStore, TokenResponse};
    use std::time::Duration;

    #[tokio::test]
    async fn test_persistence_stops_when_task_fails() {
        let client = EventDeskClient::new(ClientConfig::default()).unwrap();
        let store = Arc::new(MemoryCredentialStore::new());

        let result: Result<()> = with_persistence(&client, store.clone(), async {
            client.credentials().set_token(&TokenResponse::bearer("A"));
            tokio::time::sleep(Duration::from_millis(20)).await;
            bail!("live updates ended (closed-by-error)")
        })
        .await;

        assert!(result.is_err());
        assert_eq!(store.current().unwrap().access_token, "A");

        // The mirror is gone: later changes no longer reach the store.
        client.credentials().clear();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.current().unwrap().access_token, "A");
    }
}
