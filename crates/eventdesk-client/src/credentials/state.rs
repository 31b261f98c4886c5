//! Shared, injectable credential state.

use std::sync::Arc;

use reqwest::header::HeaderValue;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::types::{AuthSnapshot, DEFAULT_TOKEN_TYPE, PersistedCredential, TokenResponse, UserProfile};

/// Process-wide credential container.
///
/// Cloning is cheap and every clone observes the same state. Tests create
/// their own instance instead of sharing a global one.
#[derive(Clone)]
pub struct CredentialState {
    inner: Arc<watch::Sender<AuthSnapshot>>,
}

impl CredentialState {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(AuthSnapshot::default());
        Self { inner: Arc::new(tx) }
    }

    /// Rehydrate from the persisted subset written by a previous session.
    pub fn from_persisted(persisted: PersistedCredential) -> Self {
        let state = Self::new();
        state.restore(persisted);
        state
    }

    /// Replace the current credential with a persisted one.
    pub fn restore(&self, persisted: PersistedCredential) {
        self.inner.send_modify(|snapshot| {
            let generation = snapshot.generation + 1;
            *snapshot = AuthSnapshot {
                access_token: persisted.access_token,
                token_type: if persisted.token_type.is_empty() {
                    DEFAULT_TOKEN_TYPE.to_string()
                } else {
                    persisted.token_type
                },
                user: persisted.user,
                refresh_token: None,
                generation,
            };
            debug!(generation, "Credential restored");
        });
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.inner.borrow().clone()
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.inner.borrow().generation
    }

    #[inline]
    pub fn is_authenticated(&self) -> bool {
        self.inner.borrow().is_authenticated()
    }

    /// Header value for the current credential together with the
    /// generation it was read at.
    pub fn authorization(&self) -> (Option<HeaderValue>, u64) {
        let snapshot = self.inner.borrow();
        let value = snapshot.authorization().and_then(|raw| {
            HeaderValue::from_str(&raw)
                .map_err(|_| warn!("Stored access token is not a valid header value; ignoring"))
                .ok()
        });
        (value, snapshot.generation)
    }

    /// Store a token pair from login or refresh.
    ///
    /// The refresh token is only replaced when the response carries one.
    pub fn set_token(&self, token: &TokenResponse) {
        self.inner.send_modify(|snapshot| {
            snapshot.access_token = token.access_token.clone();
            snapshot.token_type = token
                .token_type
                .as_deref()
                .filter(|t| !t.is_empty())
                .unwrap_or(DEFAULT_TOKEN_TYPE)
                .to_string();
            if let Some(refresh_token) = &token.refresh_token {
                snapshot.refresh_token = Some(refresh_token.clone());
            }
            snapshot.generation += 1;
            debug!(generation = snapshot.generation, "Credential updated");
        });
    }

    pub fn set_user(&self, user: UserProfile) {
        self.inner.send_modify(|snapshot| {
            snapshot.user = Some(user);
        });
    }

    /// Reset to the signed-out state.
    pub fn clear(&self) {
        self.inner.send_modify(|snapshot| {
            let generation = snapshot.generation + 1;
            *snapshot = AuthSnapshot {
                generation,
                ..AuthSnapshot::default()
            };
            debug!(generation, "Credential cleared");
        });
    }

    /// Observe every change to the credential state.
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.inner.subscribe()
    }
}

impl Default for CredentialState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CredentialState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.inner.borrow();
        f.debug_struct("CredentialState")
            .field("authenticated", &snapshot.is_authenticated())
            .field("token_type", &snapshot.token_type)
            .field("generation", &snapshot.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_token_defaults_type_and_bumps_generation() {
        let state = CredentialState::new();
        assert!(!state.is_authenticated());
        assert_eq!(state.authorization().0, None);

        state.set_token(&TokenResponse {
            access_token: "A".to_string(),
            token_type: None,
            refresh_token: Some("R1".to_string()),
        });

        let (header, generation) = state.authorization();
        assert_eq!(header.unwrap(), "Bearer A");
        assert_eq!(generation, 1);

        // Refresh without a new refresh token keeps the old one.
        state.set_token(&TokenResponse::bearer("B"));
        let snapshot = state.snapshot();
        assert_eq!(snapshot.access_token, "B");
        assert_eq!(snapshot.refresh_token.as_deref(), Some("R1"));
        assert_eq!(snapshot.generation, 2);
    }

    #[test]
    fn test_clear_resets_everything() {
        let state = CredentialState::new();
        state.set_token(&TokenResponse::bearer("A"));
        state.set_user(UserProfile {
            id: 1,
            email: "a@b.edu".to_string(),
            name: None,
            extra: Default::default(),
        });

        state.clear();

        let snapshot = state.snapshot();
        assert!(!snapshot.is_authenticated());
        assert!(snapshot.user.is_none());
        assert!(snapshot.refresh_token.is_none());
        assert_eq!(snapshot.token_type, "Bearer");
        assert_eq!(snapshot.generation, 2);
    }

    #[test]
    fn test_clones_share_state() {
        let state = CredentialState::new();
        let other = state.clone();
        other.set_token(&TokenResponse::bearer("A"));
        assert!(state.is_authenticated());
    }

    #[test]
    fn test_from_persisted() {
        let state = CredentialState::from_persisted(PersistedCredential {
            access_token: "A".to_string(),
            token_type: String::new(),
            user: None,
        });
        assert_eq!(state.authorization().0.unwrap(), "Bearer A");
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let state = CredentialState::new();
        let mut rx = state.subscribe();

        state.set_token(&TokenResponse::bearer("A"));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().access_token, "A");
    }
}
