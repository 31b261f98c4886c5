//! Core credential types.

use serde::{Deserialize, Serialize};

/// Token scheme used when the server does not name one.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Body returned by the login and refresh endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl TokenResponse {
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: Some(DEFAULT_TOKEN_TYPE.to_string()),
            refresh_token: None,
        }
    }
}

/// Profile of the signed-in user, as returned by `/auth/auth-user`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Remaining server fields (roles, unit, phone number...) kept verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Point-in-time copy of the credential state.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthSnapshot {
    /// Empty when signed out.
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub user: Option<UserProfile>,
    /// Bumped on every set or clear; lets the gateway tell whether
    /// another caller already replaced the credential it used.
    pub generation: u64,
}

impl Default for AuthSnapshot {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            refresh_token: None,
            token_type: DEFAULT_TOKEN_TYPE.to_string(),
            user: None,
            generation: 0,
        }
    }
}

impl AuthSnapshot {
    #[inline]
    pub fn is_authenticated(&self) -> bool {
        !self.access_token.is_empty()
    }

    /// `"<tokenType> <accessToken>"`, or `None` when signed out.
    pub fn authorization(&self) -> Option<String> {
        if self.access_token.is_empty() {
            return None;
        }
        let token_type = if self.token_type.is_empty() {
            DEFAULT_TOKEN_TYPE
        } else {
            self.token_type.as_str()
        };
        Some(format!("{} {}", token_type, self.access_token))
    }
}

/// The subset of credential state that survives restarts.
///
/// Never includes the refresh token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedCredential {
    pub access_token: String,
    pub token_type: String,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

impl From<&AuthSnapshot> for PersistedCredential {
    fn from(snapshot: &AuthSnapshot) -> Self {
        Self {
            access_token: snapshot.access_token.clone(),
            token_type: snapshot.token_type.clone(),
            user: snapshot.user.clone(),
        }
    }
}
