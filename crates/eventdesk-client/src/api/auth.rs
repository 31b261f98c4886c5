//! Authentication endpoints.

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::cache::{ResourceKey, ResourceKind};
use crate::client::EventDeskClient;
use crate::credentials::{TokenResponse, UserProfile};
use crate::error::{ClientError, Result};
use crate::gateway::ApiRequest;

/// Cache id of the signed-in user's profile.
const AUTH_USER_ID: &str = "me";

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// Account registration form.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<i64>,
}

#[derive(Debug, Serialize)]
struct ChangePasswordRequest<'a> {
    old_password: &'a str,
    new_password: &'a str,
    confirm_new_password: &'a str,
}

#[derive(Debug, Serialize)]
struct ResetPasswordRequest<'a> {
    token: &'a str,
    new_password: &'a str,
}

impl EventDeskClient {
    /// Sign in and load the user's profile.
    ///
    /// The credential is stored as soon as the server issues it; if the
    /// profile request then fails the error is returned but the session
    /// stays signed in.
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile> {
        let request = ApiRequest::post("/auth/login").json(&LoginRequest { email, password })?;
        let token: TokenResponse = self.gateway().send_json(&request).await?;
        if token.access_token.is_empty() {
            return Err(ClientError::NotAuthenticated);
        }

        self.credentials().set_token(&token);
        info!("Signed in");
        self.cache().invalidate_kind(ResourceKind::Auth);

        self.auth_user().await
    }

    /// Fetch the signed-in user's profile and store it with the credential.
    pub async fn auth_user(&self) -> Result<UserProfile> {
        let key = ResourceKey::new(ResourceKind::Auth, AUTH_USER_ID);
        let user: UserProfile = self
            .fetch_cached(&key, ApiRequest::get("/auth/auth-user"))
            .await?;
        self.credentials().set_user(user.clone());
        Ok(user)
    }

    pub async fn register(&self, form: &RegisterRequest) -> Result<()> {
        let request = ApiRequest::post("/auth/register").json(form)?;
        self.gateway().send_empty(&request).await?;
        self.cache().invalidate_kind(ResourceKind::Auth);
        Ok(())
    }

    /// Sign out.
    ///
    /// Local state is cleared whatever the server answers: the credential,
    /// every cached entry and every live connection.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<()> {
        let result = self
            .gateway()
            .send_empty(&ApiRequest::post("/auth/logout"))
            .await;
        if let Err(e) = &result {
            warn!(error = %e, "Server logout failed, clearing local session anyway");
        }

        self.credentials().clear();
        self.live().shutdown();
        self.cache().invalidate_all();
        info!("Signed out");

        result
    }

    pub async fn change_password(
        &self,
        old_password: &str,
        new_password: &str,
        confirm_password: &str,
    ) -> Result<()> {
        let request = ApiRequest::post("/auth/change-password").json(&ChangePasswordRequest {
            old_password,
            new_password,
            confirm_new_password: confirm_password,
        })?;
        self.gateway().send_empty(&request).await
    }

    /// Ask the server to mail a password reset link.
    pub async fn forgot_password(&self, email: &str) -> Result<()> {
        let request = ApiRequest::post("/auth/forgot-password")
            .json(&serde_json::json!({ "email": email }))?;
        self.gateway().send_empty(&request).await
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<()> {
        let request = ApiRequest::post("/auth/reset-password").json(&ResetPasswordRequest {
            token,
            new_password,
        })?;
        self.gateway().send_empty(&request).await
    }
}
