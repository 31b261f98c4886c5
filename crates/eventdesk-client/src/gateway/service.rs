//! Authenticated request gateway.
//!
//! Attaches the current credential to every call and recovers from a
//! single 401 by refreshing the credential once, shared by all callers.

use std::sync::Arc;

use reqwest::StatusCode;
use reqwest::header::HeaderValue;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use super::lock::RefreshLock;
use super::request::{ApiRequest, ApiResponse};
use super::transport::Transport;
use crate::config::ClientConfig;
use crate::credentials::{CredentialState, TokenResponse};
use crate::error::{ClientError, Result};

/// Gateway through which every API call is made.
pub struct Gateway {
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
    credentials: CredentialState,
    refresh_lock: RefreshLock,
}

impl Gateway {
    pub fn new(
        config: Arc<ClientConfig>,
        transport: Arc<dyn Transport>,
        credentials: CredentialState,
    ) -> Self {
        Self {
            config,
            transport,
            credentials,
            refresh_lock: RefreshLock::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn credentials(&self) -> &CredentialState {
        &self.credentials
    }

    pub fn refresh_lock(&self) -> &RefreshLock {
        &self.refresh_lock
    }

    /// Perform `request` with the current credential attached.
    ///
    /// Returns the final response, success or failure, after at most one
    /// retry. Only transport failures are `Err`.
    ///
    /// On a 401 for a non-exempt path:
    /// - if no refresh is running, this call refreshes, stores the new
    ///   credential and retries; a failed refresh clears the credential and
    ///   returns the original 401
    /// - if a refresh is running, this call waits for it and retries with
    ///   whatever credential it left behind
    #[instrument(skip(self, request), fields(method = %request.method, target = %request.target))]
    pub async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse> {
        // Read before waiting: a request issued while a refresh runs belongs
        // to that refresh, whatever its outcome.
        let issued = self.credentials.generation();
        self.refresh_lock.wait_for_unlock().await;

        let (authorization, _) = self.credentials.authorization();
        let response = self.dispatch(request, authorization.as_ref()).await?;

        if response.status != StatusCode::UNAUTHORIZED || self.config.is_exempt(&request.target)
        {
            return Ok(response);
        }

        debug!("Received 401, entering refresh protocol");

        match self.refresh_lock.try_acquire() {
            Some(_guard) => {
                // Double-check after acquiring the lock: another caller may have
                // refreshed or cleared the credential since this call was issued.
                if self.credentials.generation() != issued {
                    debug!("Credential changed since issue, retrying without refresh");
                    return self.retry(request).await;
                }

                match self.refresh().await {
                    Ok(token) => {
                        self.credentials.set_token(&token);
                        info!("Credential refreshed");
                        self.retry(request).await
                    }
                    Err(e) => {
                        warn!(error = %e, "Credential refresh failed, clearing session");
                        self.credentials.clear();
                        Ok(response)
                    }
                }
            }
            None => {
                debug!("Refresh already in flight, waiting for it");
                self.refresh_lock.wait_for_unlock().await;
                self.retry(request).await
            }
        }
    }

    /// [`Self::execute`], then decode a 2xx body as `T`.
    pub async fn send_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T> {
        self.execute(request).await?.into_result()?.json()
    }

    /// [`Self::execute`] for calls whose body is not needed.
    pub async fn send_empty(&self, request: &ApiRequest) -> Result<()> {
        self.execute(request).await?.into_result().map(|_| ())
    }

    async fn retry(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let (authorization, _) = self.credentials.authorization();
        let response = self.dispatch(request, authorization.as_ref()).await?;
        if response.is_unauthorized() {
            debug!("Retry still unauthorized, giving up");
        }
        Ok(response)
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        authorization: Option<&HeaderValue>,
    ) -> Result<ApiResponse> {
        self.transport.send(request, authorization).await
    }

    /// Exchange the current credential for a new one.
    #[instrument(skip(self))]
    async fn refresh(&self) -> Result<TokenResponse> {
        let request = ApiRequest::post(self.config.refresh_path.clone());
        let (authorization, _) = self.credentials.authorization();
        let response = self.dispatch(&request, authorization.as_ref()).await?;

        if !response.is_success() {
            return Err(ClientError::RefreshFailed {
                reason: format!("HTTP {}: {}", response.status, response.error_message()),
            });
        }

        let token: TokenResponse = response.json().map_err(|e| ClientError::RefreshFailed {
            reason: format!("malformed token response: {e}"),
        })?;
        if token.access_token.is_empty() {
            return Err(ClientError::RefreshFailed {
                reason: "empty access token".to_string(),
            });
        }

        Ok(token)
    }
}
