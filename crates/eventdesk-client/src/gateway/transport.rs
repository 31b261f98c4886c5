use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use tracing::trace;

use super::request::{ApiRequest, ApiResponse};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::http;

/// Sends one request and buffers the response.
///
/// Implementations must not interpret status codes: a 401 is an `Ok`
/// response, only transport failures are `Err`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: &ApiRequest,
        authorization: Option<&HeaderValue>,
    ) -> Result<ApiResponse>;
}

/// [`Transport`] backed by `reqwest`.
pub struct ReqwestTransport {
    client: Client,
    config: Arc<ClientConfig>,
}

impl ReqwestTransport {
    pub fn new(config: Arc<ClientConfig>) -> Result<Self> {
        let client = http::build_client(&config)?;
        Ok(Self { client, config })
    }

    pub fn with_client(client: Client, config: Arc<ClientConfig>) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: &ApiRequest,
        authorization: Option<&HeaderValue>,
    ) -> Result<ApiResponse> {
        let url = self.config.resolve(&request.target)?;
        trace!(method = %request.method, %url, "Dispatching request");

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .headers(request.headers.clone());
        if let Some(authorization) = authorization {
            builder = builder.header(AUTHORIZATION, authorization.clone());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let url = response.url().to_string();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(ApiResponse {
            status,
            url,
            headers,
            body,
        })
    }
}
