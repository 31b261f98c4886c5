//! HTTP client construction.

use std::sync::OnceLock;

use reqwest::Client;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::Result;

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Can happen if another crate installed it first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Builder shared by request and push clients.
///
/// The cookie store keeps the server's refresh-token cookie between calls.
pub fn create_client_builder(config: &ClientConfig) -> reqwest::ClientBuilder {
    install_rustls_provider();

    let mut builder = Client::builder()
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .cookie_store(true);

    if !config.connect_timeout.is_zero() {
        builder = builder.connect_timeout(config.connect_timeout);
    }

    builder
}

/// Client for ordinary request/response calls.
pub fn build_client(config: &ClientConfig) -> Result<Client> {
    let mut builder = create_client_builder(config);
    if !config.timeout.is_zero() {
        builder = builder.timeout(config.timeout);
    }
    Ok(builder.build()?)
}

/// Client for long-lived push channels: no overall request timeout.
pub fn build_stream_client(config: &ClientConfig) -> Result<Client> {
    Ok(create_client_builder(config).build()?)
}
