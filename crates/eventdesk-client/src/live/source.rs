//! Push connection sources.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL, HeaderValue};
use tracing::debug;

use super::sse::{SseDecoder, ServerEvent};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::http;

/// Decoded events of one push connection, in transport order.
pub type EventStream = BoxStream<'static, Result<ServerEvent>>;

/// Opens authenticated server-push connections.
#[async_trait]
pub trait PushSource: Send + Sync {
    /// Open the channel at `target`.
    ///
    /// Resolves once the server accepted the connection; a rejected
    /// handshake is an error, not an empty stream.
    async fn open(&self, target: &str, authorization: HeaderValue) -> Result<EventStream>;
}

/// [`PushSource`] over HTTP `text/event-stream`.
pub struct HttpPushSource {
    client: Client,
    config: Arc<ClientConfig>,
}

impl HttpPushSource {
    pub fn new(config: Arc<ClientConfig>) -> Result<Self> {
        let client = http::build_stream_client(&config)?;
        Ok(Self { client, config })
    }

    pub fn with_client(client: Client, config: Arc<ClientConfig>) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl PushSource for HttpPushSource {
    async fn open(&self, target: &str, authorization: HeaderValue) -> Result<EventStream> {
        let url = self.config.resolve(target)?;
        debug!(%url, "Opening event stream");

        let response = self
            .client
            .get(url)
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
            .header(AUTHORIZATION, authorization)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let url = response.url().to_string();
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::http_status(status, url, message));
        }

        Ok(decode_stream(response.bytes_stream()).boxed())
    }
}

/// Turn a byte stream into a stream of server-sent events.
///
/// The stream ends when the byte stream ends; a trailing event without its
/// terminating blank line is dropped.
pub fn decode_stream<S, E>(bytes: S) -> impl Stream<Item = Result<ServerEvent>> + Send + 'static
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Into<ClientError> + Send + 'static,
{
    let state = (Box::pin(bytes), SseDecoder::new(), VecDeque::new());

    stream::unfold(state, |(mut bytes, mut decoder, mut pending)| async move {
        loop {
            if let Some(event) = pending.pop_front() {
                return Some((Ok(event), (bytes, decoder, pending)));
            }

            match bytes.next().await {
                Some(Ok(chunk)) => pending.extend(decoder.decode(&chunk)),
                Some(Err(e)) => return Some((Err(e.into()), (bytes, decoder, pending))),
                None => return None,
            }
        }
    })
}
