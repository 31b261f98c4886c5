use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{ClientError, Result};

/// Description of one outbound API call.
///
/// `target` is either a path relative to the configured base URL
/// (`/events/5`, `attendants/5`) or an absolute `http(s)://` URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub target: String,
    pub body: Option<serde_json::Value>,
    pub headers: HeaderMap,
}

impl ApiRequest {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            body: None,
            headers: HeaderMap::new(),
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::GET, target)
    }

    pub fn post(target: impl Into<String>) -> Self {
        Self::new(Method::POST, target)
    }

    pub fn put(target: impl Into<String>) -> Self {
        Self::new(Method::PUT, target)
    }

    pub fn delete(target: impl Into<String>) -> Self {
        Self::new(Method::DELETE, target)
    }

    /// Attach a JSON body.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// A fully buffered API response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn new(status: StatusCode, url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            url: url.into(),
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    #[inline]
    pub fn is_unauthorized(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
    }

    /// Decode the body as JSON. An empty body decodes as `null`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        if self.body.is_empty() {
            return Ok(serde_json::from_value(serde_json::Value::Null)?);
        }
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Human-readable failure reason: the server's `message` field when the
    /// body is a JSON error object, the raw body otherwise.
    pub fn error_message(&self) -> String {
        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&self.body) {
            for field in ["message", "error", "detail"] {
                if let Some(message) = value.get(field).and_then(|m| m.as_str()) {
                    return message.to_string();
                }
            }
        }
        let text = self.text();
        if text.is_empty() {
            self.status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string()
        } else {
            text
        }
    }

    /// Turn a non-2xx response into [`ClientError::HttpStatus`].
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ClientError::http_status(
                self.status,
                self.url.clone(),
                self.error_message(),
            ))
        }
    }
}
