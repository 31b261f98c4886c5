use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use url::Url;

use crate::error::{ClientError, Result};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";

pub const DEFAULT_USER_AGENT: &str = concat!("eventdesk-client/", env!("CARGO_PKG_VERSION"));

/// Endpoint that exchanges an expired access token for a new one.
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh-token";

/// Prefix of the per-event check-in push channel.
pub const DEFAULT_SUBSCRIBE_PATH: &str = "/attendants/subscribe";

/// Paths whose 401 responses are returned as-is instead of triggering a refresh.
pub const DEFAULT_EXEMPT_PATHS: [&str; 3] = ["/auth/login", "/auth/refresh-token", "/auth/register"];

const ENV_BASE_URL: &str = "EVENTDESK_BASE_URL";
const ENV_TIMEOUT: &str = "EVENTDESK_TIMEOUT_SECS";
const ENV_CONNECT_TIMEOUT: &str = "EVENTDESK_CONNECT_TIMEOUT_SECS";
const ENV_USER_AGENT: &str = "EVENTDESK_USER_AGENT";

/// Configurable options for the API client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL every relative request path is resolved against
    pub base_url: Url,

    /// Overall timeout for a single request (zero disables it).
    ///
    /// Not applied to push channels, which stay open indefinitely.
    pub timeout: Duration,

    /// Connection timeout
    pub connect_timeout: Duration,

    pub user_agent: String,

    /// Path of the credential refresh endpoint
    pub refresh_path: String,

    /// Paths that never trigger the refresh-and-retry protocol
    pub exempt_paths: Vec<String>,

    /// Prefix of the live update channel; the resource id is appended
    pub subscribe_path: String,

    /// Extra headers sent with every request
    pub headers: HeaderMap,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base URL is valid"),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            refresh_path: DEFAULT_REFRESH_PATH.to_owned(),
            exempt_paths: DEFAULT_EXEMPT_PATHS.iter().map(|p| p.to_string()).collect(),
            subscribe_path: DEFAULT_SUBSCRIBE_PATH.to_owned(),
            headers: ClientConfig::get_default_headers(),
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Build a configuration from `EVENTDESK_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut builder = ClientConfigBuilder::new();

        if let Ok(base_url) = std::env::var(ENV_BASE_URL) {
            builder = builder.base_url(base_url);
        }
        if let Some(secs) = env_secs(ENV_TIMEOUT)? {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = env_secs(ENV_CONNECT_TIMEOUT)? {
            builder = builder.connect_timeout(Duration::from_secs(secs));
        }
        if let Ok(user_agent) = std::env::var(ENV_USER_AGENT) {
            builder = builder.user_agent(user_agent);
        }

        builder.build()
    }

    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("application/json"),
        );
        default_headers
    }

    /// Resolve a request target into an absolute URL.
    ///
    /// Absolute `http(s)://` targets are used verbatim; anything else is
    /// appended to [`Self::base_url`] regardless of leading slashes.
    pub fn resolve(&self, target: &str) -> Result<Url> {
        if is_absolute(target) {
            return Url::parse(target).map_err(|e| ClientError::invalid_url(target, e.to_string()));
        }

        let base = self.base_url.as_str().trim_end_matches('/');
        let path = target.trim_start_matches('/');
        let joined = format!("{base}/{path}");
        Url::parse(&joined).map_err(|e| ClientError::invalid_url(joined, e.to_string()))
    }

    /// Whether `target` is on the refresh-exempt list.
    pub fn is_exempt(&self, target: &str) -> bool {
        let path = self.relative_path(target);
        let path = path.trim_start_matches('/');
        self.exempt_paths
            .iter()
            .any(|exempt| path.starts_with(exempt.trim_start_matches('/')))
    }

    /// Push channel path for a resource id.
    pub fn subscribe_target(&self, id: &str) -> String {
        format!("{}/{}", self.subscribe_path.trim_end_matches('/'), id)
    }

    fn relative_path<'a>(&self, target: &'a str) -> &'a str {
        if !is_absolute(target) {
            return target;
        }
        let base = self.base_url.as_str().trim_end_matches('/');
        match target.strip_prefix(base) {
            Some(rest) => rest,
            // Absolute URL on a different host: keep only the path part.
            None => target
                .split_once("://")
                .and_then(|(_, rest)| rest.find('/').map(|idx| &rest[idx..]))
                .unwrap_or(""),
        }
    }
}

fn is_absolute(target: &str) -> bool {
    target.starts_with("http://") || target.starts_with("https://")
}

fn env_secs(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ClientError::config(format!("{name}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    base_url: Option<String>,
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    user_agent: Option<String>,
    refresh_path: Option<String>,
    exempt_paths: Option<Vec<String>>,
    subscribe_path: Option<String>,
    headers: HeaderMap,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = Some(path.into());
        self
    }

    pub fn exempt_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exempt_paths = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    pub fn subscribe_path(mut self, path: impl Into<String>) -> Self {
        self.subscribe_path = Some(path.into());
        self
    }

    pub fn header(mut self, name: reqwest::header::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn build(self) -> Result<ClientConfig> {
        let mut config = ClientConfig::default();

        if let Some(raw) = self.base_url {
            let url = Url::parse(raw.trim())
                .map_err(|e| ClientError::invalid_url(raw.clone(), e.to_string()))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ClientError::config(format!(
                    "base URL must be http or https, got `{}`",
                    url.scheme()
                )));
            }
            config.base_url = url;
        }
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
        if let Some(timeout) = self.connect_timeout {
            config.connect_timeout = timeout;
        }
        if let Some(user_agent) = self.user_agent {
            config.user_agent = user_agent;
        }
        if let Some(path) = self.refresh_path {
            config.refresh_path = path;
        }
        if let Some(paths) = self.exempt_paths {
            config.exempt_paths = paths;
        }
        if let Some(path) = self.subscribe_path {
            config.subscribe_path = path;
        }
        // Custom headers take precedence over defaults for the same fields
        for (name, value) in self.headers.iter() {
            config.headers.insert(name.clone(), value.clone());
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base: &str) -> ClientConfig {
        ClientConfig::builder().base_url(base).build().unwrap()
    }

    #[test]
    fn test_resolve_relative_paths() {
        let config = config("https://events.example.edu/api/");
        assert_eq!(
            config.resolve("/events/5").unwrap().as_str(),
            "https://events.example.edu/api/events/5"
        );
        assert_eq!(
            config.resolve("attendants/5").unwrap().as_str(),
            "https://events.example.edu/api/attendants/5"
        );
        assert_eq!(
            config.resolve("/events?page=0&size=6").unwrap().as_str(),
            "https://events.example.edu/api/events?page=0&size=6"
        );
    }

    #[test]
    fn test_resolve_absolute_url_verbatim() {
        let config = config("https://events.example.edu/api");
        assert_eq!(
            config.resolve("https://cdn.example.edu/banner.png").unwrap().as_str(),
            "https://cdn.example.edu/banner.png"
        );
    }

    #[test]
    fn test_exempt_paths() {
        let config = config("https://events.example.edu/api");
        assert!(config.is_exempt("/auth/login"));
        assert!(config.is_exempt("auth/refresh-token"));
        assert!(config.is_exempt("/auth/register"));
        assert!(config.is_exempt("https://events.example.edu/api/auth/login"));
        assert!(!config.is_exempt("/auth/auth-user"));
        assert!(!config.is_exempt("/events/5"));
    }

    #[test]
    fn test_rejects_non_http_base() {
        let err = ClientConfig::builder()
            .base_url("ftp://events.example.edu")
            .build()
            .unwrap_err();
        assert!(matches!(err, ClientError::Configuration { .. }));

        let err = ClientConfig::builder().base_url("not a url").build().unwrap_err();
        assert!(matches!(err, ClientError::InvalidUrl { .. }));
    }

    #[test]
    fn test_subscribe_target() {
        let config = ClientConfig::default();
        assert_eq!(config.subscribe_target("42"), "/attendants/subscribe/42");
    }
}
