//! Event endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::{ResourceKey, ResourceKind};
use crate::client::EventDeskClient;
use crate::error::Result;
use crate::gateway::ApiRequest;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub max_participants: Option<i64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pagination<T> {
    #[serde(default = "Vec::new")]
    pub content: Vec<T>,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub total_elements: u64,
    #[serde(default)]
    pub number: u32,
    #[serde(default)]
    pub size: u32,
}

impl<T> Default for Pagination<T> {
    fn default() -> Self {
        Self {
            content: Vec::new(),
            total_pages: 0,
            total_elements: 0,
            number: 0,
            size: 0,
        }
    }
}

/// Response of the event listing. Missing parts decode as empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventPage {
    #[serde(default)]
    pub pagination: Pagination<Event>,
    /// Per-status event counts.
    #[serde(default)]
    pub counters: serde_json::Map<String, Value>,
}

/// Sort direction for listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// Query parameters for [`EventDeskClient::list_events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    pub page: u32,
    pub size: u32,
    pub sort_by: String,
    pub sort_dir: SortDirection,
    pub status: Option<String>,
    pub search: Option<String>,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            page: 0,
            size: 6,
            sort_by: "startTime".to_string(),
            sort_dir: SortDirection::Asc,
            status: None,
            search: None,
        }
    }
}

impl EventQuery {
    pub fn page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    pub fn sort_by(mut self, field: impl Into<String>, dir: SortDirection) -> Self {
        self.sort_by = field.into();
        self.sort_dir = dir;
        self
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    /// URL-encoded query string. Empty filters are omitted.
    pub fn to_query_string(&self) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query
            .append_pair("page", &self.page.to_string())
            .append_pair("size", &self.size.to_string())
            .append_pair("sortBy", &self.sort_by)
            .append_pair("sortDir", self.sort_dir.as_str());
        if let Some(status) = self.status.as_deref().filter(|s| !s.is_empty()) {
            query.append_pair("status", status);
        }
        if let Some(search) = self.search.as_deref().filter(|s| !s.is_empty()) {
            query.append_pair("search", search);
        }
        query.finish()
    }
}

impl EventDeskClient {
    pub async fn event(&self, id: i64) -> Result<Event> {
        self.fetch_cached(
            &ResourceKey::new(ResourceKind::Events, id),
            ApiRequest::get(format!("/events/{id}")),
        )
        .await
    }

    pub async fn list_events(&self, query: &EventQuery) -> Result<EventPage> {
        let request = ApiRequest::get(format!("/events?{}", query.to_query_string()));
        let page: Option<EventPage> = self.gateway().send_json(&request).await?;
        Ok(page.unwrap_or_default())
    }

    /// Register the signed-in user for the event identified by `event_token`.
    pub async fn join_event(&self, event_token: &str) -> Result<Value> {
        let request = ApiRequest::post(format!("/events/join/{event_token}"));
        let joined = self.gateway().send_json(&request).await?;
        self.invalidate(&[], &[ResourceKind::Events]).await;
        Ok(joined)
    }
}
