//! Participant endpoints and live check-in tracking.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::cache::{CacheHandle, ResourceKey, ResourceKind};
use crate::client::EventDeskClient;
use crate::credentials::UserProfile;
use crate::error::Result;
use crate::gateway::ApiRequest;
use crate::live::{FieldPatch, SubscriptionHandle, SubscriptionState};

/// A user's registration for an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: i64,
    pub event_id: i64,
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
    /// Set once the participant has checked in.
    #[serde(default)]
    pub check_in_time: Option<DateTime<Utc>>,
    pub user: UserProfile,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Participant {
    pub fn is_checked_in(&self) -> bool {
        self.check_in_time.is_some()
    }
}

#[derive(Debug, Serialize)]
struct EmailsRequest<'a> {
    emails: &'a [String],
}

/// Participant list of one event, kept current by live check-ins.
///
/// Dropping the watch closes the live connection and releases the cache
/// entry.
#[derive(Debug)]
pub struct ParticipantsWatch {
    subscription: Option<SubscriptionHandle>,
    entry: CacheHandle,
}

impl ParticipantsWatch {
    pub fn key(&self) -> &ResourceKey {
        self.entry.key()
    }

    /// Current participants as cached.
    pub fn participants(&self) -> Result<Vec<Participant>> {
        Ok(self.entry.get_as()?.unwrap_or_default())
    }

    /// `None` when no live connection could be started.
    pub fn subscription(&self) -> Option<&SubscriptionHandle> {
        self.subscription.as_ref()
    }

    pub fn live_state(&self) -> Option<SubscriptionState> {
        self.subscription.as_ref().map(SubscriptionHandle::state)
    }
}

pub(crate) fn attendants_key(event_id: i64) -> ResourceKey {
    ResourceKey::new(ResourceKind::Attendants, event_id)
}

impl EventDeskClient {
    /// Participants of an event.
    pub async fn participants(&self, event_id: i64) -> Result<Vec<Participant>> {
        self.fetch_cached(
            &attendants_key(event_id),
            ApiRequest::get(format!("/attendants/{event_id}")),
        )
        .await
    }

    /// Load the participant list and keep it updated with live check-ins.
    ///
    /// The live connection is only opened after the initial load succeeded.
    /// Without a credential the list is still returned, without live updates.
    #[instrument(skip(self))]
    pub async fn watch_participants(&self, event_id: i64) -> Result<ParticipantsWatch> {
        let key = attendants_key(event_id);
        let entry = self.cache().retain(key.clone());
        self.participants(event_id).await?;

        let subscription = self.live().subscribe(key, Arc::new(FieldPatch::check_in()));
        debug!(live = subscription.is_some(), "Watching participants");

        Ok(ParticipantsWatch {
            subscription,
            entry,
        })
    }

    pub async fn add_participants(&self, event_id: i64, emails: &[String]) -> Result<()> {
        let request = ApiRequest::post(format!("/events/{event_id}/participants"))
            .json(&EmailsRequest { emails })?;
        self.gateway().send_empty(&request).await?;
        self.invalidate(&[attendants_key(event_id)], &[ResourceKind::Events])
            .await;
        Ok(())
    }

    pub async fn remove_participants(&self, event_id: i64, emails: &[String]) -> Result<()> {
        let request = ApiRequest::delete(format!("/events/{event_id}/participants"))
            .json(&EmailsRequest { emails })?;
        self.gateway().send_empty(&request).await?;
        self.invalidate(&[attendants_key(event_id)], &[ResourceKind::Events])
            .await;
        Ok(())
    }

    pub async fn delete_participant(&self, event_id: i64, user_id: i64) -> Result<()> {
        let request = ApiRequest::delete(format!("/attendants/{event_id}/{user_id}"));
        self.gateway().send_empty(&request).await?;
        self.invalidate(&[attendants_key(event_id)], &[ResourceKind::Events])
            .await;
        Ok(())
    }

    /// Check the signed-in user into the event identified by `event_token`.
    ///
    /// Watchers of that event learn about it through the live channel.
    pub async fn check_in(&self, event_token: &str) -> Result<Value> {
        let request = ApiRequest::post(format!("/attendants/check-in/{event_token}"));
        self.gateway().send_json(&request).await
    }

    pub async fn cancel_my_registration(&self, event_id: i64) -> Result<()> {
        let request = ApiRequest::delete(format!("/attendants/my-registration/{event_id}"));
        self.gateway().send_empty(&request).await?;
        self.invalidate(&[], &[ResourceKind::Events]).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_participant_from_server_json() {
        let raw = json!({
            "id": 3,
            "event_id": 5,
            "joined_at": "2026-03-01T08:00:00Z",
            "check_in_time": null,
            "user": {
                "id": 7,
                "email": "a@x.edu",
                "name": "An",
                "phone_number": "0900",
                "enabled": true,
                "roles": ["USER"],
                "unit": null
            }
        });

        let participant: Participant = serde_json::from_value(raw).unwrap();
        assert_eq!(participant.user.id, 7);
        assert!(!participant.is_checked_in());
        assert_eq!(participant.user.extra["phone_number"], "0900");
    }

    #[test]
    fn test_checked_in_participant() {
        let participant: Participant = serde_json::from_value(json!({
            "id": 3,
            "event_id": 5,
            "check_in_time": "2026-03-01T09:15:00Z",
            "user": {"id": 7, "email": "a@x.edu"}
        }))
        .unwrap();
        assert!(participant.is_checked_in());
        assert!(participant.joined_at.is_none());
    }
}
