//! Client for the eventdesk event management API.
//!
//! Every call goes through one [`Gateway`] that attaches the current
//! credential and, on a 401, refreshes it once for all concurrent callers
//! before retrying. Server-pushed check-ins patch the shared
//! [`ResourceCache`] through [`LiveUpdates`].
//!
//! ```no_run
//! use eventdesk_client::{ClientConfig, EventDeskClient};
//!
//! # async fn run() -> eventdesk_client::Result<()> {
//! let client = EventDeskClient::new(ClientConfig::from_env()?)?;
//! client.login("organizer@example.edu", "secret").await?;
//!
//! let watch = client.watch_participants(5).await?;
//! for participant in watch.participants()? {
//!     println!("{} checked in: {}", participant.user.email, participant.is_checked_in());
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod gateway;
pub mod http;
pub mod live;

pub use api::{Event, EventPage, EventQuery, Participant, ParticipantsWatch, RegisterRequest};
pub use cache::{CacheEvent, CacheHandle, ResourceCache, ResourceKey, ResourceKind};
pub use client::EventDeskClient;
pub use config::{ClientConfig, ClientConfigBuilder};
pub use credentials::{
    AuthSnapshot, CredentialState, CredentialStore, FileCredentialStore, MemoryCredentialStore,
    PersistedCredential, TokenResponse, UserProfile,
};
pub use error::{ClientError, Result};
pub use gateway::{ApiRequest, ApiResponse, Gateway, Transport};
pub use live::{EventPatch, FieldPatch, LiveUpdates, PushSource, SubscriptionHandle, SubscriptionState};
