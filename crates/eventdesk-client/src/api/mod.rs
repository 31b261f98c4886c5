//! Typed endpoints, implemented on [`crate::EventDeskClient`].
//!
//! Reads go through the cache under a [`crate::ResourceKey`]; mutations
//! invalidate the entries they affect and reload the ones still watched.

mod attendants;
mod auth;
mod events;

pub use attendants::{Participant, ParticipantsWatch};
pub use auth::RegisterRequest;
pub use events::{Event, EventPage, EventQuery, Pagination, SortDirection};
