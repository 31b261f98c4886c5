//! Live updates pushed by the server.
//!
//! - [`sse`]: incremental `text/event-stream` decoding
//! - [`PushSource`]: opens authenticated push connections
//! - [`LiveUpdates`]: per-resource subscriptions that patch the cache

pub mod sse;
mod source;
mod subscriber;

pub use source::{EventStream, HttpPushSource, PushSource, decode_stream};
pub use sse::{ServerEvent, SseDecoder};
pub use subscriber::{
    CHECK_IN_EVENT, EventPatch, FieldPatch, LiveUpdates, SubscriptionHandle, SubscriptionState,
};
