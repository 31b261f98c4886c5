//! Credential management module.
//!
//! - [`CredentialState`]: shared access/refresh token container
//! - [`CredentialStore`]: persistence of the whitelisted subset across restarts
//! - [`spawn_persistence`]: keeps a store in sync with the state

mod state;
mod store;
mod types;

pub use state::CredentialState;
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore, spawn_persistence};
pub use types::{AuthSnapshot, DEFAULT_TOKEN_TYPE, PersistedCredential, TokenResponse, UserProfile};
