//! Authenticated request pipeline.
//!
//! - [`ApiRequest`] / [`ApiResponse`]: transport-neutral request and response
//! - [`Transport`]: the seam between the gateway and the HTTP stack
//! - [`RefreshLock`]: single-flight guard for credential refresh
//! - [`Gateway`]: attaches credentials and runs the refresh-and-retry protocol

mod lock;
mod request;
mod service;
mod transport;

pub use lock::{RefreshGuard, RefreshLock};
pub use request::{ApiRequest, ApiResponse};
pub use service::Gateway;
pub use transport::{ReqwestTransport, Transport};
