//! HTTP surface: the client-facing port and the admin port, each its own
//! axum router sharing one [`crate::dispatcher::RouterState`].

pub mod admin;
pub mod admin_auth;
pub mod client;
pub mod client_auth;
pub mod health;
pub mod metrics;
pub mod rate_limit;
pub mod request_id;
pub mod status;
