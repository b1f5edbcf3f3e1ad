//! HTTP/SSE gateway: bearer-auth'd REST surface for creating chats,
//! sending agent messages, resuming approvals, and streaming a channel's
//! output as Server-Sent Events. Feature-gated on `gateway`.

#[cfg(feature = "gateway")]
pub mod auth;
#[cfg(feature = "gateway")]
pub mod daemon;
#[cfg(feature = "gateway")]
pub mod routes;

#[cfg(feature = "gateway")]
pub use daemon::start_gateway;
#[cfg(feature = "gateway")]
pub use routes::GatewayState;
