//! # courier-server
//!
//! Real-time fan-out of provider webhooks to browser clients.
//!
//! - `GET /events`: server-sent event stream, one [`registry::Connection`] per subscriber
//! - Best-effort broadcast via [`dispatcher::Dispatcher`], periodic keep-alive frames
//! - WhatsApp-provider and mail push webhooks with HMAC-SHA256 verification
//! - Mail-provider authorization-code flow and session-gated mailbox routes
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod keepalive;
pub mod mailbox;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod signature;
pub mod subscribe;
pub mod webhooks;

pub use config::ServerConfig;
pub use server::{CourierServer, ServerHandle};
