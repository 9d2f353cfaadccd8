//! Server configuration.

use courier_core::security::{OAuthClientConfig, GOOGLE_OAUTH};
use serde::{Deserialize, Serialize};

/// Shared-secret settings for one inbound webhook.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// HMAC-SHA256 secret. `None` disables signature verification.
    #[serde(default)]
    pub secret: Option<String>,
}

/// Configuration for the courier server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Period of the no-op frame sent to every subscriber.
    pub keepalive_interval_secs: u64,
    /// Frames buffered per subscriber before new frames are dropped for it.
    pub send_queue_capacity: usize,
    /// Message fetches in flight when listing a mailbox.
    pub mail_fetch_concurrency: usize,
    /// Mailbox page size when the caller does not ask for one.
    pub default_page_size: u32,
    /// Base URL of the mail provider's REST API.
    pub mail_api_base: String,
    /// Allowed browser origin. `None` allows any origin.
    #[serde(default)]
    pub cors_origin: Option<String>,
    /// Where the browser lands after a successful login.
    pub frontend_url: String,
    /// WhatsApp-provider webhook.
    #[serde(default)]
    pub wati: WebhookConfig,
    /// Mail-provider push webhook.
    #[serde(default)]
    pub gmail_push: WebhookConfig,
    /// Mail-provider OAuth client. `None` disables login and mailbox routes.
    #[serde(default)]
    pub oauth: Option<OAuthClientConfig>,
    /// Secret for sealing session cookies. `None` uses a per-process key.
    #[serde(default, skip_serializing)]
    pub session_key: Option<String>,
    /// Mark cookies `Secure` (HTTPS deployments).
    #[serde(default)]
    pub cookie_secure: bool,
    /// Seconds to wait for in-flight work during shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            keepalive_interval_secs: 15,
            send_queue_capacity: 256,
            mail_fetch_concurrency: 8,
            default_page_size: 20,
            mail_api_base: GOOGLE_OAUTH.api_base.into(),
            cors_origin: None,
            frontend_url: "/".into(),
            wati: WebhookConfig::default(),
            gmail_push: WebhookConfig::default(),
            oauth: None,
            session_key: None,
            cookie_secure: false,
            shutdown_timeout_secs: 10,
        }
    }
}
