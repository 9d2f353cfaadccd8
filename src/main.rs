//! # courier
//!
//! Webhook relay binary: reads configuration from flags and environment,
//! installs logging, and serves until ctrl-c.

#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use courier_core::security::{env_vars, OAuthClientConfig, GOOGLE_OAUTH};
use courier_server::config::{ServerConfig, WebhookConfig};
use courier_server::CourierServer;
use courier_telemetry::{init_telemetry, parse_level, TelemetryConfig};

/// Relays provider webhooks to browser clients over server-sent events.
#[derive(Parser, Debug)]
#[command(name = "courier", about = "Webhook relay and mailbox notification bridge")]
struct Cli {
    /// Host to bind.
    #[arg(long, env = "COURIER_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind (0 for auto-assign).
    #[arg(long, env = "COURIER_PORT", default_value_t = 3000)]
    port: u16,

    /// Seconds between keep-alive frames on every event stream.
    #[arg(long, env = "COURIER_KEEPALIVE_SECS", default_value_t = 15)]
    keepalive_secs: u64,

    /// Frames buffered per subscriber before frames are dropped for it.
    #[arg(long, env = "COURIER_SEND_QUEUE", default_value_t = 256)]
    send_queue_capacity: usize,

    /// Concurrent message fetches when listing a mailbox.
    #[arg(long, env = "COURIER_MAIL_CONCURRENCY", default_value_t = 8)]
    mail_fetch_concurrency: usize,

    /// Mailbox page size when the client does not ask for one.
    #[arg(long, env = "COURIER_PAGE_SIZE", default_value_t = 20)]
    default_page_size: u32,

    /// Mail provider API base URL.
    #[arg(long, env = "COURIER_MAIL_API", default_value = GOOGLE_OAUTH.api_base)]
    mail_api_base: String,

    /// Allowed browser origin (any origin when unset).
    #[arg(long, env = "COURIER_CORS_ORIGIN")]
    cors_origin: Option<String>,

    /// Where to send the browser after login.
    #[arg(long, env = "COURIER_FRONTEND_URL", default_value = "/")]
    frontend_url: String,

    #[arg(long, env = env_vars::WATI_WEBHOOK_SECRET, hide_env_values = true)]
    wati_secret: Option<String>,

    #[arg(long, env = env_vars::GMAIL_PUSH_SECRET, hide_env_values = true)]
    gmail_push_secret: Option<String>,

    #[arg(long, env = env_vars::GOOGLE_CLIENT_ID)]
    google_client_id: Option<String>,

    #[arg(long, env = env_vars::GOOGLE_CLIENT_SECRET, hide_env_values = true)]
    google_client_secret: Option<String>,

    #[arg(long, env = env_vars::GOOGLE_REDIRECT_URI)]
    google_redirect_uri: Option<String>,

    /// Secret for sealing session cookies (random per process when unset).
    #[arg(long, env = env_vars::SESSION_KEY, hide_env_values = true)]
    session_key: Option<String>,

    /// Mark cookies `Secure`.
    #[arg(long, env = "COURIER_COOKIE_SECURE", default_value_t = false)]
    cookie_secure: bool,

    /// Seconds to wait for open work on shutdown.
    #[arg(long, env = "COURIER_SHUTDOWN_TIMEOUT_SECS", default_value_t = 10)]
    shutdown_timeout_secs: u64,

    /// Default log level; `RUST_LOG` takes precedence.
    #[arg(long, env = "COURIER_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit JSON log lines.
    #[arg(long, env = "COURIER_JSON_LOGS", default_value_t = false)]
    json_logs: bool,
}

impl Cli {
    fn oauth(&self) -> Option<OAuthClientConfig> {
        match (
            &self.google_client_id,
            &self.google_client_secret,
            &self.google_redirect_uri,
        ) {
            (Some(id), Some(secret), Some(redirect)) => {
                Some(OAuthClientConfig::google(id, secret, redirect))
            }
            _ => None,
        }
    }

    fn telemetry(&self) -> Result<TelemetryConfig> {
        let log_level = parse_level(&self.log_level)
            .with_context(|| format!("invalid log level: {}", self.log_level))?;
        Ok(TelemetryConfig {
            log_level,
            json: self.json_logs,
            ..TelemetryConfig::default()
        })
    }

    fn server_config(self) -> ServerConfig {
        let oauth = self.oauth();
        ServerConfig {
            host: self.host,
            port: self.port,
            keepalive_interval_secs: self.keepalive_secs,
            send_queue_capacity: self.send_queue_capacity,
            mail_fetch_concurrency: self.mail_fetch_concurrency,
            default_page_size: self.default_page_size,
            mail_api_base: self.mail_api_base,
            cors_origin: self.cors_origin,
            frontend_url: self.frontend_url,
            wati: WebhookConfig {
                secret: self.wati_secret,
            },
            gmail_push: WebhookConfig {
                secret: self.gmail_push_secret,
            },
            oauth,
            session_key: self.session_key,
            cookie_secure: self.cookie_secure,
            shutdown_timeout_secs: self.shutdown_timeout_secs,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli.telemetry()?).context("Failed to initialize logging")?;

    let config = cli.server_config();
    if config.oauth.is_none() {
        tracing::warn!("Google OAuth not configured, /auth and /api/mail are disabled");
    }
    if config.wati.secret.is_none() {
        tracing::warn!("WATI webhook secret not set, signatures will not be verified");
    }

    let server = CourierServer::new(config);
    let handle = server.listen().await.context("Failed to bind server")?;
    tracing::info!("Server running on http://{}", handle.addr());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    handle.shutdown().await;
    Ok(())
}
