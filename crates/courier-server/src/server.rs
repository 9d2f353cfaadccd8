//! `CourierServer`: axum HTTP server wiring the event stream, webhooks,
//! authorization and mailbox routes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Method};
use axum::middleware;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use courier_core::mail::MailProvider;
use courier_mail::GmailClient;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::auth::{self, AuthService};
use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::health::{self, HealthResponse};
use crate::keepalive::KeepAliveScheduler;
use crate::mailbox;
use crate::registry::ConnectionRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::subscribe;
use crate::webhooks;

/// Upper bound on producing a response head; event streams are unaffected.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub config: Arc<ServerConfig>,
    /// `None` when no OAuth client is configured.
    pub auth: Option<Arc<AuthService>>,
    pub mail: Arc<dyn MailProvider>,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub start_time: Instant,
}

/// The courier server.
pub struct CourierServer {
    config: Arc<ServerConfig>,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<Dispatcher>,
    keepalive: KeepAliveScheduler,
    auth: Option<Arc<AuthService>>,
    mail: Arc<dyn MailProvider>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl CourierServer {
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(config.send_queue_capacity));
        let dispatcher = Arc::new(Dispatcher::new(registry.clone()));
        let keepalive = KeepAliveScheduler::new(
            dispatcher.clone(),
            Duration::from_secs(config.keepalive_interval_secs),
        );
        let auth = AuthService::from_config(&config).map(Arc::new);
        let mail: Arc<dyn MailProvider> = Arc::new(
            GmailClient::new(config.mail_api_base.clone(), config.mail_fetch_concurrency)
                .with_default_page_size(config.default_page_size),
        );

        Self {
            config: Arc::new(config),
            registry,
            dispatcher,
            keepalive,
            auth,
            mail,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }

    /// Replace the mailbox backend.
    pub fn with_mail_provider(mut self, mail: Arc<dyn MailProvider>) -> Self {
        self.mail = mail;
        self
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
            dispatcher: self.dispatcher.clone(),
            config: self.config.clone(),
            auth: self.auth.clone(),
            mail: self.mail.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
        };

        let mail_routes = Router::new()
            .route("/messages", get(mailbox::list_messages))
            .route("/messages/{id}", get(mailbox::get_message))
            .route("/messages/{id}/star", post(mailbox::star_message))
            .route("/messages/{id}/read", post(mailbox::mark_read))
            .route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth::require_session,
            ));

        #[allow(deprecated)]
        let timeout = TimeoutLayer::new(REQUEST_TIMEOUT);

        Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/events", get(subscribe::subscribe))
            .route(
                "/wati/webhook",
                get(webhooks::wati_probe).post(webhooks::wati_webhook),
            )
            .route("/gmail/webhook", post(webhooks::gmail_webhook))
            .route("/auth/login", get(auth::login))
            .route("/auth/callback", get(auth::callback))
            .route("/auth/status", get(auth::status))
            .route("/auth/logout", post(auth::logout))
            .nest("/api/mail", mail_routes)
            .layer(timeout)
            .layer(cors_layer(&self.config))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind, start the keep-alive timer and serve in the background.
    pub async fn listen(&self) -> std::io::Result<ServerHandle> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let router = self.router();

        let mut tasks = Vec::with_capacity(2);
        if let Some(handle) = self.keepalive.start(self.shutdown.token()) {
            tasks.push(handle);
        }

        let token = self.shutdown.token();
        tasks.push(tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
        }));

        info!(%addr, "courier listening");
        Ok(ServerHandle {
            addr,
            tasks,
            registry: self.registry.clone(),
            shutdown: self.shutdown.clone(),
            timeout: Duration::from_secs(self.config.shutdown_timeout_secs),
        })
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn auth(&self) -> Option<&Arc<AuthService>> {
        self.auth.as_ref()
    }
}

/// A running server.
pub struct ServerHandle {
    addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
    registry: Arc<ConnectionRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    timeout: Duration,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stop accepting, end open event streams and wait for the server to exit.
    pub async fn shutdown(self) {
        self.shutdown
            .graceful_shutdown(&self.registry, self.tasks, Some(self.timeout))
            .await;
        info!("courier stopped");
    }
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let Some(origin) = config.cors_origin.as_deref() else {
        return CorsLayer::permissive();
    };
    match HeaderValue::from_str(origin) {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([CONTENT_TYPE]),
        Err(_) => {
            warn!(origin, "invalid CORS origin, allowing any origin");
            CorsLayer::permissive()
        }
    }
}

/// GET /
async fn root_handler() -> &'static str {
    "Server is running smoothly ...."
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.registry.len(),
        state.dispatcher.events_broadcast(),
    ))
}
