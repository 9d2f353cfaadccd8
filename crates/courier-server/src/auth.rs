//! Delegated authorization against the mail provider.
//!
//! `/auth/login` starts an authorization-code + PKCE flow, `/auth/callback`
//! finishes it and stores the tokens in an encrypted cookie, and
//! [`require_session`] gates the mailbox routes on that cookie, refreshing
//! the access token when it is about to expire.

use axum::extract::{Query, Request, State};
use axum::http::header::{COOKIE, LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{AppendHeaders, IntoResponse, Response};
use axum::Json;
use courier_core::security::OAuthTokens;
use courier_mail::oauth::{needs_refresh, OAuthClient};
use courier_mail::pkce::{generate_pkce, generate_state};
use courier_mail::session::{PendingLogin, StoredSession};
use courier_mail::SessionCodec;
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::server::AppState;

pub const SESSION_COOKIE: &str = "courier_session";
pub const OAUTH_COOKIE: &str = "courier_oauth";

const OAUTH_COOKIE_MAX_AGE_SECS: u64 = 10 * 60;
const SESSION_COOKIE_MAX_AGE_SECS: u64 = 30 * 24 * 60 * 60;

/// Access token for the current request, set by [`require_session`].
#[derive(Clone)]
pub struct MailSession {
    pub access_token: SecretString,
}

/// OAuth client plus the cookie codec used to persist sessions.
pub struct AuthService {
    oauth: OAuthClient,
    codec: SessionCodec,
    frontend_url: String,
    cookie_secure: bool,
}

impl AuthService {
    pub fn new(
        oauth: OAuthClient,
        codec: SessionCodec,
        frontend_url: impl Into<String>,
        cookie_secure: bool,
    ) -> Self {
        Self {
            oauth,
            codec,
            frontend_url: frontend_url.into(),
            cookie_secure,
        }
    }

    /// `None` when no OAuth client is configured.
    pub fn from_config(config: &ServerConfig) -> Option<Self> {
        let oauth = config.oauth.clone()?;
        let codec = match config.session_key.as_deref() {
            Some(key) if !key.is_empty() => SessionCodec::from_secret(key),
            _ => {
                warn!("no session key configured, sessions will not survive a restart");
                SessionCodec::ephemeral()
            }
        };
        Some(Self::new(
            OAuthClient::new(oauth),
            codec,
            config.frontend_url.clone(),
            config.cookie_secure,
        ))
    }

    fn cookie(&self, name: &str, value: &str, max_age_secs: u64) -> Result<HeaderValue, ApiError> {
        let mut cookie =
            format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}");
        if self.cookie_secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie).map_err(|e| ApiError::Internal(e.to_string()))
    }

    fn clear_cookie(&self, name: &str) -> Result<HeaderValue, ApiError> {
        self.cookie(name, "", 0)
    }

    /// `Set-Cookie` value persisting `tokens`.
    pub fn session_cookie(&self, tokens: &OAuthTokens) -> Result<HeaderValue, ApiError> {
        let sealed = self
            .codec
            .seal(&StoredSession::from(tokens))
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        self.cookie(SESSION_COOKIE, &sealed, SESSION_COOKIE_MAX_AGE_SECS)
    }

    /// Tokens from the session cookie, if present and intact.
    pub fn session_from_headers(&self, headers: &HeaderMap) -> Option<OAuthTokens> {
        let raw = cookie_value(headers, SESSION_COOKIE)?;
        self.codec
            .open::<StoredSession>(raw)
            .ok()
            .map(OAuthTokens::from)
    }

    /// Refresh `tokens` if they are expired or about to be.
    ///
    /// Returns the tokens to use and whether they changed.
    pub async fn ensure_fresh(&self, tokens: OAuthTokens) -> Result<(OAuthTokens, bool), ApiError> {
        if !needs_refresh(&tokens) {
            return Ok((tokens, false));
        }
        match self.oauth.refresh(&tokens).await {
            Ok(fresh) => {
                info!("access token refreshed");
                Ok((fresh, true))
            }
            Err(e) => {
                warn!(error = %e, "access token refresh failed");
                Err(ApiError::Unauthorized("session expired, sign in again".into()))
            }
        }
    }
}

/// Value of cookie `name` from the request's `Cookie` headers.
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)
}

fn auth_service(state: &AppState) -> Result<&Arc<AuthService>, ApiError> {
    state
        .auth
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("mail authorization is not configured".into()))
}

/// GET /auth/login
pub async fn login(State(state): State<AppState>) -> Result<Response, ApiError> {
    let auth = auth_service(&state)?;
    let pkce = generate_pkce();
    let login_state = generate_state();

    let url = auth
        .oauth
        .authorization_url(&login_state, &pkce.challenge)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let pending = auth
        .codec
        .seal(&PendingLogin {
            state: login_state,
            verifier: pkce.verifier,
        })
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let cookie = auth.cookie(OAUTH_COOKIE, &pending, OAUTH_COOKIE_MAX_AGE_SECS)?;
    let location = HeaderValue::from_str(&url).map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok((
        StatusCode::FOUND,
        [(LOCATION, location), (SET_COOKIE, cookie)],
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// GET /auth/callback
pub async fn callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let auth = auth_service(&state)?;

    if let Some(error) = params.error {
        warn!(error = %error, "authorization denied by provider");
        return Err(ApiError::Unauthorized(format!("authorization failed: {error}")));
    }

    let pending: PendingLogin = cookie_value(&headers, OAUTH_COOKIE)
        .and_then(|raw| auth.codec.open(raw).ok())
        .ok_or_else(|| ApiError::Unauthorized("missing or expired login state".into()))?;
    if params.state.as_deref() != Some(pending.state.as_str()) {
        warn!("oauth state mismatch");
        return Err(ApiError::Unauthorized("state mismatch".into()));
    }
    let code = params
        .code
        .ok_or_else(|| ApiError::BadRequest("missing authorization code".into()))?;

    let tokens = auth
        .oauth
        .exchange_code(&code, &pending.verifier)
        .await
        .map_err(|e| {
            warn!(error = %e, "authorization code exchange failed");
            ApiError::Internal(e.to_string())
        })?;
    info!(
        has_refresh_token = tokens.refresh_token.is_some(),
        "mailbox authorized"
    );

    let location =
        HeaderValue::from_str(&auth.frontend_url).map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok((
        StatusCode::FOUND,
        [(LOCATION, location)],
        AppendHeaders([
            (SET_COOKIE, auth.session_cookie(&tokens)?),
            (SET_COOKIE, auth.clear_cookie(OAUTH_COOKIE)?),
        ]),
    )
        .into_response())
}

/// GET /auth/status
pub async fn status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let auth = auth_service(&state)?;
    let authenticated = auth
        .session_from_headers(&headers)
        .is_some_and(|tokens| tokens.refresh_token.is_some() || !needs_refresh(&tokens));
    Ok(Json(json!({ "authenticated": authenticated })))
}

/// POST /auth/logout
pub async fn logout(State(state): State<AppState>) -> Result<Response, ApiError> {
    let auth = auth_service(&state)?;
    Ok((
        [(SET_COOKIE, auth.clear_cookie(SESSION_COOKIE)?)],
        Json(json!({ "ok": true })),
    )
        .into_response())
}

/// Session gate for the mailbox routes.
pub async fn require_session(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth = auth_service(&state)?;
    let tokens = auth
        .session_from_headers(req.headers())
        .ok_or_else(|| ApiError::Unauthorized("not signed in".into()))?;
    let (tokens, refreshed) = auth.ensure_fresh(tokens).await?;
    let reissued = if refreshed {
        Some(auth.session_cookie(&tokens)?)
    } else {
        None
    };

    let _ = req.extensions_mut().insert(MailSession {
        access_token: tokens.access_token,
    });
    let mut resp = next.run(req).await;
    if let Some(cookie) = reissued {
        resp.headers_mut().append(SET_COOKIE, cookie);
    }
    Ok(resp)
}
