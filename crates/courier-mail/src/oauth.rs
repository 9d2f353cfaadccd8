//! Authorization-code flow against the mail provider.

use std::time::Duration;

use chrono::Utc;
use courier_core::security::{OAuthClientConfig, OAuthTokens, GOOGLE_OAUTH};
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("invalid authorization endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("token exchange failed: {0}")]
    ExchangeFailed(String),
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("no refresh token available")]
    MissingRefreshToken,
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("parse error: {0}")]
    ParseError(String),
}

#[derive(Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

impl TokenResponse {
    fn into_tokens(self, previous_refresh: Option<&SecretString>) -> OAuthTokens {
        let expires_at = Utc::now().timestamp_millis() + (self.expires_in as i64 * 1000);
        // Refresh responses usually omit the refresh token; keep the old one.
        let refresh_token = self
            .refresh_token
            .map(SecretString::from)
            .or_else(|| previous_refresh.map(|r| SecretString::from(r.expose_secret().to_string())));
        OAuthTokens {
            access_token: SecretString::from(self.access_token),
            refresh_token,
            expires_at,
        }
    }
}

/// True when the access token is expired or about to expire.
pub fn needs_refresh(tokens: &OAuthTokens) -> bool {
    let now_ms = Utc::now().timestamp_millis();
    let buffer_ms = GOOGLE_OAUTH.token_expiry_buffer_seconds as i64 * 1000;
    tokens.expires_at - now_ms < buffer_ms
}

pub struct OAuthClient {
    http: Client,
    config: OAuthClientConfig,
}

impl OAuthClient {
    pub fn new(config: OAuthClientConfig) -> Self {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { http, config }
    }

    /// Provider consent URL. `access_type=offline` + `prompt=consent` so a
    /// refresh token is issued on every login.
    pub fn authorization_url(&self, state: &str, code_challenge: &str) -> Result<String, OAuthError> {
        let scope = self.config.scopes.join(" ");
        let url = Url::parse_with_params(
            &self.config.auth_url,
            &[
                ("response_type", "code"),
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("scope", scope.as_str()),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("include_granted_scopes", "true"),
                ("state", state),
                ("code_challenge", code_challenge),
                ("code_challenge_method", "S256"),
            ],
        )
        .map_err(|e| OAuthError::InvalidEndpoint(e.to_string()))?;
        Ok(url.into())
    }

    /// Exchange an authorization code for tokens using the PKCE verifier.
    pub async fn exchange_code(&self, code: &str, verifier: &str) -> Result<OAuthTokens, OAuthError> {
        let resp = self
            .http
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("code_verifier", verifier),
            ])
            .send()
            .await
            .map_err(|e| OAuthError::NetworkError(e.to_string()))?;

        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(OAuthError::ExchangeFailed(body));
        }

        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| OAuthError::ParseError(e.to_string()))?;
        Ok(body.into_tokens(None))
    }

    /// Trade the refresh token for a new access token.
    pub async fn refresh(&self, tokens: &OAuthTokens) -> Result<OAuthTokens, OAuthError> {
        let refresh_token = tokens
            .refresh_token
            .as_ref()
            .ok_or(OAuthError::MissingRefreshToken)?;

        let resp = self
            .http
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.expose_secret()),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| OAuthError::NetworkError(e.to_string()))?;

        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(OAuthError::RefreshFailed(body));
        }

        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| OAuthError::ParseError(e.to_string()))?;
        Ok(body.into_tokens(Some(refresh_token)))
    }
}
