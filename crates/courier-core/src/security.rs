use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Delegated-authorization tokens for one mailbox, with secrecy protection.
#[derive(Clone)]
pub struct OAuthTokens {
    pub access_token: SecretString,
    /// Absent when the provider did not issue one (no offline access).
    pub refresh_token: Option<SecretString>,
    /// Unix timestamp in milliseconds when access_token expires.
    pub expires_at: i64,
}

impl std::fmt::Debug for OAuthTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokens")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

pub struct GoogleOAuthDefaults {
    pub auth_url: &'static str,
    pub token_url: &'static str,
    pub scopes: &'static [&'static str],
    pub api_base: &'static str,
    pub token_expiry_buffer_seconds: u64,
}

pub const GOOGLE_OAUTH: GoogleOAuthDefaults = GoogleOAuthDefaults {
    auth_url: "https://accounts.google.com/o/oauth2/v2/auth",
    token_url: "https://oauth2.googleapis.com/token",
    scopes: &["https://www.googleapis.com/auth/gmail.modify"],
    api_base: "https://gmail.googleapis.com",
    token_expiry_buffer_seconds: 60,
};

/// OAuth client registration with the mail provider.
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
}

impl OAuthClientConfig {
    /// A client using Google's endpoints and the default mailbox scope.
    pub fn google(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            scopes: default_scopes(),
            auth_url: default_auth_url(),
            token_url: default_token_url(),
        }
    }
}

impl std::fmt::Debug for OAuthClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClientConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .finish()
    }
}

fn default_scopes() -> Vec<String> {
    GOOGLE_OAUTH.scopes.iter().map(|s| (*s).to_string()).collect()
}

fn default_auth_url() -> String {
    GOOGLE_OAUTH.auth_url.to_string()
}

fn default_token_url() -> String {
    GOOGLE_OAUTH.token_url.to_string()
}

/// Environment variable names read by the binary.
pub mod env_vars {
    pub const WATI_WEBHOOK_SECRET: &str = "WATI_WEBHOOK_SECRET";
    pub const GMAIL_PUSH_SECRET: &str = "GMAIL_PUSH_SECRET";
    pub const GOOGLE_CLIENT_ID: &str = "GOOGLE_CLIENT_ID";
    pub const GOOGLE_CLIENT_SECRET: &str = "GOOGLE_CLIENT_SECRET";
    pub const GOOGLE_REDIRECT_URI: &str = "GOOGLE_REDIRECT_URI";
    pub const SESSION_KEY: &str = "SESSION_KEY";
}
