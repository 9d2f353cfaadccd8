pub mod fanout;
pub mod gmail;
pub mod mime;
pub mod oauth;
pub mod pkce;
pub mod push;
pub mod session;

pub use gmail::GmailClient;
pub use oauth::{OAuthClient, OAuthError};
pub use session::{SessionCodec, SessionError};
