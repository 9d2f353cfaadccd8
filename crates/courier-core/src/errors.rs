/// Typed errors for mail-provider operations.
///
/// Only `Unauthorized` asks the caller to do something different (restart
/// the authorization flow); nothing here is retried automatically.
#[derive(Clone, Debug, thiserror::Error)]
pub enum MailError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("upstream error {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("invalid message id: {0:?}")]
    InvalidId(String),
}

impl MailError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::Upstream { .. } => "upstream",
            Self::Network(_) => "network",
            Self::Decode(_) => "decode",
            Self::InvalidId(_) => "invalid_id",
        }
    }

    /// Classify an HTTP status code returned by the provider.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Unauthorized(body),
            404 => Self::NotFound(body),
            _ => Self::Upstream { status, body },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_status_mapping() {
        assert!(MailError::from_status(401, "expired".into()).is_unauthorized());
        assert!(MailError::from_status(403, "scope".into()).is_unauthorized());
        assert!(matches!(MailError::from_status(404, "gone".into()), MailError::NotFound(_)));
        assert!(matches!(
            MailError::from_status(500, "boom".into()),
            MailError::Upstream { status: 500, .. }
        ));
        assert!(matches!(
            MailError::from_status(429, "slow down".into()),
            MailError::Upstream { status: 429, .. }
        ));
    }

    #[test]
    fn display_carries_description() {
        let err = MailError::Upstream { status: 502, body: "bad gateway".into() };
        assert_eq!(err.to_string(), "upstream error 502: bad gateway");
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(MailError::Network("reset".into()).error_kind(), "network");
        assert_eq!(MailError::Decode("json".into()).error_kind(), "decode");
        assert_eq!(MailError::Unauthorized(String::new()).error_kind(), "unauthorized");
        assert_eq!(MailError::InvalidId("a/b".into()).error_kind(), "invalid_id");
    }
}
