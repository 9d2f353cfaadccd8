use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::MailError;

/// Filters for listing a mailbox.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Provider search expression (e.g. `is:unread from:alice`).
    pub q: Option<String>,
    pub label: Option<String>,
    pub max_results: Option<u32>,
    pub page_token: Option<String>,
}

/// Header-level view of one message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSummary {
    pub id: String,
    pub thread_id: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub date: Option<String>,
    pub snippet: String,
    pub unread: bool,
    pub starred: bool,
    pub label_ids: Vec<String>,
}

/// A message with its decoded bodies.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageDetail {
    #[serde(flatten)]
    pub summary: MessageSummary,
    pub text: Option<String>,
    pub html: Option<String>,
}

/// One page of listed messages, in provider order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<MessageSummary>,
    pub next_page_token: Option<String>,
}

pub const LABEL_UNREAD: &str = "UNREAD";
pub const LABEL_STARRED: &str = "STARRED";

impl MessageSummary {
    /// Replace the label set, re-deriving `unread` / `starred` from it.
    pub fn with_labels(mut self, label_ids: Vec<String>) -> Self {
        self.unread = label_ids.iter().any(|l| l == LABEL_UNREAD);
        self.starred = label_ids.iter().any(|l| l == LABEL_STARRED);
        self.label_ids = label_ids;
        self
    }
}

/// Provider message ids are opaque tokens drawn from `[A-Za-z0-9_-]`.
pub fn validate_message_id(id: &str) -> Result<(), MailError> {
    let ok = !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if ok {
        Ok(())
    } else {
        Err(MailError::InvalidId(id.to_string()))
    }
}

/// Read and mutate a user's mailbox on their behalf.
#[async_trait]
pub trait MailProvider: Send + Sync {
    async fn list_messages(
        &self,
        access_token: &SecretString,
        query: &ListQuery,
    ) -> Result<MessagePage, MailError>;

    async fn get_message(
        &self,
        access_token: &SecretString,
        id: &str,
    ) -> Result<MessageDetail, MailError>;

    async fn set_starred(
        &self,
        access_token: &SecretString,
        id: &str,
        starred: bool,
    ) -> Result<MessageSummary, MailError>;

    async fn set_read(
        &self,
        access_token: &SecretString,
        id: &str,
        read: bool,
    ) -> Result<MessageSummary, MailError>;
}
