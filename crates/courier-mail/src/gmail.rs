use std::time::Duration;

use async_trait::async_trait;
use courier_core::errors::MailError;
use courier_core::mail::{
    ListQuery, MailProvider, MessageDetail, MessagePage, MessageSummary, LABEL_STARRED,
    LABEL_UNREAD,
};
use reqwest::{Client, RequestBuilder, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::fanout;
use crate::mime;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;
const SUMMARY_HEADERS: [&str; 4] = ["From", "To", "Subject", "Date"];

/// Mailbox client for the Gmail REST API.
pub struct GmailClient {
    http: Client,
    base_url: String,
    fetch_concurrency: usize,
    default_page_size: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct MessageRef {
    id: String,
}

impl GmailClient {
    pub fn new(base_url: impl Into<String>, fetch_concurrency: usize) -> Self {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            fetch_concurrency: fetch_concurrency.max(1),
            default_page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_default_page_size(mut self, size: u32) -> Self {
        self.default_page_size = size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/gmail/v1/users/me/{}", self.base_url, path)
    }

    /// `messages/{id}[/{action}]`, with `id` confined to a single encoded
    /// path segment.
    fn message_url(&self, id: &str, action: Option<&str>) -> Result<Url, MailError> {
        let mut url = Url::parse(&self.url("messages"))
            .map_err(|e| MailError::Network(format!("invalid api base: {e}")))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| MailError::Network("api base cannot carry a path".into()))?;
            let _ = segments.push(id);
            if let Some(action) = action {
                let _ = segments.push(action);
            }
        }
        Ok(url)
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, MailError> {
        let resp = req
            .send()
            .await
            .map_err(|e| MailError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MailError::from_status(status.as_u16(), body));
        }

        resp.json()
            .await
            .map_err(|e| MailError::Decode(e.to_string()))
    }

    async fn fetch_metadata(&self, token: &SecretString, id: &str) -> Result<MessageSummary, MailError> {
        let mut query: Vec<(&str, &str)> = vec![("format", "metadata")];
        query.extend(SUMMARY_HEADERS.iter().map(|h| ("metadataHeaders", *h)));

        let req = self
            .http
            .get(self.message_url(id, None)?)
            .bearer_auth(token.expose_secret())
            .query(&query);
        let message: Value = self.send_json(req).await?;
        Ok(summary_from_message(&message))
    }

    async fn modify_labels(
        &self,
        token: &SecretString,
        id: &str,
        add: &[&str],
        remove: &[&str],
    ) -> Result<MessageSummary, MailError> {
        let req = self
            .http
            .post(self.message_url(id, Some("modify"))?)
            .bearer_auth(token.expose_secret())
            .json(&json!({ "addLabelIds": add, "removeLabelIds": remove }));
        // The modify response carries only ids and labels.
        let modified: Value = self.send_json(req).await?;
        let labels = summary_from_message(&modified).label_ids;
        let summary = self.fetch_metadata(token, id).await?;
        Ok(summary.with_labels(labels))
    }
}

#[async_trait]
impl MailProvider for GmailClient {
    #[instrument(skip_all, fields(q = query.q.as_deref(), label = query.label.as_deref()))]
    async fn list_messages(
        &self,
        access_token: &SecretString,
        query: &ListQuery,
    ) -> Result<MessagePage, MailError> {
        let max_results = query
            .max_results
            .unwrap_or(self.default_page_size)
            .clamp(1, MAX_PAGE_SIZE)
            .to_string();

        let mut params: Vec<(&str, &str)> = vec![("maxResults", max_results.as_str())];
        if let Some(q) = query.q.as_deref() {
            params.push(("q", q));
        }
        if let Some(label) = query.label.as_deref() {
            params.push(("labelIds", label));
        }
        if let Some(page_token) = query.page_token.as_deref() {
            params.push(("pageToken", page_token));
        }

        let req = self
            .http
            .get(self.url("messages"))
            .bearer_auth(access_token.expose_secret())
            .query(&params);
        let listing: ListResponse = self.send_json(req).await?;
        debug!(count = listing.messages.len(), "listed message ids");

        let messages = fanout::try_map_ordered(listing.messages, self.fetch_concurrency, |m| async move {
            self.fetch_metadata(access_token, &m.id).await
        })
        .await?;

        Ok(MessagePage {
            messages,
            next_page_token: listing.next_page_token,
        })
    }

    async fn get_message(&self, access_token: &SecretString, id: &str) -> Result<MessageDetail, MailError> {
        let req = self
            .http
            .get(self.message_url(id, None)?)
            .bearer_auth(access_token.expose_secret())
            .query(&[("format", "full")]);
        let message: Value = self.send_json(req).await?;
        Ok(detail_from_message(&message))
    }

    async fn set_starred(
        &self,
        access_token: &SecretString,
        id: &str,
        starred: bool,
    ) -> Result<MessageSummary, MailError> {
        if starred {
            self.modify_labels(access_token, id, &[LABEL_STARRED], &[]).await
        } else {
            self.modify_labels(access_token, id, &[], &[LABEL_STARRED]).await
        }
    }

    async fn set_read(
        &self,
        access_token: &SecretString,
        id: &str,
        read: bool,
    ) -> Result<MessageSummary, MailError> {
        if read {
            self.modify_labels(access_token, id, &[], &[LABEL_UNREAD]).await
        } else {
            self.modify_labels(access_token, id, &[LABEL_UNREAD], &[]).await
        }
    }
}

/// Build a summary from a Gmail `Message` resource.
pub fn summary_from_message(message: &Value) -> MessageSummary {
    let str_field = |key: &str| {
        message
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let label_ids: Vec<String> = message
        .get("labelIds")
        .and_then(Value::as_array)
        .map(|labels| {
            labels
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let payload = message.get("payload").cloned().unwrap_or(Value::Null);
    let hdr = |name: &str| mime::header(&payload, name).map(str::to_string);

    MessageSummary {
        id: str_field("id"),
        thread_id: str_field("threadId"),
        from: hdr("From"),
        to: hdr("To"),
        subject: hdr("Subject"),
        date: hdr("Date"),
        snippet: str_field("snippet"),
        ..MessageSummary::default()
    }
    .with_labels(label_ids)
}

pub fn detail_from_message(message: &Value) -> MessageDetail {
    let bodies = message
        .get("payload")
        .map(mime::extract_bodies)
        .unwrap_or_default();
    MessageDetail {
        summary: summary_from_message(message),
        text: bodies.text,
        html: bodies.html,
    }
}
