//! Mail-provider push notifications (Pub/Sub push delivery shape).

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("malformed push body: {0}")]
    MalformedBody(String),
    #[error("push data is not base64")]
    InvalidEncoding,
    #[error("malformed notification: {0}")]
    MalformedNotification(String),
}

#[derive(Debug, Deserialize)]
pub struct PushRequest {
    pub message: PushMessage,
    #[serde(default)]
    pub subscription: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    pub data: String,
    #[serde(default, alias = "message_id")]
    pub message_id: Option<String>,
    #[serde(default, alias = "publish_time")]
    pub publish_time: Option<String>,
}

/// Decoded mailbox change notification, as broadcast to subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailNotification {
    pub email_address: String,
    pub history_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_time: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationData {
    email_address: String,
    #[serde(deserialize_with = "history_id")]
    history_id: u64,
}

// The provider sends historyId as a number, some relays as a string.
fn history_id<'de, D: serde::Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Str(String),
    }
    match Raw::deserialize(d)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// Parse a push request body and decode its embedded notification.
pub fn decode_push(body: &[u8]) -> Result<MailNotification, PushError> {
    let request: PushRequest =
        serde_json::from_slice(body).map_err(|e| PushError::MalformedBody(e.to_string()))?;

    let data = STANDARD
        .decode(&request.message.data)
        .or_else(|_| URL_SAFE.decode(&request.message.data))
        .map_err(|_| PushError::InvalidEncoding)?;

    let inner: NotificationData = serde_json::from_slice(&data)
        .map_err(|e| PushError::MalformedNotification(e.to_string()))?;

    Ok(MailNotification {
        email_address: inner.email_address,
        history_id: inner.history_id,
        message_id: request.message.message_id,
        publish_time: request.message.publish_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn push_body(data: &serde_json::Value) -> Vec<u8> {
        let encoded = STANDARD.encode(data.to_string());
        json!({
            "message": {
                "data": encoded,
                "messageId": "2070443601311540",
                "publishTime": "2021-02-26T19:13:55.749Z"
            },
            "subscription": "projects/demo/subscriptions/gmail"
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn decodes_numeric_history_id() {
        let body = push_body(&json!({"emailAddress": "me@example.com", "historyId": 9876543}));
        let n = decode_push(&body).unwrap();
        assert_eq!(n.email_address, "me@example.com");
        assert_eq!(n.history_id, 9876543);
        assert_eq!(n.message_id.as_deref(), Some("2070443601311540"));
    }

    #[test]
    fn decodes_string_history_id() {
        let body = push_body(&json!({"emailAddress": "me@example.com", "historyId": "42"}));
        assert_eq!(decode_push(&body).unwrap().history_id, 42);
    }

    #[test]
    fn notification_serializes_camel_case() {
        let body = push_body(&json!({"emailAddress": "me@example.com", "historyId": 1}));
        let json = serde_json::to_value(decode_push(&body).unwrap()).unwrap();
        assert_eq!(json["emailAddress"], "me@example.com");
        assert_eq!(json["historyId"], 1);
        assert_eq!(json["publishTime"], "2021-02-26T19:13:55.749Z");
    }

    #[test]
    fn rejects_non_json_body() {
        assert!(matches!(decode_push(b"nope"), Err(PushError::MalformedBody(_))));
    }

    #[test]
    fn rejects_bad_base64() {
        let body = json!({"message": {"data": "%%%"}}).to_string();
        assert!(matches!(decode_push(body.as_bytes()), Err(PushError::InvalidEncoding)));
    }

    #[test]
    fn rejects_missing_fields() {
        let body = push_body(&json!({"historyId": 1}));
        assert!(matches!(
            decode_push(&body),
            Err(PushError::MalformedNotification(_))
        ));
    }
}
