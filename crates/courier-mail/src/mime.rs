//! Body and header extraction from the provider's parsed MIME tree.
//!
//! The provider returns messages as a `payload` object: `mimeType`,
//! `headers: [{name, value}]`, `body: {data}` (base64url) and nested
//! `parts`.

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde_json::Value;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageBodies {
    pub text: Option<String>,
    pub html: Option<String>,
}

/// Case-insensitive header lookup on a payload.
pub fn header<'a>(payload: &'a Value, name: &str) -> Option<&'a str> {
    payload
        .get("headers")?
        .as_array()?
        .iter()
        .find(|h| {
            h.get("name")
                .and_then(Value::as_str)
                .is_some_and(|n| n.eq_ignore_ascii_case(name))
        })
        .and_then(|h| h.get("value"))
        .and_then(Value::as_str)
}

/// Decode a base64url body, tolerating both padded and unpadded input.
/// Invalid UTF-8 is replaced rather than rejected.
pub fn decode_body_data(data: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(data.trim_end_matches('='))
        .or_else(|_| URL_SAFE.decode(data))
        .ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// Walk the MIME tree depth-first and keep the first `text/plain` and first
/// `text/html` leaves.
pub fn extract_bodies(payload: &Value) -> MessageBodies {
    let mut bodies = MessageBodies::default();
    walk(payload, &mut bodies);
    bodies
}

fn walk(part: &Value, bodies: &mut MessageBodies) {
    if bodies.text.is_some() && bodies.html.is_some() {
        return;
    }

    if let Some(parts) = part.get("parts").and_then(Value::as_array) {
        for child in parts {
            walk(child, bodies);
        }
        return;
    }

    let Some(data) = part
        .get("body")
        .and_then(|b| b.get("data"))
        .and_then(Value::as_str)
    else {
        return;
    };

    let mime_type = part
        .get("mimeType")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_ascii_lowercase();

    let slot = if mime_type.starts_with("text/plain") {
        &mut bodies.text
    } else if mime_type.starts_with("text/html") {
        &mut bodies.html
    } else {
        return;
    };

    if slot.is_none() {
        *slot = decode_body_data(data);
    }
}
