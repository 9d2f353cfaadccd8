//! The normalized unit fanned out to every event-stream subscriber.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope type for mail-provider push notifications.
pub const NEW_EMAIL: &str = "NEW_EMAIL";

/// An event broadcast to all subscribers.
///
/// The payload is opaque to the fan-out path: it is serialized once and
/// forwarded without schema validation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventEnvelope {
    /// `{"type": ..., "data": ...}`
    Typed {
        #[serde(rename = "type")]
        kind: String,
        data: Value,
    },
    /// Provider payload forwarded as-is (WhatsApp provider's legacy shape).
    Passthrough(Value),
}

impl EventEnvelope {
    pub fn typed(kind: impl Into<String>, data: Value) -> Self {
        Self::Typed {
            kind: kind.into(),
            data,
        }
    }

    pub fn passthrough(payload: Value) -> Self {
        Self::Passthrough(payload)
    }

    /// Discriminator used for logging. Pass-through payloads report their
    /// own `eventType` field when present.
    pub fn kind(&self) -> Option<&str> {
        match self {
            Self::Typed { kind, .. } => Some(kind),
            Self::Passthrough(payload) => payload.get("eventType").and_then(Value::as_str),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
