//! HMAC-SHA256 webhook signatures.

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Headers carrying the signature, in lookup order.
pub const SIGNATURE_HEADERS: [&str; 3] = ["x-wati-signature", "x-hub-signature-256", "x-hub-signature"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// No secret configured; nothing to check.
    Skipped,
    Valid,
    Missing,
    Invalid,
}

impl Verification {
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Skipped | Self::Valid)
    }
}

/// Hex HMAC-SHA256 of `body` under `secret`.
pub fn sign(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Exact, constant-time check of a hex signature (optionally `sha256=`-prefixed).
pub fn verify(secret: &str, body: &[u8], signature: &str) -> bool {
    let hex_sig = signature.trim();
    let hex_sig = hex_sig.strip_prefix("sha256=").unwrap_or(hex_sig);
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// First signature header present on the request.
pub fn signature_header(headers: &HeaderMap) -> Option<&str> {
    SIGNATURE_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|v| v.to_str().ok())
}

/// Check a request against an optional secret.
pub fn verify_request(secret: Option<&str>, headers: &HeaderMap, body: &[u8]) -> Verification {
    let Some(secret) = secret.filter(|s| !s.is_empty()) else {
        return Verification::Skipped;
    };
    match signature_header(headers) {
        None => Verification::Missing,
        Some(sig) if verify(secret, body, sig) => Verification::Valid,
        Some(_) => Verification::Invalid,
    }
}
