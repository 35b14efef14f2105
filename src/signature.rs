//! HMAC-SHA256 payload signing for webhook-style destinations
//!
//! Receivers verify `X-Signature: sha256=<hex>` against the exact request body.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::errors::{DispatchError, DispatchResult};

/// Header carrying the payload signature
pub const SIGNATURE_HEADER: &str = "X-Signature";

const SIGNATURE_PREFIX: &str = "sha256=";

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `body` keyed by `secret_key`
pub fn compute_hmac(secret_key: &str, body: &[u8]) -> DispatchResult<String> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret_key.as_bytes())
        .map_err(|e| DispatchError::config(format!("Invalid HMAC key: {}", e)))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Full header value: `sha256=<hex>`
pub fn signature_header_value(secret_key: &str, body: &[u8]) -> DispatchResult<String> {
    Ok(format!("{}{}", SIGNATURE_PREFIX, compute_hmac(secret_key, body)?))
}

/// Constant-time check of a received header value against the body
pub fn verify_signature(header_value: &str, secret_key: &str, body: &[u8]) -> bool {
    let Some(hex_part) = header_value.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_part) else {
        return false;
    };
    let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(secret_key.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
