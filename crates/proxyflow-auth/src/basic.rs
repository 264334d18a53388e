//! HTTP Basic credential encoding (RFC 7617)
//!
//! ```text
//! Proxy-Authorization: Basic <base64(user:password)>
//! ```
//!
//! The scheme token is matched case-insensitively; the payload must be
//! standard (padded) base64 of UTF-8 text.

use crate::CredentialError;
use base64::Engine;

const SCHEME: &str = "basic";

/// Strip the `Basic` scheme and base64-decode the payload
pub fn decode_basic(header_value: &str) -> Result<String, CredentialError> {
    let value = header_value.trim();

    let (scheme, encoded) = value.split_once(' ').ok_or(CredentialError::BadScheme)?;
    if !scheme.eq_ignore_ascii_case(SCHEME) {
        return Err(CredentialError::BadScheme);
    }

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|_| CredentialError::BadEncoding)?;

    String::from_utf8(decoded).map_err(|_| CredentialError::BadEncoding)
}

/// Build a `Basic` header value for `user:password`
///
/// Used when the gateway itself has to authenticate against an upstream
/// proxy.
pub fn encode_basic(user: &str, password: &str) -> String {
    let encoded =
        base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, password));
    format!("Basic {}", encoded)
}
