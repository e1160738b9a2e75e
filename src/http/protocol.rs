//! HTTP Wire Protocol
//!
//! Route constants, the key/value body DTO shared by both tiers, and the
//! key-encoding helpers behind the URL-encoding rule: path keys must arrive
//! URL-encoded, and a path segment that would round-trip differently under
//! encode/decode is rejected.

use std::borrow::Cow;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};

/// Storage routes, identical on both tiers.
pub const ENDPOINT_STORAGE: &str = "/storage";
pub const ENDPOINT_STORAGE_KEY: &str = "/storage/:key";
/// Admission counter scrape endpoint.
pub const ENDPOINT_METRICS: &str = "/metrics";

/// The key/value request and response body: `{"key": "...", "value": <any>}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Body {
    pub key: String,
    pub value: serde_json::Value,
}

/// Everything outside the URL-safe unreserved set is percent-escaped.
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

pub fn encode_key(key: &str) -> Cow<'_, str> {
    utf8_percent_encode(key, KEY_ENCODE_SET).into()
}

pub fn decode_key(raw: &str) -> Option<String> {
    percent_decode_str(raw)
        .decode_utf8()
        .ok()
        .map(Cow::into_owned)
}

/// Whether a path key is properly URL-encoded.
///
/// `raw_tail` is the raw path segment as sent on the wire; `decoded_key` is
/// the router's percent-decoded parameter. The key is accepted iff the raw
/// segment was already URL-safe, or escaping it does not round-trip back to
/// the decoded parameter (meaning the raw segment carried real `%xx`
/// escapes rather than raw reserved characters).
pub fn key_is_url_encoded(raw_tail: &str, decoded_key: &str) -> bool {
    let escaped = encode_key(raw_tail);

    // Already safe as-is.
    if escaped == raw_tail {
        return true;
    }

    // Escaping changed the raw segment and decoding lands back on the
    // router's parameter: the raw segment held unencoded reserved bytes.
    if let Some(decoded) = decode_key(&escaped) {
        if decoded == decoded_key {
            return false;
        }
    }

    true
}
