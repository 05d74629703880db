//! Protocol definitions and utilities

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Header names exchanged with the service
pub mod headers {
    pub const ETAG: &str = "ETag";
    pub const CONTENT_LENGTH: &str = "Content-Length";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const USER_AGENT: &str = "User-Agent";
    pub const HASH_CRC64ECMA: &str = "x-tos-hash-crc64ecma";
    pub const VERSION_ID: &str = "x-tos-version-id";
    pub const REQUEST_ID: &str = "x-tos-request-id";
    pub const ID_2: &str = "x-tos-id-2";
    pub const EC: &str = "x-tos-ec";
    pub const COMPLETE_ALL: &str = "x-tos-complete-all";
}

/// Query parameter names
pub mod query {
    pub const UPLOADS: &str = "uploads";
    pub const UPLOAD_ID: &str = "uploadId";
    pub const PART_NUMBER: &str = "partNumber";
    pub const MAX_PARTS: &str = "max-parts";
    pub const PART_NUMBER_MARKER: &str = "part-number-marker";
    pub const PREFIX: &str = "prefix";
    pub const DELIMITER: &str = "delimiter";
    pub const KEY_MARKER: &str = "key-marker";
    pub const UPLOAD_ID_MARKER: &str = "upload-id-marker";
    pub const MAX_UPLOADS: &str = "max-uploads";
    pub const ENCODING_TYPE: &str = "encoding-type";
}

/// Status codes each operation accepts as success
pub mod expect {
    pub const CREATE: &[u16] = &[200];
    pub const UPLOAD_PART: &[u16] = &[200];
    pub const COMPLETE: &[u16] = &[200];
    pub const LIST: &[u16] = &[200];
    pub const ABORT: &[u16] = &[204];
}

/// Value of the complete-all header
pub const COMPLETE_ALL_YES: &str = "yes";

/// Everything but RFC 3986 unreserved characters
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Same as [`COMPONENT`] with `/` left alone, for object keys
const KEY_PATH: &AsciiSet = &COMPONENT.remove(b'/');

/// Percent-encode a path segment or query component
///
/// Unreserved characters pass through; `/` is kept when `keep_slash` is set
/// so object keys map onto nested paths.
pub fn encode_component(value: &str, keep_slash: bool) -> String {
    let set = if keep_slash { KEY_PATH } else { COMPONENT };
    utf8_percent_encode(value, set).to_string()
}

/// Build `/{bucket}/{key}?{query}` for a path-style endpoint
pub fn object_path(bucket: &str, key: &str, query: &[(&str, String)]) -> String {
    let mut path = format!("/{}", encode_component(bucket, false));
    if !key.is_empty() {
        path.push('/');
        path.push_str(&encode_component(key, true));
    }

    if !query.is_empty() {
        let pairs = query
            .iter()
            .map(|(name, value)| {
                if value.is_empty() {
                    encode_component(name, false)
                } else {
                    format!(
                        "{}={}",
                        encode_component(name, false),
                        encode_component(value, false)
                    )
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        path.push('?');
        path.push_str(&pairs);
    }

    path
}
