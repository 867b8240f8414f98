//! Query-string codec for endpoint values, e.g. `state=active&group=prod`.

use std::collections::BTreeMap;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use thiserror::Error;

/// Bytes left bare when encoding, the unreserved set of RFC 3986.
/// Space is escaped here and rewritten to `+` afterwards.
const QUERY_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MetadataError {
    #[error("invalid percent-escape in {0:?}")]
    InvalidEscape(String),

    #[error("semicolon in {0:?}, fields must be separated by '&'")]
    Semicolon(String),

    #[error("value is not valid UTF-8")]
    InvalidUtf8,
}

/// Parsed endpoint metadata. A key may repeat; lookups see the first value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    fields: BTreeMap<String, Vec<String>>,
}

impl Metadata {
    pub fn parse_bytes(raw: &[u8]) -> Result<Self, MetadataError> {
        let raw = std::str::from_utf8(raw).map_err(|_| MetadataError::InvalidUtf8)?;
        Self::parse(raw)
    }

    /// Strict parse: a stray `%`, a `;`, or an escape sequence that does not
    /// decode to UTF-8 makes the whole value malformed
    pub fn parse(raw: &str) -> Result<Self, MetadataError> {
        let mut fields: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for segment in raw.split('&') {
            if segment.is_empty() {
                continue;
            }
            if segment.contains(';') {
                return Err(MetadataError::Semicolon(segment.to_string()));
            }
            if !valid_escapes(segment) {
                return Err(MetadataError::InvalidEscape(segment.to_string()));
            }

            let (key, value) = segment.split_once('=').unwrap_or((segment, ""));
            fields.entry(unescape(key)?).or_default().push(unescape(value)?);
        }

        Ok(Self { fields })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Replace every value of `key` with `value`
    pub fn set(&mut self, key: &str, value: &str) {
        self.fields.insert(key.to_string(), vec![value.to_string()]);
    }

    /// Encode with keys in sorted order. Only `A-Z a-z 0-9 - _ . ~` stay
    /// bare, space becomes `+`, everything else is `%XX`, matching what the
    /// other registry tools write.
    pub fn encode(&self) -> String {
        self.fields
            .iter()
            .flat_map(|(key, values)| {
                values
                    .iter()
                    .map(move |value| format!("{}={}", escape(key), escape(value)))
            })
            .collect::<Vec<_>>()
            .join("&")
    }
}

fn escape(text: &str) -> String {
    utf8_percent_encode(text, QUERY_ESCAPE)
        .to_string()
        .replace("%20", "+")
}

fn unescape(text: &str) -> Result<String, MetadataError> {
    let spaced = text.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| MetadataError::InvalidUtf8)
}

fn valid_escapes(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3);
            if !matches!(hex, Some(h) if h.iter().all(u8::is_ascii_hexdigit)) {
                return false;
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    true
}
