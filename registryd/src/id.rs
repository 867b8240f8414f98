//! Service ids: URL-safe base64 of `name@address`, usable as a path segment.

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use shared::protocol::ID_SEPARATOR;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdError {
    #[error("id is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("id does not decode to UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("id has no '{}' separator", ID_SEPARATOR)]
    MissingSeparator,
}

pub fn encode_id(name: &str, address: &str) -> String {
    URL_SAFE.encode(format!("{}{}{}", name, ID_SEPARATOR, address))
}

/// Decode back to the `name@address` text
pub fn decode_id(id: &str) -> Result<String, IdError> {
    let bytes = URL_SAFE.decode(id)?;
    Ok(String::from_utf8(bytes)?)
}

/// Split an id into (name, address). Addresses may carry their own `@`
/// (e.g. `tcp@10.0.0.5:8080`), so the split is at the first separator.
pub fn parse_id(id: &str) -> Result<(String, String), IdError> {
    let decoded = decode_id(id)?;
    decoded
        .split_once(ID_SEPARATOR)
        .map(|(name, address)| (name.to_string(), address.to_string()))
        .ok_or(IdError::MissingSeparator)
}
