//! Byte-string helpers.
//!
//! Raw payloads (query values, multipart bodies, hashes, base64) travel
//! through the engine as strings holding exactly one `char` per byte, with
//! every code point in `0..=255`. No charset transcoding ever happens at this
//! boundary, so binary content survives unchanged.

use crate::error::{Error, Result, codes};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

/// Map every byte onto the char with the same code point
pub fn decode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Inverse of [`decode`]; fails on any char above U+00FF
pub fn encode(value: &str) -> Result<Vec<u8>> {
    value
        .chars()
        .map(|c| {
            u8::try_from(u32::from(c)).map_err(|_| {
                Error::new(
                    codes::NOT_LATIN1,
                    format!("character {:?} is outside the byte range", c),
                )
                .with_data("character", u32::from(c))
            })
        })
        .collect()
}

/// Percent-decode a query or form component into a byte-string.
///
/// `+` decodes to a space.
pub fn percent_decode(component: &str) -> String {
    let spaced = component.replace('+', " ");
    decode(&urlencoding::decode_binary(spaced.as_bytes()))
}

/// Reinterpret a byte-string as UTF-8 text
pub fn to_utf8(value: &str) -> Result<String> {
    let bytes = encode(value)?;
    String::from_utf8(bytes).map_err(|e| {
        Error::new(codes::MALFORMED_BODY, "value is not valid UTF-8").with_source(e)
    })
}

/// Hex-encoded SHA-256 digest of the underlying bytes
pub fn sha256_hex(value: &str) -> Result<String> {
    let bytes = encode(value)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

pub fn to_base64(value: &str) -> Result<String> {
    Ok(STANDARD.encode(encode(value)?))
}

pub fn from_base64(encoded: &str) -> Result<String> {
    let bytes = STANDARD.decode(encoded.trim()).map_err(|e| {
        Error::new(codes::MALFORMED_BODY, "invalid base64 payload").with_source(e)
    })?;
    Ok(decode(&bytes))
}
