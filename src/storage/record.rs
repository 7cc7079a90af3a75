//! Record codec
//!
//! A record is one text line: `key<SEP>value<EOL>`. There is no length
//! prefix, checksum or escaping; instead the reserved characters are kept
//! out of user data at the boundary. A line is split once, on the first
//! separator, so only the key must be free of `SEP`.

use crate::error::{DriftError, Result};

/// Separates key from value inside a record line
pub const SEPARATOR: u8 = b',';

/// Terminates every record line
pub const TERMINATOR: u8 = b'\n';

/// A single key-value record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    pub value: String,
}

impl Record {
    /// Build a record, rejecting keys and values that would break line framing
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        let key = key.into();
        let value = value.into();
        validate(&key, &value)?;
        Ok(Self { key, value })
    }

    /// Encoded size in bytes, terminator included
    pub fn encoded_len(&self) -> usize {
        self.key.len() + 1 + self.value.len() + 1
    }

    /// Encode as `key<SEP>value<EOL>`
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(self.key.as_bytes());
        buf.push(SEPARATOR);
        buf.extend_from_slice(self.value.as_bytes());
        buf.push(TERMINATOR);
        buf
    }

    /// Decode one full line (terminator included)
    ///
    /// Returns the reason on failure; callers attach the segment and offset.
    pub fn decode(line: &[u8]) -> std::result::Result<Self, &'static str> {
        let body = match line.split_last() {
            Some((&TERMINATOR, body)) => body,
            _ => return Err("missing line terminator"),
        };

        let sep = body
            .iter()
            .position(|&b| b == SEPARATOR)
            .ok_or("missing separator")?;

        let key = std::str::from_utf8(&body[..sep]).map_err(|_| "key is not valid UTF-8")?;
        let value =
            std::str::from_utf8(&body[sep + 1..]).map_err(|_| "value is not valid UTF-8")?;

        Ok(Self {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

/// Check that a key/value pair can be framed as a single record line
pub fn validate(key: &str, value: &str) -> Result<()> {
    if key.bytes().any(|b| b == SEPARATOR || b == TERMINATOR) {
        return Err(DriftError::InvalidKey(format!(
            "key {:?} contains a reserved character",
            key
        )));
    }

    if value.bytes().any(|b| b == TERMINATOR) {
        return Err(DriftError::InvalidValue(
            "value contains a line terminator".to_string(),
        ));
    }

    Ok(())
}
