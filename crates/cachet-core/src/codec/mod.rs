//! Payload codec
//!
//! Every cached value is stored as a single string. Two encodings share
//! that string:
//!
//! * format A: JSON, for everything that is not map shaped;
//! * format B: bincode bytes of the value's [`Tree`] rendered as a signed
//!   decimal list (`[12, -3, 45]`), for map-shaped values, whose entry types
//!   JSON cannot carry faithfully (non-string keys in particular).
//!
//! With [`Framing::Tagged`] each payload starts with a one-character format
//! tag. Untagged payloads are told apart by shape: anything that is a
//! bracketed `", "`-separated integer list spanning the whole string is read
//! as format B. A JSON payload of that shape (for example a one-element
//! integer array) is misread, which is why tagging is the default.

mod framing;
mod shape;
mod tree;

pub use framing::{Framing, ParseFramingError};
pub use shape::{ProbeError, Shape};
pub use tree::{Tree, TreeError};

use regex::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::LazyLock;
use tracing::debug;

use crate::error::CodecError;

const TAG_TEXT: char = 'A';
const TAG_BINARY: char = 'B';

static BYTE_LIST_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[-?[0-9]+(?:, -?[0-9]+)*\]$").expect("byte list pattern is valid"));

/// Encodes values into store payloads and back
#[derive(Debug, Clone, Copy, Default)]
pub struct Codec {
    framing: Framing,
}

impl Codec {
    pub fn new(framing: Framing) -> Self {
        Self { framing }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Encode a value into a payload
    ///
    /// An empty string means there is nothing worth persisting (an empty
    /// map); callers must skip the write.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<String, CodecError> {
        let shape = Shape::of(value).map_err(|e| CodecError::Unserializable(e.to_string()))?;

        match shape {
            Shape::Map(0) => {
                debug!("Empty map value, nothing to encode");
                Ok(String::new())
            }
            Shape::Map(_) => {
                let tree =
                    Tree::capture(value).map_err(|e| CodecError::Unserializable(e.to_string()))?;
                let bytes =
                    bincode::serialize(&tree).map_err(|e| CodecError::Unserializable(e.to_string()))?;
                Ok(self.frame(TAG_BINARY, render_byte_list(&bytes)))
            }
            _ => {
                let json =
                    serde_json::to_string(value).map_err(|e| CodecError::Unserializable(e.to_string()))?;
                Ok(self.frame(TAG_TEXT, json))
            }
        }
    }

    /// Decode a payload, `None` for the empty payload
    pub fn decode<T: DeserializeOwned>(&self, payload: &str) -> Result<Option<T>, CodecError> {
        if payload.is_empty() {
            return Ok(None);
        }

        let value = if let Some(body) = payload.strip_prefix(TAG_TEXT) {
            decode_text(body)?
        } else if let Some(body) = payload.strip_prefix(TAG_BINARY) {
            decode_binary(body)?
        } else if is_byte_list(payload) {
            decode_binary(payload)?
        } else {
            decode_text(payload)?
        };
        Ok(Some(value))
    }

    fn frame(&self, tag: char, body: String) -> String {
        match self.framing {
            Framing::Tagged => {
                let mut payload = String::with_capacity(body.len() + 1);
                payload.push(tag);
                payload.push_str(&body);
                payload
            }
            Framing::Sniffed => body,
        }
    }
}

/// Which encoding a payload carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    /// Format A, JSON
    Text,
    /// Format B, a bincode byte list of a value tree
    Binary,
}

impl PayloadFormat {
    /// Classify a payload the way [`Codec::decode`] does, `None` for the
    /// empty payload
    pub fn of(payload: &str) -> Option<PayloadFormat> {
        if payload.is_empty() {
            None
        } else if payload.starts_with(TAG_TEXT) {
            Some(PayloadFormat::Text)
        } else if payload.starts_with(TAG_BINARY) || is_byte_list(payload) {
            Some(PayloadFormat::Binary)
        } else {
            Some(PayloadFormat::Text)
        }
    }
}

/// Whether an untagged payload has the format B shape
pub fn is_byte_list(payload: &str) -> bool {
    BYTE_LIST_PATTERN.is_match(payload)
}

fn render_byte_list(bytes: &[u8]) -> String {
    let items: Vec<String> = bytes.iter().map(|b| (*b as i8).to_string()).collect();
    format!("[{}]", items.join(", "))
}

fn parse_byte_list(body: &str) -> Result<Vec<u8>, CodecError> {
    if !is_byte_list(body) {
        return Err(CodecError::Malformed(format!(
            "expected a signed byte list, got {} chars",
            body.len()
        )));
    }
    body[1..body.len() - 1]
        .split(", ")
        .map(|item| {
            item.parse::<i8>()
                .map(|b| b as u8)
                .map_err(|_| CodecError::Malformed(format!("{} is not a signed byte", item)))
        })
        .collect()
}

fn decode_binary<T: DeserializeOwned>(body: &str) -> Result<T, CodecError> {
    let bytes = parse_byte_list(body)?;
    let tree: Tree =
        bincode::deserialize(&bytes).map_err(|e| CodecError::Malformed(e.to_string()))?;
    tree.restore().map_err(|e| CodecError::Malformed(e.to_string()))
}

fn decode_text<T: DeserializeOwned>(body: &str) -> Result<T, CodecError> {
    serde_json::from_str(body).map_err(|e| CodecError::Malformed(e.to_string()))
}
