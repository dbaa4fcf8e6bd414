//! Payload framing modes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error type for parsing a framing mode
#[derive(Debug, Clone)]
pub struct ParseFramingError(String);

impl fmt::Display for ParseFramingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid payload framing: {}", self.0)
    }
}

impl std::error::Error for ParseFramingError {}

/// How payloads announce which encoding they carry
///
/// Decoding accepts both modes regardless of this setting; it only decides
/// what new writes look like.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// Prefix every payload with a one-character format tag
    #[default]
    Tagged,
    /// Untagged payloads; readers tell formats apart by shape
    Sniffed,
}

impl Framing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Framing::Tagged => "tagged",
            Framing::Sniffed => "sniffed",
        }
    }
}

impl FromStr for Framing {
    type Err = ParseFramingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tagged" => Ok(Framing::Tagged),
            "sniffed" | "legacy" => Ok(Framing::Sniffed),
            _ => Err(ParseFramingError(s.to_string())),
        }
    }
}
