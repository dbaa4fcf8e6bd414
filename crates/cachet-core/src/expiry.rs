//! Expiry literal parsing
//!
//! Expiry literals are a compact duration grammar: optional `<N>D`, `<N>H`,
//! `<N>M` and `<N>S` segments in that order, case-insensitive (`1D2H`,
//! `30m`, `90S`).

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::warn;

/// Expiry applied when a literal cannot be parsed
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(2 * 3600);

static EXPIRY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:([0-9]+)D)?(?:([0-9]+)H)?(?:([0-9]+)M)?(?:([0-9]+)S)?$")
        .expect("expiry pattern is valid")
});

/// How long a cache entry lives in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiry {
    /// Entry never expires
    #[default]
    Never,
    /// Entry expires after the given duration
    After(Duration),
}

impl Expiry {
    /// TTL to hand to the store, `None` meaning no expiry
    pub fn ttl(&self) -> Option<Duration> {
        match self {
            Expiry::Never => None,
            Expiry::After(d) => Some(*d),
        }
    }
}

impl fmt::Display for Expiry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expiry::Never => f.write_str("never"),
            Expiry::After(d) => {
                let secs = d.as_secs();
                let (days, hours, minutes, seconds) =
                    (secs / 86400, secs % 86400 / 3600, secs % 3600 / 60, secs % 60);
                let mut out = String::new();
                for (n, unit) in [(days, 'D'), (hours, 'H'), (minutes, 'M'), (seconds, 'S')] {
                    if n > 0 {
                        out.push_str(&format!("{}{}", n, unit));
                    }
                }
                if out.is_empty() {
                    out.push_str("0S");
                }
                f.write_str(&out)
            }
        }
    }
}

/// Parse an expiry literal
///
/// An empty literal, or one whose segments are all zero, means the entry
/// never expires. Anything the grammar rejects falls back to
/// [`DEFAULT_EXPIRY`] with a warning.
pub fn parse_expiry(literal: &str) -> Expiry {
    let literal = literal.trim();
    if literal.is_empty() {
        return Expiry::Never;
    }

    let Some(caps) = EXPIRY_PATTERN.captures(literal) else {
        warn!(
            "Malformed expiry literal {:?}, using default of {}",
            literal,
            Expiry::After(DEFAULT_EXPIRY)
        );
        return Expiry::After(DEFAULT_EXPIRY);
    };

    let mut total: u64 = 0;
    for (group, unit_secs) in [(1, 86400u64), (2, 3600), (3, 60), (4, 1)] {
        let Some(m) = caps.get(group) else {
            continue;
        };
        let segment = m
            .as_str()
            .parse::<u64>()
            .ok()
            .and_then(|n| n.checked_mul(unit_secs))
            .and_then(|secs| total.checked_add(secs));
        match segment {
            Some(t) => total = t,
            None => {
                warn!(
                    "Expiry literal {:?} is out of range, using default of {}",
                    literal,
                    Expiry::After(DEFAULT_EXPIRY)
                );
                return Expiry::After(DEFAULT_EXPIRY);
            }
        }
    }

    if total == 0 {
        Expiry::Never
    } else {
        Expiry::After(Duration::from_secs(total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hours(n: u64) -> Expiry {
        Expiry::After(Duration::from_secs(n * 3600))
    }

    #[test]
    fn test_segments() {
        assert_eq!(parse_expiry("1D2H"), hours(26));
        assert_eq!(parse_expiry("23h"), hours(23));
        assert_eq!(parse_expiry("5M"), Expiry::After(Duration::from_secs(300)));
        assert_eq!(parse_expiry("30s"), Expiry::After(Duration::from_secs(30)));
        assert_eq!(
            parse_expiry("1d1h1m1s"),
            Expiry::After(Duration::from_secs(86400 + 3600 + 60 + 1))
        );
    }

    #[test]
    fn test_malformed_uses_default() {
        assert_eq!(parse_expiry("garbage"), hours(2));
        // Segments out of order
        assert_eq!(parse_expiry("2H1D"), hours(2));
        assert_eq!(parse_expiry("10"), hours(2));
        assert_eq!(parse_expiry("99999999999999999999D"), hours(2));
    }

    #[test]
    fn test_empty_and_zero_never_expire() {
        assert_eq!(parse_expiry(""), Expiry::Never);
        assert_eq!(parse_expiry("   "), Expiry::Never);
        assert_eq!(parse_expiry("0S"), Expiry::Never);
        assert_eq!(parse_expiry("0D0H0M0S"), Expiry::Never);
        assert_eq!(Expiry::Never.ttl(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(hours(26).to_string(), "1D2H");
        assert_eq!(Expiry::After(Duration::from_secs(90)).to_string(), "1M30S");
        assert_eq!(Expiry::Never.to_string(), "never");
    }
}
