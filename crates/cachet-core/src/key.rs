//! Cache key generation

use md5::{Digest, Md5};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

/// Schema version baked into every generated key
pub const KEY_SCHEMA_VERSION: &str = "v1_0";

/// Default number of arguments above which keys switch to a digest
pub const DEFAULT_MAX_ARG_COUNT: usize = 5;

/// One positional argument of a cached operation, reduced to what key
/// generation needs: its textual form and whether it is collection shaped.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyArg {
    /// Absent value; renders as `null`
    Null,
    /// Any scalar, already rendered to text
    Scalar(String),
    /// List, set or array
    List(Vec<KeyArg>),
    /// Associative value, in iteration order
    Map(Vec<(KeyArg, KeyArg)>),
}

impl KeyArg {
    pub fn scalar(value: impl fmt::Display) -> Self {
        KeyArg::Scalar(value.to_string())
    }

    /// Lists, sets, arrays and maps force digest mode
    pub fn is_collection(&self) -> bool {
        matches!(self, KeyArg::List(_) | KeyArg::Map(_))
    }
}

impl fmt::Display for KeyArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyArg::Null => f.write_str("null"),
            KeyArg::Scalar(s) => f.write_str(s),
            KeyArg::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            KeyArg::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}={}", k, v)?;
                }
                f.write_str("}")
            }
        }
    }
}

macro_rules! scalar_key_arg {
    ($($ty:ty),*) => {
        $(impl From<$ty> for KeyArg {
            fn from(value: $ty) -> Self {
                KeyArg::Scalar(value.to_string())
            }
        })*
    };
}

scalar_key_arg!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize, f32, f64, bool, char, String);

impl From<&str> for KeyArg {
    fn from(value: &str) -> Self {
        KeyArg::Scalar(value.to_string())
    }
}

impl<T: Into<KeyArg>> From<Option<T>> for KeyArg {
    fn from(value: Option<T>) -> Self {
        value.map_or(KeyArg::Null, Into::into)
    }
}

impl<T: Into<KeyArg>> From<Vec<T>> for KeyArg {
    fn from(values: Vec<T>) -> Self {
        KeyArg::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Clone + Into<KeyArg>> From<&[T]> for KeyArg {
    fn from(values: &[T]) -> Self {
        KeyArg::List(values.iter().cloned().map(Into::into).collect())
    }
}

impl<T: Into<KeyArg>> From<BTreeSet<T>> for KeyArg {
    fn from(values: BTreeSet<T>) -> Self {
        KeyArg::List(values.into_iter().map(Into::into).collect())
    }
}

impl<K: Into<KeyArg>, V: Into<KeyArg>> From<BTreeMap<K, V>> for KeyArg {
    fn from(entries: BTreeMap<K, V>) -> Self {
        KeyArg::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Build an argument list from heterogeneous values
///
/// ```
/// use cachet_core::{key_args, KeyArg};
///
/// let args = key_args![42, "eu", None::<i32>];
/// assert_eq!(args[2], KeyArg::Null);
/// ```
#[macro_export]
macro_rules! key_args {
    ($($arg:expr),* $(,)?) => {
        vec![$($crate::KeyArg::from($arg)),*]
    };
}

/// Render an argument list the way digests and logs see it: `[a, b, c]`
pub fn args_to_string(args: &[KeyArg]) -> String {
    KeyArg::List(args.to_vec()).to_string()
}

/// Lowercase hex MD5 of `data`
pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Deterministic key fingerprinting for cached operations
///
/// Keys look like `<cache>::<operation>-v1_0` for argument-less calls,
/// `<cache>::<operation>-v1_0-<arg>_<arg>_` for short scalar argument lists,
/// and `<cache>::<operation>-v1_0-<md5>` otherwise.
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    max_arg_count: usize,
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ARG_COUNT)
    }
}

impl KeyGenerator {
    pub fn new(max_arg_count: usize) -> Self {
        Self { max_arg_count }
    }

    pub fn max_arg_count(&self) -> usize {
        self.max_arg_count
    }

    pub fn generate(&self, cache_name: &str, operation: &str, args: &[KeyArg]) -> String {
        let mut key = format!("{}::{}-{}", cache_name, operation, KEY_SCHEMA_VERSION);
        if args.is_empty() {
            debug!("Operation {} has no arguments, using bare key", operation);
            return key;
        }
        key.push('-');

        if self.needs_digest(args) {
            debug!(
                "Operation {} has more than {} arguments or a collection argument, digesting",
                operation, self.max_arg_count
            );
            key.push_str(&md5_hex(args_to_string(args).as_bytes()));
            return key;
        }

        for arg in args {
            // ':' separates key segments in the store
            key.push_str(&arg.to_string().replace(':', "-"));
            key.push('_');
        }
        key
    }

    fn needs_digest(&self, args: &[KeyArg]) -> bool {
        args.len() > self.max_arg_count || args.iter().any(KeyArg::is_collection)
    }
}
