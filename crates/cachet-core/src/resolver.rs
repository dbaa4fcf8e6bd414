//! Key template resolution
//!
//! Templates are evaluated by a [`KeyResolver`]. The crate ships a
//! positional placeholder resolver; richer evaluators plug in through the
//! same trait.

use regex::Regex;
use std::sync::LazyLock;
use tracing::warn;

use crate::key::KeyArg;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([0-9]+)\}").expect("placeholder pattern is valid"));

static SOLE_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\{([0-9]+)\}$").expect("placeholder pattern is valid"));

/// What a template may refer to
#[derive(Debug, Clone, Copy)]
pub struct KeyContext<'a> {
    pub operation: &'a str,
    pub args: &'a [KeyArg],
}

/// Turns a key template into zero or more concrete keys
pub trait KeyResolver: Send + Sync {
    /// An empty result means "no key"; callers treat it as a no-op or fall
    /// back to a generated key.
    fn resolve(&self, template: &str, context: &KeyContext<'_>) -> Vec<String>;
}

/// `{N}` placeholders substituted with the N-th argument
///
/// A template that is a single placeholder over a list argument yields one
/// key per element, which is how multi-key eviction is expressed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderResolver;

impl KeyResolver for PlaceholderResolver {
    fn resolve(&self, template: &str, context: &KeyContext<'_>) -> Vec<String> {
        let template = template.trim();
        if template.is_empty() {
            return Vec::new();
        }

        if let Some(caps) = SOLE_PLACEHOLDER.captures(template)
            && let Some(KeyArg::List(items)) = arg_at(context, &caps[1])
        {
            return items.iter().map(ToString::to_string).collect();
        }

        let mut resolved = String::with_capacity(template.len());
        let mut last = 0;
        for caps in PLACEHOLDER.captures_iter(template) {
            let whole = caps.get(0).map_or(0..0, |m| m.range());
            let Some(arg) = arg_at(context, &caps[1]) else {
                warn!(
                    "Key template {} of {} refers to missing argument {}",
                    template, context.operation, &caps[1]
                );
                return Vec::new();
            };
            resolved.push_str(&template[last..whole.start]);
            resolved.push_str(&arg.to_string());
            last = whole.end;
        }
        resolved.push_str(&template[last..]);
        vec![resolved]
    }
}

fn arg_at<'a>(context: &KeyContext<'a>, index: &str) -> Option<&'a KeyArg> {
    index.parse::<usize>().ok().and_then(|i| context.args.get(i))
}
