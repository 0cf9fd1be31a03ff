//! Response field-name normalization.
//!
//! Some servers emit response keys whose well-known prefixes are
//! inconsistently lowercased (`system.title` where consumers expect
//! `System.title`). Normalization repairs those prefixes recursively
//! throughout the response tree. The transform never mutates its input
//! and is idempotent: an already-repaired `System.` key does not match
//! the lowercase rule on a second pass.

use mcpexec_core::NormalizationStrategy;
use serde_json::Value;

/// Case-sensitive key prefix repairs applied by
/// [`NormalizationStrategy::PrefixRemap`].
const PREFIX_RULES: [(&str, &str); 4] = [
    ("system.", "System."),
    ("microsoft.", "Microsoft."),
    ("custom.", "Custom."),
    ("wef_", "WEF_"),
];

/// Normalize a response value under the given strategy.
///
/// `Identity` returns an equivalent copy unchanged; `PrefixRemap` rebuilds
/// the tree with repaired map keys. Scalars are returned unchanged at
/// every level.
pub fn normalize_fields(value: &Value, strategy: NormalizationStrategy) -> Value {
    match strategy {
        NormalizationStrategy::Identity => value.clone(),
        NormalizationStrategy::PrefixRemap => remap(value),
    }
}

fn remap(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, nested)| (remap_key(key), remap(nested)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(remap).collect()),
        scalar => scalar.clone(),
    }
}

fn remap_key(key: &str) -> String {
    for (from, to) in PREFIX_RULES {
        if let Some(rest) = key.strip_prefix(from) {
            return format!("{to}{rest}");
        }
    }
    key.to_string()
}
