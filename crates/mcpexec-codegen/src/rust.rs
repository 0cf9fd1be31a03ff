//! Rust source rendering for translated type descriptors.
//!
//! The only Rust-aware layer of the generator: type rendering, identifier
//! sanitization, and casing. Everything here is deterministic so that
//! re-running generation against the same tool set yields identical
//! artifacts.

use crate::schema::TypeDescriptor;
use serde_json::Value;

/// Identifiers that cannot be used verbatim in generated Rust source.
const RESERVED_WORDS: &[&str] = &[
    "abstract", "as", "async", "await", "become", "box", "break", "const", "continue", "crate",
    "do", "dyn", "else", "enum", "extern", "false", "final", "fn", "for", "if", "impl", "in",
    "let", "loop", "macro", "match", "mod", "move", "mut", "override", "priv", "pub", "ref",
    "return", "self", "Self", "static", "struct", "super", "trait", "true", "try", "type",
    "typeof", "unsafe", "unsized", "use", "virtual", "where", "while", "yield",
];

/// Sanitize a raw tool/server/field name into a valid Rust identifier.
///
/// Hyphens, dots, and any other non-identifier characters become
/// underscores; a leading digit gets an underscore prefix; reserved words
/// get a trailing underscore. Deterministic by construction.
pub fn sanitize_identifier(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        out.push('_');
    }
    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    if RESERVED_WORDS.contains(&out.as_str()) {
        out.push('_');
    }
    out
}

/// Sanitized snake_case rendering of a raw name (`includeUntracked` →
/// `include_untracked`).
pub fn to_snake_case(raw: &str) -> String {
    let sanitized = sanitize_identifier(raw);
    let mut out = String::with_capacity(sanitized.len() + 4);
    let mut prev_lower = false;
    for c in sanitized.chars() {
        if c.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else {
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
            out.push(c);
        }
    }
    if RESERVED_WORDS.contains(&out.as_str()) {
        out.push('_');
    }
    out
}

/// Sanitized PascalCase rendering of a raw name (`git_status` →
/// `GitStatus`).
pub fn to_pascal_case(raw: &str) -> String {
    let sanitized = sanitize_identifier(raw);
    let mut out = String::with_capacity(sanitized.len());
    let mut upper_next = true;
    for c in sanitized.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.push(c.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    if out.is_empty() {
        out.push('_');
    }
    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Variant name for one enum literal, or `None` when the literal cannot
/// become a valid variant (the field then degrades to its fallback type).
pub fn enum_variant_name(literal: &str) -> Option<String> {
    let name = to_pascal_case(literal);
    let first = name.chars().next()?;
    if first.is_ascii_alphabetic() {
        Some(name)
    } else {
        None
    }
}

/// Render a descriptor as Rust source.
///
/// `choice_name` is the pre-registered enum type for a top-level
/// [`TypeDescriptor::Choice`]; without one, choices degrade to
/// [`choice_fallback`]. Choices nested inside sequences or mappings always
/// use the fallback.
pub fn render_type(descriptor: &TypeDescriptor, choice_name: Option<&str>) -> String {
    match descriptor {
        TypeDescriptor::Any => "serde_json::Value".to_string(),
        TypeDescriptor::String => "String".to_string(),
        TypeDescriptor::Number => "f64".to_string(),
        TypeDescriptor::Integer => "i64".to_string(),
        TypeDescriptor::Boolean => "bool".to_string(),
        TypeDescriptor::Null => "()".to_string(),
        TypeDescriptor::Optional(inner) => {
            format!("Option<{}>", render_type(inner, choice_name))
        }
        TypeDescriptor::Choice(values) => choice_name
            .map_or_else(|| choice_fallback(values), str::to_string),
        TypeDescriptor::Sequence(inner) => format!("Vec<{}>", render_type(inner, None)),
        TypeDescriptor::Mapping(inner) => format!(
            "std::collections::HashMap<String, {}>",
            render_type(inner, None)
        ),
        TypeDescriptor::Opaque => "serde_json::Map<String, serde_json::Value>".to_string(),
    }
}

/// Primitive type covering all literals of a choice, used when no enum is
/// generated for it.
pub fn choice_fallback(values: &[Value]) -> String {
    if values.iter().all(Value::is_string) {
        "String".to_string()
    } else if values.iter().all(|v| v.as_i64().is_some()) {
        "i64".to_string()
    } else if values.iter().all(Value::is_number) {
        "f64".to_string()
    } else if values.iter().all(Value::is_boolean) {
        "bool".to_string()
    } else {
        "serde_json::Value".to_string()
    }
}
