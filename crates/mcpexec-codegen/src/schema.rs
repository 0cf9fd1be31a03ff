//! JSON Schema → language-agnostic type descriptors.
//!
//! [`translate`] is a pure, total function: any input yields a descriptor,
//! and identical inputs always yield identical descriptors. The descriptor
//! model knows nothing about Rust; source emission lives in
//! [`crate::rust`] so other target languages can reuse the translation.

use serde_json::Value;

/// Language-agnostic description of a translated schema node.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDescriptor {
    /// Untyped structured value.
    Any,
    /// Text.
    String,
    /// Floating-point number.
    Number,
    /// Integer.
    Integer,
    /// Boolean.
    Boolean,
    /// The null unit type.
    Null,
    /// Optional/nullable wrapper around another descriptor.
    Optional(Box<TypeDescriptor>),
    /// Closed set of literal values.
    Choice(Vec<Value>),
    /// Ordered sequence of one element type.
    Sequence(Box<TypeDescriptor>),
    /// String-keyed mapping of one value type.
    Mapping(Box<TypeDescriptor>),
    /// Structured object whose fields are not modeled.
    ///
    /// Nested model generation is an extension point, not implemented.
    Opaque,
}

/// Translate a schema node into a type descriptor.
///
/// Non-required nodes are wrapped in [`TypeDescriptor::Optional`] unless
/// the translation already produced one (a declared `null` union never
/// double-wraps).
pub fn translate(schema: &Value, required: bool) -> TypeDescriptor {
    let inner = translate_type(schema);
    if required || matches!(inner, TypeDescriptor::Optional(_)) {
        inner
    } else {
        TypeDescriptor::Optional(Box::new(inner))
    }
}

fn translate_type(schema: &Value) -> TypeDescriptor {
    let Some(obj) = schema.as_object() else {
        return TypeDescriptor::Any;
    };

    // A type union including "null" becomes optional, with the remaining
    // type translated; several remaining types degrade to any.
    if let Some(types) = obj.get("type").and_then(Value::as_array) {
        let names: Vec<&str> = types.iter().filter_map(Value::as_str).collect();
        let has_null = names.contains(&"null");
        let non_null: Vec<&str> = names.into_iter().filter(|t| *t != "null").collect();
        let inner = match non_null.as_slice() {
            [] => TypeDescriptor::Null,
            [single] => translate_named(single, obj),
            _ => TypeDescriptor::Any,
        };
        return if has_null && !matches!(inner, TypeDescriptor::Null) {
            TypeDescriptor::Optional(Box::new(inner))
        } else {
            inner
        };
    }

    // An enumeration of literal values becomes a closed choice.
    if let Some(values) = obj.get("enum").and_then(Value::as_array) {
        if !values.is_empty() {
            return TypeDescriptor::Choice(values.clone());
        }
    }

    match obj.get("type").and_then(Value::as_str) {
        Some(name) => translate_named(name, obj),
        // No declared type: object-shaped schemas stay opaque structures,
        // anything else is untyped.
        None if obj.contains_key("properties") => TypeDescriptor::Opaque,
        None => TypeDescriptor::Any,
    }
}

fn translate_named(name: &str, obj: &serde_json::Map<String, Value>) -> TypeDescriptor {
    match name {
        "string" => TypeDescriptor::String,
        "number" => TypeDescriptor::Number,
        "integer" => TypeDescriptor::Integer,
        "boolean" => TypeDescriptor::Boolean,
        "null" => TypeDescriptor::Null,
        "array" => {
            let items = obj
                .get("items")
                .map_or(TypeDescriptor::Any, |items| translate(items, true));
            TypeDescriptor::Sequence(Box::new(items))
        }
        "object" => match obj.get("additionalProperties") {
            Some(additional) if additional.is_object() => {
                TypeDescriptor::Mapping(Box::new(translate(additional, true)))
            }
            _ if obj
                .get("properties")
                .and_then(Value::as_object)
                .is_some_and(|p| !p.is_empty()) =>
            {
                TypeDescriptor::Opaque
            }
            // `additionalProperties: true` or no further structure.
            _ => TypeDescriptor::Mapping(Box::new(TypeDescriptor::Any)),
        },
        _ => TypeDescriptor::Any,
    }
}
