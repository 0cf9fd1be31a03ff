//! Safety classification of discovered tools.
//!
//! Classification is heuristic: well-known name prefixes and description
//! keywords sort tools into read-only and mutating buckets so generated
//! documentation (and the CLI listing) can flag what a tool is likely to
//! do. Unknown is an honest answer.

/// Heuristic safety class of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolSafety {
    /// Read-only by every signal.
    Safe,
    /// Mutates state or executes arbitrary actions.
    Dangerous,
    /// No clear signal either way.
    Unknown,
}

impl ToolSafety {
    /// Lowercase label used in generated documentation.
    pub fn label(self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Dangerous => "dangerous",
            Self::Unknown => "unknown",
        }
    }
}

const SAFE_PREFIXES: &[&str] = &[
    "get_", "list_", "search_", "describe_", "fetch", "read_", "show_", "view_", "find_",
    "query_",
];

const DANGEROUS_PREFIXES: &[&str] = &[
    "delete_", "remove_", "drop_", "destroy_", "kill_", "update_", "write_", "execute_", "run_",
    "modify_", "set_", "put_", "post_",
];

const SAFE_KEYWORDS: &[&str] = &[
    "get", "list", "read", "fetch", "search", "query", "show", "view", "find", "describe",
];

const DANGEROUS_KEYWORDS: &[&str] = &[
    "delete", "remove", "drop", "destroy", "kill", "update", "write", "execute", "modify",
    "truncate",
];

/// Classify a tool by name and description.
///
/// A dangerous description keyword overrides everything else; then name
/// prefixes; then safe description keywords; anything without a signal is
/// [`ToolSafety::Unknown`].
pub fn classify_tool(name: &str, description: Option<&str>) -> ToolSafety {
    let name = name.to_lowercase();
    let description = description.map(str::to_lowercase);

    if let Some(desc) = &description {
        if contains_keyword(desc, DANGEROUS_KEYWORDS) {
            return ToolSafety::Dangerous;
        }
    }

    if DANGEROUS_PREFIXES.iter().any(|p| name.starts_with(p))
        || (name.starts_with("create_") && name.contains("table"))
    {
        return ToolSafety::Dangerous;
    }
    if SAFE_PREFIXES.iter().any(|p| name.starts_with(p)) {
        return ToolSafety::Safe;
    }

    if let Some(desc) = &description {
        if contains_keyword(desc, SAFE_KEYWORDS) {
            return ToolSafety::Safe;
        }
    }

    ToolSafety::Unknown
}

fn contains_keyword(text: &str, keywords: &[&str]) -> bool {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .any(|word| keywords.contains(&word))
}
