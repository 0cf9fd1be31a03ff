//! Typed binding generation from discovered MCP tools.
//!
//! For every discovered tool the generator emits a parameter struct
//! (required fields plain, optional fields `Option<T>` omitted from the
//! wire when absent) and an `async fn` wrapper bound to the tool's fixed
//! `"{server}__{tool}"` identifier. At run time the wrapper serializes
//! its parameters, delegates to `McpClientManager::invoke`, and pipes the
//! result through the field normalizer keyed by server name.
//!
//! Generation is deterministic; a sanitization collision within one
//! server's tool set aborts with a configuration error.

use crate::rust::{enum_variant_name, render_type, to_pascal_case, to_snake_case};
use crate::safety::classify_tool;
use crate::schema::{translate, TypeDescriptor};
use mcpexec_client::{McpClientManager, ToolDescriptor};
use mcpexec_core::{McpExecError, McpExecResult, TOOL_SEPARATOR};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Rendered artifacts for one server.
#[derive(Debug)]
pub struct GeneratedServer {
    /// Server name as configured.
    pub server: String,
    /// Sanitized Rust module name.
    pub module_name: String,
    /// Contents of the server's `mod.rs`.
    pub source: String,
    /// Contents of the server's `README.md`.
    pub readme: String,
}

struct FieldPlan {
    rust_name: String,
    wire_name: String,
    rendered_type: String,
    optional: bool,
    doc: Option<String>,
    enum_def: Option<String>,
}

/// Discover tools from every enabled server and write binding modules.
///
/// Layout under `out_dir`: one `{server}/mod.rs` plus `{server}/README.md`
/// per server, and a barrel `mod.rs` re-exporting every server module.
/// Returns the written paths.
pub async fn generate_all(
    manager: &McpClientManager,
    out_dir: &Path,
) -> McpExecResult<Vec<PathBuf>> {
    let all = manager.list_all_tools().await?;
    if all.is_empty() {
        warn!("No tools discovered; nothing to generate");
        return Ok(Vec::new());
    }

    tokio::fs::create_dir_all(out_dir).await?;
    let mut written = Vec::new();
    let mut modules: Vec<String> = Vec::new();

    for (server, tools) in &all {
        if tools.is_empty() {
            warn!(server = %server, "Server exposes no tools; skipping");
            continue;
        }
        let generated = render_server_module(server, tools)?;
        if modules.contains(&generated.module_name) {
            return Err(McpExecError::Configuration(format!(
                "Server '{server}' collides with another server on module name '{}'",
                generated.module_name
            )));
        }

        let server_dir = out_dir.join(&generated.module_name);
        tokio::fs::create_dir_all(&server_dir).await?;
        let module_path = server_dir.join("mod.rs");
        tokio::fs::write(&module_path, &generated.source).await?;
        let readme_path = server_dir.join("README.md");
        tokio::fs::write(&readme_path, &generated.readme).await?;

        info!(
            server = %server,
            tools = tools.len(),
            path = %module_path.display(),
            "Generated bindings"
        );
        modules.push(generated.module_name);
        written.push(module_path);
        written.push(readme_path);
    }

    let mut barrel = String::from(
        "//! Auto-generated MCP server bindings.\n//!\n//! Generated by `mcpexec generate`. Do not edit manually.\n\n",
    );
    for module in &modules {
        barrel.push_str(&format!("pub mod {module};\n"));
    }
    let barrel_path = out_dir.join("mod.rs");
    tokio::fs::write(&barrel_path, barrel).await?;
    written.push(barrel_path);

    Ok(written)
}

/// Render the binding module and README for one server's tool set.
pub fn render_server_module(
    server: &str,
    tools: &[ToolDescriptor],
) -> McpExecResult<GeneratedServer> {
    let module_name = to_snake_case(server);

    let mut source = format!(
        "//! Auto-generated bindings for the `{server}` MCP server.\n//!\n//! Generated by `mcpexec generate`. Do not edit manually.\n\n"
    );
    source.push_str("#![allow(unused_imports)]\n\n");
    source.push_str("use serde::{Deserialize, Serialize};\n\n");

    let mut seen: HashMap<String, String> = HashMap::new();
    let mut pieces = Vec::new();
    for tool in tools {
        let (fn_name, rendered) = render_tool(server, tool)?;
        if let Some(previous) = seen.insert(fn_name.clone(), tool.name.clone()) {
            return Err(McpExecError::Configuration(format!(
                "Name collision on server '{server}': tools '{previous}' and '{}' both sanitize to '{fn_name}'",
                tool.name
            )));
        }
        pieces.push(rendered);
    }
    source.push_str(&pieces.join("\n"));

    Ok(GeneratedServer {
        server: server.to_string(),
        module_name,
        source,
        readme: render_readme(server, tools),
    })
}

fn render_tool(server: &str, tool: &ToolDescriptor) -> McpExecResult<(String, String)> {
    let fn_name = to_snake_case(&tool.name);
    let type_prefix = to_pascal_case(&tool.name);
    let identifier = format!("{server}{TOOL_SEPARATOR}{}", tool.name);

    let params_fields = plan_fields(server, tool, &tool.input_schema, true)?;
    let result_fields = match &tool.output_schema {
        Some(schema) => plan_fields(server, tool, schema, false)?,
        None => Vec::new(),
    };
    let typed_result = !result_fields.is_empty();

    let mut out = String::new();

    for field in &params_fields {
        if let Some(def) = &field.enum_def {
            out.push_str(def);
            out.push('\n');
        }
    }

    out.push_str(&format!("/// Parameters for `{}`.\n", tool.name));
    out.push_str("#[derive(Debug, Clone, Serialize, Deserialize)]\n");
    if params_fields.is_empty() {
        out.push_str(&format!("pub struct {type_prefix}Params {{}}\n\n"));
    } else {
        out.push_str(&format!("pub struct {type_prefix}Params {{\n"));
        for field in &params_fields {
            push_field(&mut out, field, false);
        }
        out.push_str("}\n\n");
    }

    if typed_result {
        out.push_str(&format!("/// Result of `{}`.\n", tool.name));
        out.push_str("#[derive(Debug, Clone, Serialize, Deserialize)]\n");
        out.push_str(&format!("pub struct {type_prefix}Result {{\n"));
        for field in &result_fields {
            push_field(&mut out, field, true);
        }
        out.push_str("}\n\n");
    }

    if tool.description.is_empty() {
        out.push_str(&format!("/// Call the `{}` tool on the `{server}` server.\n", tool.name));
    } else {
        for line in tool.description.lines() {
            out.push_str(&format!("/// {line}\n"));
        }
    }
    let return_type = if typed_result {
        format!("{type_prefix}Result")
    } else {
        "serde_json::Value".to_string()
    };
    out.push_str(&format!(
        "pub async fn {fn_name}(\n    manager: &mcpexec_client::McpClientManager,\n    params: {type_prefix}Params,\n) -> mcpexec_core::McpExecResult<{return_type}> {{\n"
    ));
    out.push_str("    let arguments = serde_json::to_value(&params)?;\n");
    out.push_str(&format!(
        "    let result = manager.invoke({}, arguments).await?;\n",
        quote(&identifier)
    ));
    out.push_str(&format!(
        "    let normalized = mcpexec_client::normalize_fields(&result, manager.strategy_for({}));\n",
        quote(server)
    ));
    if typed_result {
        out.push_str("    Ok(serde_json::from_value(normalized)?)\n");
    } else {
        out.push_str("    Ok(normalized)\n");
    }
    out.push_str("}\n");

    Ok((fn_name, out))
}

fn push_field(out: &mut String, field: &FieldPlan, deserialized: bool) {
    if let Some(doc) = &field.doc {
        for line in doc.lines() {
            out.push_str(&format!("    /// {line}\n"));
        }
    }
    let mut attrs = Vec::new();
    if field.wire_name != field.rust_name {
        attrs.push(format!("rename = {}", quote(&field.wire_name)));
    }
    if field.optional {
        // Optional params stay off the wire; optional result fields
        // tolerate absence.
        if deserialized {
            attrs.push("default".to_string());
        } else {
            attrs.push("skip_serializing_if = \"Option::is_none\"".to_string());
        }
    }
    if !attrs.is_empty() {
        out.push_str(&format!("    #[serde({})]\n", attrs.join(", ")));
    }
    out.push_str(&format!("    pub {}: {},\n", field.rust_name, field.rendered_type));
}

fn plan_fields(
    server: &str,
    tool: &ToolDescriptor,
    schema: &Value,
    emit_enums: bool,
) -> McpExecResult<Vec<FieldPlan>> {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(Vec::new());
    };
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let type_prefix = to_pascal_case(&tool.name);
    let mut seen: HashMap<String, String> = HashMap::new();
    let mut fields = Vec::new();
    for (name, prop_schema) in properties {
        let descriptor = translate(prop_schema, required.contains(&name.as_str()));
        let optional = matches!(descriptor, TypeDescriptor::Optional(_));
        let (enum_def, choice_name) = if emit_enums {
            plan_enum(&type_prefix, name, &descriptor)
        } else {
            (None, None)
        };
        let rust_name = to_snake_case(name);
        if let Some(previous) = seen.insert(rust_name.clone(), name.clone()) {
            return Err(McpExecError::Configuration(format!(
                "Name collision in '{server}{TOOL_SEPARATOR}{}': fields '{previous}' and '{name}' both sanitize to '{rust_name}'",
                tool.name
            )));
        }
        fields.push(FieldPlan {
            rust_name,
            wire_name: name.clone(),
            rendered_type: render_type(&descriptor, choice_name.as_deref()),
            optional,
            doc: prop_schema
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            enum_def,
        });
    }
    Ok(fields)
}

/// Plan a generated enum for a (possibly optional) closed string choice.
///
/// Literals that cannot all become distinct valid variant names degrade
/// to the choice's fallback primitive instead.
fn plan_enum(
    type_prefix: &str,
    field: &str,
    descriptor: &TypeDescriptor,
) -> (Option<String>, Option<String>) {
    let values = match descriptor {
        TypeDescriptor::Choice(values) => values,
        TypeDescriptor::Optional(inner) => match inner.as_ref() {
            TypeDescriptor::Choice(values) => values,
            _ => return (None, None),
        },
        _ => return (None, None),
    };

    let Some(literals) = values
        .iter()
        .map(Value::as_str)
        .collect::<Option<Vec<&str>>>()
    else {
        return (None, None);
    };

    let mut variants: Vec<(&str, String)> = Vec::new();
    for literal in literals {
        match enum_variant_name(literal) {
            Some(variant) if !variants.iter().any(|(_, v)| *v == variant) => {
                variants.push((literal, variant));
            }
            _ => return (None, None),
        }
    }

    let enum_name = format!("{type_prefix}{}", to_pascal_case(field));
    let mut def = format!("/// Allowed values for `{field}`.\n");
    def.push_str("#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]\n");
    def.push_str(&format!("pub enum {enum_name} {{\n"));
    for (literal, variant) in &variants {
        def.push_str(&format!("    #[serde(rename = {})]\n", quote(literal)));
        def.push_str(&format!("    {variant},\n"));
    }
    def.push_str("}\n");

    (Some(def), Some(enum_name))
}

fn render_readme(server: &str, tools: &[ToolDescriptor]) -> String {
    let mut out = format!(
        "# {server} MCP tools\n\nAuto-generated wrappers for the `{server}` MCP server. Do not edit manually.\n\n## Tools\n\n"
    );
    for tool in tools {
        let description = (!tool.description.is_empty()).then_some(tool.description.as_str());
        let safety = classify_tool(&tool.name, description);
        let summary = description
            .and_then(|d| d.lines().next())
            .unwrap_or("No description");
        out.push_str(&format!(
            "- `{}` ({}): {summary}\n",
            tool.name,
            safety.label()
        ));
    }
    out
}

/// JSON string literal rendering (quoted and escaped) for generated source.
fn quote(text: &str) -> String {
    Value::String(text.to_string()).to_string()
}
