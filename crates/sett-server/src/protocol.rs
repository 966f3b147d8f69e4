//! Tool request/response protocol

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ToolError;
use crate::tools::Tools;

const DEFAULT_SEARCH_K: usize = 10;

/// `{ "tool": "<name>", "arguments": { ... } }`
#[derive(Debug, Clone, Deserialize)]
pub struct ToolRequest {
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
}

/// `{ "ok": true, "result": ... }` or `{ "ok": false, "error": ..., "kind": ... }`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl ToolResponse {
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
            kind: None,
        }
    }

    pub fn failure(error: &ToolError) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error.to_string()),
            kind: Some(error.kind().to_string()),
        }
    }
}

/// Catalog entry served by `GET /api/tools`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub arguments: &'static [&'static str],
}

pub const TOOLS: &[ToolInfo] = &[
    ToolInfo {
        name: "find_symbol_usages",
        description: "Definition sites and usages of a function, macro, variable, struct, typedef or class",
        arguments: &["symbol_type", "name"],
    },
    ToolInfo {
        name: "get_function_callers",
        description: "Direct callers of a function",
        arguments: &["name"],
    },
    ToolInfo {
        name: "get_include_dependencies",
        description: "Files that include or import a file, transitively",
        arguments: &["file"],
    },
    ToolInfo {
        name: "find_struct_field_access",
        description: "Places where a struct field is read or written",
        arguments: &["struct_name", "field_name"],
    },
    ToolInfo {
        name: "check_affected_files",
        description: "Files affected by changes to the given files",
        arguments: &["files"],
    },
    ToolInfo {
        name: "semantic_code_search",
        description: "Functions and classes most similar to a natural-language query",
        arguments: &["query", "k", "file_pattern"],
    },
];

// ── Arguments ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SymbolUsageArgs {
    #[serde(alias = "kind")]
    symbol_type: String,
    #[serde(alias = "symbol")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct CallerArgs {
    #[serde(alias = "function_name")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct IncludeArgs {
    #[serde(alias = "file_path")]
    file: String,
}

#[derive(Debug, Deserialize)]
struct FieldAccessArgs {
    #[serde(alias = "struct")]
    struct_name: String,
    #[serde(alias = "field")]
    field_name: String,
}

#[derive(Debug, Deserialize)]
struct AffectedArgs {
    #[serde(alias = "changed_files")]
    files: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default = "default_k", alias = "limit")]
    k: usize,
    #[serde(default)]
    file_pattern: Option<String>,
}

fn default_k() -> usize {
    DEFAULT_SEARCH_K
}

fn args<T: DeserializeOwned>(arguments: Value) -> Result<T, ToolError> {
    let arguments = if arguments.is_null() {
        Value::Object(Default::default())
    } else {
        arguments
    };
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArgument(e.to_string()))
}

fn to_value<T: Serialize>(result: T) -> Result<Value, ToolError> {
    serde_json::to_value(result).map_err(|e| ToolError::InvalidArgument(e.to_string()))
}

/// Run one named tool.
pub async fn call(tools: &Tools, name: &str, arguments: Value) -> Result<Value, ToolError> {
    debug!("Tool call {} {}", name, arguments);
    match name {
        "find_symbol_usages" => {
            let a: SymbolUsageArgs = args(arguments)?;
            to_value(tools.find_symbol_usages(&a.symbol_type, &a.name).await?)
        }
        "get_function_callers" => {
            let a: CallerArgs = args(arguments)?;
            to_value(tools.get_function_callers(&a.name).await?)
        }
        "get_include_dependencies" => {
            let a: IncludeArgs = args(arguments)?;
            to_value(tools.get_include_dependencies(&a.file).await?)
        }
        "find_struct_field_access" => {
            let a: FieldAccessArgs = args(arguments)?;
            to_value(tools.find_struct_field_access(&a.struct_name, &a.field_name).await?)
        }
        "check_affected_files" => {
            let a: AffectedArgs = args(arguments)?;
            to_value(tools.check_affected_files(&a.files).await?)
        }
        "semantic_code_search" => {
            let a: SearchArgs = args(arguments)?;
            to_value(
                tools
                    .semantic_code_search(&a.query, a.k, a.file_pattern.as_deref())
                    .await?,
            )
        }
        other => Err(ToolError::NotFound(format!("unknown tool {}", other))),
    }
}

/// Run a request and wrap the outcome.
pub async fn dispatch(tools: &Tools, request: ToolRequest) -> ToolResponse {
    match call(tools, &request.tool, request.arguments).await {
        Ok(result) => ToolResponse::success(result),
        Err(e) => {
            debug!("Tool {} failed: {}", request.tool, e);
            ToolResponse::failure(&e)
        }
    }
}
