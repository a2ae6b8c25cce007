//! MCP tool definitions for Go language intelligence via gopls.
//!
//! One read-only tool per LSP adapter. Tool arguments use
//! workspace-relative paths, one-based lines, and zero-based character
//! offsets; results are rendered as text with one-based lines and
//! columns.

use std::sync::Arc;

use lsp_types::{
    DiagnosticSeverity, DocumentSymbol, Position, Range, SignatureHelp, SymbolKind, TextEdit,
};
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::tool::ToolCallContext;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolRequestParams, CallToolResult, Content, ListToolsResult};
use rmcp::service::RequestContext;
use rmcp::{tool, tool_router, ErrorData as McpError, RoleServer};
use schemars::JsonSchema;
use serde::Deserialize;

use crate::features::{Location, SymbolMatch};
use crate::lsp_client::LspClient;
use crate::workspace::WorkspaceManager;

/// Create an error `CallToolResult` from a message string.
fn tool_error(msg: impl Into<String>) -> CallToolResult {
    CallToolResult::error(vec![Content::text(msg.into())])
}

fn text_result(msg: impl Into<String>) -> CallToolResult {
    CallToolResult::success(vec![Content::text(msg.into())])
}

/// Tool paths are workspace-relative; anything absolute belongs to a
/// workspace key, not a file argument.
fn validate_relative_path(path: &str) -> Result<(), McpError> {
    if path.is_empty() {
        return Err(McpError::invalid_params("file must not be empty", None));
    }
    if path.starts_with('/') {
        return Err(McpError::invalid_params(
            format!("file must be workspace-relative, got absolute path: {path}"),
            None,
        ));
    }
    Ok(())
}

/// Convert a one-based tool line to the zero-based wire position.
fn position_from(line: u32, character: u32) -> Result<Position, McpError> {
    if line == 0 {
        return Err(McpError::invalid_params(
            "line is one-based; 0 is not a valid line",
            None,
        ));
    }
    Ok(Position {
        line: line - 1,
        character,
    })
}

/// Tool parameter: a file path.
#[derive(Deserialize, JsonSchema)]
pub struct FileParam {
    /// Workspace root path. May be omitted when exactly one workspace
    /// is configured.
    pub workspace: Option<String>,
    /// Workspace-relative path to the Go source file.
    pub file: String,
}

/// Tool parameters: file path + position.
#[derive(Deserialize, JsonSchema)]
pub struct PositionParam {
    /// Workspace root path. May be omitted when exactly one workspace
    /// is configured.
    pub workspace: Option<String>,
    /// Workspace-relative path to the Go source file.
    pub file: String,
    /// One-based line number.
    pub line: u32,
    /// Zero-based character offset.
    pub character: u32,
}

/// Tool parameters for reference searches.
#[derive(Deserialize, JsonSchema)]
pub struct ReferencesParam {
    /// Workspace root path. May be omitted when exactly one workspace
    /// is configured.
    pub workspace: Option<String>,
    /// Workspace-relative path to the Go source file.
    pub file: String,
    /// One-based line number.
    pub line: u32,
    /// Zero-based character offset.
    pub character: u32,
    /// Include the declaration itself in the results. Defaults to true.
    pub include_declaration: Option<bool>,
}

/// Tool parameters for workspace symbol queries.
#[derive(Deserialize, JsonSchema)]
pub struct QueryParam {
    /// Workspace root path. May be omitted when exactly one workspace
    /// is configured.
    pub workspace: Option<String>,
    /// Fuzzy symbol query, e.g. a type or function name.
    pub query: String,
}

/// Tool parameters for range-scoped requests.
#[derive(Deserialize, JsonSchema)]
pub struct RangeParam {
    /// Workspace root path. May be omitted when exactly one workspace
    /// is configured.
    pub workspace: Option<String>,
    /// Workspace-relative path to the Go source file.
    pub file: String,
    /// One-based first line of the range.
    pub start_line: u32,
    /// One-based last line of the range, inclusive.
    pub end_line: u32,
}

/// Format a location as `path:line:col`, one-based.
fn format_location(location: &Location) -> String {
    format!(
        "{}:{}:{}",
        location.path,
        location.range.start.line + 1,
        location.range.start.character + 1,
    )
}

fn render_locations(locations: &[Location], empty: &str) -> String {
    if locations.is_empty() {
        return empty.to_string();
    }
    locations
        .iter()
        .map(format_location)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Flatten every hover shape the protocol allows into plain text.
fn flatten_hover(contents: lsp_types::HoverContents) -> String {
    use lsp_types::{HoverContents, MarkedString};
    match contents {
        HoverContents::Markup(markup) => markup.value,
        HoverContents::Scalar(MarkedString::String(s)) => s,
        HoverContents::Scalar(MarkedString::LanguageString(ls)) => {
            format!("```{}\n{}\n```", ls.language, ls.value)
        }
        HoverContents::Array(items) => items
            .into_iter()
            .map(|item| match item {
                MarkedString::String(s) => s,
                MarkedString::LanguageString(ls) => {
                    format!("```{}\n{}\n```", ls.language, ls.value)
                }
            })
            .collect::<Vec<_>>()
            .join("\n\n"),
    }
}

fn severity_label(severity: Option<DiagnosticSeverity>) -> &'static str {
    match severity {
        Some(DiagnosticSeverity::ERROR) => "ERROR",
        Some(DiagnosticSeverity::WARNING) => "WARNING",
        Some(DiagnosticSeverity::INFORMATION) => "INFO",
        Some(DiagnosticSeverity::HINT) => "HINT",
        _ => "UNKNOWN",
    }
}

fn symbol_kind_label(kind: SymbolKind) -> &'static str {
    match kind {
        SymbolKind::FILE => "file",
        SymbolKind::MODULE => "module",
        SymbolKind::NAMESPACE => "namespace",
        SymbolKind::PACKAGE => "package",
        SymbolKind::CLASS => "class",
        SymbolKind::METHOD => "method",
        SymbolKind::PROPERTY => "property",
        SymbolKind::FIELD => "field",
        SymbolKind::CONSTRUCTOR => "constructor",
        SymbolKind::ENUM => "enum",
        SymbolKind::INTERFACE => "interface",
        SymbolKind::FUNCTION => "function",
        SymbolKind::VARIABLE => "variable",
        SymbolKind::CONSTANT => "constant",
        SymbolKind::STRING => "string",
        SymbolKind::NUMBER => "number",
        SymbolKind::BOOLEAN => "boolean",
        SymbolKind::ARRAY => "array",
        SymbolKind::OBJECT => "object",
        SymbolKind::KEY => "key",
        SymbolKind::NULL => "null",
        SymbolKind::ENUM_MEMBER => "enum member",
        SymbolKind::STRUCT => "struct",
        SymbolKind::EVENT => "event",
        SymbolKind::OPERATOR => "operator",
        SymbolKind::TYPE_PARAMETER => "type parameter",
        _ => "symbol",
    }
}

fn render_document_symbols(symbols: &[DocumentSymbol], depth: usize, out: &mut String) {
    for symbol in symbols {
        out.push_str(&"  ".repeat(depth));
        out.push_str(&format!(
            "{} [{}] line {}\n",
            symbol.name,
            symbol_kind_label(symbol.kind),
            symbol.selection_range.start.line + 1,
        ));
        if let Some(children) = &symbol.children {
            render_document_symbols(children, depth + 1, out);
        }
    }
}

fn render_symbol_matches(symbols: &[SymbolMatch]) -> String {
    symbols
        .iter()
        .map(|s| {
            let container = s
                .container
                .as_deref()
                .map(|c| format!(" ({c})"))
                .unwrap_or_default();
            format!(
                "{} [{}] {}{}",
                s.name,
                symbol_kind_label(s.kind),
                format_location(&s.location),
                container,
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_signature_help(help: &SignatureHelp) -> String {
    let active = help.active_signature.unwrap_or(0) as usize;
    help.signatures
        .iter()
        .enumerate()
        .map(|(i, sig)| {
            let marker = if i == active { "> " } else { "  " };
            match &sig.documentation {
                Some(lsp_types::Documentation::String(doc)) => {
                    format!("{marker}{}\n    {doc}", sig.label)
                }
                Some(lsp_types::Documentation::MarkupContent(markup)) => {
                    format!("{marker}{}\n    {}", sig.label, markup.value)
                }
                None => format!("{marker}{}", sig.label),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Text edits are returned structurally; a caller applying them needs
/// the exact ranges, not a prose rendering.
fn render_edits(edits: &[TextEdit], empty: &str) -> String {
    if edits.is_empty() {
        return empty.to_string();
    }
    serde_json::to_string_pretty(edits)
        .unwrap_or_else(|e| format!("failed to render {} edit(s): {e}", edits.len()))
}

/// MCP server surface providing gopls tools over the workspace registry.
#[derive(Clone)]
pub struct GoplsTools {
    manager: Arc<WorkspaceManager>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl GoplsTools {
    /// Create a tools instance over a workspace registry.
    pub fn new(manager: Arc<WorkspaceManager>) -> Self {
        Self {
            manager,
            tool_router: Self::tool_router(),
        }
    }

    fn select(&self, key: Option<&str>) -> Result<Arc<LspClient>, McpError> {
        self.manager.select(key).ok_or_else(|| {
            McpError::invalid_params(
                format!(
                    "unknown workspace {:?}; configured workspaces: {}",
                    key.unwrap_or("<none>"),
                    self.manager.keys().join(", "),
                ),
                None,
            )
        })
    }

    /// Find where the symbol under the cursor is defined.
    #[tool(
        name = "go_definition",
        description = "Find where a Go symbol is defined. Returns file:line:col locations."
    )]
    async fn definition(&self, params: Parameters<PositionParam>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        validate_relative_path(&p.file)?;
        let client = self.select(p.workspace.as_deref())?;
        let position = position_from(p.line, p.character)?;

        match client.goto_definition(&p.file, position).await {
            Ok(locations) => Ok(text_result(render_locations(
                &locations,
                "No definition found.",
            ))),
            Err(e) => Ok(tool_error(format!("Go to definition failed: {e}"))),
        }
    }

    /// Find all references to the symbol under the cursor.
    #[tool(
        name = "go_references",
        description = "Find all references to a Go symbol. Returns file:line:col locations."
    )]
    async fn references(
        &self,
        params: Parameters<ReferencesParam>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        validate_relative_path(&p.file)?;
        let client = self.select(p.workspace.as_deref())?;
        let position = position_from(p.line, p.character)?;
        let include_declaration = p.include_declaration.unwrap_or(true);

        match client
            .find_references(&p.file, position, include_declaration)
            .await
        {
            Ok(locations) if locations.is_empty() => {
                Ok(text_result("No references found."))
            }
            Ok(locations) => {
                let header = format!("Found {} reference(s):\n", locations.len());
                Ok(text_result(header + &render_locations(&locations, "")))
            }
            Err(e) => Ok(tool_error(format!("Find references failed: {e}"))),
        }
    }

    /// Type signature and docs for the symbol under the cursor.
    #[tool(
        name = "go_hover",
        description = "Get the type signature and documentation for a Go symbol at a position."
    )]
    async fn hover(&self, params: Parameters<PositionParam>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        validate_relative_path(&p.file)?;
        let client = self.select(p.workspace.as_deref())?;
        let position = position_from(p.line, p.character)?;

        match client.hover(&p.file, position).await {
            Ok(Some(hover)) => Ok(text_result(flatten_hover(hover.contents))),
            Ok(None) => Ok(text_result(
                "No hover information available at this position.",
            )),
            Err(e) => Ok(tool_error(format!("Hover request failed: {e}"))),
        }
    }

    /// Find the definition of the type of the expression under the cursor.
    #[tool(
        name = "go_type_definition",
        description = "Find the definition of the type of the Go expression at a position."
    )]
    async fn type_definition(
        &self,
        params: Parameters<PositionParam>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        validate_relative_path(&p.file)?;
        let client = self.select(p.workspace.as_deref())?;
        let position = position_from(p.line, p.character)?;

        match client.goto_type_definition(&p.file, position).await {
            Ok(locations) => Ok(text_result(render_locations(
                &locations,
                "No type definition found.",
            ))),
            Err(e) => Ok(tool_error(format!("Type definition failed: {e}"))),
        }
    }

    /// Find implementations of the interface or method under the cursor.
    #[tool(
        name = "go_implementations",
        description = "Find implementations of a Go interface or interface method at a position."
    )]
    async fn implementations(
        &self,
        params: Parameters<PositionParam>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        validate_relative_path(&p.file)?;
        let client = self.select(p.workspace.as_deref())?;
        let position = position_from(p.line, p.character)?;

        match client.find_implementations(&p.file, position).await {
            Ok(locations) => Ok(text_result(render_locations(
                &locations,
                "No implementations found.",
            ))),
            Err(e) => Ok(tool_error(format!("Find implementations failed: {e}"))),
        }
    }

    /// Outline of a single file.
    #[tool(
        name = "go_document_symbols",
        description = "List the symbols (functions, types, methods) declared in a Go file."
    )]
    async fn document_symbols(
        &self,
        params: Parameters<FileParam>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        validate_relative_path(&p.file)?;
        let client = self.select(p.workspace.as_deref())?;

        match client.document_symbols(&p.file).await {
            Ok(symbols) if symbols.is_empty() => Ok(text_result("No symbols found.")),
            Ok(symbols) => {
                let mut out = String::new();
                render_document_symbols(&symbols, 0, &mut out);
                Ok(text_result(out.trim_end().to_string()))
            }
            Err(e) => Ok(tool_error(format!("Document symbols failed: {e}"))),
        }
    }

    /// Fuzzy symbol search across the workspace.
    #[tool(
        name = "go_workspace_symbols",
        description = "Search the whole Go workspace for symbols matching a fuzzy query."
    )]
    async fn workspace_symbols(
        &self,
        params: Parameters<QueryParam>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let client = self.select(p.workspace.as_deref())?;

        match client.workspace_symbols(&p.query).await {
            Ok(symbols) if symbols.is_empty() => Ok(text_result("No symbols matched.")),
            Ok(symbols) => Ok(text_result(render_symbol_matches(&symbols))),
            Err(e) => Ok(tool_error(format!("Workspace symbol search failed: {e}"))),
        }
    }

    /// Call signature help at a call site.
    #[tool(
        name = "go_signature_help",
        description = "Get the signature of the Go function being called at a position."
    )]
    async fn signature_help(
        &self,
        params: Parameters<PositionParam>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        validate_relative_path(&p.file)?;
        let client = self.select(p.workspace.as_deref())?;
        let position = position_from(p.line, p.character)?;

        match client.signature_help(&p.file, position).await {
            Ok(Some(help)) if !help.signatures.is_empty() => {
                Ok(text_result(render_signature_help(&help)))
            }
            Ok(_) => Ok(text_result("No signature help at this position.")),
            Err(e) => Ok(tool_error(format!("Signature help failed: {e}"))),
        }
    }

    /// Completions at a cursor position.
    #[tool(
        name = "go_completions",
        description = "Get completion candidates at a position in a Go file."
    )]
    async fn completions(
        &self,
        params: Parameters<PositionParam>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        validate_relative_path(&p.file)?;
        let client = self.select(p.workspace.as_deref())?;
        let position = position_from(p.line, p.character)?;

        match client.completions(&p.file, position).await {
            Ok(items) if items.is_empty() => Ok(text_result("No completions available.")),
            Ok(items) => {
                let text = items
                    .iter()
                    .map(|item| match &item.detail {
                        Some(detail) => format!("{} ({detail})", item.label),
                        None => item.label.clone(),
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                Ok(text_result(text))
            }
            Err(e) => Ok(tool_error(format!("Completion request failed: {e}"))),
        }
    }

    /// gofmt-style formatting edits for a file.
    #[tool(
        name = "go_format",
        description = "Compute formatting edits for a Go file. Returns the text edits as JSON; an empty result means the file is already formatted."
    )]
    async fn format(&self, params: Parameters<FileParam>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        validate_relative_path(&p.file)?;
        let client = self.select(p.workspace.as_deref())?;

        match client.format_document(&p.file).await {
            Ok(edits) => Ok(text_result(render_edits(
                &edits,
                "File is already formatted.",
            ))),
            Err(e) => Ok(tool_error(format!("Formatting failed: {e}"))),
        }
    }

    /// Import-organization edits for a file.
    #[tool(
        name = "go_organize_imports",
        description = "Compute the edits gopls suggests to organize a Go file's imports. Returns the text edits as JSON."
    )]
    async fn organize_imports(
        &self,
        params: Parameters<FileParam>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        validate_relative_path(&p.file)?;
        let client = self.select(p.workspace.as_deref())?;

        match client.organize_imports(&p.file).await {
            Ok(edits) => Ok(text_result(render_edits(
                &edits,
                "Imports are already organized.",
            ))),
            Err(e) => Ok(tool_error(format!("Organize imports failed: {e}"))),
        }
    }

    /// Inlay hints (inferred types, parameter names) over a line range.
    #[tool(
        name = "go_inlay_hints",
        description = "Get inlay hints (inferred types, parameter names) for a line range in a Go file."
    )]
    async fn inlay_hints(&self, params: Parameters<RangeParam>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        validate_relative_path(&p.file)?;
        let client = self.select(p.workspace.as_deref())?;
        if p.start_line == 0 || p.end_line < p.start_line {
            return Err(McpError::invalid_params(
                "start_line and end_line are one-based and end_line must not precede start_line",
                None,
            ));
        }
        let range = Range {
            start: Position {
                line: p.start_line - 1,
                character: 0,
            },
            // One past the (one-based, inclusive) last line.
            end: Position {
                line: p.end_line,
                character: 0,
            },
        };

        match client.inlay_hints(&p.file, range).await {
            Ok(hints) if hints.is_empty() => Ok(text_result("No inlay hints in this range.")),
            Ok(hints) => {
                let text = hints
                    .iter()
                    .map(|hint| {
                        let label = match &hint.label {
                            lsp_types::InlayHintLabel::String(s) => s.clone(),
                            lsp_types::InlayHintLabel::LabelParts(parts) => parts
                                .iter()
                                .map(|part| part.value.clone())
                                .collect::<String>(),
                        };
                        format!(
                            "{}:{}: {label}",
                            hint.position.line + 1,
                            hint.position.character + 1,
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                Ok(text_result(text))
            }
            Err(e) => Ok(tool_error(format!("Inlay hints failed: {e}"))),
        }
    }

    /// Cached diagnostics for a file.
    #[tool(
        name = "go_diagnostics",
        description = "Get Go compile errors and vet warnings for a file. Returns diagnostics with line numbers, severity, and messages."
    )]
    async fn diagnostics(&self, params: Parameters<FileParam>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        validate_relative_path(&p.file)?;
        let client = self.select(p.workspace.as_deref())?;

        match client.diagnostics(&p.file).await {
            Ok(items) if items.is_empty() => Ok(text_result("No diagnostics found.")),
            Ok(items) => {
                let text = items
                    .iter()
                    .map(|d| {
                        format!(
                            "{}:{}: [{}] {}",
                            d.range.start.line + 1,
                            d.range.start.character + 1,
                            severity_label(d.severity),
                            d.message,
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                Ok(text_result(text))
            }
            Err(e) => Ok(tool_error(format!(
                "Diagnostics request failed: {e}\n\n\
                 Note: gopls may still be loading the workspace. Try again in a few seconds."
            ))),
        }
    }
}

/// Delegation methods for `ServerHandler` integration.
impl GoplsTools {
    /// List all available tools.
    pub fn list_tools(&self) -> ListToolsResult {
        ListToolsResult {
            tools: self.tool_router.list_all(),
            ..ListToolsResult::default()
        }
    }

    /// Call a tool by name.
    ///
    /// # Errors
    ///
    /// Unknown tool names and invalid parameters surface as MCP errors.
    pub async fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let ctx = ToolCallContext::new(self, request, context);
        self.tool_router.call(ctx).await
    }
}
