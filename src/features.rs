//! LSP request adapters, one per exposed tool.
//!
//! Every adapter follows the same template: refuse when the client is
//! not running, open the file for file-positioned requests, issue the
//! request, parse the `result`, and translate any URIs in it back to
//! workspace-relative paths. Methods that may legitimately return null
//! (hover, signature help, completion) yield empty values; null list
//! results yield empty lists.

use std::time::Duration;

use lsp_types::{
    CodeActionContext, CodeActionKind, CodeActionOrCommand, CodeActionParams, CompletionItem,
    CompletionParams, CompletionResponse, Diagnostic, DocumentChangeOperation, DocumentChanges,
    DocumentFormattingParams, DocumentSymbol, DocumentSymbolParams, DocumentSymbolResponse,
    FormattingOptions, GotoDefinitionParams, Hover, HoverParams, InlayHint, InlayHintParams,
    OneOf, PartialResultParams, Position, Range, ReferenceContext, ReferenceParams, SignatureHelp,
    SignatureHelpParams, SymbolInformation, SymbolKind, TextDocumentIdentifier,
    TextDocumentPositionParams, TextEdit, Uri, WorkDoneProgressParams, WorkspaceEdit,
    WorkspaceSymbolParams, WorkspaceSymbolResponse,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::Error;
use crate::lsp_client::LspClient;

/// Pause before reading the diagnostic cache, giving gopls a chance to
/// publish for a freshly opened file.
const DIAGNOSTICS_SETTLE: Duration = Duration::from_millis(100);

/// A resolved source location. `path` is workspace-relative for files
/// under the root and absolute for files outside it (dependencies).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    pub path: String,
    pub range: Range,
}

/// One workspace-symbol query match.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolMatch {
    pub name: String,
    pub kind: SymbolKind,
    pub location: Location,
    pub container: Option<String>,
}

impl LspClient {
    fn uri(&self, relative: &str) -> Result<Uri, Error> {
        self.paths()
            .to_uri(relative)
            .parse()
            .map_err(|e| Error::Protocol(format!("cannot build uri for {relative}: {e}")))
    }

    fn position_params(
        &self,
        relative: &str,
        position: Position,
    ) -> Result<TextDocumentPositionParams, Error> {
        Ok(TextDocumentPositionParams {
            text_document: TextDocumentIdentifier {
                uri: self.uri(relative)?,
            },
            position,
        })
    }

    fn translate_location(&self, location: lsp_types::Location) -> Location {
        Location {
            path: self.paths().to_relative(location.uri.as_str()),
            range: location.range,
        }
    }

    /// Issue a request whose params serialize from an `lsp_types` struct.
    async fn request_typed(&self, method: &str, params: impl Serialize) -> Result<Value, Error> {
        let params = serde_json::to_value(params)
            .map_err(|e| Error::Protocol(format!("cannot encode {method} params: {e}")))?;
        self.request(method, params).await
    }

    /// Location-list requests share a parser: a scalar `Location`, a
    /// `Location[]`, and a `LocationLink[]` all normalize to the same
    /// translated list.
    async fn locations_at(
        &self,
        method: &str,
        relative: &str,
        position: Position,
    ) -> Result<Vec<Location>, Error> {
        self.ensure_file_open(relative).await?;
        let params = GotoDefinitionParams {
            text_document_position_params: self.position_params(relative, position)?,
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };
        let result = self.request_typed(method, params).await?;
        self.parse_locations(result, method)
    }

    fn parse_locations(&self, result: Value, method: &str) -> Result<Vec<Location>, Error> {
        if result.is_null() {
            return Ok(Vec::new());
        }
        let response: lsp_types::GotoDefinitionResponse = decode(result, method)?;
        Ok(match response {
            lsp_types::GotoDefinitionResponse::Scalar(location) => {
                vec![self.translate_location(location)]
            }
            lsp_types::GotoDefinitionResponse::Array(locations) => locations
                .into_iter()
                .map(|l| self.translate_location(l))
                .collect(),
            lsp_types::GotoDefinitionResponse::Link(links) => links
                .into_iter()
                .map(|link| Location {
                    path: self.paths().to_relative(link.target_uri.as_str()),
                    range: link.target_selection_range,
                })
                .collect(),
        })
    }

    /// `textDocument/definition`.
    ///
    /// # Errors
    ///
    /// Propagates readiness, request, and parse failures.
    pub async fn goto_definition(
        &self,
        relative: &str,
        position: Position,
    ) -> Result<Vec<Location>, Error> {
        self.locations_at("textDocument/definition", relative, position)
            .await
    }

    /// `textDocument/typeDefinition`.
    ///
    /// # Errors
    ///
    /// Propagates readiness, request, and parse failures.
    pub async fn goto_type_definition(
        &self,
        relative: &str,
        position: Position,
    ) -> Result<Vec<Location>, Error> {
        self.locations_at("textDocument/typeDefinition", relative, position)
            .await
    }

    /// `textDocument/implementation`.
    ///
    /// # Errors
    ///
    /// Propagates readiness, request, and parse failures.
    pub async fn find_implementations(
        &self,
        relative: &str,
        position: Position,
    ) -> Result<Vec<Location>, Error> {
        self.locations_at("textDocument/implementation", relative, position)
            .await
    }

    /// `textDocument/references`.
    ///
    /// # Errors
    ///
    /// Propagates readiness, request, and parse failures.
    pub async fn find_references(
        &self,
        relative: &str,
        position: Position,
        include_declaration: bool,
    ) -> Result<Vec<Location>, Error> {
        self.ensure_file_open(relative).await?;
        let params = ReferenceParams {
            text_document_position: self.position_params(relative, position)?,
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
            context: ReferenceContext {
                include_declaration,
            },
        };
        let result = self
            .request_typed("textDocument/references", params)
            .await?;
        self.parse_locations(result, "textDocument/references")
    }

    /// `textDocument/hover`. A null result is `None`, not an error.
    ///
    /// # Errors
    ///
    /// Propagates readiness, request, and parse failures.
    pub async fn hover(&self, relative: &str, position: Position) -> Result<Option<Hover>, Error> {
        self.ensure_file_open(relative).await?;
        let params = HoverParams {
            text_document_position_params: self.position_params(relative, position)?,
            work_done_progress_params: WorkDoneProgressParams::default(),
        };
        let result = self.request_typed("textDocument/hover", params).await?;
        if result.is_null() {
            return Ok(None);
        }
        decode(result, "textDocument/hover").map(Some)
    }

    /// `textDocument/documentSymbol`. Flat `SymbolInformation` results
    /// are normalized into childless `DocumentSymbol`s.
    ///
    /// # Errors
    ///
    /// Propagates readiness, request, and parse failures.
    pub async fn document_symbols(&self, relative: &str) -> Result<Vec<DocumentSymbol>, Error> {
        self.ensure_file_open(relative).await?;
        let params = DocumentSymbolParams {
            text_document: TextDocumentIdentifier {
                uri: self.uri(relative)?,
            },
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };
        let result = self
            .request_typed("textDocument/documentSymbol", params)
            .await?;
        if result.is_null() {
            return Ok(Vec::new());
        }
        let response: DocumentSymbolResponse = decode(result, "textDocument/documentSymbol")?;
        Ok(match response {
            DocumentSymbolResponse::Nested(symbols) => symbols,
            DocumentSymbolResponse::Flat(infos) => {
                infos.into_iter().map(flat_symbol_to_nested).collect()
            }
        })
    }

    /// `workspace/symbol`. Not file-positioned; only waits for readiness.
    ///
    /// # Errors
    ///
    /// Propagates readiness, request, and parse failures.
    pub async fn workspace_symbols(&self, query: &str) -> Result<Vec<SymbolMatch>, Error> {
        self.ensure_ready().await?;
        let params = WorkspaceSymbolParams {
            query: query.to_string(),
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };
        let result = self.request_typed("workspace/symbol", params).await?;
        if result.is_null() {
            return Ok(Vec::new());
        }
        let response: WorkspaceSymbolResponse = decode(result, "workspace/symbol")?;
        Ok(match response {
            WorkspaceSymbolResponse::Flat(infos) => infos
                .into_iter()
                .map(|info| SymbolMatch {
                    name: info.name,
                    kind: info.kind,
                    container: info.container_name,
                    location: self.translate_location(info.location),
                })
                .collect(),
            WorkspaceSymbolResponse::Nested(symbols) => symbols
                .into_iter()
                .map(|symbol| {
                    let location = match symbol.location {
                        OneOf::Left(location) => self.translate_location(location),
                        // Location-less matches carry only a URI.
                        OneOf::Right(workspace_location) => Location {
                            path: self
                                .paths()
                                .to_relative(workspace_location.uri.as_str()),
                            range: Range::default(),
                        },
                    };
                    SymbolMatch {
                        name: symbol.name,
                        kind: symbol.kind,
                        container: symbol.container_name,
                        location,
                    }
                })
                .collect(),
        })
    }

    /// `textDocument/signatureHelp`. A null result is `None`.
    ///
    /// # Errors
    ///
    /// Propagates readiness, request, and parse failures.
    pub async fn signature_help(
        &self,
        relative: &str,
        position: Position,
    ) -> Result<Option<SignatureHelp>, Error> {
        self.ensure_file_open(relative).await?;
        let params = SignatureHelpParams {
            context: None,
            text_document_position_params: self.position_params(relative, position)?,
            work_done_progress_params: WorkDoneProgressParams::default(),
        };
        let result = self
            .request_typed("textDocument/signatureHelp", params)
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        decode(result, "textDocument/signatureHelp").map(Some)
    }

    /// `textDocument/completion`. A conforming server may answer with a
    /// `CompletionList` or a bare item array; both collapse to the
    /// item list.
    ///
    /// # Errors
    ///
    /// Propagates readiness, request, and parse failures.
    pub async fn completions(
        &self,
        relative: &str,
        position: Position,
    ) -> Result<Vec<CompletionItem>, Error> {
        self.ensure_file_open(relative).await?;
        let params = CompletionParams {
            text_document_position: self.position_params(relative, position)?,
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
            context: None,
        };
        let result = self.request_typed("textDocument/completion", params).await?;
        if result.is_null() {
            return Ok(Vec::new());
        }
        let response: CompletionResponse = decode(result, "textDocument/completion")?;
        Ok(match response {
            CompletionResponse::Array(items) => items,
            CompletionResponse::List(list) => list.items,
        })
    }

    /// `textDocument/formatting` with gofmt conventions (tabs, width 4).
    ///
    /// # Errors
    ///
    /// Propagates readiness, request, and parse failures.
    pub async fn format_document(&self, relative: &str) -> Result<Vec<TextEdit>, Error> {
        self.ensure_file_open(relative).await?;
        let params = DocumentFormattingParams {
            text_document: TextDocumentIdentifier {
                uri: self.uri(relative)?,
            },
            options: FormattingOptions {
                tab_size: 4,
                insert_spaces: false,
                ..FormattingOptions::default()
            },
            work_done_progress_params: WorkDoneProgressParams::default(),
        };
        let result = self
            .request_typed("textDocument/formatting", params)
            .await?;
        if result.is_null() {
            return Ok(Vec::new());
        }
        decode(result, "textDocument/formatting")
    }

    /// `textDocument/codeAction` filtered to `source.organizeImports`,
    /// projected down to the text edits for this file. No matching
    /// action means no edits.
    ///
    /// # Errors
    ///
    /// Propagates readiness, request, and parse failures.
    pub async fn organize_imports(&self, relative: &str) -> Result<Vec<TextEdit>, Error> {
        self.ensure_file_open(relative).await?;
        let uri = self.uri(relative)?;
        let params = CodeActionParams {
            text_document: TextDocumentIdentifier { uri: uri.clone() },
            range: Range::default(),
            context: CodeActionContext {
                diagnostics: Vec::new(),
                only: Some(vec![CodeActionKind::SOURCE_ORGANIZE_IMPORTS]),
                trigger_kind: None,
            },
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };
        let result = self
            .request_typed("textDocument/codeAction", params)
            .await?;
        if result.is_null() {
            return Ok(Vec::new());
        }
        let actions: Vec<CodeActionOrCommand> = decode(result, "textDocument/codeAction")?;
        let edit = actions.into_iter().find_map(|action| match action {
            CodeActionOrCommand::CodeAction(action) => action.edit,
            CodeActionOrCommand::Command(_) => None,
        });
        Ok(edit.map_or_else(Vec::new, |edit| project_edits_for(edit, &uri)))
    }

    /// `textDocument/inlayHint` over the given range.
    ///
    /// # Errors
    ///
    /// Propagates readiness, request, and parse failures.
    pub async fn inlay_hints(&self, relative: &str, range: Range) -> Result<Vec<InlayHint>, Error> {
        self.ensure_file_open(relative).await?;
        let params = InlayHintParams {
            work_done_progress_params: WorkDoneProgressParams::default(),
            text_document: TextDocumentIdentifier {
                uri: self.uri(relative)?,
            },
            range,
        };
        let result = self.request_typed("textDocument/inlayHint", params).await?;
        if result.is_null() {
            return Ok(Vec::new());
        }
        decode(result, "textDocument/inlayHint")
    }

    /// Cached diagnostics for a file. No request is issued: the file is
    /// opened, the cache is given a moment to settle, and whatever
    /// gopls has published is returned. Absence is an empty list.
    ///
    /// # Errors
    ///
    /// Propagates readiness and file-open failures.
    pub async fn diagnostics(&self, relative: &str) -> Result<Vec<Diagnostic>, Error> {
        self.ensure_file_open(relative).await?;
        tokio::time::sleep(DIAGNOSTICS_SETTLE).await;
        Ok(self.cached_diagnostics(relative).await)
    }
}

fn decode<T: DeserializeOwned>(value: Value, what: &str) -> Result<T, Error> {
    serde_json::from_value(value).map_err(|e| Error::Protocol(format!("{what} result: {e}")))
}

/// Collapse a flat symbol into the nested shape with no children.
#[allow(deprecated)]
fn flat_symbol_to_nested(info: SymbolInformation) -> DocumentSymbol {
    DocumentSymbol {
        name: info.name,
        detail: None,
        kind: info.kind,
        tags: info.tags,
        deprecated: None,
        range: info.location.range,
        selection_range: info.location.range,
        children: None,
    }
}

/// Pull the text edits for `uri` out of a workspace edit, looking at
/// `changes` first and falling back to `documentChanges`.
fn project_edits_for(edit: WorkspaceEdit, uri: &Uri) -> Vec<TextEdit> {
    if let Some(mut changes) = edit.changes {
        if let Some(edits) = changes.remove(uri) {
            return edits;
        }
    }
    match edit.document_changes {
        Some(DocumentChanges::Edits(edits)) => edits
            .into_iter()
            .filter(|e| e.text_document.uri == *uri)
            .flat_map(|e| e.edits)
            .map(|e| match e {
                OneOf::Left(edit) => edit,
                OneOf::Right(annotated) => annotated.text_edit,
            })
            .collect(),
        Some(DocumentChanges::Operations(ops)) => ops
            .into_iter()
            .filter_map(|op| match op {
                DocumentChangeOperation::Edit(edit) if edit.text_document.uri == *uri => {
                    Some(edit.edits)
                }
                _ => None,
            })
            .flatten()
            .map(|e| match e {
                OneOf::Left(edit) => edit,
                OneOf::Right(annotated) => annotated.text_edit,
            })
            .collect(),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsp_client::testing::{ready_client, FakeServer};
    use serde_json::json;
    use std::sync::Arc;

    fn pos(line: u32, character: u32) -> Position {
        Position { line, character }
    }

    fn range(sl: u32, sc: u32, el: u32, ec: u32) -> Value {
        json!({
            "start": {"line": sl, "character": sc},
            "end": {"line": el, "character": ec},
        })
    }

    /// Consume the didOpen the first file-positioned adapter call
    /// emits, then answer the request that follows with `result`.
    async fn answer_after_open(server: &mut FakeServer, method: &str, result: Value) {
        let open = server.recv().await;
        assert_eq!(open["method"], "textDocument/didOpen");
        answer(server, method, result).await;
    }

    async fn answer(server: &mut FakeServer, method: &str, result: Value) {
        let req = server.recv().await;
        assert_eq!(req["method"], method);
        let id = req["id"].clone();
        server
            .send(json!({"jsonrpc": "2.0", "id": id, "result": result}))
            .await;
    }

    fn workspace_with_main() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.go"), "package main\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn definition_translates_scalar_location() {
        let dir = workspace_with_main();
        let (client, mut server) = ready_client(dir.path());
        let client = Arc::new(client);
        let uri = client.paths().to_uri("main.go");

        let caller = Arc::clone(&client);
        let handle =
            tokio::spawn(async move { caller.goto_definition("main.go", pos(6, 11)).await });

        answer_after_open(
            &mut server,
            "textDocument/definition",
            json!({"uri": uri, "range": range(11, 5, 11, 17)}),
        )
        .await;

        let locations = handle.await.unwrap().unwrap();
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].path, "main.go");
        assert_eq!(locations[0].range.start, pos(11, 5));
    }

    #[tokio::test]
    async fn definition_normalizes_location_links() {
        let dir = workspace_with_main();
        let (client, mut server) = ready_client(dir.path());
        let client = Arc::new(client);
        let uri = client.paths().to_uri("main.go");

        let caller = Arc::clone(&client);
        let handle =
            tokio::spawn(async move { caller.goto_definition("main.go", pos(0, 0)).await });

        answer_after_open(
            &mut server,
            "textDocument/definition",
            json!([{
                "targetUri": uri,
                "targetRange": range(11, 0, 13, 1),
                "targetSelectionRange": range(11, 5, 11, 17),
            }]),
        )
        .await;

        let locations = handle.await.unwrap().unwrap();
        assert_eq!(locations.len(), 1);
        // Links collapse to their selection range.
        assert_eq!(locations[0].range.start, pos(11, 5));
    }

    #[tokio::test]
    async fn definition_outside_the_workspace_stays_absolute() {
        let dir = workspace_with_main();
        let (client, mut server) = ready_client(dir.path());
        let client = Arc::new(client);

        let caller = Arc::clone(&client);
        let handle =
            tokio::spawn(async move { caller.goto_definition("main.go", pos(7, 5)).await });

        answer_after_open(
            &mut server,
            "textDocument/definition",
            json!([{
                "uri": "file:///usr/lib/go/src/fmt/print.go",
                "range": range(250, 5, 250, 12),
            }]),
        )
        .await;

        let locations = handle.await.unwrap().unwrap();
        assert_eq!(locations[0].path, "/usr/lib/go/src/fmt/print.go");
    }

    #[tokio::test]
    async fn references_with_null_result_yield_an_empty_list() {
        let dir = workspace_with_main();
        let (client, mut server) = ready_client(dir.path());
        let client = Arc::new(client);

        let caller = Arc::clone(&client);
        let handle = tokio::spawn(async move {
            caller.find_references("main.go", pos(11, 5), true).await
        });

        let open = server.recv().await;
        assert_eq!(open["method"], "textDocument/didOpen");
        let req = server.recv().await;
        assert_eq!(req["method"], "textDocument/references");
        assert_eq!(req["params"]["context"]["includeDeclaration"], json!(true));
        let id = req["id"].clone();
        server
            .send(json!({"jsonrpc": "2.0", "id": id, "result": null}))
            .await;

        assert!(handle.await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn hover_null_becomes_none_and_markup_parses() {
        let dir = workspace_with_main();
        let (client, mut server) = ready_client(dir.path());
        let client = Arc::new(client);

        let caller = Arc::clone(&client);
        let handle = tokio::spawn(async move { caller.hover("main.go", pos(0, 0)).await });
        answer_after_open(&mut server, "textDocument/hover", Value::Null).await;
        assert!(handle.await.unwrap().unwrap().is_none());

        let caller = Arc::clone(&client);
        let handle = tokio::spawn(async move { caller.hover("main.go", pos(6, 11)).await });
        answer(
            &mut server,
            "textDocument/hover",
            json!({"contents": {"kind": "markdown", "value": "```go\nfunc testFunction() int\n```"}}),
        )
        .await;

        let hover = handle.await.unwrap().unwrap().expect("hover");
        match hover.contents {
            lsp_types::HoverContents::Markup(markup) => {
                assert!(markup.value.contains("func testFunction() int"));
            }
            other => panic!("expected markup contents, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn document_symbols_accept_nested_and_flat_shapes() {
        let dir = workspace_with_main();
        let (client, mut server) = ready_client(dir.path());
        let client = Arc::new(client);
        let uri = client.paths().to_uri("main.go");

        let caller = Arc::clone(&client);
        let handle = tokio::spawn(async move { caller.document_symbols("main.go").await });
        answer_after_open(
            &mut server,
            "textDocument/documentSymbol",
            json!([{
                "name": "main",
                "kind": 12,
                "range": range(5, 0, 8, 1),
                "selectionRange": range(5, 5, 5, 9),
            }]),
        )
        .await;
        let nested = handle.await.unwrap().unwrap();
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].name, "main");
        assert_eq!(nested[0].kind, SymbolKind::FUNCTION);

        let caller = Arc::clone(&client);
        let handle = tokio::spawn(async move { caller.document_symbols("main.go").await });
        answer(
            &mut server,
            "textDocument/documentSymbol",
            json!([{
                "name": "testFunction",
                "kind": 12,
                "location": {"uri": uri, "range": range(11, 0, 13, 1)},
            }]),
        )
        .await;
        let flat = handle.await.unwrap().unwrap();
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].name, "testFunction");
        assert_eq!(flat[0].range.start, pos(11, 0));
        assert!(flat[0].children.is_none());
    }

    #[tokio::test]
    async fn workspace_symbols_translate_paths() {
        let dir = workspace_with_main();
        let (client, mut server) = ready_client(dir.path());
        let client = Arc::new(client);
        let uri = client.paths().to_uri("main.go");

        let caller = Arc::clone(&client);
        let handle = tokio::spawn(async move { caller.workspace_symbols("testFunc").await });

        answer(
            &mut server,
            "workspace/symbol",
            json!([{
                "name": "testFunction",
                "kind": 12,
                "location": {"uri": uri, "range": range(11, 5, 11, 17)},
                "containerName": "main",
            }]),
        )
        .await;

        let symbols = handle.await.unwrap().unwrap();
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].name, "testFunction");
        assert_eq!(symbols[0].location.path, "main.go");
        assert_eq!(symbols[0].container.as_deref(), Some("main"));
    }

    #[tokio::test]
    async fn completions_accept_both_result_shapes() {
        let dir = workspace_with_main();
        let (client, mut server) = ready_client(dir.path());
        let client = Arc::new(client);

        let caller = Arc::clone(&client);
        let handle = tokio::spawn(async move { caller.completions("main.go", pos(7, 5)).await });
        answer_after_open(
            &mut server,
            "textDocument/completion",
            json!({"isIncomplete": false, "items": [{"label": "Println"}]}),
        )
        .await;
        let from_list = handle.await.unwrap().unwrap();
        assert_eq!(from_list.len(), 1);
        assert_eq!(from_list[0].label, "Println");

        let caller = Arc::clone(&client);
        let handle = tokio::spawn(async move { caller.completions("main.go", pos(7, 5)).await });
        answer(
            &mut server,
            "textDocument/completion",
            json!([{"label": "Printf"}, {"label": "Println"}]),
        )
        .await;
        assert_eq!(handle.await.unwrap().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn signature_help_null_is_none() {
        let dir = workspace_with_main();
        let (client, mut server) = ready_client(dir.path());
        let client = Arc::new(client);

        let caller = Arc::clone(&client);
        let handle =
            tokio::spawn(async move { caller.signature_help("main.go", pos(7, 13)).await });
        answer_after_open(&mut server, "textDocument/signatureHelp", Value::Null).await;
        assert!(handle.await.unwrap().unwrap().is_none());
    }

    #[tokio::test]
    async fn formatting_sends_tabs_and_tolerates_null() {
        let dir = workspace_with_main();
        let (client, mut server) = ready_client(dir.path());
        let client = Arc::new(client);

        let caller = Arc::clone(&client);
        let handle = tokio::spawn(async move { caller.format_document("main.go").await });

        let open = server.recv().await;
        assert_eq!(open["method"], "textDocument/didOpen");
        let req = server.recv().await;
        assert_eq!(req["method"], "textDocument/formatting");
        assert_eq!(req["params"]["options"]["tabSize"], json!(4));
        assert_eq!(req["params"]["options"]["insertSpaces"], json!(false));
        let id = req["id"].clone();
        server
            .send(json!({"jsonrpc": "2.0", "id": id, "result": null}))
            .await;

        assert!(handle.await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn organize_imports_projects_the_first_edit_bearing_action() {
        let dir = workspace_with_main();
        let (client, mut server) = ready_client(dir.path());
        let client = Arc::new(client);
        let uri = client.paths().to_uri("main.go");

        let caller = Arc::clone(&client);
        let handle = tokio::spawn(async move { caller.organize_imports("main.go").await });

        let open = server.recv().await;
        assert_eq!(open["method"], "textDocument/didOpen");
        let req = server.recv().await;
        assert_eq!(req["method"], "textDocument/codeAction");
        assert_eq!(
            req["params"]["context"]["only"],
            json!(["source.organizeImports"])
        );
        assert_eq!(req["params"]["range"], range(0, 0, 0, 0));
        let id = req["id"].clone();
        server
            .send(json!({"jsonrpc": "2.0", "id": id, "result": [
                {"title": "No edit here", "kind": "source.organizeImports"},
                {
                    "title": "Organize Imports",
                    "kind": "source.organizeImports",
                    "edit": {"changes": {uri.clone(): [
                        {"range": range(2, 0, 2, 12), "newText": "import \"fmt\"\n"},
                    ]}},
                },
            ]}))
            .await;

        let edits = handle.await.unwrap().unwrap();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].new_text, "import \"fmt\"\n");
    }

    #[tokio::test]
    async fn organize_imports_without_matching_action_is_empty() {
        let dir = workspace_with_main();
        let (client, mut server) = ready_client(dir.path());
        let client = Arc::new(client);

        let caller = Arc::clone(&client);
        let handle = tokio::spawn(async move { caller.organize_imports("main.go").await });
        answer_after_open(&mut server, "textDocument/codeAction", json!([])).await;
        assert!(handle.await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn inlay_hints_parse_string_labels() {
        let dir = workspace_with_main();
        let (client, mut server) = ready_client(dir.path());
        let client = Arc::new(client);

        let caller = Arc::clone(&client);
        let hint_range = Range {
            start: pos(0, 0),
            end: pos(14, 0),
        };
        let handle =
            tokio::spawn(async move { caller.inlay_hints("main.go", hint_range).await });
        answer_after_open(
            &mut server,
            "textDocument/inlayHint",
            json!([{"position": {"line": 6, "character": 7}, "label": "int"}]),
        )
        .await;

        let hints = handle.await.unwrap().unwrap();
        assert_eq!(hints.len(), 1);
        assert_eq!(hints[0].position, pos(6, 7));
    }

    #[tokio::test]
    async fn diagnostics_read_the_cache_and_default_to_empty() {
        let dir = workspace_with_main();
        let (client, mut server) = ready_client(dir.path());
        let client = Arc::new(client);
        let uri = client.paths().to_uri("main.go");

        server
            .send(json!({
                "jsonrpc": "2.0",
                "method": "textDocument/publishDiagnostics",
                "params": {"uri": uri, "diagnostics": [{
                    "range": range(6, 1, 6, 7),
                    "severity": 2,
                    "message": "declared and not used",
                }]},
            }))
            .await;

        let caller = Arc::clone(&client);
        let handle = tokio::spawn(async move { caller.diagnostics("main.go").await });
        let open = server.recv().await;
        assert_eq!(open["method"], "textDocument/didOpen");
        let diags = handle.await.unwrap().unwrap();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].message, "declared and not used");

        // A file gopls never published for reads back as empty.
        std::fs::write(dir.path().join("other.go"), "package main\n").unwrap();
        let caller = Arc::clone(&client);
        let handle = tokio::spawn(async move { caller.diagnostics("other.go").await });
        let open = server.recv().await;
        assert_eq!(open["method"], "textDocument/didOpen");
        assert!(handle.await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn protocol_error_on_malformed_result_shape() {
        let dir = workspace_with_main();
        let (client, mut server) = ready_client(dir.path());
        let client = Arc::new(client);

        let caller = Arc::clone(&client);
        let handle =
            tokio::spawn(async move { caller.goto_definition("main.go", pos(0, 0)).await });
        answer_after_open(
            &mut server,
            "textDocument/definition",
            json!({"unexpected": "shape"}),
        )
        .await;

        assert!(matches!(
            handle.await.unwrap(),
            Err(Error::Protocol(_))
        ));
    }
}
