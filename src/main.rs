//! gopls-bridge: MCP server exposing gopls intelligence for Go workspaces.
//!
//! Architecture:
//! ```text
//! MCP client <-MCP (stdio)-> gopls-bridge <-LSP (child stdio)-> gopls (one per workspace)
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use gopls_bridge::config::Config;
use gopls_bridge::tools::GoplsTools;
use gopls_bridge::workspace::WorkspaceManager;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, ServerCapabilities, ServerInfo, ToolsCapability,
};
use rmcp::service::{RequestContext, ServiceExt};
use rmcp::transport::io::stdio;
use rmcp::{ErrorData as McpError, RoleServer, ServerHandler};
use tokio_util::sync::CancellationToken;

/// MCP server wrapping the gopls tools.
#[derive(Clone)]
struct GoplsBridgeServer {
    tools: GoplsTools,
}

impl ServerHandler for GoplsBridgeServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: rmcp::model::Implementation {
                name: env!("CARGO_PKG_NAME").into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            instructions: Some(
                "Provides Go language intelligence via gopls. \
                 Use go_diagnostics to check for errors, go_hover for type info, \
                 go_definition and go_references to navigate, and \
                 go_workspace_symbols to search the workspace."
                    .into(),
            ),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: None }),
                ..ServerCapabilities::default()
            },
            ..ServerInfo::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<rmcp::model::PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<rmcp::model::ListToolsResult, McpError> {
        Ok(self.tools.list_tools())
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        self.tools.call_tool(request, context).await
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing to stderr (stdout is MCP transport)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load().context("failed to resolve workspace configuration")?;
    let manager = Arc::new(WorkspaceManager::new(&config)?);

    tracing::info!(workspaces = ?manager.keys(), "starting gopls-bridge");

    // One token for every child; ctrl-c and shutdown both cancel it.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received; shutting down");
                cancel.cancel();
            }
        });
    }

    if let Err(e) = manager.start_all(&cancel).await {
        manager.stop_all().await;
        return Err(e).context("failed to start workspaces");
    }

    let server = GoplsBridgeServer {
        tools: GoplsTools::new(Arc::clone(&manager)),
    };

    // Start MCP server on stdio
    let transport = stdio();
    let service = match server.serve(transport).await {
        Ok(service) => service,
        Err(e) => {
            manager.stop_all().await;
            return Err(e).context("failed to start MCP server");
        }
    };

    // Wait for the service to finish
    let waiting_result = service.waiting().await;

    // Tear down every gopls child before reporting the result.
    cancel.cancel();
    manager.stop_all().await;

    waiting_result.context("MCP server exited with an error")?;

    Ok(())
}
