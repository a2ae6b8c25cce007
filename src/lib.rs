//! gopls-bridge: MCP server exposing a Go workspace's gopls as tools.
//!
//! The heart of the crate is [`lsp_client::LspClient`], a per-workspace
//! client that supervises a long-lived `gopls` child process, speaks
//! Content-Length-framed JSON-RPC over its stdio, and multiplexes
//! concurrent tool calls onto the single connection. Everything else is
//! plumbing around it: the frame codec, path/URI translation, the
//! workspace registry, and the MCP tool façade.

pub mod codec;
pub mod config;
pub mod error;
pub mod features;
pub mod lsp_client;
pub mod paths;
pub mod tools;
pub mod workspace;

pub use error::Error;
pub use lsp_client::LspClient;
