//! Error types raised by the workspace client.
//!
//! Adapter errors propagate unchanged to the MCP façade, which renders
//! them on the tool-error channel. Parse failures inside the
//! notification router are logged and discarded instead; they never
//! reach callers and never tear down the message pump.

use std::time::Duration;

use thiserror::Error;

/// Everything the per-workspace client can fail with.
#[derive(Debug, Error)]
pub enum Error {
    /// The configured workspace path is empty, missing, or not a directory.
    #[error("invalid workspace {path:?}: {reason}")]
    Config { path: String, reason: String },

    /// The gopls executable could not be located or started.
    #[error("failed to launch gopls: {0}")]
    Spawn(String),

    /// The initialize handshake failed or timed out.
    #[error("gopls initialization failed: {0}")]
    Init(#[source] Box<Error>),

    /// An adapter was called on an idle or stopped client.
    #[error("gopls client is not running")]
    NotRunning,

    /// `start` was called on a client that is running or already stopped.
    #[error("gopls client was already started")]
    AlreadyStarted,

    /// The workspace did not finish loading packages within the readiness window.
    #[error("workspace not ready after {0:?}")]
    NotReady(Duration),

    /// A workspace file could not be read, or a pipe write failed.
    #[error("i/o failure ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A malformed frame was read from the child.
    #[error("malformed frame: {0}")]
    Framing(String),

    /// A response body had an unexpected shape.
    #[error("unexpected response shape: {0}")]
    Protocol(String),

    /// The child answered with a JSON-RPC error object.
    #[error("gopls error {code}: {message}")]
    Remote { code: i64, message: String },

    /// No response arrived within the request timeout.
    #[error("request {id} timed out after {elapsed:?}")]
    Timeout { id: i64, elapsed: Duration },
}

impl Error {
    /// Attach a path or operation name to an [`std::io::Error`].
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}
