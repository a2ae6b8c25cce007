//! Per-workspace gopls client.
//!
//! Spawns and supervises one long-lived `gopls` child process, speaks
//! Content-Length-framed JSON-RPC over its stdio, and correlates
//! concurrent requests onto the single connection. A background pump
//! owns the child's stdout: responses are matched to pending one-shot
//! slots by id, notifications are routed to the diagnostic cache and
//! the readiness flag, and a second task drains stderr into the log.
//!
//! The request adapters that sit on top live in [`crate::features`].

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lsp_types::Diagnostic;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::codec::{FrameReader, FrameWriter};
use crate::error::Error;
use crate::paths::WorkspacePaths;

/// How long a single request may wait for its response.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// How long `ensure_ready` waits for gopls to finish loading packages.
const READY_TIMEOUT: Duration = Duration::from_secs(30);

const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);
const WAIT_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Substring gopls puts in its end-of-load message. Matched in both
/// `window/showMessage` and `$/progress` end notifications.
const READY_MESSAGE: &str = "Finished loading packages";

/// Lifecycle of a client. One-way: `Idle -> Running -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Running,
    Stopped,
}

/// State the stdout pump shares with request callers.
struct Shared {
    paths: WorkspacePaths,
    pending: Mutex<HashMap<i64, oneshot::Sender<Value>>>,
    diagnostics: Mutex<HashMap<String, Vec<Diagnostic>>>,
    ready: AtomicBool,
}

#[derive(Clone, Copy, Debug)]
struct Timeouts {
    request: Duration,
    ready: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            request: REQUEST_TIMEOUT,
            ready: READY_TIMEOUT,
        }
    }
}

type PipeWriter = FrameWriter<Box<dyn AsyncWrite + Send + Unpin>>;

/// LSP client bound to one Go workspace.
pub struct LspClient {
    shared: Arc<Shared>,
    state: std::sync::Mutex<ClientState>,
    /// Serializes start/stop so concurrent lifecycle calls cannot race.
    lifecycle: Mutex<()>,
    next_id: AtomicI64,
    writer: Mutex<Option<PipeWriter>>,
    child: Arc<Mutex<Option<Child>>>,
    cancel: std::sync::Mutex<Option<CancellationToken>>,
    open_files: Mutex<HashSet<String>>,
    /// Serializes `didOpen` emission so a file is opened at most once.
    open_gate: Mutex<()>,
    timeouts: Timeouts,
    span: tracing::Span,
}

impl LspClient {
    /// Create an idle client for the workspace rooted at `root`.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if `root` is empty, missing, or not a directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, Error> {
        let root = root.as_ref();
        if root.as_os_str().is_empty() {
            return Err(Error::Config {
                path: String::new(),
                reason: "workspace path is empty".into(),
            });
        }
        let root = std::fs::canonicalize(root).map_err(|e| Error::Config {
            path: root.display().to_string(),
            reason: format!("cannot resolve workspace path: {e}"),
        })?;
        if !root.is_dir() {
            return Err(Error::Config {
                path: root.display().to_string(),
                reason: "workspace path is not a directory".into(),
            });
        }

        let span = tracing::info_span!("gopls", workspace = %root.display());
        Ok(Self {
            shared: Arc::new(Shared {
                paths: WorkspacePaths::new(&root),
                pending: Mutex::new(HashMap::new()),
                diagnostics: Mutex::new(HashMap::new()),
                ready: AtomicBool::new(false),
            }),
            state: std::sync::Mutex::new(ClientState::Idle),
            lifecycle: Mutex::new(()),
            next_id: AtomicI64::new(1),
            writer: Mutex::new(None),
            child: Arc::new(Mutex::new(None)),
            cancel: std::sync::Mutex::new(None),
            open_files: Mutex::new(HashSet::new()),
            open_gate: Mutex::new(()),
            timeouts: Timeouts::default(),
            span,
        })
    }

    pub fn state(&self) -> ClientState {
        *self.state.lock().expect("state lock poisoned")
    }

    pub(crate) fn paths(&self) -> &WorkspacePaths {
        &self.shared.paths
    }

    /// Spawn gopls and run the initialize handshake. Cancelling
    /// `cancel` kills the child.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyStarted`] on a non-idle client, [`Error::Spawn`]
    /// if gopls cannot be located or launched, [`Error::Init`] if the
    /// handshake fails (the client is stopped before returning).
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), Error> {
        let _guard = self.lifecycle.lock().await;
        if self.state() != ClientState::Idle {
            return Err(Error::AlreadyStarted);
        }
        let root = self.shared.paths.root();
        if !root.is_dir() {
            return Err(Error::Config {
                path: root.display().to_string(),
                reason: "workspace path is not a directory".into(),
            });
        }

        let gopls = which::which("gopls")
            .map_err(|e| Error::Spawn(format!("gopls not found on PATH: {e}")))?;
        info!(parent: &self.span, gopls = %gopls.display(), "starting gopls");

        let mut child = Command::new(&gopls)
            .current_dir(root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Spawn(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Spawn("child has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Spawn("child has no stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Spawn("child has no stderr".into()))?;

        *self.writer.lock().await = Some(FrameWriter::new(
            Box::new(stdin) as Box<dyn AsyncWrite + Send + Unpin>
        ));
        *self.child.lock().await = Some(child);
        *self.state.lock().expect("state lock poisoned") = ClientState::Running;

        // Kill the child when the caller's token fires. stop() cancels
        // the token too, which lets this task exit.
        let token = cancel.child_token();
        *self.cancel.lock().expect("cancel lock poisoned") = Some(token.clone());
        let watched = Arc::clone(&self.child);
        tokio::spawn(
            async move {
                token.cancelled().await;
                if let Some(child) = watched.lock().await.as_mut() {
                    debug!("cancellation requested; killing gopls");
                    let _ = child.start_kill();
                }
            }
            .instrument(self.span.clone()),
        );

        tokio::spawn(stderr_drain(stderr).instrument(self.span.clone()));
        tokio::spawn(
            message_pump(FrameReader::new(stdout), Arc::clone(&self.shared))
                .instrument(self.span.clone()),
        );

        if let Err(e) = self.initialize().await {
            error!(parent: &self.span, error = %e, "initialize handshake failed");
            self.stop_locked().await;
            return Err(Error::Init(Box::new(e)));
        }
        Ok(())
    }

    /// Tear the client down: close the pipes, kill the child, and wait
    /// for it to exit. Idempotent; a no-op on an idle client.
    pub async fn stop(&self) {
        let _guard = self.lifecycle.lock().await;
        self.stop_locked().await;
    }

    /// The teardown body, callable from `start` which already holds the
    /// lifecycle lock.
    async fn stop_locked(&self) {
        if self.state() != ClientState::Running {
            return;
        }

        // Dropping the writer closes stdin; the pumps exit on their own
        // once the killed child's stdout/stderr close.
        *self.writer.lock().await = None;
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!(parent: &self.span, error = %e, "failed to kill gopls");
            }
        }
        if let Some(token) = self.cancel.lock().expect("cancel lock poisoned").take() {
            token.cancel();
        }
        *self.state.lock().expect("state lock poisoned") = ClientState::Stopped;
        self.shared.pending.lock().await.clear();
        self.open_files.lock().await.clear();
        info!(parent: &self.span, "gopls client stopped");
    }

    /// `initialize` request + `initialized` notification. Readiness is
    /// not established here; gopls signals it later through the
    /// notification router once package loading finishes.
    async fn initialize(&self) -> Result<(), Error> {
        let params = json!({
            "processId": std::process::id(),
            "rootUri": self.shared.paths.root_uri(),
            "capabilities": client_capabilities(),
        });
        let result = self.request("initialize", params).await?;
        if let Some(caps) = result.get("capabilities") {
            debug!(parent: &self.span, capabilities = %caps, "gopls capabilities");
        }
        self.notify("initialized", json!({})).await
    }

    fn require_running(&self) -> Result<(), Error> {
        if self.state() == ClientState::Running {
            Ok(())
        } else {
            Err(Error::NotRunning)
        }
    }

    /// Wait for the readiness flag, polling until the ready timeout.
    ///
    /// # Errors
    ///
    /// [`Error::NotReady`] if gopls has not reported the end of package
    /// loading within the window.
    pub async fn ensure_ready(&self) -> Result<(), Error> {
        self.require_running()?;
        if self.shared.ready.load(Ordering::Acquire) {
            return Ok(());
        }
        debug!(parent: &self.span, "waiting for gopls to finish loading packages");
        let started = Instant::now();
        while started.elapsed() < self.timeouts.ready {
            if self.shared.ready.load(Ordering::Acquire) {
                return Ok(());
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
        Err(Error::NotReady(self.timeouts.ready))
    }

    /// Make sure gopls knows the file's contents, sending
    /// `textDocument/didOpen` on first access. Contents are captured
    /// once; there is no didChange tracking.
    ///
    /// # Errors
    ///
    /// Readiness errors, [`Error::Io`] if the file cannot be read, or a
    /// write failure on the notification.
    pub async fn ensure_file_open(&self, relative: &str) -> Result<(), Error> {
        self.ensure_ready().await?;

        let _gate = self.open_gate.lock().await;
        if self.open_files.lock().await.contains(relative) {
            return Ok(());
        }

        let path = self.shared.paths.join(relative);
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::io(path.display().to_string(), e))?;

        self.notify(
            "textDocument/didOpen",
            json!({
                "textDocument": {
                    "uri": self.shared.paths.to_uri(relative),
                    "languageId": language_id(relative),
                    "version": 1,
                    "text": text,
                }
            }),
        )
        .await?;

        // Inserted only after the notification was written.
        self.open_files.lock().await.insert(relative.to_string());
        debug!(parent: &self.span, file = relative, "opened in gopls");
        Ok(())
    }

    /// The most recent diagnostics gopls published for a file. Absence
    /// is an empty list, not an error.
    pub(crate) async fn cached_diagnostics(&self, relative: &str) -> Vec<Diagnostic> {
        self.shared
            .diagnostics
            .lock()
            .await
            .get(relative)
            .cloned()
            .unwrap_or_default()
    }

    /// Issue a request and wait for the correlated response's `result`.
    ///
    /// # Errors
    ///
    /// [`Error::NotRunning`], write failures, [`Error::Remote`] for a
    /// JSON-RPC error object, [`Error::Timeout`] after the request
    /// window.
    pub(crate) async fn request(&self, method: &str, params: Value) -> Result<Value, Error> {
        self.require_running()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        self.send_request_and_wait(id, method, &envelope).await
    }

    async fn send_request_and_wait(
        &self,
        id: i64,
        method: &str,
        envelope: &Value,
    ) -> Result<Value, Error> {
        let (tx, mut rx) = oneshot::channel();
        self.shared.pending.lock().await.insert(id, tx);
        metrics::counter!("gopls_requests_total").increment(1);

        if let Err(e) = self.write_frame(envelope).await {
            self.shared.pending.lock().await.remove(&id);
            return Err(e);
        }

        let started = Instant::now();
        let deadline = tokio::time::sleep(self.timeouts.request);
        tokio::pin!(deadline);
        let mut tick = tokio::time::interval(WAIT_LOG_INTERVAL);
        tick.tick().await; // the first tick completes immediately

        let response = loop {
            tokio::select! {
                res = &mut rx => match res {
                    Ok(msg) => break msg,
                    Err(_) => {
                        // The pump cleared the slot on its way out.
                        self.shared.pending.lock().await.remove(&id);
                        return Err(Error::NotRunning);
                    }
                },
                _ = tick.tick() => {
                    debug!(parent: &self.span, id, method, elapsed = ?started.elapsed(), "still waiting for gopls");
                }
                () = &mut deadline => {
                    self.shared.pending.lock().await.remove(&id);
                    metrics::counter!("gopls_request_timeouts_total").increment(1);
                    return Err(Error::Timeout { id, elapsed: started.elapsed() });
                }
            }
        };

        if let Some(err) = response.get("error") {
            let code = err.get("code").and_then(Value::as_i64).unwrap_or(0);
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(Error::Remote { code, message });
        }
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Fire-and-forget notification. Delivery is assumed once the frame
    /// write returns.
    pub(crate) async fn notify(&self, method: &str, params: Value) -> Result<(), Error> {
        let msg = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.write_frame(&msg).await
    }

    async fn write_frame(&self, msg: &Value) -> Result<(), Error> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(Error::NotRunning)?;
        writer
            .write_frame(msg)
            .await
            .map_err(|e| Error::io("write to gopls stdin", e))
    }
}

/// Pick the LSP language id from a file extension.
fn language_id(path: &str) -> &'static str {
    match Path::new(path).extension().and_then(|e| e.to_str()) {
        Some("mod") => "go.mod",
        Some("sum") => "go.sum",
        _ => "go",
    }
}

/// Capabilities advertised to gopls: hover in markdown, definition
/// links, and the workspace features the adapters rely on. The
/// response capabilities are logged, never consumed; unsupported
/// operations surface as per-request failures instead.
fn client_capabilities() -> Value {
    let caps = lsp_types::ClientCapabilities {
        text_document: Some(lsp_types::TextDocumentClientCapabilities {
            hover: Some(lsp_types::HoverClientCapabilities {
                dynamic_registration: Some(false),
                content_format: Some(vec![
                    lsp_types::MarkupKind::Markdown,
                    lsp_types::MarkupKind::PlainText,
                ]),
            }),
            definition: Some(lsp_types::GotoCapability {
                dynamic_registration: Some(false),
                link_support: Some(true),
            }),
            references: Some(lsp_types::DynamicRegistrationClientCapabilities {
                dynamic_registration: Some(false),
            }),
            document_symbol: Some(lsp_types::DocumentSymbolClientCapabilities::default()),
            ..Default::default()
        }),
        workspace: Some(lsp_types::WorkspaceClientCapabilities {
            symbol: Some(lsp_types::WorkspaceSymbolClientCapabilities::default()),
            workspace_folders: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    };
    serde_json::to_value(caps).unwrap_or_else(|_| json!({}))
}

/// Log every stderr line gopls produces.
async fn stderr_drain(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "gopls_bridge::gopls_stderr", "{line}");
    }
}

/// The stdout pump: decode frames until the stream closes or fails,
/// routing each message. On exit, drain the pending map so waiting
/// callers fail fast instead of running out their timeouts.
async fn message_pump<R: AsyncRead + Unpin>(mut reader: FrameReader<R>, shared: Arc<Shared>) {
    loop {
        match reader.read_frame().await {
            Ok(Some(msg)) => dispatch_message(msg, &shared).await,
            Ok(None) => {
                info!("gopls stdout closed");
                break;
            }
            Err(e) => {
                error!(error = %e, "reader failed; shutting down message pump");
                break;
            }
        }
    }

    let mut pending = shared.pending.lock().await;
    let abandoned = pending.len();
    pending.clear();
    drop(pending);
    if abandoned > 0 {
        warn!(abandoned, "message pump exited with pending requests");
    }
}

async fn dispatch_message(msg: Value, shared: &Shared) {
    let has_id = msg.get("id").is_some();
    let method = msg.get("method").and_then(Value::as_str).map(str::to_owned);

    match (has_id, method) {
        (true, None) => deliver_response(msg, shared).await,
        (true, Some(method)) => {
            // No server-to-client request types are supported.
            debug!(method, "ignoring server-initiated request");
        }
        (false, Some(method)) => {
            metrics::counter!("gopls_notifications_total").increment(1);
            route_notification(&method, msg.get("params"), shared).await;
        }
        (false, None) => warn!("message with neither id nor method"),
    }
}

async fn deliver_response(msg: Value, shared: &Shared) {
    let Some(id) = round_id(&msg["id"]) else {
        warn!(id = %msg["id"], "response with a non-numeric id");
        return;
    };
    let slot = shared.pending.lock().await.remove(&id);
    match slot {
        Some(tx) => {
            if tx.send(msg).is_err() {
                debug!(id, "response arrived after the caller gave up");
            }
        }
        None => debug!(id, "response for unknown or already-completed request"),
    }
}

/// JSON numbers decode as floats; round back to the integer id that
/// was sent and log when the value was non-integral.
#[allow(clippy::cast_possible_truncation)]
fn round_id(value: &Value) -> Option<i64> {
    if let Some(id) = value.as_i64() {
        return Some(id);
    }
    let float = value.as_f64()?;
    if float.fract() != 0.0 {
        warn!(id = float, "non-integral response id; rounding");
    }
    Some(float.round() as i64)
}

/// Route a server notification. Malformed params are logged and
/// discarded; they never tear down the pump.
async fn route_notification(method: &str, params: Option<&Value>, shared: &Shared) {
    match method {
        "textDocument/publishDiagnostics" => {
            let Some(params) = params else {
                warn!("publishDiagnostics without params");
                return;
            };
            match serde_json::from_value::<lsp_types::PublishDiagnosticsParams>(params.clone()) {
                Ok(publish) => {
                    let path = shared.paths.to_relative(publish.uri.as_str());
                    let count = publish.diagnostics.len();
                    shared
                        .diagnostics
                        .lock()
                        .await
                        .insert(path.clone(), publish.diagnostics);
                    debug!(file = %path, count, "diagnostics updated");
                }
                Err(e) => warn!(error = %e, "discarding malformed publishDiagnostics"),
            }
        }
        "window/showMessage" => {
            let message = params
                .and_then(|p| p.get("message"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            if message.contains(READY_MESSAGE) {
                mark_ready(shared);
            }
        }
        "$/progress" => {
            let value = params.and_then(|p| p.get("value"));
            let kind = value
                .and_then(|v| v.get("kind"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            let message = value
                .and_then(|v| v.get("message"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            if kind == "end" && message.contains(READY_MESSAGE) {
                mark_ready(shared);
            }
        }
        other => debug!(method = other, "unhandled notification"),
    }
}

fn mark_ready(shared: &Shared) {
    if !shared.ready.swap(true, Ordering::Release) {
        info!("workspace packages loaded");
    }
}
