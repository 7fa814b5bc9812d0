//! JSON-RPC client that owns a single RepoQL child process.
//!
//! An [`RpcClient`] is single-use: it spawns its child at most once, runs the
//! MCP `initialize` handshake, serves `tools/call` requests with per-request
//! timeouts, and reports the child's exit exactly once through an exit event.
//! A client that has disconnected is never revived; supervision replaces the
//! whole client instead.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::time::timeout;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use crate::rpc::codec::RpcCodec;
use crate::rpc::message::{self, ToolOutcome};
use crate::{BridgeError, Result};

/// Timing knobs for one client.
#[derive(Debug, Clone)]
pub struct RpcClientOptions {
    /// Upper bound on the `initialize` round trip.
    pub initialize_timeout: Duration,
    /// Grace period between the terminate signal and a forced kill.
    pub kill_grace: Duration,
}

impl Default for RpcClientOptions {
    fn default() -> Self {
        Self {
            initialize_timeout: Duration::from_millis(30_000),
            kill_grace: Duration::from_millis(2_000),
        }
    }
}

/// How the child process ended.
#[derive(Debug, Clone)]
pub struct ExitEvent {
    /// Exit status code, when the process exited normally.
    pub code: Option<i32>,
    /// Human-readable description of the exit.
    pub reason: String,
}

/// Pending-request slot: the response router or the timeout path removes the
/// entry, and only the remover reports the outcome.
type PendingSender = oneshot::Sender<Result<serde_json::Value>>;

/// State shared between the client facade and its background tasks.
#[derive(Debug)]
struct ClientShared {
    connected: AtomicBool,
    pending: Mutex<HashMap<u64, PendingSender>>,
    stdin: Mutex<Option<ChildStdin>>,
    exited: watch::Sender<bool>,
    exit_tx: Mutex<Option<oneshot::Sender<ExitEvent>>>,
}

impl ClientShared {
    /// Mark the client unusable and fail every in-flight request.
    async fn disconnect(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        self.stdin.lock().await.take();
        self.fail_pending(&BridgeError::connection(reason)).await;
    }

    /// Resolve every pending request with `err`.
    ///
    /// Sends happen while the pending lock is held; see [`RpcClient::send_request`].
    async fn fail_pending(&self, err: &BridgeError) {
        let mut pending = self.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(err.clone()));
        }
    }
}

/// Single-use JSON-RPC client over a RepoQL child process's stdio.
#[derive(Debug)]
pub struct RpcClient {
    exe_path: PathBuf,
    workdir: PathBuf,
    options: RpcClientOptions,
    spawned: AtomicBool,
    next_id: AtomicU64,
    kill_tx: Mutex<Option<mpsc::Sender<()>>>,
    exit_rx: Mutex<Option<oneshot::Receiver<ExitEvent>>>,
    shared: Arc<ClientShared>,
}

impl RpcClient {
    /// Create a client for `exe_path` serving the workspace at `workdir`.
    ///
    /// Nothing is spawned until [`RpcClient::spawn`] is called.
    #[must_use]
    pub fn new(exe_path: PathBuf, workdir: PathBuf, options: RpcClientOptions) -> Self {
        let (exit_tx, exit_rx) = oneshot::channel();
        let (exited, _) = watch::channel(false);
        Self {
            exe_path,
            workdir,
            options,
            spawned: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            kill_tx: Mutex::new(None),
            exit_rx: Mutex::new(Some(exit_rx)),
            shared: Arc::new(ClientShared {
                connected: AtomicBool::new(false),
                pending: Mutex::new(HashMap::new()),
                stdin: Mutex::new(None),
                exited,
                exit_tx: Mutex::new(Some(exit_tx)),
            }),
        }
    }

    /// Workspace directory the child runs in.
    #[must_use]
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Whether the handshake completed and the child has not disconnected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Take the one-shot exit signal for this client's child.
    ///
    /// The receiver fires once when the process ends.  Returns `None` if the
    /// signal was already taken.
    pub async fn take_exit_signal(&self) -> Option<oneshot::Receiver<ExitEvent>> {
        self.exit_rx.lock().await.take()
    }

    /// Spawn the child process and complete the MCP handshake.
    ///
    /// The child is started as `<exe> mcp` in the workspace directory with
    /// the parent's environment and piped stdio.  On handshake failure the
    /// child is killed before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Connection`] when the client was already
    /// spawned or the process could not be started, and the handshake's
    /// [`BridgeError::Timeout`] or [`BridgeError::Rpc`] when initialization
    /// fails.
    pub async fn spawn(&self) -> Result<()> {
        if self.spawned.swap(true, Ordering::SeqCst) {
            return Err(BridgeError::connection(
                "client already spawned; create a new client instead",
            ));
        }

        info!(
            exe = %self.exe_path.display(),
            workdir = %self.workdir.display(),
            "spawning repoql child process"
        );

        let mut child = Command::new(&self.exe_path)
            .arg(message::MCP_SUBCOMMAND)
            .current_dir(&self.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BridgeError::connection_with(
                    format!("failed to spawn {}", self.exe_path.display()),
                    &e,
                )
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::connection("failed to capture child stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::connection("failed to capture child stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BridgeError::connection("failed to capture child stderr"))?;

        *self.shared.stdin.lock().await = Some(stdin);

        let pid = child.id();
        let (kill_tx, kill_rx) = mpsc::channel(1);
        *self.kill_tx.lock().await = Some(kill_tx);

        tokio::spawn(run_reader(Arc::clone(&self.shared), stdout));
        tokio::spawn(drain_stderr(stderr));
        tokio::spawn(supervise_child(
            Arc::clone(&self.shared),
            child,
            pid,
            kill_rx,
            self.options.kill_grace,
        ));

        match self.handshake().await {
            Ok(()) => {
                self.shared.connected.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(err) => {
                warn!(%err, "handshake failed, killing child");
                self.kill().await;
                Err(err)
            }
        }
    }

    /// Invoke a tool on the child and wait up to `timeout_after` for the
    /// result.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Connection`] when the client is not connected
    /// or the pipe breaks mid-request, [`BridgeError::Timeout`] when no
    /// response arrives in time, and [`BridgeError::Rpc`] when the child
    /// answers with a JSON-RPC error.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
        timeout_after: Duration,
    ) -> Result<ToolOutcome> {
        if !self.is_connected() {
            return Err(BridgeError::connection("client is not connected"));
        }
        let result = self
            .send_request(
                message::TOOLS_CALL_METHOD,
                message::tool_call_params(name, arguments),
                timeout_after,
            )
            .await?;
        ToolOutcome::from_value(result)
    }

    /// Terminate the child process and wait until it has ended.
    ///
    /// Idempotent: repeated calls, calls on a never-spawned client, and
    /// calls on an already-dead child all complete without effect.  The
    /// child gets a terminate signal first and is force-killed after the
    /// grace period.
    pub async fn kill(&self) {
        let maybe_tx = self.kill_tx.lock().await.clone();
        let Some(tx) = maybe_tx else {
            return;
        };
        // A full buffer or closed channel means termination is already
        // under way or done; either way the watch below settles it.
        let _ = tx.try_send(());
        let mut exited = self.shared.exited.subscribe();
        let _ = exited.wait_for(|done| *done).await;
    }

    // ── Request plumbing ──────────────────────────────────────────────────────

    /// Run the `initialize` round trip and the `initialized` notification.
    async fn handshake(&self) -> Result<()> {
        let init_result = self
            .send_request(
                message::INITIALIZE_METHOD,
                message::initialize_params(),
                self.options.initialize_timeout,
            )
            .await?;
        let server = init_result
            .get("serverInfo")
            .and_then(|info| info.get("name"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown");
        debug!(server, "initialize handshake complete");
        self.write_line(&message::notification(message::INITIALIZED_NOTIFICATION))
            .await
    }

    /// Send one request and wait for its correlated response.
    ///
    /// The pending-map entry is the linearization point: the response router
    /// and the timeout path both try to remove it, and only the side that
    /// succeeds reports the outcome.  Senders fire while the pending lock is
    /// held, so once the entry is gone the oneshot already carries its value.
    async fn send_request(
        &self,
        method: &str,
        params: serde_json::Value,
        timeout_after: Duration,
    ) -> Result<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, mut rx) = oneshot::channel();
        self.shared.pending.lock().await.insert(id, tx);

        let envelope = message::request(id, method, params);
        if let Err(err) = self.write_line(&envelope).await {
            self.shared.pending.lock().await.remove(&id);
            return Err(err);
        }

        match timeout(timeout_after, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(BridgeError::connection(
                "client shut down while the request was pending",
            )),
            Err(_) => {
                let removed = self.shared.pending.lock().await.remove(&id).is_some();
                if removed {
                    Err(BridgeError::Timeout {
                        method: method.to_owned(),
                        timeout_ms: u64::try_from(timeout_after.as_millis())
                            .unwrap_or(u64::MAX),
                    })
                } else {
                    // The router removed the entry first; its outcome is
                    // already buffered in the channel.
                    match rx.try_recv() {
                        Ok(outcome) => outcome,
                        Err(_) => Err(BridgeError::Timeout {
                            method: method.to_owned(),
                            timeout_ms: u64::try_from(timeout_after.as_millis())
                                .unwrap_or(u64::MAX),
                        }),
                    }
                }
            }
        }
    }

    /// Serialize `value` and write it to the child's stdin as one line.
    ///
    /// The stdin lock is held for the whole write, so concurrent requests
    /// never interleave bytes.
    async fn write_line(&self, value: &serde_json::Value) -> Result<()> {
        let mut payload = serde_json::to_vec(value)
            .map_err(|e| BridgeError::Protocol(format!("failed to serialize message: {e}")))?;
        payload.push(b'\n');

        let mut guard = self.shared.stdin.lock().await;
        let Some(stdin) = guard.as_mut() else {
            return Err(BridgeError::connection("child stdin is closed"));
        };
        stdin
            .write_all(&payload)
            .await
            .map_err(|e| BridgeError::connection_with("failed to write to child stdin", &e))
    }
}

// ── Background tasks ──────────────────────────────────────────────────────────

/// Read NDJSON lines from the child's stdout and route responses.
async fn run_reader(shared: Arc<ClientShared>, stdout: ChildStdout) {
    let mut framed = FramedRead::new(stdout, RpcCodec::new());
    loop {
        match framed.next().await {
            None => {
                debug!("child stdout reached EOF");
                shared.disconnect("child stdout closed").await;
                break;
            }
            Some(Err(err @ BridgeError::Protocol(_))) => {
                warn!(%err, "skipping oversized line from child");
            }
            Some(Err(err)) => {
                warn!(%err, "error reading child stdout");
                shared.disconnect("child stdout read failed").await;
                break;
            }
            Some(Ok(line)) => route_line(&shared, &line).await,
        }
    }
}

/// Resolve the pending request a response line belongs to, if any.
async fn route_line(shared: &ClientShared, line: &str) {
    match message::parse_inbound_line(line) {
        Ok(Some(response)) => {
            let mut pending = shared.pending.lock().await;
            if let Some(tx) = pending.remove(&response.id) {
                let _ = tx.send(response.outcome);
            } else {
                debug!(id = response.id, "dropping response with no pending request");
            }
        }
        Ok(None) => {}
        Err(err) => {
            debug!(%err, "skipping malformed line from child");
        }
    }
}

/// Log the child's stderr so the pipe never fills up.
async fn drain_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(%line, "child stderr");
    }
}

/// Own the child handle: observe its exit, execute kill requests, and run
/// the teardown exactly once.
async fn supervise_child(
    shared: Arc<ClientShared>,
    mut child: Child,
    pid: Option<u32>,
    mut kill_rx: mpsc::Receiver<()>,
    grace: Duration,
) {
    let event = tokio::select! {
        status = child.wait() => describe_exit(status),
        _ = kill_rx.recv() => terminate_child(&mut child, pid, grace).await,
    };

    info!(code = ?event.code, reason = %event.reason, "child process ended");
    shared
        .disconnect(&format!("child process ended: {}", event.reason))
        .await;
    shared.exited.send_replace(true);
    if let Some(tx) = shared.exit_tx.lock().await.take() {
        let _ = tx.send(event);
    }
}

/// Terminate the child gracefully, escalating to a forced kill after `grace`.
async fn terminate_child(child: &mut Child, pid: Option<u32>, grace: Duration) -> ExitEvent {
    send_terminate_signal(child, pid);
    match timeout(grace, child.wait()).await {
        Ok(status) => describe_exit(status),
        Err(_) => {
            warn!("child did not exit within grace period, forcing kill");
            if let Err(err) = child.kill().await {
                warn!(%err, "failed to force-kill child");
            }
            ExitEvent {
                code: None,
                reason: "process killed after grace period".to_owned(),
            }
        }
    }
}

/// Ask the child to terminate without forcing it.
#[cfg(unix)]
fn send_terminate_signal(_child: &mut Child, pid: Option<u32>) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let Some(raw) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    if let Err(err) = signal::kill(Pid::from_raw(raw), Signal::SIGTERM) {
        debug!(%err, "failed to deliver SIGTERM");
    }
}

/// Ask the child to terminate without forcing it.
#[cfg(not(unix))]
fn send_terminate_signal(child: &mut Child, _pid: Option<u32>) {
    if let Err(err) = child.start_kill() {
        debug!(%err, "failed to signal child");
    }
}

/// Describe a `wait` outcome.
fn describe_exit(status: std::io::Result<std::process::ExitStatus>) -> ExitEvent {
    match status {
        Ok(exit) => ExitEvent {
            code: exit.code(),
            reason: exit.code().map_or_else(
                || "process terminated by signal".to_owned(),
                |c| format!("process exited with code {c}"),
            ),
        },
        Err(err) => ExitEvent {
            code: None,
            reason: format!("failed to observe process exit: {err}"),
        },
    }
}
