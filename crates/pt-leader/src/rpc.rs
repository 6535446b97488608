//! Child-process RPC driver
//!
//! Drives a long-running worker over newline-delimited JSON on its standard
//! streams. Requests carry a UUID correlation id and resolve against a
//! pending map; everything else arriving on stdout is an agent event and is
//! fanned out to subscribers. The mailbox flow alone is sufficient for
//! correctness; this channel is strictly the interactive fast path.

use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{broadcast, oneshot, watch};
use tracing::{debug, warn};

/// Per-call timeout; a pending call that outlives this fails.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Grace between spawn and the first command.
const BOOT_INTERVAL: Duration = Duration::from_millis(150);

/// How long to wait after SIGTERM before escalating to SIGKILL.
const TERM_GRACE: Duration = Duration::from_secs(1);

/// Lines of stderr kept for diagnostics.
const STDERR_TAIL: usize = 200;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("failed to spawn child: {0}")]
    Spawn(std::io::Error),
    #[error("rpc call timed out after {0:?}")]
    Timeout(Duration),
    #[error("rpc channel closed")]
    Closed,
    #[error("command failed: {0}")]
    Command(String),
    #[error("child rpc I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Child connection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    Starting,
    Idle,
    Streaming,
    Stopped,
    Error,
}

/// How to launch a child.
#[derive(Debug, Clone)]
pub struct ChildSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Overrides layered on top of the inherited environment.
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    pub id: String,
    #[serde(default)]
    pub command: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Driver handle for one child worker process.
pub struct ChildRpc {
    name: String,
    pid: Option<u32>,
    child: tokio::sync::Mutex<Child>,
    stdin: tokio::sync::Mutex<ChildStdin>,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<RpcResponse>>>>,
    state_tx: watch::Sender<ChildState>,
    events_tx: broadcast::Sender<Value>,
    last_assistant_text: Arc<Mutex<String>>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    stopping: Arc<AtomicBool>,
}

fn lock_or_recover<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl ChildRpc {
    /// Spawn the child, wire the stream readers, wait a brief boot
    /// interval, and report the connection as idle.
    pub async fn start(name: &str, spec: ChildSpec) -> Result<Arc<ChildRpc>, RpcError> {
        let mut cmd = tokio::process::Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.cwd)
            .envs(spec.env.iter().cloned())
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(RpcError::Spawn)?;
        let stdout = child.stdout.take().ok_or(RpcError::Closed)?;
        let stderr = child.stderr.take().ok_or(RpcError::Closed)?;
        let stdin = child.stdin.take().ok_or(RpcError::Closed)?;
        let pid = child.id();

        let (state_tx, _) = watch::channel(ChildState::Starting);
        let (events_tx, _) = broadcast::channel(256);
        let pending: Arc<Mutex<HashMap<String, oneshot::Sender<RpcResponse>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let last_assistant_text = Arc::new(Mutex::new(String::new()));
        let stderr_tail = Arc::new(Mutex::new(VecDeque::new()));
        let stopping = Arc::new(AtomicBool::new(false));

        // stdout reader: responses resolve pending calls, the rest are
        // agent events.
        {
            let pending = Arc::clone(&pending);
            let state_tx = state_tx.clone();
            let events_tx = events_tx.clone();
            let last_text = Arc::clone(&last_assistant_text);
            let stopping = Arc::clone(&stopping);
            let child_name = name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let Ok(value) = serde_json::from_str::<Value>(&line) else {
                        debug!("[{child_name}] non-json stdout line: {line}");
                        continue;
                    };
                    if value.get("type").and_then(Value::as_str) == Some("response") {
                        match serde_json::from_value::<RpcResponse>(value) {
                            Ok(resp) => {
                                let sender = lock_or_recover(&pending).remove(&resp.id);
                                match sender {
                                    Some(tx) => {
                                        let _ = tx.send(resp);
                                    }
                                    None => debug!(
                                        "[{child_name}] response for unknown call {}",
                                        resp.id
                                    ),
                                }
                            }
                            Err(e) => warn!("[{child_name}] malformed response: {e}"),
                        }
                        continue;
                    }

                    match value.get("type").and_then(Value::as_str) {
                        Some("agent_start") => {
                            lock_or_recover(&last_text).clear();
                            let _ = state_tx.send_replace(ChildState::Streaming);
                        }
                        Some("agent_end") => {
                            let _ = state_tx.send_replace(ChildState::Idle);
                        }
                        Some("message_update") => {
                            if let Some(delta) = value
                                .pointer("/assistantMessageEvent/text_delta")
                                .and_then(Value::as_str)
                            {
                                lock_or_recover(&last_text).push_str(delta);
                            }
                        }
                        _ => {}
                    }
                    let _ = events_tx.send(value);
                }

                // Child hung up: premature exit is an error state.
                let final_state = if stopping.load(Ordering::SeqCst) {
                    ChildState::Stopped
                } else {
                    ChildState::Error
                };
                let _ = state_tx.send_replace(final_state);
                lock_or_recover(&pending).clear();
            });
        }

        // stderr reader: keep a bounded tail for diagnostics.
        {
            let stderr_tail = Arc::clone(&stderr_tail);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut tail = lock_or_recover(&stderr_tail);
                    tail.push_back(line);
                    while tail.len() > STDERR_TAIL {
                        tail.pop_front();
                    }
                }
            });
        }

        tokio::time::sleep(BOOT_INTERVAL).await;
        // Boot transition only; an agent_start observed during boot wins.
        state_tx.send_if_modified(|state| {
            if *state == ChildState::Starting {
                *state = ChildState::Idle;
                true
            } else {
                false
            }
        });

        Ok(Arc::new(ChildRpc {
            name: name.to_string(),
            pid,
            child: tokio::sync::Mutex::new(child),
            stdin: tokio::sync::Mutex::new(stdin),
            pending,
            state_tx,
            events_tx,
            last_assistant_text,
            stderr_tail,
            stopping,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> ChildState {
        *self.state_tx.borrow()
    }

    /// Subscribe to the raw agent event stream.
    pub fn subscribe_events(&self) -> broadcast::Receiver<Value> {
        self.events_tx.subscribe()
    }

    /// Assistant text accumulated since the last `agent_start`.
    pub fn last_assistant_text(&self) -> String {
        lock_or_recover(&self.last_assistant_text).clone()
    }

    /// Buffered stderr lines, oldest first.
    pub fn stderr_tail(&self) -> Vec<String> {
        lock_or_recover(&self.stderr_tail).iter().cloned().collect()
    }

    /// Resolve when the child reaches `Stopped` or `Error`.
    pub async fn wait_stopped(&self) {
        let mut rx = self.state_tx.subscribe();
        loop {
            if matches!(*rx.borrow(), ChildState::Stopped | ChildState::Error) {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Issue a command with the default per-call timeout.
    pub async fn call(&self, command: &str, params: Value) -> Result<RpcResponse, RpcError> {
        self.call_with_timeout(command, params, CALL_TIMEOUT).await
    }

    pub async fn call_with_timeout(
        &self,
        command: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<RpcResponse, RpcError> {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        lock_or_recover(&self.pending).insert(id.clone(), tx);

        let mut payload = serde_json::Map::new();
        payload.insert("id".to_string(), json!(id));
        payload.insert("command".to_string(), json!(command));
        if let Value::Object(extra) = params {
            payload.extend(extra);
        }
        let mut line = Value::Object(payload).to_string();
        line.push('\n');

        {
            let mut stdin = self.stdin.lock().await;
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                lock_or_recover(&self.pending).remove(&id);
                return Err(RpcError::Io(e));
            }
            if let Err(e) = stdin.flush().await {
                lock_or_recover(&self.pending).remove(&id);
                return Err(RpcError::Io(e));
            }
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(RpcError::Closed),
            Err(_) => {
                lock_or_recover(&self.pending).remove(&id);
                Err(RpcError::Timeout(timeout))
            }
        }
    }

    /// Issue a command and surface a failed response as an error.
    async fn call_ok(&self, command: &str, params: Value) -> Result<Option<Value>, RpcError> {
        let resp = self.call(command, params).await?;
        if resp.success {
            Ok(resp.data)
        } else {
            Err(RpcError::Command(
                resp.error.unwrap_or_else(|| "unknown error".to_string()),
            ))
        }
    }

    pub async fn prompt(&self, text: &str) -> Result<(), RpcError> {
        self.call_ok("prompt", json!({"text": text})).await.map(|_| ())
    }

    pub async fn steer(&self, text: &str) -> Result<(), RpcError> {
        self.call_ok("steer", json!({"text": text})).await.map(|_| ())
    }

    pub async fn follow_up(&self, text: &str) -> Result<(), RpcError> {
        self.call_ok("follow_up", json!({"text": text})).await.map(|_| ())
    }

    pub async fn abort(&self) -> Result<(), RpcError> {
        self.call_ok("abort", json!({})).await.map(|_| ())
    }

    pub async fn get_state(&self) -> Result<Option<Value>, RpcError> {
        self.call_ok("get_state", json!({})).await
    }

    pub async fn set_session_name(&self, name: &str) -> Result<(), RpcError> {
        self.call_ok("set_session_name", json!({"name": name}))
            .await
            .map(|_| ())
    }

    /// Stop the child: best-effort abort, SIGTERM, SIGKILL after 1 s.
    /// Pending calls are rejected; the state becomes `Stopped`.
    pub async fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self
            .call_with_timeout("abort", json!({}), Duration::from_millis(500))
            .await;

        #[cfg(unix)]
        if let Some(pid) = self.pid {
            // SAFETY: plain signal delivery to a pid we spawned.
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }

        let mut child = self.child.lock().await;
        match tokio::time::timeout(TERM_GRACE, child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }
        drop(child);

        lock_or_recover(&self.pending).clear();
        let _ = self.state_tx.send_replace(ChildState::Stopped);
    }
}
