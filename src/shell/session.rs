use std::collections::HashMap;
use std::fmt;
use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::audit::AuditLog;
use super::executor::{join_readers, spawn_reader, BoundedCapture, OutputCallback, OutputStream};
use crate::constants::{OUTPUT_CHANNEL_CAPACITY, SESSION_END_GRACE_MS};
use crate::utils::{PaiError, PaiResult};

/// How a session reached its terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Closed through `session_end`
    Ended,
    /// The process exited on its own
    Exited(Option<i32>),
    /// Killed after exceeding its lifetime
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Running,
    Terminated(TerminationReason),
}

impl SessionState {
    pub fn is_terminated(&self) -> bool {
        matches!(self, SessionState::Terminated(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Created => f.write_str("created"),
            SessionState::Running => f.write_str("running"),
            SessionState::Terminated(TerminationReason::Ended) => f.write_str("ended"),
            SessionState::Terminated(TerminationReason::Exited(Some(code))) => {
                write!(f, "exited ({})", code)
            }
            SessionState::Terminated(TerminationReason::Exited(None)) => f.write_str("exited"),
            SessionState::Terminated(TerminationReason::TimedOut) => f.write_str("timed out"),
        }
    }
}

/// Snapshot for listings
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: String,
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub state: SessionState,
}

/// What `session_end` hands back
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: String,
    pub state: SessionState,
    /// Output not yet drained when the session ended
    pub output: String,
}

enum Stop {
    Exited(io::Result<std::process::ExitStatus>),
    Lifetime,
    Requested,
}

/// A long-lived child process fed line by line
pub struct ShellSession {
    id: String,
    command: String,
    started_at: DateTime<Utc>,
    state: Arc<Mutex<SessionState>>,
    output: Arc<Mutex<BoundedCapture>>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    watchdog: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    /// Set once a listing has shown the session as terminated
    reported: AtomicBool,
}

impl ShellSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Terminated, already listed as such, and nothing left to drain
    fn is_stale(&self) -> bool {
        if !self.state().is_terminated() || !self.reported.load(Ordering::SeqCst) {
            return false;
        }
        let output = self.output.lock();
        output.stdout.is_empty() && output.stderr.is_empty()
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            command: self.command.clone(),
            started_at: self.started_at,
            state: self.state(),
        }
    }
}

/// Live sessions of one engine instance, keyed by a monotonic id
pub struct SessionRegistry {
    next_id: AtomicU64,
    sessions: Mutex<HashMap<String, Arc<ShellSession>>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, id: &str) -> PaiResult<Arc<ShellSession>> {
        self.sessions
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| PaiError::SessionNotFound(id.to_string()))
    }

    /// Spawn `cmd` and hand its lifetime to a watchdog task
    pub async fn start(
        &self,
        mut cmd: Command,
        command: &str,
        lifetime: Duration,
        max_output_bytes: usize,
        sink: Option<OutputCallback>,
        audit: Arc<AuditLog>,
    ) -> PaiResult<String> {
        self.prune();
        let id = format!("sess-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let state = Arc::new(Mutex::new(SessionState::Created));

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn()?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("stdout was not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("stderr was not piped"))?;

        let (tx, mut rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let readers = vec![
            spawn_reader(stdout, OutputStream::Stdout, tx.clone()),
            spawn_reader(stderr, OutputStream::Stderr, tx),
        ];

        let output = Arc::new(Mutex::new(BoundedCapture::new(max_output_bytes)));
        let collector_output = output.clone();
        let collector = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if let Some(sink) = &sink {
                    sink(line.stream, &line.text);
                }
                collector_output.lock().push(&line);
            }
        });

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let watchdog_state = state.clone();
        let watchdog_id = id.clone();
        let watchdog_audit = audit.clone();
        let watchdog = tokio::spawn(async move {
            let mut kill_rx = kill_rx;
            let stop = tokio::select! {
                status = child.wait() => Stop::Exited(status),
                _ = tokio::time::sleep(lifetime) => Stop::Lifetime,
                _ = &mut kill_rx => Stop::Requested,
            };

            let reason = match stop {
                Stop::Exited(status) => {
                    TerminationReason::Exited(status.ok().and_then(|s| s.code()))
                }
                Stop::Lifetime => {
                    warn!(session = %watchdog_id, "session exceeded its lifetime, killing");
                    let _ = child.kill().await;
                    TerminationReason::TimedOut
                }
                Stop::Requested => {
                    let _ = child.kill().await;
                    TerminationReason::Ended
                }
            };

            join_readers(readers).await;
            let _ = collector.await;

            let state = SessionState::Terminated(reason);
            *watchdog_state.lock() = state;
            watchdog_audit.record_session(&watchdog_id, &state.to_string(), "");
            debug!(session = %watchdog_id, %state, "session terminated");
        });

        let session = Arc::new(ShellSession {
            id: id.clone(),
            command: command.to_string(),
            started_at: Utc::now(),
            state: state.clone(),
            output,
            stdin: tokio::sync::Mutex::new(stdin),
            kill_tx: Mutex::new(Some(kill_tx)),
            watchdog: tokio::sync::Mutex::new(Some(watchdog)),
            reported: AtomicBool::new(false),
        });

        {
            let mut current = state.lock();
            if *current == SessionState::Created {
                *current = SessionState::Running;
            }
        }
        self.sessions.lock().insert(id.clone(), session);
        audit.record_session(&id, "started", command);
        info!(session = %id, command, "session started");
        Ok(id)
    }

    /// Write `text` plus a newline to the session's stdin
    pub async fn feed(&self, id: &str, text: &str) -> PaiResult<()> {
        let session = self.get(id)?;
        if session.state().is_terminated() {
            return Err(PaiError::SessionExited(id.to_string()));
        }

        let mut stdin = session.stdin.lock().await;
        let pipe = stdin
            .as_mut()
            .ok_or_else(|| PaiError::SessionExited(id.to_string()))?;

        let mut line = text.to_string();
        line.push('\n');
        let written = async {
            pipe.write_all(line.as_bytes()).await?;
            pipe.flush().await
        }
        .await;

        written.map_err(|e| {
            debug!(session = id, error = %e, "write to session failed");
            PaiError::SessionExited(id.to_string())
        })
    }

    /// Take the output buffered since the last call
    pub fn drain_output(&self, id: &str) -> PaiResult<String> {
        let session = self.get(id)?;
        let drained = session.output.lock().drain();
        Ok(drained)
    }

    /// Close stdin, give the process a moment to exit, then kill it
    pub async fn end(&self, id: &str) -> PaiResult<SessionSummary> {
        let session = self
            .sessions
            .lock()
            .remove(id)
            .ok_or_else(|| PaiError::SessionNotFound(id.to_string()))?;

        // EOF lets REPL-style programs exit cleanly
        session.stdin.lock().await.take();

        let grace = Duration::from_millis(SESSION_END_GRACE_MS);
        if let Some(mut watchdog) = session.watchdog.lock().await.take() {
            if timeout(grace, &mut watchdog).await.is_err() {
                if let Some(kill_tx) = session.kill_tx.lock().take() {
                    let _ = kill_tx.send(());
                }
                if timeout(grace * 2, &mut watchdog).await.is_err() {
                    warn!(session = id, "watchdog did not finish, aborting");
                    watchdog.abort();
                    *session.state.lock() = SessionState::Terminated(TerminationReason::Ended);
                }
            }
        }

        let output = session.output.lock().drain();
        info!(session = id, state = %session.state(), "session closed");
        Ok(SessionSummary {
            id: id.to_string(),
            state: session.state(),
            output,
        })
    }

    /// Drop terminated sessions that were listed and fully drained
    fn prune(&self) {
        self.sessions.lock().retain(|id, session| {
            let stale = session.is_stale();
            if stale {
                debug!(session = %id, "pruning terminated session");
            }
            !stale
        });
    }

    /// Current sessions. A terminated session is listed at least once, then
    /// pruned once its output has been drained.
    pub fn list(&self) -> Vec<SessionInfo> {
        self.prune();
        let sessions = self.sessions.lock();
        let mut infos: Vec<SessionInfo> = sessions
            .values()
            .map(|session| {
                let info = session.info();
                if info.state.is_terminated() {
                    session.reported.store(true, Ordering::SeqCst);
                }
                info
            })
            .collect();
        infos.sort_by_key(|info| info.started_at);
        infos
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::shell::executor::shell_command;
    use tempfile::TempDir;

    async fn start(registry: &SessionRegistry, dir: &TempDir, command: &str, lifetime: Duration) -> String {
        registry
            .start(
                shell_command(command, dir.path()),
                command,
                lifetime,
                64 * 1024,
                None,
                Arc::new(AuditLog::disabled()),
            )
            .await
            .unwrap()
    }

    async fn wait_for_output(registry: &SessionRegistry, id: &str, needle: &str) -> String {
        let mut collected = String::new();
        for _ in 0..50 {
            collected.push_str(&registry.drain_output(id).unwrap());
            if collected.contains(needle) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        collected
    }

    #[tokio::test]
    async fn test_feed_and_read_back() {
        let dir = TempDir::new().unwrap();
        let registry = SessionRegistry::new();
        let id = start(&registry, &dir, "cat", Duration::from_secs(30)).await;
        assert_eq!(registry.list()[0].state, SessionState::Running);

        registry.feed(&id, "ping").await.unwrap();
        let output = wait_for_output(&registry, &id, "ping").await;
        assert!(output.contains("ping"));

        let summary = registry.end(&id).await.unwrap();
        assert!(summary.state.is_terminated());
        assert!(registry.list().is_empty());
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let dir = TempDir::new().unwrap();
        let registry = SessionRegistry::new();
        let a = start(&registry, &dir, "cat", Duration::from_secs(30)).await;
        let b = start(&registry, &dir, "cat", Duration::from_secs(30)).await;
        assert_ne!(a, b);
        registry.end(&a).await.unwrap();
        registry.end(&b).await.unwrap();
    }

    #[tokio::test]
    async fn test_lifetime_timeout_terminates() {
        let dir = TempDir::new().unwrap();
        let registry = SessionRegistry::new();
        let id = start(&registry, &dir, "sleep 30", Duration::from_millis(200)).await;

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let info = registry.list().into_iter().find(|s| s.id == id).unwrap();
        assert_eq!(info.state, SessionState::Terminated(TerminationReason::TimedOut));
        assert!(matches!(
            registry.feed(&id, "x").await,
            Err(PaiError::SessionExited(_))
        ));
        registry.end(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_natural_exit_is_recorded() {
        let dir = TempDir::new().unwrap();
        let registry = SessionRegistry::new();
        let id = start(&registry, &dir, "echo done", Duration::from_secs(30)).await;
        let output = wait_for_output(&registry, &id, "done").await;
        assert!(output.contains("done"));

        let summary = registry.end(&id).await.unwrap();
        assert_eq!(summary.state, SessionState::Terminated(TerminationReason::Exited(Some(0))));
    }

    #[tokio::test]
    async fn test_exited_sessions_are_pruned_after_reporting() {
        let dir = TempDir::new().unwrap();
        let registry = SessionRegistry::new();
        let id = start(&registry, &dir, "echo tail", Duration::from_secs(30)).await;

        let mut terminated = false;
        for _ in 0..50 {
            let info = registry.list().into_iter().find(|s| s.id == id).unwrap();
            if info.state.is_terminated() {
                terminated = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(terminated);

        // Undrained output keeps the session around
        assert_eq!(registry.list().len(), 1);
        assert!(registry.drain_output(&id).unwrap().contains("tail"));

        assert!(registry.list().is_empty());
        assert!(registry.is_empty());
        assert!(matches!(registry.drain_output(&id), Err(PaiError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let registry = SessionRegistry::new();
        assert!(matches!(
            registry.feed("sess-99", "x").await,
            Err(PaiError::SessionNotFound(_))
        ));
        assert!(matches!(
            registry.end("sess-99").await,
            Err(PaiError::SessionNotFound(_))
        ));
    }
}
