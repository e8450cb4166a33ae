use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use super::audit::AuditLog;
use super::policy::ShellPolicy;
use super::session::{SessionInfo, SessionRegistry, SessionSummary};
use crate::agents::{ActionOutcome, Effect, Payload};
use crate::constants::{OUTPUT_CHANNEL_CAPACITY, READER_JOIN_TIMEOUT_MS};
use crate::utils::{PaiError, PaiResult};
use crate::workspace::outcome_for_error;

/// Which pipe a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Stdout => f.write_str("stdout"),
            OutputStream::Stderr => f.write_str("stderr"),
        }
    }
}

/// Live sink for streamed output lines
pub type OutputCallback = Arc<dyn Fn(OutputStream, &str) + Send + Sync>;

#[derive(Debug)]
pub(crate) struct OutputLine {
    pub stream: OutputStream,
    pub text: String,
}

/// Output kept in memory, bounded per stream
#[derive(Debug, Clone, Default)]
pub(crate) struct BoundedCapture {
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    limit: usize,
}

impl BoundedCapture {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    pub fn push(&mut self, line: &OutputLine) {
        let limit = self.limit;
        let (buffer, truncated) = match line.stream {
            OutputStream::Stdout => (&mut self.stdout, &mut self.stdout_truncated),
            OutputStream::Stderr => (&mut self.stderr, &mut self.stderr_truncated),
        };
        if buffer.len() + line.text.len() + 1 <= limit {
            buffer.push_str(&line.text);
            buffer.push('\n');
        } else {
            *truncated += line.text.len() + 1;
        }
    }

    /// Take everything buffered so far
    pub fn drain(&mut self) -> String {
        let mut out = std::mem::take(&mut self.stdout);
        let stderr = std::mem::take(&mut self.stderr);
        if !stderr.is_empty() {
            out.push_str(&stderr);
        }
        self.stdout_truncated = 0;
        self.stderr_truncated = 0;
        out
    }
}

/// Everything a finished one-shot command produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedResult {
    /// `None` when the process was killed by a signal or timed out
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration: Duration,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
}

impl CapturedResult {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Text block handed back to the planner
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        match self.exit_code {
            Some(code) => parts.push(format!("ExitCode: {}", code)),
            None => parts.push("ExitCode: none (terminated)".to_string()),
        }
        let stdout = self.stdout.trim_end();
        if !stdout.is_empty() {
            parts.push(format!("STDOUT:\n{}", stdout));
        }
        if self.stdout_truncated > 0 {
            parts.push(format!("[stdout truncated {} bytes]", self.stdout_truncated));
        }
        let stderr = self.stderr.trim_end();
        if !stderr.is_empty() {
            parts.push(format!("STDERR:\n{}", stderr));
        }
        if self.stderr_truncated > 0 {
            parts.push(format!("[stderr truncated {} bytes]", self.stderr_truncated));
        }
        parts.join("\n")
    }
}

/// Build the platform shell invocation for `command`, rooted at `cwd`
pub(crate) fn shell_command(command: &str, cwd: &Path) -> Command {
    let mut cmd = if cfg!(target_os = "windows") {
        let mut cmd = Command::new("powershell");
        cmd.args(["-NoProfile", "-NonInteractive", "-Command", command]);
        cmd
    } else {
        let shell = if which::which("bash").is_ok() { "bash" } else { "sh" };
        let mut cmd = Command::new(shell);
        cmd.arg("-c").arg(command);
        cmd
    };
    cmd.current_dir(cwd).kill_on_drop(true);
    cmd
}

/// Drain one pipe line by line into the channel
pub(crate) fn spawn_reader<R>(
    reader: R,
    stream: OutputStream,
    tx: mpsc::Sender<OutputLine>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\n', '\r'])
                        .to_string();
                    if tx.send(OutputLine { stream, text }).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(%stream, error = %e, "reader stopped");
                    break;
                }
            }
        }
    })
}

/// Give readers a short window to finish after the process is gone. A grandchild
/// still holding the pipe would otherwise block forever.
pub(crate) async fn join_readers(readers: Vec<JoinHandle<()>>) {
    let grace = Duration::from_millis(READER_JOIN_TIMEOUT_MS);
    for mut reader in readers {
        if timeout(grace, &mut reader).await.is_err() {
            debug!("reader did not finish in time, aborting");
            reader.abort();
        }
    }
}

/// Runs commands in the project root with timeouts, streaming and bounded capture
pub struct ShellExecutor {
    root: PathBuf,
    policy: ShellPolicy,
    audit: Arc<AuditLog>,
    sink: Option<OutputCallback>,
    sessions: SessionRegistry,
}

impl ShellExecutor {
    pub fn new(root: impl Into<PathBuf>, policy: ShellPolicy, audit: Arc<AuditLog>) -> Self {
        Self {
            root: root.into(),
            policy,
            audit,
            sink: None,
            sessions: SessionRegistry::new(),
        }
    }

    /// Attach a live sink; only used when the policy enables streaming
    pub fn with_sink(mut self, sink: OutputCallback) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn policy(&self) -> &ShellPolicy {
        &self.policy
    }

    fn live_sink(&self) -> Option<OutputCallback> {
        if self.policy.stream_output {
            self.sink.clone()
        } else {
            None
        }
    }

    fn screen(&self, command: &str) -> PaiResult<()> {
        self.policy.screen(command).map_err(|rejection| {
            let message = rejection.message();
            warn!(command, reason = %message, "command rejected");
            self.audit.record_rejected(command, &message);
            PaiError::CommandRejected(message)
        })
    }

    pub async fn execute(&self, command: &str) -> PaiResult<CapturedResult> {
        self.run(command, None).await
    }

    /// Run `command` with `payload` written to its stdin, newline-terminated
    pub async fn execute_with_stdin(&self, command: &str, payload: &str) -> PaiResult<CapturedResult> {
        self.run(command, Some(payload)).await
    }

    #[instrument(skip_all, fields(timeout_secs = self.policy.timeout.as_secs(), with_stdin = stdin.is_some()))]
    async fn run(&self, command: &str, stdin: Option<&str>) -> PaiResult<CapturedResult> {
        self.screen(command)?;

        let started = Instant::now();
        let mut cmd = shell_command(command, &self.root);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(command, "spawning child process");
        let mut child = cmd.spawn()?;

        // Without a payload the pipe stays open and unwritten, so a command waiting
        // for input blocks until the timeout instead of reading EOF.
        let mut idle_stdin = None;
        let writer = match (stdin, child.stdin.take()) {
            (Some(payload), Some(mut pipe)) => {
                let mut data = payload.to_string();
                if !data.ends_with('\n') {
                    data.push('\n');
                }
                Some(tokio::spawn(async move {
                    // The child may exit without reading; a broken pipe is fine
                    let _ = pipe.write_all(data.as_bytes()).await;
                    let _ = pipe.shutdown().await;
                }))
            }
            (None, pipe) => {
                idle_stdin = pipe;
                None
            }
            (Some(_), None) => None,
        };

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

        let sink = self.live_sink();
        let limit = self.policy.max_output_bytes;
        let collector = tokio::spawn(async move {
            let mut capture = BoundedCapture::new(limit);
            while let Some(line) = rx.recv().await {
                if let Some(sink) = &sink {
                    sink(line.stream, &line.text);
                }
                capture.push(&line);
            }
            capture
        });

        let (exit_code, timed_out) = match timeout(self.policy.timeout, child.wait()).await {
            Ok(Ok(status)) => (status.code(), false),
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                warn!(command, timeout_secs = self.policy.timeout.as_secs(), "command timed out, killing");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill timed out command");
                }
                (None, true)
            }
        };
        drop(idle_stdin);

        join_readers(readers).await;
        if let Some(writer) = writer {
            writer.abort();
        }
        let capture = collector.await.unwrap_or_else(|_| BoundedCapture::new(limit));

        if capture.stdout_truncated > 0 || capture.stderr_truncated > 0 {
            warn!(
                stdout_truncated = capture.stdout_truncated,
                stderr_truncated = capture.stderr_truncated,
                "output truncated"
            );
        }
        self.audit.record_exec(command, exit_code, timed_out);
        debug!(?exit_code, timed_out, "command finished");

        Ok(CapturedResult {
            exit_code,
            stdout: capture.stdout,
            stderr: capture.stderr,
            timed_out,
            duration: started.elapsed(),
            stdout_truncated: capture.stdout_truncated,
            stderr_truncated: capture.stderr_truncated,
        })
    }

    /// One-shot run reported as an action outcome
    pub async fn execute_outcome(&self, command: &str, stdin: Option<&str>) -> ActionOutcome {
        let result = match stdin {
            Some(payload) => self.execute_with_stdin(command, payload).await,
            None => self.execute(command).await,
        };

        match result {
            Ok(captured) if captured.timed_out => {
                let signal = PaiError::Timeout {
                    secs: self.policy.timeout.as_secs_f64().ceil() as u64,
                };
                let mut outcome = outcome_for_error(signal);
                outcome.message = format!(
                    "{} and was killed: {}. For interactive programs use EXECUTE_INPUT or a shell session.",
                    outcome.message, command
                );
                outcome.with_payload(Payload::Shell(captured))
            }
            Ok(captured) if captured.success() => {
                ActionOutcome::success(format!("Shell command executed: {}", command), Effect::Changed)
                    .with_payload(Payload::Shell(captured))
            }
            Ok(captured) => ActionOutcome::error(format!(
                "Shell command failed: {}",
                command
            ))
            .with_payload(Payload::Shell(captured)),
            Err(PaiError::CommandRejected(reason)) => ActionOutcome::error(reason),
            Err(e) => ActionOutcome::error(format!("Failed to execute shell command: {}", e)),
        }
    }

    /// Start a long-lived interactive process
    pub async fn session_start(&self, command: &str) -> PaiResult<String> {
        self.screen(command)?;
        let cmd = shell_command(command, &self.root);
        self.sessions
            .start(
                cmd,
                command,
                self.policy.session_timeout,
                self.policy.max_output_bytes,
                self.live_sink(),
                self.audit.clone(),
            )
            .await
    }

    /// Send one line of input to a running session
    pub async fn session_feed(&self, id: &str, text: &str) -> PaiResult<()> {
        self.sessions.feed(id, text).await
    }

    /// Output buffered since the last drain
    pub fn session_output(&self, id: &str) -> PaiResult<String> {
        self.sessions.drain_output(id)
    }

    pub async fn session_end(&self, id: &str) -> PaiResult<SessionSummary> {
        self.sessions.end(id).await
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions.list()
    }

    /// End every live session
    pub async fn shutdown(&self) {
        for info in self.sessions.list() {
            if let Err(e) = self.sessions.end(&info.id).await {
                debug!(session = %info.id, error = %e, "session already gone at shutdown");
            }
        }
    }
}
