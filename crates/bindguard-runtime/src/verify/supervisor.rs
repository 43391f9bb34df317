//! Out-of-process binding verification.
//!
//! The supervisor spawns a disposable worker process, walks it through the
//! ready/loaded/done handshake over stdin/stdout, and races the whole
//! exchange against a deadline. Whatever the worker does (crash, hang, print
//! garbage) the caller gets exactly one `VerificationResult` and the worker
//! is gone afterwards.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Serialize, Serializer};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout, timeout_at};
use tracing::{debug, error, info, warn};

use bindguard_core::protocol::{encode_line, parse_worker_line};
use bindguard_core::{
    ProtocolError, SupervisorMessage, VerificationRequest, VerificationResult, VerifierSettings,
    WORKER_ROLE_ENV, WorkerMessage,
};

use super::registry::{WorkerGuard, WorkerRegistry, get_worker_registry};
use super::state::{SupervisorEvent, SupervisorState, advance};
use crate::process::{finish_child, kill_child, kill_pid, pid_exists};

/// Argument the default worker command passes to the current executable.
pub const WORKER_ARG: &str = "__verify-worker";

/// Worker stderr lines kept for the report.
const STDERR_TAIL_LINES: usize = 32;

/// Longest time spent reading stdout after the worker exited.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
enum SupervisorError {
    #[error("Failed to spawn worker: {0}")]
    Spawn(#[source] io::Error),

    #[error("Worker {0} was not captured")]
    MissingPipe(&'static str),

    #[error("Failed to write to worker: {0}")]
    Write(#[from] io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

// ============================================================================
// Worker command
// ============================================================================

/// Program and arguments used to start a verification worker.
///
/// The role flag environment variable is always added on spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Re-launch the running executable in the worker role.
    pub fn current_exe() -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?).arg(WORKER_ARG))
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.envs.clone())
            .env(WORKER_ROLE_ENV, "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

// ============================================================================
// Report
// ============================================================================

/// Outcome of one verification plus diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub result: VerificationResult,
    /// `None` when no worker process was started.
    pub worker_pid: Option<u32>,
    /// Last non-terminal state reached before the outcome was decided.
    pub last_state: SupervisorState,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    /// Last lines the worker wrote to stderr.
    pub stderr_tail: Vec<String>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn serialize_millis<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
}

// ============================================================================
// Verifier
// ============================================================================

/// Verifies candidate binaries in disposable worker processes.
#[derive(Debug, Clone)]
pub struct BindingVerifier {
    settings: VerifierSettings,
    worker: Option<WorkerCommand>,
    registry: Arc<WorkerRegistry>,
}

impl Default for BindingVerifier {
    fn default() -> Self {
        Self::new(VerifierSettings::with_defaults())
    }
}

impl BindingVerifier {
    /// Verifier that re-launches the current executable as its worker.
    pub fn new(settings: VerifierSettings) -> Self {
        Self {
            settings,
            worker: None,
            registry: get_worker_registry(),
        }
    }

    #[must_use]
    pub fn with_worker_command(mut self, command: WorkerCommand) -> Self {
        self.worker = Some(command);
        self
    }

    /// Track workers in `registry` instead of the global one.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<WorkerRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub const fn settings(&self) -> &VerifierSettings {
        &self.settings
    }

    /// Verify `request`. Never fails; every problem is classified.
    pub async fn verify(&self, request: &VerificationRequest) -> VerificationResult {
        self.verify_detailed(request).await.result
    }

    /// Verify `request`, returning diagnostics along with the result.
    pub async fn verify_detailed(&self, request: &VerificationRequest) -> VerificationReport {
        let started = Instant::now();

        let command = match &self.worker {
            Some(command) => command.clone(),
            None => match WorkerCommand::current_exe() {
                Ok(command) => command,
                Err(e) => return self.unverifiable(&e, started),
            },
        };

        info!(
            binary = %request.binary_path().display(),
            backend = request.backend_kind().map_or("none", |k| k.as_str()),
            timeout = ?request.timeout(),
            "Verifying binary"
        );

        let mut session = match WorkerSession::spawn(&command, &self.registry) {
            Ok(session) => session,
            Err(e) => {
                error!(program = %command.program().display(), error = %e, "Worker could not be started");
                let state = advance(&SupervisorState::Spawning, SupervisorEvent::SpawnFailed);
                return VerificationReport {
                    result: state.result().unwrap_or(VerificationResult::Crashed(None)),
                    worker_pid: None,
                    last_state: SupervisorState::Spawning,
                    elapsed: started.elapsed(),
                    stderr_tail: Vec::new(),
                };
            }
        };

        let (state, last_state) = session.handshake(request).await;
        let state = session.finish(state, self.settings.exit_grace()).await;

        let result = state
            .result()
            .unwrap_or_else(|| VerificationResult::Failed(format!("stopped while {state}")));
        log_outcome(&result, session.pid, request);

        VerificationReport {
            result,
            worker_pid: session.pid,
            last_state,
            elapsed: started.elapsed(),
            stderr_tail: session.stderr_tail().await,
        }
    }

    fn unverifiable(&self, error: &io::Error, started: Instant) -> VerificationReport {
        let result = if self.settings.optimistic_when_unverifiable {
            VerificationResult::Passed
        } else {
            VerificationResult::Crashed(None)
        };
        warn!(
            error = %error,
            assumed = %result,
            "Cannot locate worker executable, binary left unverified"
        );
        VerificationReport {
            result,
            worker_pid: None,
            last_state: SupervisorState::Spawning,
            elapsed: started.elapsed(),
            stderr_tail: Vec::new(),
        }
    }
}

fn log_outcome(result: &VerificationResult, pid: Option<u32>, request: &VerificationRequest) {
    let binary = request.binary_path().display();
    match result {
        VerificationResult::Passed => info!(?pid, %binary, "Binary verified"),
        VerificationResult::Failed(reason) => {
            warn!(?pid, %binary, %reason, "Binary failed verification");
        }
        VerificationResult::TimedOut => warn!(?pid, %binary, "Binary verification timed out"),
        VerificationResult::Crashed(code) => {
            error!(?pid, %binary, ?code, "Worker crashed during verification");
        }
    }
}

// ============================================================================
// Worker session
// ============================================================================

struct WorkerSession {
    child: Child,
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    lines: Lines<BufReader<ChildStdout>>,
    stderr_task: JoinHandle<()>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    forward_stderr: Arc<AtomicBool>,
    _guard: Option<WorkerGuard>,
}

impl WorkerSession {
    fn spawn(command: &WorkerCommand, registry: &Arc<WorkerRegistry>) -> Result<Self, SupervisorError> {
        let mut child = command.to_command().spawn().map_err(SupervisorError::Spawn)?;
        let pid = child.id();
        let guard = pid.map(|pid| registry.register(pid));

        let stdin = child.stdin.take().ok_or(SupervisorError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(SupervisorError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(SupervisorError::MissingPipe("stderr"))?;

        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let forward_stderr = Arc::new(AtomicBool::new(false));
        let stderr_task = {
            let tail = Arc::clone(&stderr_tail);
            let forward = Arc::clone(&forward_stderr);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if forward.load(Ordering::Relaxed) {
                        info!(target: "bindguard::worker", ?pid, "{line}");
                    } else {
                        debug!(target: "bindguard::worker", ?pid, "{line}");
                    }
                    let mut tail = tail.lock().unwrap_or_else(PoisonError::into_inner);
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            })
        };

        debug!(?pid, "Worker spawned");
        Ok(Self {
            child,
            pid,
            stdin: Some(stdin),
            lines: BufReader::new(stdout).lines(),
            stderr_task,
            stderr_tail,
            forward_stderr,
            _guard: guard,
        })
    }

    async fn send(&mut self, message: &SupervisorMessage) -> Result<(), SupervisorError> {
        let stdin = self.stdin.as_mut().ok_or(SupervisorError::MissingPipe("stdin"))?;
        let line = encode_line(message)?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Send a command, logging instead of failing: a dead worker shows up as an exit.
    async fn send_logged(&mut self, message: &SupervisorMessage) {
        if let Err(e) = self.send(message).await {
            debug!(pid = ?self.pid, error = %e, "Could not deliver command to worker");
        }
    }

    /// Drive the handshake until a terminal state.
    ///
    /// Returns the terminal state and the last non-terminal state before it.
    async fn handshake(&mut self, request: &VerificationRequest) -> (SupervisorState, SupervisorState) {
        let deadline = sleep(request.timeout());
        tokio::pin!(deadline);

        let mut state = advance(&SupervisorState::Spawning, SupervisorEvent::Spawned);
        let mut last_state = state.clone();
        let mut stdout_open = true;

        while !state.is_terminal() {
            last_state = state.clone();

            let event = tokio::select! {
                biased;

                line = self.lines.next_line(), if stdout_open => {
                    match line {
                        Ok(Some(line)) => self.parse(&line).map(SupervisorEvent::Message),
                        Ok(None) | Err(_) => {
                            stdout_open = false;
                            None
                        }
                    }
                }

                status = self.child.wait() => {
                    let code = match status {
                        Ok(status) => status.code(),
                        Err(e) => {
                            warn!(pid = ?self.pid, error = %e, "Failed to wait for worker");
                            None
                        }
                    };
                    Some(SupervisorEvent::Exited(code))
                }

                () = &mut deadline => Some(SupervisorEvent::DeadlineElapsed),
            };

            // Skipped output must not starve the deadline
            let event = match event {
                Some(event) => event,
                None if deadline.is_elapsed() => SupervisorEvent::DeadlineElapsed,
                None => continue,
            };

            if let SupervisorEvent::Exited(code) = event {
                debug!(pid = ?self.pid, ?code, "Worker exited");
                // Messages written just before exit still count
                let drain_until = deadline.deadline();
                for message in self.drain_stdout(stdout_open, drain_until).await {
                    if state.is_terminal() {
                        break;
                    }
                    state = self.apply(&state, SupervisorEvent::Message(message), request).await;
                    if !state.is_terminal() {
                        last_state = state.clone();
                    }
                }
                state = advance(&state, SupervisorEvent::Exited(code));
            } else {
                state = self.apply(&state, event, request).await;
            }
        }

        (state, last_state)
    }

    /// Advance on one event, performing the send the next state implies.
    async fn apply(
        &mut self,
        state: &SupervisorState,
        event: SupervisorEvent,
        request: &VerificationRequest,
    ) -> SupervisorState {
        if let SupervisorEvent::Message(message) = &event {
            debug!(pid = ?self.pid, message = message.tag(), %state, "Worker message");
        }
        let next = advance(state, event);

        match next {
            SupervisorState::Loading => {
                info!(pid = ?self.pid, binary = %request.binary_path().display(), "Worker ready, loading binary");
                self.send_logged(&SupervisorMessage::Start {
                    binary_path: request.binary_path().to_path_buf(),
                    backend_kind: request.backend_kind(),
                })
                .await;
                advance(&next, SupervisorEvent::CommandSent)
            }
            SupervisorState::Testing => {
                info!(pid = ?self.pid, "Binary loaded, running functional test");
                self.forward_stderr.store(true, Ordering::Relaxed);
                self.send_logged(&SupervisorMessage::RunTest {
                    binary_path: request.binary_path().to_path_buf(),
                    backend_kind: request.backend_kind(),
                })
                .await;
                advance(&next, SupervisorEvent::CommandSent)
            }
            other => other,
        }
    }

    fn parse(&self, line: &str) -> Option<WorkerMessage> {
        match parse_worker_line(line) {
            Ok(message) => Some(message),
            Err(ProtocolError::Empty) => None,
            Err(e) => {
                debug!(pid = ?self.pid, line, error = %e, "Ignoring non-protocol worker output");
                None
            }
        }
    }

    /// Protocol messages still buffered on stdout after the worker exited.
    ///
    /// Bounded by `DRAIN_TIMEOUT` in total and by the request deadline, since
    /// a grandchild holding stdout open can keep writing forever.
    async fn drain_stdout(&mut self, stdout_open: bool, deadline: Instant) -> Vec<WorkerMessage> {
        let mut messages = Vec::new();
        if !stdout_open {
            return messages;
        }

        let budget = deadline.min(Instant::now() + DRAIN_TIMEOUT);
        let drained = timeout_at(budget, async {
            while let Ok(Some(line)) = self.lines.next_line().await {
                if let Some(message) = self.parse(&line) {
                    messages.push(message);
                }
            }
        })
        .await;

        if drained.is_err() {
            debug!(pid = ?self.pid, "Stdout still open after worker exit, stopped draining");
        }
        messages
    }

    /// Make sure the worker is gone and settle the final state.
    ///
    /// A pass only stands if the worker then exits cleanly on `Exit`; a
    /// nonzero code, a signal, or a kill after the grace period is a crash.
    async fn finish(&mut self, state: SupervisorState, grace: Duration) -> SupervisorState {
        let outcome = match state {
            SupervisorState::Passed | SupervisorState::Failed(_) => {
                self.send_logged(&SupervisorMessage::Exit).await;
                // Closing stdin turns a stuck read into an orphan exit
                self.stdin = None;
                finish_child(&mut self.child, grace).await
            }
            _ => kill_child(&mut self.child).await,
        };

        match outcome {
            Ok(status) => {
                debug!(pid = ?self.pid, code = ?status.code(), "Worker reaped");
                if state == SupervisorState::Passed && !status.success() {
                    warn!(pid = ?self.pid, code = ?status.code(), "Worker did not exit cleanly after passing");
                    return SupervisorState::Crashed(status.code());
                }
            }
            Err(e) => {
                warn!(pid = ?self.pid, error = %e, "Failed to reap worker");
                self.kill_by_pid();
                if state == SupervisorState::Passed {
                    return SupervisorState::Crashed(None);
                }
            }
        }
        state
    }

    /// Fallback when the `Child` handle could not reap the worker.
    fn kill_by_pid(&self) {
        let Some(pid) = self.pid else {
            return;
        };
        if pid_exists(pid) {
            if let Err(e) = kill_pid(pid) {
                error!(pid, error = %e, "Worker may still be running");
            }
        }
    }

    async fn stderr_tail(&mut self) -> Vec<String> {
        if timeout(DRAIN_TIMEOUT, &mut self.stderr_task).await.is_err() {
            self.stderr_task.abort();
        }
        self.stderr_tail
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}
