use std::path::PathBuf;
use std::process::ExitStatus;

use nospace_protocol::ExecutionStatus;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::output::OutputChunk;
use super::remove_source_file;
use crate::EventSinks;
use crate::ExecutionSession;
use crate::OutputStream;

/// How long to keep draining pipes after the child exits. A grandchild that
/// inherited stdout can hold the pipe open indefinitely.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Stand-in deadline for delays too large to represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Owns one child process from spawn to terminal status. It is the only
/// emitter of events for its session, so output always precedes the
/// terminal status.
pub(super) struct Supervisor {
    pub(super) session: ExecutionSession,
    pub(super) child: Child,
    pub(super) output_rx: mpsc::UnboundedReceiver<OutputChunk>,
    pub(super) source_path: PathBuf,
    pub(super) sinks: EventSinks,
    pub(super) timeout: Duration,
    pub(super) kill_grace: Duration,
}

impl Supervisor {
    pub(super) async fn run(mut self) {
        let session_id = self.session.id();
        let cancel = self.session.cancellation().clone();

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);
        let escalation = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(escalation);

        let mut timed_out = false;
        let mut terminating = false;
        let mut escalated = false;

        let waited = loop {
            tokio::select! {
                Some((stream, data)) = self.output_rx.recv() => {
                    self.sinks.emit_output(session_id, stream, data);
                }
                result = self.child.wait() => break result,
                _ = &mut deadline, if !timed_out => {
                    timed_out = true;
                    if self.session.is_running() {
                        warn!(%session_id, timeout = ?self.timeout, "⏰ [process_exec] run timed out, killing");
                        self.sinks.emit_output(
                            session_id,
                            OutputStream::Stderr,
                            timeout_notice(self.timeout),
                        );
                        self.session.kill();
                    }
                }
                _ = cancel.cancelled(), if !terminating => {
                    terminating = true;
                    debug!(%session_id, "[process_exec] sending SIGTERM");
                    terminate(&mut self.child);
                    escalation.as_mut().reset(deadline_after(self.kill_grace));
                }
                _ = &mut escalation, if terminating && !escalated => {
                    escalated = true;
                    warn!(%session_id, grace = ?self.kill_grace, "[process_exec] still alive after SIGTERM, sending SIGKILL");
                    force_kill(&mut self.child);
                }
            }
        };

        self.drain_output().await;
        remove_source_file(&self.source_path).await;

        let (status, exit_code) = match waited {
            Ok(exit) => classify_exit(exit),
            Err(err) => {
                warn!(%session_id, error = %err, "[process_exec] failed to wait for interpreter");
                self.sinks.emit_output(
                    session_id,
                    OutputStream::Stderr,
                    format!("failed to wait for interpreter: {err}\n"),
                );
                (ExecutionStatus::Error, Some(1))
            }
        };
        let settled = self.session.settle(status, exit_code);
        let notice = match settled.exit_code {
            Some(code) => format!("[Process exited with code: {code}]"),
            None => "[Process killed]".to_string(),
        };
        self.sinks.emit_output(session_id, OutputStream::System, notice);
        info!(%session_id, status = %settled.status, exit_code = ?settled.exit_code, "🏁 [process_exec] session finished");
        self.sinks.emit_status(settled);
    }

    async fn drain_output(&mut self) {
        let deadline = Instant::now() + OUTPUT_DRAIN_TIMEOUT;
        loop {
            match tokio::time::timeout_at(deadline, self.output_rx.recv()).await {
                Ok(Some((stream, data))) => {
                    self.sinks.emit_output(self.session.id(), stream, data);
                }
                Ok(None) => break,
                Err(_) => {
                    debug!(session_id = %self.session.id(), "[process_exec] output still open after exit, dropping the rest");
                    break;
                }
            }
        }
        self.output_rx.close();
    }
}

/// `now + delay`, saturating to a far-off instant instead of overflowing.
fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay).unwrap_or_else(|| now + FAR_FUTURE)
}

fn timeout_notice(timeout: Duration) -> String {
    let limit = if timeout.subsec_millis() == 0 {
        format!("{}s", timeout.as_secs())
    } else {
        format!("{}s", timeout.as_secs_f64())
    };
    format!("\nProcess timeout ({limit}). Killing...\n")
}

fn classify_exit(exit: ExitStatus) -> (ExecutionStatus, Option<i32>) {
    match exit_code_of(exit) {
        0 => (ExecutionStatus::Finished, Some(0)),
        code => (ExecutionStatus::Error, Some(code)),
    }
}

/// Exit code, or `128 + signal` for a child that died from a signal.
#[cfg(unix)]
fn exit_code_of(exit: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    exit.code()
        .or_else(|| exit.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code_of(exit: ExitStatus) -> i32 {
    exit.code().unwrap_or(1)
}

/// Graceful stop. The child leads its own process group, so the signal
/// reaches anything it spawned as well.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if signal_group(child, libc::SIGTERM) {
            return;
        }
    }
    force_kill(child);
}

fn force_kill(child: &mut Child) {
    #[cfg(unix)]
    {
        if signal_group(child, libc::SIGKILL) {
            return;
        }
    }
    if let Err(err) = child.start_kill() {
        debug!(error = %err, "[process_exec] start_kill failed, child already gone");
    }
}

#[cfg(unix)]
fn signal_group(child: &Child, signal: libc::c_int) -> bool {
    let Some(pid) = child.id().and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return false;
    };
    // SAFETY: plain kill(2) on a process group we created; no memory is
    // shared with the callee.
    let rc = unsafe { libc::kill(-pid, signal) };
    if rc == 0 {
        return true;
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() != Some(libc::ESRCH) {
        warn!(pid, signal, error = %err, "[process_exec] failed to signal process group");
    }
    false
}
