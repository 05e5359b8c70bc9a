//! In-process execution on the nospace VM.
//!
//! A run is a tokio task that alternates between executing one step budget
//! and yielding to the runtime. Cancellation and the global step ceiling
//! are checked at budget boundaries only; a single budget is never
//! interrupted.

mod raised;
mod toolchain;

use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use async_trait::async_trait;
use nospace_protocol::CompileOptions;
use nospace_protocol::ExecutionStatus;
use nospace_protocol::RunOptions;
use nospace_protocol::SessionId;
use nospace_vm::Machine;
use nospace_vm::StepOutcome;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::BackendKind;
use crate::Config;
use crate::EventSinks;
use crate::ExecutionBackend;
use crate::ExecutionSession;
use crate::OutputHandler;
use crate::OutputStream;
use crate::StatusHandler;

pub use raised::Raised;
pub use toolchain::NativeToolchain;
pub use toolchain::Toolchain;

#[derive(Debug, Clone, Copy)]
struct StepLimits {
    budget: u64,
    ceiling: u64,
}

pub struct CooperativeVmBackend {
    toolchain: Arc<dyn Toolchain>,
    sinks: EventSinks,
    current: Mutex<Option<ExecutionSession>>,
    limits: StepLimits,
}

impl CooperativeVmBackend {
    pub fn new(config: Arc<Config>) -> Self {
        Self::with_toolchain(config, Arc::new(NativeToolchain))
    }

    pub fn with_toolchain(config: Arc<Config>, toolchain: Arc<dyn Toolchain>) -> Self {
        Self {
            toolchain,
            sinks: EventSinks::default(),
            current: Mutex::new(None),
            limits: StepLimits {
                budget: config.step_budget,
                ceiling: config.max_total_steps,
            },
        }
    }

    fn current(&self) -> Option<ExecutionSession> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ExecutionBackend for CooperativeVmBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Vm
    }

    async fn run(
        &self,
        code: &str,
        options: &RunOptions,
        stdin: Option<&str>,
    ) -> ExecutionSession {
        // One run per backend instance.
        self.kill();

        let session = ExecutionSession::new(SessionId::new(), None);
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());

        let job = VmJob {
            session: session.clone(),
            toolchain: Arc::clone(&self.toolchain),
            sinks: self.sinks.clone(),
            code: code.to_string(),
            options: options.clone(),
            stdin: stdin.unwrap_or_default().to_string(),
            limits: self.limits,
        };
        tokio::spawn(job.run());
        session
    }

    async fn compile(&self, code: &str, options: &CompileOptions) -> ExecutionSession {
        let session_id = SessionId::new();
        let compiled = catch_unwind(AssertUnwindSafe(|| self.toolchain.compile(code, options)))
            .unwrap_or_else(|panic| Err(Raised::from_panic(panic)));
        let session = match compiled {
            Ok(text) => {
                self.sinks
                    .emit_output(session_id, OutputStream::Stdout, format!("{text}\n"));
                ExecutionSession::terminated(session_id, ExecutionStatus::Finished, Some(0))
            }
            Err(raised) => {
                debug!(%session_id, "[vm_exec] compile failed");
                self.sinks.emit_output(
                    session_id,
                    OutputStream::Stderr,
                    format!("{}\n", raised.message()),
                );
                ExecutionSession::terminated(session_id, ExecutionStatus::Error, Some(1))
            }
        };
        self.sinks.emit_status(session.snapshot());
        session
    }

    /// Input is fixed when the machine is built.
    fn send_stdin(&self, _data: &str) {}

    fn kill(&self) {
        if let Some(session) = self.current()
            && session.kill()
        {
            info!(session_id = %session.id(), "🛑 [vm_exec] cancellation requested");
        }
    }

    fn dispose(&self) {
        self.kill();
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn on_output(&self, handler: OutputHandler) {
        self.sinks.set_output(handler);
    }

    fn on_status_change(&self, handler: StatusHandler) {
        self.sinks.set_status(handler);
    }
}

enum Ending {
    Cancelled,
    Completed,
    Failed(Raised),
    LimitReached,
}

struct VmJob {
    session: ExecutionSession,
    toolchain: Arc<dyn Toolchain>,
    sinks: EventSinks,
    code: String,
    options: RunOptions,
    stdin: String,
    limits: StepLimits,
}

impl VmJob {
    async fn run(self) {
        let session_id = self.session.id();
        let loaded = catch_unwind(AssertUnwindSafe(|| {
            self.toolchain
                .load(&self.code, self.options.language, &self.stdin)
        }))
        .unwrap_or_else(|panic| Err(Raised::from_panic(panic)));
        let mut machine = match loaded {
            Ok(machine) if self.options.debug => machine.with_trace(),
            Ok(machine) => machine,
            Err(raised) => {
                self.finish(Ending::Failed(raised), None);
                return;
            }
        };

        // Killed before the task got to run: report only the terminal status.
        if self.session.is_cancelled() {
            debug!(%session_id, "[vm_exec] cancelled before start");
            self.finish(Ending::Cancelled, None);
            return;
        }

        info!(%session_id, instructions = machine.program().len(), "▶️ [vm_exec] run started");
        self.sinks.emit_status(self.session.snapshot());
        self.sinks
            .emit_output(session_id, OutputStream::System, "[VM execution started]");

        let ending = self.drive(&mut machine).await;
        self.finish(ending, Some(&machine));
    }

    async fn drive(&self, machine: &mut Machine) -> Ending {
        let session_id = self.session.id();
        loop {
            if self.session.is_cancelled() {
                return Ending::Cancelled;
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| machine.step(self.limits.budget)));
            let chunk = machine.flush_stdout();
            if !chunk.is_empty() {
                self.sinks.emit_output(session_id, OutputStream::Stdout, chunk);
            }

            if self.session.is_cancelled() {
                return Ending::Cancelled;
            }
            match outcome {
                Ok(StepOutcome::Complete) => return Ending::Completed,
                Ok(StepOutcome::Error(err)) => return Ending::Failed(Raised::from(err)),
                Err(panic) => return Ending::Failed(Raised::from_panic(panic)),
                Ok(StepOutcome::Suspended) => {}
            }
            if machine.total_steps() >= self.limits.ceiling {
                return Ending::LimitReached;
            }
            tokio::task::yield_now().await;
        }
    }

    /// Emits the closing events for `ending` and settles the session. The
    /// machine is dropped by the caller right after.
    fn finish(&self, ending: Ending, machine: Option<&Machine>) {
        let session_id = self.session.id();
        let (status, exit_code) = match ending {
            Ending::Cancelled => (ExecutionStatus::Killed, None),
            Ending::Completed => {
                if let Some(trace) = machine.and_then(Machine::traced)
                    && self.options.debug
                    && !trace.is_empty()
                {
                    match serde_json::to_string(trace) {
                        Ok(json) => self.sinks.emit_output(
                            session_id,
                            OutputStream::Stderr,
                            format!("[Trace] {json}\n"),
                        ),
                        Err(err) => warn!(%session_id, error = %err, "[vm_exec] failed to serialize trace"),
                    }
                }
                (ExecutionStatus::Finished, Some(0))
            }
            Ending::Failed(raised) => {
                let mut message = raised.message();
                if !message.ends_with('\n') {
                    message.push('\n');
                }
                self.sinks
                    .emit_output(session_id, OutputStream::Stderr, message);
                (ExecutionStatus::Error, Some(1))
            }
            Ending::LimitReached => {
                warn!(%session_id, ceiling = self.limits.ceiling, "[vm_exec] step ceiling reached");
                self.sinks.emit_output(
                    session_id,
                    OutputStream::Stderr,
                    format!("Execution limit reached ({} steps)\n", self.limits.ceiling),
                );
                (ExecutionStatus::Killed, None)
            }
        };

        let settled = self.session.settle(status, exit_code);
        if let Some(machine) = machine {
            let notice = match settled.status {
                ExecutionStatus::Finished => {
                    format!("[execution completed ({} steps)]", machine.total_steps())
                }
                ExecutionStatus::Killed => "[execution stopped]".to_string(),
                _ => "[execution failed]".to_string(),
            };
            self.sinks
                .emit_output(session_id, OutputStream::System, notice);
        }
        info!(%session_id, status = %settled.status, "🏁 [vm_exec] run finished");
        self.sinks.emit_status(settled);
    }
}
