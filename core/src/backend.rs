use std::str::FromStr;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;

use async_trait::async_trait;
use nospace_protocol::CompileOptions;
use nospace_protocol::RunOptions;
use nospace_protocol::SessionId;
use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;

use crate::ExecutionSession;
use crate::SessionSnapshot;

/// Which execution strategy a backend uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BackendKind {
    /// Native interpreter in a child process.
    #[default]
    Process,
    /// In-process VM stepped cooperatively.
    Vm,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "process" => Ok(Self::Process),
            "vm" => Ok(Self::Vm),
            other => Err(format!("unknown backend `{other}` (expected process or vm)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
    /// Informational lines from the engine itself, never program output.
    System,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputEvent {
    pub session_id: SessionId,
    pub stream: OutputStream,
    pub data: String,
}

pub type OutputHandler = Arc<dyn Fn(OutputEvent) + Send + Sync>;
pub type StatusHandler = Arc<dyn Fn(SessionSnapshot) + Send + Sync>;

/// The two event callbacks a backend reports through. Handlers are
/// replaceable at any time and are invoked without holding any lock.
#[derive(Clone, Default)]
pub struct EventSinks {
    output: Arc<RwLock<Option<OutputHandler>>>,
    status: Arc<RwLock<Option<StatusHandler>>>,
}

impl EventSinks {
    pub fn set_output(&self, handler: OutputHandler) {
        *self.output.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub fn set_status(&self, handler: StatusHandler) {
        *self.status.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub fn clear(&self) {
        self.output
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.status
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn emit_output(&self, session_id: SessionId, stream: OutputStream, data: impl Into<String>) {
        let handler = self
            .output
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handler) = handler {
            handler(OutputEvent {
                session_id,
                stream,
                data: data.into(),
            });
        }
    }

    pub fn emit_status(&self, snapshot: SessionSnapshot) {
        let handler = self
            .status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handler) = handler {
            handler(snapshot);
        }
    }
}

impl std::fmt::Debug for EventSinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSinks").finish_non_exhaustive()
    }
}

/// Common surface of the execution strategies.
///
/// `run` and `compile` never fail: setup problems are reported as a stderr
/// event followed by a terminal `error` status, and the returned session is
/// already terminal. Every accepted run produces exactly one terminal
/// status event, after which no further event carries its session id.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn run(
        &self,
        code: &str,
        options: &RunOptions,
        stdin: Option<&str>,
    ) -> ExecutionSession;

    async fn compile(&self, code: &str, options: &CompileOptions) -> ExecutionSession;

    /// Writes to the most recent run's stdin. Silently ignored when that run
    /// is gone or the backend has no interactive input.
    fn send_stdin(&self, data: &str);

    /// Kills the most recent run, if it is still running.
    fn kill(&self);

    /// Kills the current run and forgets it.
    fn dispose(&self);

    fn on_output(&self, handler: OutputHandler);

    fn on_status_change(&self, handler: StatusHandler);
}
