//! Runs programs through the native `nospace20` interpreter.
//!
//! Each run writes its source to `<scratch_dir>/nospace-<id>.ns`, spawns
//! `<interpreter> --std <subset> [--debug] [--ignore-debug] <file>` and hands
//! the child to a [`supervisor::Supervisor`] task that streams output,
//! enforces the timeout, escalates kills, deletes the file and reports the
//! terminal status.

mod output;
mod supervisor;

use std::ffi::OsString;
use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use async_trait::async_trait;
use nospace_protocol::CompileOptions;
use nospace_protocol::ExecutionStatus;
use nospace_protocol::InputMode;
use nospace_protocol::RunOptions;
use nospace_protocol::SessionId;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::error;
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
use crate::error::ExecError;
use crate::error::Result;
use output::spawn_reader;
use output::spawn_stdin_writer;
use supervisor::Supervisor;

pub struct ProcessExecutionBackend {
    config: Arc<Config>,
    sinks: EventSinks,
    current: Mutex<Option<ExecutionSession>>,
}

/// A setup failure together with the artifact to clean up.
struct SetupFailure {
    session_id: SessionId,
    error: ExecError,
    source_path: Option<PathBuf>,
}

impl ProcessExecutionBackend {
    pub fn new(config: Arc<Config>) -> Self {
        tracing::debug!(
            interpreter = %config.interpreter_path.display(),
            max_processes = config.max_processes,
            "[process_exec] backend created (max_processes is advisory)"
        );
        Self {
            config,
            sinks: EventSinks::default(),
            current: Mutex::new(None),
        }
    }

    fn current(&self) -> Option<ExecutionSession> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn launch(
        &self,
        session_id: SessionId,
        code: &str,
        options: &RunOptions,
    ) -> std::result::Result<ExecutionSession, SetupFailure> {
        let fail = |error: ExecError, source_path: Option<PathBuf>| SetupFailure {
            session_id,
            error,
            source_path,
        };

        let source_path = write_source(&self.config.scratch_dir, session_id, code)
            .await
            .map_err(|error| fail(error, None))?;

        if !interpreter_exists(&self.config.interpreter_path).await {
            let error = ExecError::InterpreterNotFound(self.config.interpreter_path.clone());
            return Err(fail(error, Some(source_path)));
        }

        let mut command = Command::new(&self.config.interpreter_path);
        command
            .args(interpreter_args(options, &source_path))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => return Err(fail(ExecError::Spawn(err), Some(source_path))),
        };
        let pipes = (child.stdin.take(), child.stdout.take(), child.stderr.take());
        let (Some(stdin), Some(stdout), Some(stderr)) = pipes else {
            let _ = child.start_kill();
            return Err(fail(ExecError::MissingPipe("stdio"), Some(source_path)));
        };

        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let session = ExecutionSession::new(session_id, Some(stdin_tx));

        info!(
            %session_id,
            pid = ?child.id(),
            language = %options.language,
            "🚀 [process_exec] interpreter started"
        );
        self.sinks.emit_status(session.snapshot());
        self.sinks.emit_output(
            session_id,
            OutputStream::System,
            format!("[Process started: {session_id}]"),
        );

        spawn_stdin_writer(stdin, stdin_rx, session_id);
        spawn_reader(stdout, OutputStream::Stdout, session_id, output_tx.clone());
        spawn_reader(stderr, OutputStream::Stderr, session_id, output_tx);

        tokio::spawn(
            Supervisor {
                session: session.clone(),
                child,
                output_rx,
                source_path,
                sinks: self.sinks.clone(),
                timeout: self.config.timeout,
                kill_grace: self.config.kill_grace,
            }
            .run(),
        );
        Ok(session)
    }

    /// Reports a setup failure as stderr plus `error`/1 and returns the
    /// already terminal session.
    async fn fail_setup(&self, failure: SetupFailure) -> ExecutionSession {
        let SetupFailure {
            session_id,
            error,
            source_path,
        } = failure;
        error!(%session_id, error = %error, "❌ [process_exec] run could not start");
        if let Some(path) = source_path {
            remove_source_file(&path).await;
        }
        self.fail_session(session_id, format!("{error}\n"))
    }

    fn fail_session(&self, session_id: SessionId, message: String) -> ExecutionSession {
        let session = ExecutionSession::terminated(session_id, ExecutionStatus::Error, Some(1));
        self.sinks
            .emit_output(session_id, OutputStream::Stderr, message);
        self.sinks.emit_status(session.snapshot());
        session
    }
}

#[async_trait]
impl ExecutionBackend for ProcessExecutionBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Process
    }

    async fn run(
        &self,
        code: &str,
        options: &RunOptions,
        stdin: Option<&str>,
    ) -> ExecutionSession {
        let session_id = SessionId::new();
        let session = match self.launch(session_id, code, options).await {
            Ok(session) => session,
            Err(failure) => self.fail_setup(failure).await,
        };

        if let Some(payload) = stdin
            && session.is_running()
        {
            session.send_stdin(payload.as_bytes());
        }
        if options.input_mode == InputMode::Batch {
            session.close_stdin();
        }

        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        session
    }

    async fn compile(&self, _code: &str, options: &CompileOptions) -> ExecutionSession {
        warn!(target = %options.target, "[process_exec] compile requested from the process backend");
        self.fail_session(
            SessionId::new(),
            "compile is not supported by the process backend\n".to_string(),
        )
    }

    fn send_stdin(&self, data: &str) {
        if let Some(session) = self.current() {
            session.send_stdin(data.as_bytes());
        }
    }

    fn kill(&self) {
        if let Some(session) = self.current()
            && session.kill()
        {
            info!(session_id = %session.id(), "🛑 [process_exec] kill requested");
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

/// `--std <subset> [--debug] [--ignore-debug] <file>`, in that order.
pub(crate) fn interpreter_args(options: &RunOptions, source_path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["--std".into(), options.language.to_string().into()];
    if options.debug {
        args.push("--debug".into());
    }
    if options.ignore_debug {
        args.push("--ignore-debug".into());
    }
    args.push(source_path.as_os_str().to_owned());
    args
}

async fn write_source(scratch_dir: &Path, session_id: SessionId, code: &str) -> Result<PathBuf> {
    tokio::fs::create_dir_all(scratch_dir)
        .await
        .map_err(|source| ExecError::ScratchDir {
            path: scratch_dir.to_path_buf(),
            source,
        })?;
    let path = scratch_dir.join(format!("nospace-{session_id}.ns"));
    tokio::fs::write(&path, code)
        .await
        .map_err(|source| ExecError::WriteSource {
            path: path.clone(),
            source,
        })?;
    Ok(path)
}

async fn interpreter_exists(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|metadata| metadata.is_file())
}

/// Deletes a run's source file. Failures are logged and swallowed.
pub(super) async fn remove_source_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            warn!(path = %path.display(), error = %err, "[process_exec] failed to delete temporary file");
        }
    }
}
