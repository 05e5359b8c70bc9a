//! One-shot `run` and `compile` commands on top of the execution backends.

use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use nospace_app_server::ConfigArgs;
use nospace_core::CooperativeVmBackend;
use nospace_core::ExecutionBackend;
use nospace_core::OutputEvent;
use nospace_core::OutputStream;
use nospace_core::SessionSnapshot;
use nospace_core::create_backend;
use nospace_core::normalize_stdin_line;
use nospace_protocol::CompileOptions;
use nospace_protocol::CompileTarget;
use nospace_protocol::ExecutionStatus;
use nospace_protocol::InputMode;
use nospace_protocol::LanguageSubset;
use nospace_protocol::RunOptions;
use nospace_protocol::try_format_error_json;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Program source.
    pub file: PathBuf,

    #[arg(long, default_value_t = LanguageSubset::Standard)]
    pub language: LanguageSubset,

    #[arg(long)]
    pub debug: bool,

    #[arg(long)]
    pub ignore_debug: bool,

    /// Feed this file as stdin and close it, instead of forwarding the
    /// terminal line by line.
    #[arg(long, value_name = "FILE")]
    pub stdin_file: Option<PathBuf>,

    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Debug, Clone, Args)]
pub struct CompileArgs {
    /// Program source.
    pub file: PathBuf,

    #[arg(long, default_value_t = CompileTarget::Ws)]
    pub target: CompileTarget,

    #[arg(long, default_value_t = LanguageSubset::Standard)]
    pub language: LanguageSubset,
}

/// Runs a program to completion and returns the exit code to report.
pub async fn run_program(args: RunArgs) -> anyhow::Result<i32> {
    let code = read_source(&args.file).await?;
    let stdin_data = match &args.stdin_file {
        Some(path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?,
        ),
        None => None,
    };
    let options = RunOptions {
        language: args.language,
        debug: args.debug,
        ignore_debug: args.ignore_debug,
        input_mode: if stdin_data.is_some() {
            InputMode::Batch
        } else {
            InputMode::Interactive
        },
    };

    let config = Arc::new(args.config.load()?);
    let backend = create_backend(config);
    let mut terminal_rx = attach_printer(backend.as_ref());

    let session = backend.run(&code, &options, stdin_data.as_deref()).await;
    let session_id = session.id();
    if options.input_mode == InputMode::Interactive && session.is_running() {
        forward_terminal_stdin(Arc::clone(&backend));
    }

    let snapshot = loop {
        tokio::select! {
            received = terminal_rx.recv() => match received {
                Some(snapshot) if snapshot.session_id == session_id => break snapshot,
                Some(_) => {}
                None => break session.snapshot(),
            },
            _ = tokio::signal::ctrl_c() => {
                debug!(%session_id, "[cli] interrupted");
                backend.kill();
            }
        }
    };
    backend.dispose();
    Ok(exit_code_for(&snapshot))
}

/// Compiles a program with the in-process toolchain and prints the result.
pub async fn compile_program(args: CompileArgs) -> anyhow::Result<i32> {
    let code = read_source(&args.file).await?;
    let backend = CooperativeVmBackend::new(Arc::default());
    let _terminal_rx = attach_printer(&backend);
    let options = CompileOptions {
        language: args.language,
        target: args.target,
    };
    let session = backend.compile(&code, &options).await;
    Ok(exit_code_for(&session.snapshot()))
}

async fn read_source(path: &Path) -> anyhow::Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))
}

/// Prints program output as it arrives and hands terminal statuses to the
/// returned channel.
fn attach_printer(backend: &dyn ExecutionBackend) -> mpsc::UnboundedReceiver<SessionSnapshot> {
    backend.on_output(Arc::new(print_event));
    let (tx, rx) = mpsc::unbounded_channel();
    backend.on_status_change(Arc::new(move |snapshot: SessionSnapshot| {
        if snapshot.status.is_terminal() {
            let _ = tx.send(snapshot);
        }
    }));
    rx
}

fn print_event(event: OutputEvent) {
    match event.stream {
        OutputStream::Stdout => {
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(event.data.as_bytes());
            let _ = stdout.flush();
        }
        OutputStream::Stderr => {
            let mut stderr = std::io::stderr().lock();
            let _ = stderr.write_all(render_stderr(&event.data).as_bytes());
        }
        OutputStream::System => eprintln!("{}", event.data),
    }
}

/// Structured interpreter diagnostics become one line per entry; any other
/// text passes through.
fn render_stderr(data: &str) -> String {
    match try_format_error_json(data) {
        Some(formatted) => format!("{formatted}\n"),
        None => data.to_string(),
    }
}

fn forward_terminal_stdin(backend: Arc<dyn ExecutionBackend>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => backend.send_stdin(&normalize_stdin_line(&line)),
                Ok(None) => break,
                Err(err) => {
                    debug!(error = %err, "[cli] stdin closed");
                    break;
                }
            }
        }
    });
}

fn exit_code_for(snapshot: &SessionSnapshot) -> i32 {
    match snapshot.status {
        ExecutionStatus::Finished | ExecutionStatus::Running => snapshot.exit_code.unwrap_or(0),
        ExecutionStatus::Error => snapshot.exit_code.unwrap_or(1),
        ExecutionStatus::Killed => 137,
    }
}
