use std::sync::Arc;

use core_test_support::EventLog;
use core_test_support::Recorded;
use nospace_core::Config;
use nospace_core::CooperativeVmBackend;
use nospace_core::ExecutionBackend;
use nospace_core::OutputStream;
use nospace_core::Raised;
use nospace_core::Toolchain;
use nospace_protocol::CompileOptions;
use nospace_protocol::CompileTarget;
use nospace_protocol::ExecutionStatus;
use nospace_protocol::LanguageSubset;
use nospace_protocol::RunOptions;
use nospace_protocol::SessionId;
use nospace_vm::Machine;
use pretty_assertions::assert_eq;
use serde_json::json;

const HELLO: &str = "push 'H'\nputc\npush 'i'\nputc\npush 10\nputc\nend\n";
const SPIN: &str = "top:\n  jump top\n";

fn vm_config() -> Config {
    Config {
        step_budget: 1_000,
        ..Config::default()
    }
}

fn backend(config: Config) -> (CooperativeVmBackend, EventLog) {
    let backend = CooperativeVmBackend::new(Arc::new(config));
    let log = EventLog::attach(&backend);
    (backend, log)
}

async fn wait_until_running(log: &EventLog, session_id: SessionId) -> anyhow::Result<()> {
    log.wait_until(|events| {
        events.iter().any(|event| {
            matches!(event, Recorded::Status(snapshot)
                if snapshot.session_id == session_id
                    && snapshot.status == ExecutionStatus::Running)
        })
    })
    .await
}

#[tokio::test]
async fn hello_runs_to_completion() -> anyhow::Result<()> {
    let (backend, log) = backend(vm_config());

    let session = backend.run(HELLO, &RunOptions::default(), None).await;
    let terminal = log.wait_for_terminal(session.id()).await?;

    assert_eq!(terminal.status, ExecutionStatus::Finished);
    assert_eq!(terminal.exit_code, Some(0));
    assert_eq!(log.text(session.id(), OutputStream::Stdout), "Hi\n");
    assert_eq!(
        log.text(session.id(), OutputStream::System),
        "[VM execution started][execution completed (7 steps)]"
    );
    assert_eq!(log.terminal_statuses(session.id()).len(), 1);
    Ok(())
}

#[tokio::test]
async fn kill_stops_an_endless_loop() -> anyhow::Result<()> {
    let (backend, log) = backend(vm_config());

    let session = backend.run(SPIN, &RunOptions::default(), None).await;
    wait_until_running(&log, session.id()).await?;
    backend.kill();
    let terminal = log.wait_for_terminal(session.id()).await?;

    assert_eq!(terminal.status, ExecutionStatus::Killed);
    assert_eq!(terminal.exit_code, None);
    assert_eq!(log.text(session.id(), OutputStream::Stderr), "");
    Ok(())
}

#[tokio::test]
async fn kill_before_the_job_starts_reports_one_terminal_status() -> anyhow::Result<()> {
    let (backend, log) = backend(vm_config());

    let session = backend.run(SPIN, &RunOptions::default(), None).await;
    backend.kill();
    let terminal = log.wait_for_terminal(session.id()).await?;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    assert_eq!(terminal.status, ExecutionStatus::Killed);
    assert_eq!(log.terminal_statuses(session.id()).len(), 1);
    assert_eq!(log.statuses(session.id()).len(), 1);
    assert_eq!(log.count_output(session.id(), OutputStream::System), 0);
    Ok(())
}

#[tokio::test]
async fn back_to_back_runs_each_end_once() -> anyhow::Result<()> {
    let (backend, log) = backend(vm_config());

    let first = backend.run(SPIN, &RunOptions::default(), None).await;
    let second = backend.run("end\n", &RunOptions::default(), None).await;
    log.wait_for_terminal(first.id()).await?;
    log.wait_for_terminal(second.id()).await?;

    assert_eq!(log.statuses(first.id()).len(), 1);
    assert_eq!(
        log.terminal_statuses(first.id())[0].status,
        ExecutionStatus::Killed
    );
    assert_eq!(log.terminal_statuses(second.id()).len(), 1);
    Ok(())
}

#[tokio::test]
async fn step_ceiling_stops_the_run() -> anyhow::Result<()> {
    let (backend, log) = backend(Config {
        max_total_steps: 5_000,
        ..vm_config()
    });

    let session = backend.run(SPIN, &RunOptions::default(), None).await;
    let terminal = log.wait_for_terminal(session.id()).await?;

    assert_eq!(terminal.status, ExecutionStatus::Killed);
    assert_eq!(terminal.exit_code, None);
    assert_eq!(
        log.text(session.id(), OutputStream::Stderr),
        "Execution limit reached (5000 steps)\n"
    );
    Ok(())
}

#[tokio::test]
async fn new_run_supersedes_the_previous_one() -> anyhow::Result<()> {
    let (backend, log) = backend(vm_config());

    let first = backend.run(SPIN, &RunOptions::default(), None).await;
    wait_until_running(&log, first.id()).await?;
    let second = backend.run(HELLO, &RunOptions::default(), None).await;

    assert_eq!(
        log.wait_for_terminal(first.id()).await?.status,
        ExecutionStatus::Killed
    );
    assert_eq!(
        log.wait_for_terminal(second.id()).await?.status,
        ExecutionStatus::Finished
    );
    Ok(())
}

#[tokio::test]
async fn runtime_fault_is_an_error() -> anyhow::Result<()> {
    let (backend, log) = backend(vm_config());

    let session = backend.run("drop\n", &RunOptions::default(), None).await;
    let terminal = log.wait_for_terminal(session.id()).await?;

    assert_eq!(terminal.status, ExecutionStatus::Error);
    assert_eq!(terminal.exit_code, Some(1));
    let stderr = log.text(session.id(), OutputStream::Stderr);
    assert!(stderr.ends_with('\n'), "{stderr:?}");
    assert!(!stderr.trim().is_empty());
    Ok(())
}

#[tokio::test]
async fn program_reads_batch_stdin() -> anyhow::Result<()> {
    let (backend, log) = backend(vm_config());

    let session = backend
        .run(
            "push 0\ngetc\npush 0\nretrieve\nputc\nend\n",
            &RunOptions::default(),
            Some("Z"),
        )
        .await;
    log.wait_for_terminal(session.id()).await?;

    assert_eq!(log.text(session.id(), OutputStream::Stdout), "Z");
    Ok(())
}

#[tokio::test]
async fn debug_run_reports_a_trace() -> anyhow::Result<()> {
    let (backend, log) = backend(vm_config());
    let options = RunOptions {
        debug: true,
        ..RunOptions::default()
    };

    let session = backend.run(HELLO, &options, None).await;
    log.wait_for_terminal(session.id()).await?;

    let stderr = log.text(session.id(), OutputStream::Stderr);
    assert!(stderr.starts_with("[Trace] {"), "{stderr:?}");
    assert!(stderr.contains("\"putc\":3"), "{stderr:?}");
    Ok(())
}

#[tokio::test]
async fn compile_failure_lists_every_diagnostic() -> anyhow::Result<()> {
    let (backend, log) = backend(vm_config());

    let session = backend
        .compile("push\nfrobnicate 3\n", &CompileOptions::default())
        .await;

    assert_eq!(session.status(), ExecutionStatus::Error);
    assert_eq!(session.exit_code(), Some(1));
    let stderr = log.text(session.id(), OutputStream::Stderr);
    assert_eq!(
        stderr,
        "`push` needs an operand:1:1\nunknown instruction `frobnicate`:2:1\n"
    );
    assert!(!stderr.contains("[object Object]"));
    Ok(())
}

#[tokio::test]
async fn compile_success_prints_the_target_text() -> anyhow::Result<()> {
    let (backend, log) = backend(vm_config());
    let options = CompileOptions {
        language: LanguageSubset::Standard,
        target: CompileTarget::Mnemonic,
    };

    let session = backend.compile("push 1\nputn\nend\n", &options).await;

    assert_eq!(session.status(), ExecutionStatus::Finished);
    assert_eq!(session.exit_code(), Some(0));
    let stdout = log.text(session.id(), OutputStream::Stdout);
    assert!(stdout.contains("push 1"), "{stdout:?}");
    assert!(stdout.ends_with('\n'));
    Ok(())
}

/// Fails in every way a foreign toolchain might.
struct ExplodingToolchain;

impl Toolchain for ExplodingToolchain {
    fn load(&self, code: &str, _: LanguageSubset, _: &str) -> Result<Machine, Raised> {
        match code {
            "text" => Err(Raised::Text("plain failure".to_string())),
            "value" => Err(Raised::Other(json!({"code": 7}))),
            _ => std::panic::panic_any(json!({"panicked": true})),
        }
    }

    fn compile(&self, _: &str, _: &CompileOptions) -> Result<String, Raised> {
        panic!("emitter blew up");
    }
}

#[tokio::test]
async fn foreign_failures_render_readably() -> anyhow::Result<()> {
    let backend = CooperativeVmBackend::with_toolchain(
        Arc::new(vm_config()),
        Arc::new(ExplodingToolchain),
    );
    let log = EventLog::attach(&backend);

    let mut rendered = Vec::new();
    for code in ["text", "value", "panic"] {
        let session = backend.run(code, &RunOptions::default(), None).await;
        let terminal = log.wait_for_terminal(session.id()).await?;
        assert_eq!(terminal.status, ExecutionStatus::Error);
        assert_eq!(terminal.exit_code, Some(1));
        rendered.push(log.text(session.id(), OutputStream::Stderr));
    }
    let compiled = backend.compile("x", &CompileOptions::default()).await;
    rendered.push(log.text(compiled.id(), OutputStream::Stderr));

    assert_eq!(
        rendered,
        vec![
            "plain failure\n".to_string(),
            "{\"code\":7}\n".to_string(),
            "{\"panicked\":true}\n".to_string(),
            "emitter blew up\n".to_string(),
        ]
    );
    Ok(())
}
