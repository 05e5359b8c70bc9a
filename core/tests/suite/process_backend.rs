use std::sync::Arc;
use std::time::Duration;

use core_test_support::EventLog;
use core_test_support::Recorded;
use core_test_support::Sandbox;
use core_test_support::skip_if_no_posix_shell;
use nospace_core::Config;
use nospace_core::ExecutionBackend;
use nospace_core::OutputStream;
use nospace_core::ProcessExecutionBackend;
use nospace_protocol::CompileOptions;
use nospace_protocol::ExecutionStatus;
use nospace_protocol::InputMode;
use nospace_protocol::RunOptions;
use pretty_assertions::assert_eq;
use serial_test::serial;

fn backend(config: Config) -> (ProcessExecutionBackend, EventLog) {
    let backend = ProcessExecutionBackend::new(Arc::new(config));
    let log = EventLog::attach(&backend);
    (backend, log)
}

fn batch() -> RunOptions {
    RunOptions {
        input_mode: InputMode::Batch,
        ..RunOptions::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn clean_exit_finishes_and_removes_source() -> anyhow::Result<()> {
    skip_if_no_posix_shell!();
    let sandbox = Sandbox::new()?;
    let (backend, log) = backend(sandbox.config());

    let session = backend.run("echo hello\n", &batch(), None).await;
    let terminal = log.wait_for_terminal(session.id()).await?;

    assert_eq!(terminal.status, ExecutionStatus::Finished);
    assert_eq!(terminal.exit_code, Some(0));
    assert_eq!(log.text(session.id(), OutputStream::Stdout), "hello\n");
    assert_eq!(session.status(), ExecutionStatus::Finished);
    assert!(sandbox.leftover_sources().is_empty());

    let statuses = log.statuses(session.id());
    assert_eq!(statuses.first().map(|s| s.status), Some(ExecutionStatus::Running));
    assert_eq!(log.terminal_statuses(session.id()).len(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn nonzero_exit_is_an_error_with_its_code() -> anyhow::Result<()> {
    skip_if_no_posix_shell!();
    let sandbox = Sandbox::new()?;
    let (backend, log) = backend(sandbox.config());

    let session = backend
        .run("echo oops >&2\nexit 3\n", &batch(), None)
        .await;
    let terminal = log.wait_for_terminal(session.id()).await?;

    assert_eq!(terminal.status, ExecutionStatus::Error);
    assert_eq!(terminal.exit_code, Some(3));
    assert_eq!(log.text(session.id(), OutputStream::Stderr), "oops\n");
    Ok(())
}

#[tokio::test]
#[serial]
async fn missing_interpreter_reports_once_and_leaves_no_file() -> anyhow::Result<()> {
    let sandbox = Sandbox::new()?;
    let missing = sandbox.scratch_dir().join("no-such-binary");
    let (backend, log) = backend(Config {
        interpreter_path: missing.clone(),
        ..sandbox.config()
    });

    let session = backend.run("echo hi\n", &batch(), None).await;

    assert_eq!(session.status(), ExecutionStatus::Error);
    assert_eq!(session.exit_code(), Some(1));
    assert_eq!(
        log.text(session.id(), OutputStream::Stderr),
        format!("nospace20 binary not found at: {}\n", missing.display())
    );
    assert_eq!(log.count_output(session.id(), OutputStream::Stderr), 1);
    assert_eq!(log.terminal_statuses(session.id()).len(), 1);
    assert!(sandbox.leftover_sources().is_empty());
    Ok(())
}

#[tokio::test]
#[serial]
async fn unwritable_scratch_dir_fails_the_run_without_raising() -> anyhow::Result<()> {
    let sandbox = Sandbox::new()?;
    let blocked = sandbox.scratch_dir();
    std::fs::write(&blocked, "not a directory")?;
    let (backend, log) = backend(sandbox.config());

    let session = backend.run("echo hi\n", &batch(), None).await;

    assert_eq!(session.status(), ExecutionStatus::Error);
    assert_eq!(session.exit_code(), Some(1));
    let stderr = log.text(session.id(), OutputStream::Stderr);
    assert!(
        stderr.starts_with(&format!(
            "failed to create scratch directory {}:",
            blocked.display()
        )),
        "{stderr:?}"
    );
    assert!(stderr.ends_with('\n'));
    assert_eq!(log.count_output(session.id(), OutputStream::Stderr), 1);
    assert_eq!(log.terminal_statuses(session.id()).len(), 1);
    assert_eq!(log.statuses(session.id()).len(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn timeout_prints_notice_and_kills() -> anyhow::Result<()> {
    skip_if_no_posix_shell!();
    let sandbox = Sandbox::new()?;
    let (backend, log) = backend(Config {
        timeout: Duration::from_millis(500),
        ..sandbox.config()
    });

    let session = backend.run("exec sleep 30\n", &batch(), None).await;
    let terminal = log.wait_for_terminal(session.id()).await?;

    assert_eq!(terminal.status, ExecutionStatus::Killed);
    assert_eq!(terminal.exit_code, None);
    assert_eq!(
        log.text(session.id(), OutputStream::Stderr),
        "\nProcess timeout (0.5s). Killing...\n"
    );
    assert!(sandbox.leftover_sources().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn interactive_stdin_reaches_the_program() -> anyhow::Result<()> {
    skip_if_no_posix_shell!();
    let sandbox = Sandbox::new()?;
    let (backend, log) = backend(sandbox.config());

    let session = backend
        .run(
            "read line\necho \"got:$line\"\n",
            &RunOptions::default(),
            None,
        )
        .await;
    backend.send_stdin("abc\n");
    log.wait_for_terminal(session.id()).await?;

    assert_eq!(log.text(session.id(), OutputStream::Stdout), "got:abc\n");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn batch_stdin_is_delivered_then_closed() -> anyhow::Result<()> {
    skip_if_no_posix_shell!();
    let sandbox = Sandbox::new()?;
    let (backend, log) = backend(sandbox.config());

    let session = backend.run("cat\n", &batch(), Some("1\n2\n")).await;
    let terminal = log.wait_for_terminal(session.id()).await?;

    assert_eq!(terminal.status, ExecutionStatus::Finished);
    assert_eq!(log.text(session.id(), OutputStream::Stdout), "1\n2\n");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn kill_is_idempotent_and_reported_once() -> anyhow::Result<()> {
    skip_if_no_posix_shell!();
    let sandbox = Sandbox::new()?;
    let (backend, log) = backend(sandbox.config());

    let session = backend
        .run("echo ready\nexec sleep 30\n", &RunOptions::default(), None)
        .await;
    let id = session.id();
    log.wait_until(|events| {
        events.iter().any(|event| {
            matches!(event, Recorded::Output(output)
                if output.session_id == id && output.data.contains("ready"))
        })
    })
    .await?;

    backend.kill();
    backend.kill();
    assert!(!session.kill());
    let terminal = log.wait_for_terminal(id).await?;

    assert_eq!(terminal.status, ExecutionStatus::Killed);
    assert_eq!(terminal.exit_code, None);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(log.terminal_statuses(id).len(), 1);
    assert!(sandbox.leftover_sources().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn term_resistant_program_is_force_killed() -> anyhow::Result<()> {
    skip_if_no_posix_shell!();
    let sandbox = Sandbox::new()?;
    let (backend, log) = backend(sandbox.config());

    let session = backend
        .run(
            "trap '' TERM\necho armed\nwhile :; do sleep 1; done\n",
            &RunOptions::default(),
            None,
        )
        .await;
    let id = session.id();
    log.wait_until(|events| {
        events.iter().any(|event| {
            matches!(event, Recorded::Output(output)
                if output.session_id == id && output.data.contains("armed"))
        })
    })
    .await?;

    assert!(session.kill());
    let terminal = log.wait_for_terminal(id).await?;
    assert_eq!(terminal.status, ExecutionStatus::Killed);
    Ok(())
}

#[tokio::test]
async fn compile_is_unsupported() -> anyhow::Result<()> {
    let sandbox = Sandbox::new()?;
    let (backend, log) = backend(sandbox.config());

    let session = backend.compile("push 1", &CompileOptions::default()).await;

    assert_eq!(session.status(), ExecutionStatus::Error);
    assert_eq!(session.exit_code(), Some(1));
    assert_eq!(
        log.text(session.id(), OutputStream::Stderr),
        "compile is not supported by the process backend\n"
    );
    Ok(())
}
