use std::sync::Arc;
use std::time::Duration;

use core_test_support::Sandbox;
use core_test_support::collect_until_terminal;
use core_test_support::drain_for;
use core_test_support::skip_if_no_posix_shell;
use nospace_core::Config;
use nospace_core::ConnectionController;
use nospace_core::CooperativeVmBackend;
use nospace_core::ProcessExecutionBackend;
use nospace_core::SessionRegistry;
use nospace_protocol::ClientMessage;
use nospace_protocol::ExecutionStatus;
use nospace_protocol::KillRequest;
use nospace_protocol::OutputPayload;
use nospace_protocol::RunOptions;
use nospace_protocol::RunRequest;
use nospace_protocol::ServerMessage;
use nospace_protocol::SessionId;
use nospace_protocol::StatusPayload;
use nospace_protocol::StdinRequest;
use pretty_assertions::assert_eq;
use serial_test::serial;
use tokio::sync::mpsc;

const SPIN: &str = "top:\n  jump top\n";

fn run(code: &str) -> RunRequest {
    RunRequest {
        code: code.to_string(),
        options: RunOptions::default(),
        stdin_data: None,
    }
}

fn vm_controller() -> (
    ConnectionController,
    mpsc::UnboundedReceiver<ServerMessage>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let backend = Arc::new(CooperativeVmBackend::new(Arc::new(Config::default())));
    (
        ConnectionController::new(backend, SessionRegistry::new(), tx),
        rx,
    )
}

fn status(session_id: SessionId, status: ExecutionStatus, exit_code: Option<i32>) -> ServerMessage {
    ServerMessage::ExecutionStatus(StatusPayload {
        session_id,
        status,
        exit_code,
    })
}

#[tokio::test]
async fn finished_run_is_reported_and_unregistered() -> anyhow::Result<()> {
    let (controller, mut rx) = vm_controller();

    let id = controller
        .handle_run(run("push 'o'\nputc\npush 'k'\nputc\nend\n"))
        .await;
    let frames = collect_until_terminal(&mut rx, id).await?;

    assert_eq!(
        frames,
        vec![
            status(id, ExecutionStatus::Running, None),
            ServerMessage::Stdout(OutputPayload {
                session_id: id,
                data: "ok".to_string(),
            }),
            status(id, ExecutionStatus::Finished, Some(0)),
        ]
    );
    assert!(!controller.registry().contains(&id));
    assert_eq!(controller.bound_session(), None);
    Ok(())
}

#[tokio::test]
async fn kill_is_acknowledged_at_once_and_nothing_follows() -> anyhow::Result<()> {
    let (controller, mut rx) = vm_controller();

    let id = controller.handle_run(run(SPIN)).await;
    assert!(controller.registry().contains(&id));
    controller
        .handle_message(ClientMessage::Kill(KillRequest { session_id: id }))
        .await;

    let frames = collect_until_terminal(&mut rx, id).await?;
    assert_eq!(frames.last(), Some(&status(id, ExecutionStatus::Killed, None)));
    assert!(!controller.registry().contains(&id));
    assert_eq!(controller.bound_session(), None);

    let late = drain_for(&mut rx, Duration::from_millis(200)).await;
    assert_eq!(late, Vec::new());
    Ok(())
}

#[tokio::test]
async fn new_run_replaces_the_bound_session() -> anyhow::Result<()> {
    let (controller, mut rx) = vm_controller();

    let first = controller.handle_run(run(SPIN)).await;
    let second = controller.handle_run(run("end\n")).await;

    assert_ne!(first, second);
    assert!(!controller.registry().contains(&first));

    let mut terminal = Vec::new();
    while terminal.len() < 2 {
        let frames = drain_for(&mut rx, Duration::from_millis(200)).await;
        anyhow::ensure!(!frames.is_empty(), "missing terminal frames: {terminal:?}");
        terminal.extend(frames.into_iter().filter(|frame| {
            matches!(frame, ServerMessage::ExecutionStatus(payload) if payload.status.is_terminal())
        }));
    }
    assert!(terminal.contains(&status(first, ExecutionStatus::Killed, None)));
    assert!(terminal.contains(&status(second, ExecutionStatus::Finished, Some(0))));
    Ok(())
}

#[tokio::test]
async fn unknown_sessions_are_ignored() -> anyhow::Result<()> {
    let (controller, mut rx) = vm_controller();
    let stranger = SessionId::new();

    controller
        .handle_message(ClientMessage::Stdin(StdinRequest {
            session_id: stranger,
            data: "x".to_string(),
        }))
        .await;
    controller
        .handle_message(ClientMessage::Kill(KillRequest {
            session_id: stranger,
        }))
        .await;

    assert_eq!(drain_for(&mut rx, Duration::from_millis(100)).await, Vec::new());
    Ok(())
}

#[tokio::test]
async fn disconnect_kills_and_forgets_the_bound_session() -> anyhow::Result<()> {
    let (controller, _rx) = vm_controller();

    let id = controller.handle_run(run(SPIN)).await;
    let session = controller
        .registry()
        .get(&id)
        .ok_or_else(|| anyhow::anyhow!("session not registered"))?;
    controller.handle_disconnect();

    assert_eq!(session.status(), ExecutionStatus::Killed);
    assert!(controller.registry().is_empty());
    assert_eq!(controller.bound_session(), None);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn stdin_lines_get_a_trailing_newline() -> anyhow::Result<()> {
    skip_if_no_posix_shell!();
    let sandbox = Sandbox::new()?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let backend = Arc::new(ProcessExecutionBackend::new(Arc::new(sandbox.config())));
    let controller = ConnectionController::new(backend, SessionRegistry::new(), tx);

    let id = controller
        .handle_run(run("read line\nprintf '[%s]' \"$line\"\n"))
        .await;
    controller
        .handle_message(ClientMessage::Stdin(StdinRequest {
            session_id: id,
            data: "abc".to_string(),
        }))
        .await;
    let frames = collect_until_terminal(&mut rx, id).await?;

    let stdout: String = frames
        .iter()
        .filter_map(|frame| match frame {
            ServerMessage::Stdout(payload) => Some(payload.data.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(stdout, "[abc]");
    assert_eq!(
        frames.last(),
        Some(&status(id, ExecutionStatus::Finished, Some(0)))
    );
    Ok(())
}
