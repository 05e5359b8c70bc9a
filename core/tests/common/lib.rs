use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use nospace_core::Config;
use nospace_core::ExecutionBackend;
use nospace_core::OutputEvent;
use nospace_core::OutputStream;
use nospace_core::SessionSnapshot;
use nospace_protocol::ServerMessage;
use nospace_protocol::SessionId;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Skips the current test on platforms without a POSIX shell.
#[macro_export]
macro_rules! skip_if_no_posix_shell {
    () => {{
        if !cfg!(unix) {
            eprintln!("skipping: requires /bin/sh");
            return Ok(());
        }
    }};
}

/// Scratch space plus a stand-in interpreter. The stand-in ignores the
/// interpreter flags and runs the source file with `/bin/sh`, so test
/// programs are written as shell scripts.
pub struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    pub fn new() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        write_fake_interpreter(&dir.path().join("nospace20"))?;
        Ok(Self { dir })
    }

    pub fn interpreter(&self) -> PathBuf {
        self.dir.path().join("nospace20")
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.dir.path().join("scratch")
    }

    pub fn config(&self) -> Config {
        Config {
            interpreter_path: self.interpreter(),
            scratch_dir: self.scratch_dir(),
            kill_grace: Duration::from_millis(200),
            ..Config::default()
        }
    }

    /// Source files still present in the scratch directory.
    pub fn leftover_sources(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(self.scratch_dir()) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

#[cfg(unix)]
fn write_fake_interpreter(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::write(path, "#!/bin/sh\nfor last; do :; done\nexec /bin/sh \"$last\"\n")?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn write_fake_interpreter(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Output(OutputEvent),
    Status(SessionSnapshot),
}

/// Records everything a backend emits, in emission order.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<Recorded>>>,
}

impl EventLog {
    pub fn attach(backend: &dyn ExecutionBackend) -> Self {
        let log = Self::default();
        let output_log = log.clone();
        backend.on_output(Arc::new(move |event| output_log.push(Recorded::Output(event))));
        let status_log = log.clone();
        backend.on_status_change(Arc::new(move |snapshot| {
            status_log.push(Recorded::Status(snapshot))
        }));
        log
    }

    fn push(&self, event: Recorded) {
        self.events.lock().expect("event log poisoned").push(event);
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().expect("event log poisoned").clone()
    }

    pub fn statuses(&self, session_id: SessionId) -> Vec<SessionSnapshot> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Recorded::Status(snapshot) if snapshot.session_id == session_id => Some(snapshot),
                _ => None,
            })
            .collect()
    }

    pub fn terminal_statuses(&self, session_id: SessionId) -> Vec<SessionSnapshot> {
        self.statuses(session_id)
            .into_iter()
            .filter(|snapshot| snapshot.status.is_terminal())
            .collect()
    }

    /// Concatenated data of one stream for one session.
    pub fn text(&self, session_id: SessionId, stream: OutputStream) -> String {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Recorded::Output(output)
                    if output.session_id == session_id && output.stream == stream =>
                {
                    Some(output.data)
                }
                _ => None,
            })
            .collect()
    }

    pub fn count_output(&self, session_id: SessionId, stream: OutputStream) -> usize {
        self.events()
            .iter()
            .filter(|event| {
                matches!(event, Recorded::Output(output)
                    if output.session_id == session_id && output.stream == stream)
            })
            .count()
    }

    /// Waits until `session_id` has reported its terminal status.
    pub async fn wait_for_terminal(&self, session_id: SessionId) -> anyhow::Result<SessionSnapshot> {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        loop {
            if let Some(snapshot) = self.terminal_statuses(session_id).into_iter().next() {
                return Ok(snapshot);
            }
            if Instant::now() >= deadline {
                anyhow::bail!("session {session_id} did not terminate; events: {:?}", self.events());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Waits until `predicate` holds for the recorded events.
    pub async fn wait_until(&self, predicate: impl Fn(&[Recorded]) -> bool) -> anyhow::Result<()> {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        loop {
            if predicate(&self.events()) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                anyhow::bail!("condition not reached; events: {:?}", self.events());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Receives frames until a terminal status for `session_id` arrives.
pub async fn collect_until_terminal(
    rx: &mut mpsc::UnboundedReceiver<ServerMessage>,
    session_id: SessionId,
) -> anyhow::Result<Vec<ServerMessage>> {
    let mut frames = Vec::new();
    loop {
        let frame = tokio::time::timeout(WAIT_TIMEOUT, rx.recv())
            .await
            .map_err(|_| anyhow::anyhow!("no terminal frame for {session_id}; got {frames:?}"))?
            .ok_or_else(|| anyhow::anyhow!("outbound channel closed"))?;
        let done = matches!(&frame, ServerMessage::ExecutionStatus(payload)
            if payload.session_id == session_id && payload.status.is_terminal());
        frames.push(frame);
        if done {
            return Ok(frames);
        }
    }
}

/// Frames received within `window`, without blocking past it.
pub async fn drain_for(
    rx: &mut mpsc::UnboundedReceiver<ServerMessage>,
    window: Duration,
) -> Vec<ServerMessage> {
    let mut frames = Vec::new();
    let deadline = Instant::now() + window;
    while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, rx.recv()).await {
        frames.push(frame);
    }
    frames
}
