use std::borrow::Cow;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use nospace_protocol::ClientMessage;
use nospace_protocol::ExecutionStatus;
use nospace_protocol::KillRequest;
use nospace_protocol::OutputPayload;
use nospace_protocol::RunRequest;
use nospace_protocol::ServerMessage;
use nospace_protocol::SessionId;
use nospace_protocol::StatusPayload;
use nospace_protocol::StdinRequest;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;
use tracing::trace;

use crate::ExecutionBackend;
use crate::OutputEvent;
use crate::OutputStream;
use crate::SessionRegistry;
use crate::SessionSnapshot;

/// Appends a newline unless `data` already ends with one.
pub fn normalize_stdin_line(data: &str) -> Cow<'_, str> {
    if data.ends_with('\n') {
        Cow::Borrowed(data)
    } else {
        Cow::Owned(format!("{data}\n"))
    }
}

/// Terminal sessions remembered per connection. Older ones are forgotten.
const TERMINAL_HISTORY: usize = 64;

#[derive(Default)]
struct Ledger {
    last_status: HashMap<SessionId, ExecutionStatus>,
    terminal_order: VecDeque<SessionId>,
}

impl Ledger {
    fn is_terminal(&self, session_id: &SessionId) -> bool {
        self.last_status
            .get(session_id)
            .is_some_and(|status| status.is_terminal())
    }

    fn record(&mut self, session_id: SessionId, status: ExecutionStatus) {
        self.last_status.insert(session_id, status);
        if !status.is_terminal() {
            return;
        }
        self.terminal_order.push_back(session_id);
        while self.terminal_order.len() > TERMINAL_HISTORY {
            if let Some(expired) = self.terminal_order.pop_front() {
                self.last_status.remove(&expired);
            }
        }
    }
}

/// Forwards events to the peer and remembers the last status sent per
/// session. Anything arriving for a session after its terminal status is
/// dropped, as are repeated statuses.
struct Relay {
    outbound: mpsc::UnboundedSender<ServerMessage>,
    ledger: Mutex<Ledger>,
}

impl Relay {
    fn new(outbound: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self {
            outbound,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn output(&self, event: OutputEvent) {
        let payload = OutputPayload {
            session_id: event.session_id,
            data: event.data,
        };
        let message = match event.stream {
            OutputStream::Stdout => ServerMessage::Stdout(payload),
            OutputStream::Stderr => ServerMessage::Stderr(payload),
            OutputStream::System => return,
        };
        // Send under the lock so a concurrent terminal status cannot slip
        // in between the check and the send.
        let ledger = self.lock();
        if ledger.is_terminal(&message.session_id()) {
            trace!(session_id = %message.session_id(), "[controller] dropping output after terminal status");
            return;
        }
        self.send(message);
    }

    /// Returns `true` if the status was forwarded.
    fn status(&self, snapshot: SessionSnapshot) -> bool {
        let mut ledger = self.lock();
        if let Some(previous) = ledger.last_status.get(&snapshot.session_id)
            && (previous.is_terminal() || *previous == snapshot.status)
        {
            return false;
        }
        ledger.record(snapshot.session_id, snapshot.status);
        self.send(ServerMessage::ExecutionStatus(StatusPayload {
            session_id: snapshot.session_id,
            status: snapshot.status,
            exit_code: snapshot.exit_code,
        }));
        true
    }

    fn send(&self, message: ServerMessage) {
        if self.outbound.send(message).is_err() {
            trace!("[controller] peer gone, event discarded");
        }
    }
}

/// Binds one client connection to a backend.
///
/// At most one session is bound at a time: a new run kills and unregisters
/// the previous one first. Sessions are visible in the shared
/// [`SessionRegistry`] until their terminal status, an explicit kill, or the
/// connection going away.
pub struct ConnectionController {
    backend: Arc<dyn ExecutionBackend>,
    registry: SessionRegistry,
    binding: Arc<Mutex<Option<SessionId>>>,
    relay: Arc<Relay>,
}

impl ConnectionController {
    /// Takes over `backend`'s event handlers; frames for the peer are sent
    /// on `outbound`.
    pub fn new(
        backend: Arc<dyn ExecutionBackend>,
        registry: SessionRegistry,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> Self {
        let relay = Arc::new(Relay::new(outbound));
        let binding = Arc::new(Mutex::new(None));

        let output_relay = Arc::clone(&relay);
        backend.on_output(Arc::new(move |event| output_relay.output(event)));

        let status_relay = Arc::clone(&relay);
        let status_registry = registry.clone();
        let status_binding = Arc::clone(&binding);
        backend.on_status_change(Arc::new(move |snapshot: SessionSnapshot| {
            status_relay.status(snapshot);
            if snapshot.status.is_terminal() {
                status_registry.remove(&snapshot.session_id);
                unbind(&status_binding, snapshot.session_id);
            }
        }));

        Self {
            backend,
            registry,
            binding,
            relay,
        }
    }

    pub async fn handle_message(&self, message: ClientMessage) {
        match message {
            ClientMessage::Run(request) => {
                self.handle_run(request).await;
            }
            ClientMessage::Stdin(request) => self.handle_stdin(request),
            ClientMessage::Kill(request) => self.handle_kill(request),
        }
    }

    /// Starts a run and returns its session id.
    pub async fn handle_run(&self, request: RunRequest) -> SessionId {
        self.release_bound();

        let session = self
            .backend
            .run(
                &request.code,
                &request.options,
                request.stdin_data.as_deref(),
            )
            .await;
        let session_id = session.id();
        info!(%session_id, backend = %self.backend.kind(), "📥 [controller] run accepted");

        self.registry.insert(session.clone());
        *self.lock_binding() = Some(session_id);
        self.relay.status(session.snapshot());

        // The terminal event may have fired before the session was
        // registered; undo the registration in that case.
        if session.status().is_terminal() {
            self.registry.remove(&session_id);
            unbind(&self.binding, session_id);
        }
        session_id
    }

    pub fn handle_stdin(&self, request: StdinRequest) {
        let Some(session) = self.registry.get(&request.session_id) else {
            debug!(session_id = %request.session_id, "[controller] stdin for unknown session ignored");
            return;
        };
        if !session.is_running() {
            return;
        }
        session.send_stdin(normalize_stdin_line(&request.data).as_bytes());
    }

    /// Kills the session and acknowledges with `killed` right away, without
    /// waiting for the program to exit.
    pub fn handle_kill(&self, request: KillRequest) {
        let session_id = request.session_id;
        let Some(session) = self.registry.get(&session_id) else {
            debug!(%session_id, "[controller] kill for unknown session ignored");
            return;
        };
        let snapshot = if session.kill() {
            info!(%session_id, "🛑 [controller] session killed by peer");
            SessionSnapshot {
                session_id,
                status: ExecutionStatus::Killed,
                exit_code: None,
            }
        } else {
            session.snapshot()
        };
        self.relay.status(snapshot);
        self.registry.remove(&session_id);
        unbind(&self.binding, session_id);
    }

    /// Kills and forgets the bound session. Call once when the connection
    /// closes.
    pub fn handle_disconnect(&self) {
        if let Some(session_id) = self.release_bound() {
            info!(%session_id, "🔌 [controller] connection closed, session released");
        }
        self.backend.dispose();
    }

    pub fn bound_session(&self) -> Option<SessionId> {
        *self.lock_binding()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    fn release_bound(&self) -> Option<SessionId> {
        let session_id = self.lock_binding().take()?;
        if let Some(session) = self.registry.get(&session_id) {
            session.kill();
            self.registry.remove(&session_id);
        }
        Some(session_id)
    }

    fn lock_binding(&self) -> MutexGuard<'_, Option<SessionId>> {
        self.binding.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn unbind(binding: &Mutex<Option<SessionId>>, session_id: SessionId) {
    let mut bound = binding.lock().unwrap_or_else(PoisonError::into_inner);
    if *bound == Some(session_id) {
        *bound = None;
    }
}
