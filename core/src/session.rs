use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use nospace_protocol::ExecutionStatus;
use nospace_protocol::SessionId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Point-in-time view of a session, also the payload of status events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub status: ExecutionStatus,
    pub exit_code: Option<i32>,
}

#[derive(Debug)]
struct SessionState {
    status: ExecutionStatus,
    exit_code: Option<i32>,
}

#[derive(Debug)]
struct SessionInner {
    id: SessionId,
    state: Mutex<SessionState>,
    /// Cancelled exactly once, by the first successful `kill`.
    cancel: CancellationToken,
    /// Present only for process sessions while their stdin is open.
    stdin: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
}

/// Handle to one execution. Cheap to clone; all clones observe the same
/// state.
///
/// The status only ever moves from `running` to a terminal state. `kill`
/// records `killed` before anything is signalled, and [`Self::settle`] never
/// overwrites a terminal state, so a kill racing a natural exit always
/// reports `killed`.
#[derive(Debug, Clone)]
pub struct ExecutionSession {
    inner: Arc<SessionInner>,
}

impl ExecutionSession {
    pub(crate) fn new(id: SessionId, stdin: Option<mpsc::UnboundedSender<Vec<u8>>>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id,
                state: Mutex::new(SessionState {
                    status: ExecutionStatus::Running,
                    exit_code: None,
                }),
                cancel: CancellationToken::new(),
                stdin: Mutex::new(stdin),
            }),
        }
    }

    /// A session that never ran, e.g. when setup failed.
    pub(crate) fn terminated(
        id: SessionId,
        status: ExecutionStatus,
        exit_code: Option<i32>,
    ) -> Self {
        let session = Self::new(id, None);
        session.settle(status, exit_code);
        session
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn status(&self) -> ExecutionStatus {
        self.lock_state().status
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.lock_state().exit_code
    }

    pub fn is_running(&self) -> bool {
        self.status() == ExecutionStatus::Running
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.lock_state();
        SessionSnapshot {
            session_id: self.inner.id,
            status: state.status,
            exit_code: state.exit_code,
        }
    }

    /// Requests termination. Returns `true` if this call moved the session
    /// to `killed`; a terminal session is left untouched.
    pub fn kill(&self) -> bool {
        {
            let mut state = self.lock_state();
            if state.status.is_terminal() {
                return false;
            }
            state.status = ExecutionStatus::Killed;
            state.exit_code = None;
        }
        self.close_stdin();
        self.inner.cancel.cancel();
        true
    }

    /// Queues raw bytes for the program's stdin. Returns `false` (and drops
    /// the data) when the session is not running or has no open stdin.
    pub fn send_stdin(&self, data: &[u8]) -> bool {
        if !self.is_running() {
            return false;
        }
        let stdin = self
            .inner
            .stdin
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match stdin.as_ref() {
            Some(tx) => tx.send(data.to_vec()).is_ok(),
            None => false,
        }
    }

    /// Closes stdin so the program observes end of input.
    pub(crate) fn close_stdin(&self) {
        self.inner
            .stdin
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Records a terminal outcome unless one is already recorded, and
    /// returns the state that actually holds.
    pub(crate) fn settle(&self, status: ExecutionStatus, exit_code: Option<i32>) -> SessionSnapshot {
        let mut state = self.lock_state();
        if !state.status.is_terminal() {
            state.status = status;
            state.exit_code = match status {
                ExecutionStatus::Killed => None,
                _ => exit_code,
            };
        }
        SessionSnapshot {
            session_id: self.inner.id,
            status: state.status,
            exit_code: state.exit_code,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
