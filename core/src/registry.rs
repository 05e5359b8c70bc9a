use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use nospace_protocol::SessionId;

use crate::ExecutionSession;

/// Shared map of live sessions. It knows nothing about connections; the
/// one-session-per-connection rule lives in the controller.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<SessionId, ExecutionSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `session`, returning whatever was stored under its id.
    pub fn insert(&self, session: ExecutionSession) -> Option<ExecutionSession> {
        self.lock().insert(session.id(), session)
    }

    pub fn get(&self, session_id: &SessionId) -> Option<ExecutionSession> {
        self.lock().get(session_id).cloned()
    }

    pub fn remove(&self, session_id: &SessionId) -> Option<ExecutionSession> {
        self.lock().remove(session_id)
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.lock().contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, ExecutionSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
