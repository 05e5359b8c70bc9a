use std::any::Any;

use nospace_protocol::ErrorEntry;
use nospace_protocol::format_error_entries;
use nospace_vm::CompileError;
use nospace_vm::VmError;
use serde_json::Value;

/// Anything a toolchain or the VM can fail with, classified once where it
/// is caught so it renders to a readable message.
#[derive(Debug, Clone, PartialEq)]
pub enum Raised {
    /// An error value with its own message.
    Error(String),
    /// A bare string.
    Text(String),
    /// Positioned compiler diagnostics.
    Diagnostics(Vec<ErrorEntry>),
    /// Any other structured value; rendered as JSON.
    Other(Value),
}

impl Raised {
    pub fn message(&self) -> String {
        match self {
            Raised::Error(message) | Raised::Text(message) => message.clone(),
            Raised::Diagnostics(entries) => format_error_entries(entries),
            Raised::Other(value) => value.to_string(),
        }
    }

    /// Classifies a panic payload caught with `catch_unwind`.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<String>() {
            Ok(text) => return Raised::Text(*text),
            Err(payload) => payload,
        };
        let payload = match payload.downcast::<&'static str>() {
            Ok(text) => return Raised::Text((*text).to_string()),
            Err(payload) => payload,
        };
        let payload = match payload.downcast::<Value>() {
            Ok(value) => return Raised::Other(*value),
            Err(payload) => payload,
        };
        match payload.downcast::<Raised>() {
            Ok(raised) => *raised,
            Err(_) => Raised::Error("VM panicked with a non-text payload".to_string()),
        }
    }
}

impl std::fmt::Display for Raised {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message())
    }
}

impl From<CompileError> for Raised {
    fn from(err: CompileError) -> Self {
        Raised::Diagnostics(err.diagnostics)
    }
}

impl From<VmError> for Raised {
    fn from(err: VmError) -> Self {
        Raised::Error(err.to_string())
    }
}
