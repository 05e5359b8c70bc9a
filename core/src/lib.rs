//! Execution engine for nospace programs.
//!
//! Two backends implement [`ExecutionBackend`]:
//! - [`ProcessExecutionBackend`] runs the native interpreter as a child
//!   process per run, with a wall-clock timeout and a SIGTERM/SIGKILL
//!   escalation on kill;
//! - [`CooperativeVmBackend`] drives the in-process VM in fixed step
//!   budgets and yields to the runtime between budgets.
//!
//! [`ConnectionController`] sits between one client connection and a
//! backend. It keeps at most one live session per connection, tracks
//! sessions in a shared [`SessionRegistry`] and turns backend events into
//! protocol frames.

mod backend;
pub mod config;
mod controller;
pub mod error;
mod process_exec;
mod registry;
mod session;
mod vm_exec;

use std::sync::Arc;

pub use backend::BackendKind;
pub use backend::EventSinks;
pub use backend::ExecutionBackend;
pub use backend::OutputEvent;
pub use backend::OutputHandler;
pub use backend::OutputStream;
pub use backend::StatusHandler;
pub use config::Config;
pub use config::ConfigOverrides;
pub use controller::ConnectionController;
pub use controller::normalize_stdin_line;
pub use process_exec::ProcessExecutionBackend;
pub use registry::SessionRegistry;
pub use session::ExecutionSession;
pub use session::SessionSnapshot;
pub use vm_exec::CooperativeVmBackend;
pub use vm_exec::NativeToolchain;
pub use vm_exec::Raised;
pub use vm_exec::Toolchain;

/// Builds the backend selected in `config`.
pub fn create_backend(config: Arc<Config>) -> Arc<dyn ExecutionBackend> {
    match config.backend {
        BackendKind::Process => Arc::new(ProcessExecutionBackend::new(config)),
        BackendKind::Vm => Arc::new(CooperativeVmBackend::new(config)),
    }
}
