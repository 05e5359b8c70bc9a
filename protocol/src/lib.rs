//! Wire types shared by the nospace execution engine, its WebSocket server
//! and the command line front end.

mod diagnostics;
mod messages;
mod options;
mod session_id;
mod status;

pub use diagnostics::ErrorEntry;
pub use diagnostics::format_error_entries;
pub use diagnostics::try_format_error_json;
pub use messages::ClientMessage;
pub use messages::KillRequest;
pub use messages::OutputPayload;
pub use messages::RunRequest;
pub use messages::ServerMessage;
pub use messages::StatusPayload;
pub use messages::StdinRequest;
pub use options::CompileOptions;
pub use options::CompileTarget;
pub use options::InputMode;
pub use options::LanguageSubset;
pub use options::RunOptions;
pub use session_id::SessionId;
pub use status::ExecutionStatus;
