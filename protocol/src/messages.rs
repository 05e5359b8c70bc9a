use serde::Deserialize;
use serde::Serialize;

use crate::ExecutionStatus;
use crate::RunOptions;
use crate::SessionId;

/// Frames sent by the peer. Each frame is a JSON object tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Run(RunRequest),
    Stdin(StdinRequest),
    Kill(KillRequest),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub code: String,
    #[serde(default)]
    pub options: RunOptions,
    /// Input supplied up front, written to the program right after it starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StdinRequest {
    pub session_id: SessionId,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillRequest {
    pub session_id: SessionId,
}

/// Frames sent to the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Stdout(OutputPayload),
    Stderr(OutputPayload),
    ExecutionStatus(StatusPayload),
}

impl ServerMessage {
    pub fn session_id(&self) -> SessionId {
        match self {
            ServerMessage::Stdout(payload) | ServerMessage::Stderr(payload) => payload.session_id,
            ServerMessage::ExecutionStatus(payload) => payload.session_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputPayload {
    pub session_id: SessionId,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub session_id: SessionId,
    pub status: ExecutionStatus,
    /// Always present on the wire; `null` unless the program terminated on
    /// its own.
    pub exit_code: Option<i32>,
}
