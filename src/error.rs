//! Error taxonomy for the call bridge
//!
//! Frame-level and tool-level failures are recovered locally; call-level
//! failures transition the call to `failed` and close both sockets.

use thiserror::Error;

/// Errors surfaced by the bridge and its collaborators.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Malformed event from the carrier or the model. Frames carrying
    /// these are dropped and counted; only repeated failures terminate
    /// a bridge.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Socket closed unexpectedly or timed out. Terminates the
    /// affected bridge and fails the call.
    #[error("transport error: {0}")]
    Transport(String),

    /// Model-provided tool arguments were not valid JSON.
    #[error("invalid tool arguments: {0}")]
    ToolArguments(String),

    /// A tool handler failed. Returned to the model as an error
    /// output; the session continues.
    #[error("tool execution failed: {0}")]
    ToolExecution(String),

    /// Unknown call SID, escalation id, or similar lookup miss.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invariant violated at bridge start (missing prompt, duplicate
    /// tool name, ...). Fails fast; the bridge never partially starts.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Storage layer failure.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Protocol(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BridgeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        BridgeError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
