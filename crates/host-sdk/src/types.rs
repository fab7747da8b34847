//! Core types for command handling: context, results, and errors.

use hl_protocol::CommandErrorPayload;
use tokio_util::sync::CancellationToken;

/// Context provided to every command handler invocation.
#[derive(Clone, Debug)]
pub struct CommandContext {
    /// Correlation ID, echoed back in the `command_result`.
    pub command_id: String,
    /// Command name as sent by the hub.
    pub name: String,
    /// Session this command arrived on.
    pub session_id: Option<String>,
    /// Cancelled when the hub sends `cancel`, the execute timeout elapses,
    /// or the host tears its connection down.
    pub cancel: CancellationToken,
}

impl CommandContext {
    /// A context with a fresh token and no session, for local use.
    pub fn local(command_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            command_id: command_id.into(),
            name: name.into(),
            session_id: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// Result type for command handlers.
pub type CommandResult = Result<serde_json::Value, CommandError>;

/// Errors a command handler can return.
///
/// The SDK translates these into the `{status: "error", error, code}` shape
/// inside `command_result`.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("invalid_params: {0}")]
    InvalidParams(String),
    #[error("command_failed: {0}")]
    Failed(String),
    #[error("unknown_command: {0}")]
    NotFound(String),
    #[error("cancelled: {0}")]
    Cancelled(String),
    #[error("timeout: {0}")]
    Timeout(String),
}

impl CommandError {
    /// Stable wire code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidParams(_) => "invalid_params",
            Self::Failed(_) => "command_failed",
            Self::NotFound(_) => "unknown_command",
            Self::Cancelled(_) => "cancelled",
            Self::Timeout(_) => "timeout",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::InvalidParams(m)
            | Self::Failed(m)
            | Self::NotFound(m)
            | Self::Cancelled(m)
            | Self::Timeout(m) => m,
        }
    }

    pub fn to_payload(&self) -> CommandErrorPayload {
        CommandErrorPayload::new(self.code(), self.message())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Top-level SDK error.
#[derive(thiserror::Error, Debug)]
pub enum HostSdkError {
    #[error("config: {0}")]
    Config(String),
    #[error("websocket: {0}")]
    WebSocket(String),
    #[error("handshake: {0}")]
    Handshake(String),
    #[error("shutdown")]
    Shutdown,
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_code_and_message() {
        let payload = CommandError::Failed("disk full".into()).to_payload();
        assert_eq!(payload.code, "command_failed");
        assert_eq!(payload.error, "disk full");
        assert_eq!(payload.to_value()["status"], "error");
    }

    #[test]
    fn not_found_code() {
        assert_eq!(CommandError::NotFound("x".into()).code(), "unknown_command");
    }
}
