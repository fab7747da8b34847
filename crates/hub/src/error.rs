//! Error taxonomy for command dispatch.
//!
//! [`DispatchError`] is what the Session Hub produces internally; it keeps
//! every transport-level distinction.  [`BridgeError`] is what callers of
//! the façade see: six stable categories, each carrying the method and
//! whatever context is needed to act on it.

use serde::Serialize;
use serde_json::Value;

use crate::sessions::SessionSummary;

/// A registration payload the hub refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    #[error("registration is missing required field `{0}`")]
    MissingField(&'static str),
}

/// Failure of a single `send_command`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error("no connected host session{}", target.as_ref().map(|t| format!(" `{t}`")).unwrap_or_default())]
    NotConnected {
        method: String,
        target: Option<String>,
    },

    #[error("{} host sessions are connected; specify a target", candidates.len())]
    MultipleInstances {
        method: String,
        candidates: Vec<SessionSummary>,
    },

    #[error("command `{method}` timed out after {elapsed_ms}ms (limit {timeout_ms}ms)")]
    Timeout {
        method: String,
        session_id: String,
        timeout_ms: u64,
        elapsed_ms: u64,
    },

    #[error("session {session_id} is rate limited: {reason}")]
    RateLimited {
        method: String,
        session_id: String,
        reason: String,
    },

    #[error("{error}")]
    CommandFailed {
        method: String,
        session_id: String,
        error: String,
        code: String,
    },

    #[error("connection to session {session_id} failed: {reason}")]
    ConnectionError {
        method: String,
        session_id: String,
        reason: String,
    },

    #[error("failed to write to session {session_id}: {reason}")]
    WriteError {
        method: String,
        session_id: String,
        reason: String,
    },

    #[error("session {session_id} was superseded by a newer registration")]
    Superseded { method: String, session_id: String },

    #[error("command cancelled: {reason}")]
    Cancelled {
        method: String,
        session_id: String,
        reason: String,
    },
}

impl DispatchError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotConnected { .. } => "NOT_CONNECTED",
            Self::MultipleInstances { .. } => "MULTIPLE_INSTANCES",
            Self::Timeout { .. } => "TIMEOUT",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::CommandFailed { .. } => "COMMAND_FAILED",
            Self::ConnectionError { .. } => "CONNECTION_ERROR",
            Self::WriteError { .. } => "WRITE_ERROR",
            Self::Superseded { .. } => "SUPERSEDED",
            Self::Cancelled { .. } => "CANCELLED",
        }
    }

    pub fn method(&self) -> &str {
        match self {
            Self::NotConnected { method, .. }
            | Self::MultipleInstances { method, .. }
            | Self::Timeout { method, .. }
            | Self::RateLimited { method, .. }
            | Self::CommandFailed { method, .. }
            | Self::ConnectionError { method, .. }
            | Self::WriteError { method, .. }
            | Self::Superseded { method, .. }
            | Self::Cancelled { method, .. } => method,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Façade errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The only error type callers of [`Bridge`](crate::bridge::Bridge) see.
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeError {
    #[error("`{method}`: no connected host ({detail})")]
    NotConnected { method: String, detail: String },

    #[error("`{method}` timed out after {elapsed_ms}ms (limit {timeout_ms}ms)")]
    Timeout {
        method: String,
        session_id: String,
        timeout_ms: u64,
        elapsed_ms: u64,
    },

    #[error("`{method}`: {} hosts connected, specify a session or host", candidates.len())]
    MultipleInstances {
        method: String,
        candidates: Vec<SessionSummary>,
    },

    #[error("`{method}` rejected: {detail}")]
    RateLimited {
        method: String,
        session_id: String,
        detail: String,
    },

    #[error("`{method}` failed on the host: {error}")]
    CommandFailed {
        method: String,
        session_id: String,
        error: String,
        /// Handler-level code from the host (e.g. `unknown_command`).
        host_code: String,
    },

    #[error("`{method}`: connection error ({detail})")]
    ConnectionError {
        method: String,
        session_id: Option<String>,
        detail: String,
    },
}

impl BridgeError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotConnected { .. } => "NOT_CONNECTED",
            Self::Timeout { .. } => "TIMEOUT",
            Self::MultipleInstances { .. } => "MULTIPLE_INSTANCES",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::CommandFailed { .. } => "COMMAND_FAILED",
            Self::ConnectionError { .. } => "CONNECTION_ERROR",
        }
    }

    pub fn method(&self) -> &str {
        match self {
            Self::NotConnected { method, .. }
            | Self::Timeout { method, .. }
            | Self::MultipleInstances { method, .. }
            | Self::RateLimited { method, .. }
            | Self::CommandFailed { method, .. }
            | Self::ConnectionError { method, .. } => method,
        }
    }

    /// `{status: "error", code, error, ...context}` for HTTP responses.
    pub fn to_json(&self) -> Value {
        let mut body = serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}));
        if let Value::Object(map) = &mut body {
            map.insert("status".into(), Value::String("error".into()));
            map.insert("code".into(), Value::String(self.code().into()));
            map.insert("error".into(), Value::String(self.to_string()));
        }
        body
    }
}

impl From<DispatchError> for BridgeError {
    fn from(err: DispatchError) -> Self {
        let detail = err.to_string();
        match err {
            DispatchError::NotConnected { method, .. } => Self::NotConnected { method, detail },
            DispatchError::MultipleInstances { method, candidates } => {
                Self::MultipleInstances { method, candidates }
            }
            DispatchError::Timeout {
                method,
                session_id,
                timeout_ms,
                elapsed_ms,
            } => Self::Timeout {
                method,
                session_id,
                timeout_ms,
                elapsed_ms,
            },
            DispatchError::RateLimited {
                method, session_id, ..
            } => Self::RateLimited {
                method,
                session_id,
                detail,
            },
            DispatchError::CommandFailed {
                method,
                session_id,
                error,
                code,
            } => Self::CommandFailed {
                method,
                session_id,
                error,
                host_code: code,
            },
            DispatchError::ConnectionError {
                method, session_id, ..
            }
            | DispatchError::WriteError {
                method, session_id, ..
            }
            | DispatchError::Superseded { method, session_id }
            | DispatchError::Cancelled {
                method, session_id, ..
            } => Self::ConnectionError {
                method,
                session_id: Some(session_id),
                detail,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_variants_collapse_to_connection_error() {
        let cases = [
            DispatchError::WriteError {
                method: "m".into(),
                session_id: "s".into(),
                reason: "broken pipe".into(),
            },
            DispatchError::Superseded {
                method: "m".into(),
                session_id: "s".into(),
            },
            DispatchError::Cancelled {
                method: "m".into(),
                session_id: "s".into(),
                reason: "hub shutting down".into(),
            },
        ];
        for case in cases {
            let original = case.to_string();
            let bridged = BridgeError::from(case);
            assert_eq!(bridged.code(), "CONNECTION_ERROR");
            match bridged {
                BridgeError::ConnectionError { detail, .. } => assert_eq!(detail, original),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn json_body_carries_code_and_context() {
        let err = BridgeError::from(DispatchError::Timeout {
            method: "scene.load".into(),
            session_id: "s1".into(),
            timeout_ms: 30_000,
            elapsed_ms: 30_004,
        });
        let body = err.to_json();
        assert_eq!(body["status"], "error");
        assert_eq!(body["code"], "TIMEOUT");
        assert_eq!(body["method"], "scene.load");
        assert_eq!(body["timeout_ms"], 30_000);
        assert!(body["error"].as_str().unwrap().contains("timed out"));
    }

    #[test]
    fn command_failed_keeps_host_message_verbatim() {
        let err = BridgeError::from(DispatchError::CommandFailed {
            method: "build".into(),
            session_id: "s1".into(),
            error: "NullReference at Foo.cs:12".into(),
            code: "command_failed".into(),
        });
        assert_eq!(err.code(), "COMMAND_FAILED");
        assert!(err.to_string().contains("NullReference at Foo.cs:12"));
    }
}
