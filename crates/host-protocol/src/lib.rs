//! Host protocol: WebSocket message types exchanged between a host and the
//! hub, the command-result error shape, and the persisted host registry record.
//!
//! Hosts dial the hub, register, declare their extra commands, and then
//! answer `execute` requests pushed by the hub with a correlated
//! `command_result`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Close code sent by a host when it tears the connection down on purpose.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code sent by the hub when a newer registration with the same host
/// identity replaced this session.
pub const CLOSE_SUPERSEDED: u16 = 4001;
/// Close code sent by the hub when the `register` payload is rejected.
pub const CLOSE_INVALID_REGISTRATION: u16 = 4002;

/// WebSocket message envelope.  One JSON document per text frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Hub → Host: advisory timing hints, sent as soon as the socket opens.
    Welcome {
        #[serde(rename = "serverTimeout")]
        server_timeout: u64,
        #[serde(rename = "keepAliveInterval")]
        keep_alive_interval: u64,
    },

    /// Host → Hub: registration handshake.
    Register {
        project_name: String,
        project_hash: String,
        host_version: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        platform: Option<String>,
    },

    /// Hub → Host: registration accepted.
    Registered { session_id: String },

    /// Host → Hub: declare extra commands.  Replaces any earlier declaration.
    RegisterTools { tools: Vec<ToolDescriptor> },

    /// Hub → Host: run a command.  `timeout` is in seconds.
    Execute {
        id: String,
        name: String,
        #[serde(default)]
        params: Value,
        timeout: u64,
    },

    /// Host → Hub: the outcome of an `execute`.
    CommandResult { id: String, result: Value },

    /// Hub → Host: the caller gave up on an in-flight command.
    Cancel { id: String },

    /// Bidirectional heartbeat.
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },

    /// Heartbeat response.
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
}

impl WsMessage {
    /// The wire `type` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::Register { .. } => "register",
            Self::Registered { .. } => "registered",
            Self::RegisterTools { .. } => "register_tools",
            Self::Execute { .. } => "execute",
            Self::CommandResult { .. } => "command_result",
            Self::Cancel { .. } => "cancel",
            Self::Ping { .. } => "ping",
            Self::Pong { .. } => "pong",
        }
    }
}

/// An extra command a host declares it can serve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON-schema-like parameter description; opaque to the hub.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Command results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Structured error carried inside a `command_result`:
/// `{"status": "error", "error": "...", "code": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandErrorPayload {
    pub error: String,
    pub code: String,
}

impl CommandErrorPayload {
    pub fn new(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
        }
    }

    /// Render as the wire result value.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "status": "error",
            "error": self.error,
            "code": self.code,
        })
    }

    /// Recognize the error shape in a raw result.  Anything else is a
    /// domain payload.
    pub fn from_result(result: &Value) -> Option<Self> {
        let obj = result.as_object()?;
        if obj.get("status").and_then(Value::as_str) != Some("error") {
            return None;
        }
        let error = obj
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        let code = obj
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("command_failed")
            .to_string();
        Some(Self { error, code })
    }
}

/// Split a raw `command_result.result` into a success payload or a
/// structured error.
pub fn split_result(result: Value) -> Result<Value, CommandErrorPayload> {
    match CommandErrorPayload::from_result(&result) {
        Some(err) => Err(err),
        None => Ok(result),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Host registry file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One entry of the shared host registry file.  The file is a JSON array
/// of these, rewritten wholesale by hosts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRecord {
    pub host_path: String,
    pub host_label: String,
    /// `host:port` of the host's health listener.
    pub advertised_endpoint: String,
    pub pid: u32,
    pub last_seen: DateTime<Utc>,
}

/// Parse the shared host file.  An empty file is an empty list.
pub fn parse_host_file(raw: &str) -> Result<Vec<HostRecord>, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw)
}

/// Body of a health-listener reply line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReply {
    pub status: String,
    pub pid: u32,
    pub host_path: String,
}

impl HealthReply {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}
