//! `hl-host-sdk`: host-side runtime for hostlink.
//!
//! A "host" is a long-lived process that owns some stateful environment
//! (an editor, a build tool, a game engine) and lets a hub drive it.  The
//! host dials the hub, registers under a stable identity derived from its
//! working directory, and runs the commands the hub pushes to it.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │  Your host                                                │
//! │                                                           │
//! │   let mut reg = CommandRegistry::with_defaults();         │
//! │   reg.declare("scene.reload", "Reload", None, Reload);    │
//! │                                                           │
//! │   let handle = HostClientBuilder::new()                   │
//! │       .hub_ws_url("ws://127.0.0.1:6400/v1/hosts/ws")      │
//! │       .project_name("demo")                               │
//! │       .token("secret")                                    │
//! │       .build()?                                           │
//! │       .spawn(reg);                                        │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Connection flow
//!
//! 1. Connect WS (with `token=<HOSTLINK_TOKEN>` query param)
//! 2. Send `register { project_name, project_hash, host_version }`
//! 3. Wait for `registered { session_id }`; only now is the host connected
//! 4. Send `register_tools` with every declared command
//! 5. Main loop:
//!    - On `execute`: append to the [`ExecutionQueue`]; always answer with
//!      `command_result`
//!    - On `cancel`: cancel the command's token
//!    - On `ping`: reply `pong`
//!    - Emit periodic `ping` while connected
//! 6. On disconnect: cancel all queued work and redial per the
//!    [`ReconnectBackoff`] schedule

pub mod builder;
pub mod client;
pub mod health;
pub mod host_file;
pub mod queue;
pub mod reconnect;
pub mod registry;
pub mod state;
pub mod types;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use builder::HostClientBuilder;
pub use client::{HostClient, HostHandle};
pub use host_file::HostFile;
pub use queue::{Execution, ExecutionQueue};
pub use reconnect::ReconnectBackoff;
pub use registry::{CommandHandler, CommandRegistry};
pub use state::{ConnectionState, ConnectionStateMachine};
pub use types::{CommandContext, CommandError, CommandResult, HostSdkError};

// Re-export protocol types so hosts never need to import hl-protocol directly.
pub use hl_protocol::{ToolDescriptor, WsMessage};
