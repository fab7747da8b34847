//! Command registry. Maps command names to handlers and produces the
//! capability declaration sent in `register_tools`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use hl_protocol::ToolDescriptor;

use crate::types::{CommandContext, CommandResult};

/// Implement this trait to handle commands pushed by the hub.
///
/// Handlers run one at a time on the host's execution queue, so they may
/// touch host state without further locking against other commands.
///
/// # Example
///
/// ```rust,no_run
/// use hl_host_sdk::{CommandContext, CommandHandler, CommandResult};
///
/// struct Echo;
///
/// #[async_trait::async_trait]
/// impl CommandHandler for Echo {
///     async fn call(&self, _ctx: CommandContext, params: serde_json::Value) -> CommandResult {
///         Ok(params)
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    async fn call(&self, ctx: CommandContext, params: serde_json::Value) -> CommandResult;
}

struct Registered {
    handler: Arc<dyn CommandHandler>,
    descriptor: Option<ToolDescriptor>,
}

/// Registry of command handlers.
///
/// Commands registered with [`declare`](Self::declare) are advertised to the
/// hub as extra capabilities; plain [`register`](Self::register) commands are
/// served but not advertised.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Arc<Registered>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-seeded with the built-in `ping` command.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        reg.register("ping", Ping);
        reg
    }

    /// Register a command without advertising it.
    ///
    /// Names are normalized to lowercase so lookups are case-insensitive.
    pub fn register<T: CommandHandler>(&mut self, name: impl Into<String>, handler: T) -> &mut Self {
        self.insert(name.into(), Arc::new(handler), None)
    }

    /// Register a pre-wrapped handler.
    pub fn register_boxed(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn CommandHandler>,
    ) -> &mut Self {
        self.insert(name.into(), handler, None)
    }

    /// Register a command and advertise it in the capability declaration.
    pub fn declare<T: CommandHandler>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Option<serde_json::Value>,
        handler: T,
    ) -> &mut Self {
        let name = name.into();
        let descriptor = ToolDescriptor {
            name: name.to_ascii_lowercase(),
            description: description.into(),
            parameters,
        };
        self.insert(name, Arc::new(handler), Some(descriptor))
    }

    fn insert(
        &mut self,
        name: String,
        handler: Arc<dyn CommandHandler>,
        descriptor: Option<ToolDescriptor>,
    ) -> &mut Self {
        self.commands.insert(
            name.to_ascii_lowercase(),
            Arc::new(Registered { handler, descriptor }),
        );
        self
    }

    /// All registered command names (sorted).
    pub fn command_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.commands.keys().cloned().collect();
        names.sort();
        names
    }

    /// Advertised commands, sorted by name.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut out: Vec<ToolDescriptor> = self
            .commands
            .values()
            .filter_map(|r| r.descriptor.clone())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Look up a handler by name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.commands
            .get(&name.to_ascii_lowercase())
            .map(|r| r.handler.clone())
    }
}

/// Built-in liveness command.
struct Ping;

#[async_trait::async_trait]
impl CommandHandler for Ping {
    async fn call(&self, ctx: CommandContext, _params: serde_json::Value) -> CommandResult {
        Ok(serde_json::json!({
            "pong": true,
            "session_id": ctx.session_id,
            "timestamp": Utc::now().timestamp_millis(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CommandError;

    struct Echo;
    #[async_trait::async_trait]
    impl CommandHandler for Echo {
        async fn call(&self, _ctx: CommandContext, params: serde_json::Value) -> CommandResult {
            Ok(params)
        }
    }

    struct Fail;
    #[async_trait::async_trait]
    impl CommandHandler for Fail {
        async fn call(&self, _ctx: CommandContext, _params: serde_json::Value) -> CommandResult {
            Err(CommandError::Failed("intentional".into()))
        }
    }

    #[test]
    fn register_and_lookup_case_insensitive() {
        let mut reg = CommandRegistry::new();
        reg.register("Scene.Load", Echo);
        assert!(reg.get("scene.load").is_some());
        assert!(reg.get("SCENE.LOAD").is_some());
        assert!(reg.get("scene.save").is_none());
    }

    #[test]
    fn only_declared_commands_are_advertised() {
        let mut reg = CommandRegistry::with_defaults();
        reg.declare("z.tool", "last", None, Echo);
        reg.declare("a.tool", "first", Some(serde_json::json!({"type": "object"})), Echo);
        reg.register("hidden", Echo);

        let names: Vec<String> = reg.descriptors().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["a.tool", "z.tool"]);
        assert_eq!(reg.command_names(), vec!["a.tool", "hidden", "ping", "z.tool"]);
    }

    #[tokio::test]
    async fn handlers_dispatch() {
        let mut reg = CommandRegistry::with_defaults();
        reg.register("echo", Echo);
        reg.register("fail", Fail);

        let out = reg
            .get("echo")
            .unwrap()
            .call(CommandContext::local("c1", "echo"), serde_json::json!({"x": 1}))
            .await
            .unwrap();
        assert_eq!(out, serde_json::json!({"x": 1}));

        let err = reg
            .get("fail")
            .unwrap()
            .call(CommandContext::local("c2", "fail"), serde_json::Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err, CommandError::Failed("intentional".into()));

        let pong = reg
            .get("ping")
            .unwrap()
            .call(CommandContext::local("c3", "ping"), serde_json::Value::Null)
            .await
            .unwrap();
        assert_eq!(pong["pong"], true);
    }
}
