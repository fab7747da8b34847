//! Bridge: the single entry point callers use to run commands on hosts.
//!
//! Routes through the [`SessionHub`] and turns every failure into a
//! [`BridgeError`].  When several hosts are connected and the caller gave no
//! target, the Host Registry's active selection breaks the tie.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::error::{BridgeError, DispatchError};
use crate::hosts::HostRegistry;
use crate::sessions::SessionHub;

/// Which host a call should go to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetHint {
    /// A live session id.
    Session(String),
    /// A host path from the registry file.
    Host(String),
}

/// A successful call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BridgeReply {
    pub session_id: String,
    pub result: Value,
}

pub struct Bridge {
    hub: Arc<SessionHub>,
    hosts: Option<Arc<HostRegistry>>,
}

impl Bridge {
    pub fn new(hub: Arc<SessionHub>, hosts: Option<Arc<HostRegistry>>) -> Self {
        Self { hub, hosts }
    }

    pub fn hub(&self) -> &Arc<SessionHub> {
        &self.hub
    }

    pub async fn call(
        &self,
        method: &str,
        params: Value,
        target: Option<TargetHint>,
    ) -> Result<BridgeReply, BridgeError> {
        let timeout = self.hub.settings().command_timeout;
        self.call_with_timeout(method, params, target, timeout).await
    }

    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        target: Option<TargetHint>,
        timeout: Duration,
    ) -> Result<BridgeReply, BridgeError> {
        let session = match target {
            Some(TargetHint::Session(id)) => Some(id),
            Some(TargetHint::Host(path)) => Some(self.session_for_host(method, &path)?),
            None => None,
        };

        let outcome = self
            .hub
            .send_command_with_timeout(method, params.clone(), session.as_deref(), timeout)
            .await;

        let outcome = match outcome {
            Err(DispatchError::MultipleInstances { method, candidates }) => {
                match self.active_session() {
                    Some(session_id) => {
                        tracing::debug!(
                            method = %method,
                            session_id = %session_id,
                            "several hosts connected, using active selection"
                        );
                        self.hub
                            .send_command_with_timeout(&method, params, Some(&session_id), timeout)
                            .await
                    }
                    None => Err(DispatchError::MultipleInstances { method, candidates }),
                }
            }
            other => other,
        };

        match outcome {
            Ok(reply) => Ok(BridgeReply {
                session_id: reply.session_id,
                result: reply.value,
            }),
            Err(err) => {
                tracing::debug!(method = %method, code = err.code(), error = %err, "call failed");
                Err(err.into())
            }
        }
    }

    /// The live session of the registry's active host, if both exist.
    fn active_session(&self) -> Option<String> {
        let entry = self.hosts.as_ref()?.active()?;
        self.hub.session_for_identity(&entry.identity_hash)
    }

    fn session_for_host(&self, method: &str, host_path: &str) -> Result<String, BridgeError> {
        let identity = match self.hosts.as_ref().and_then(|h| h.find(host_path)) {
            Some(entry) => entry.identity_hash,
            None => hl_domain::identity::host_identity_hash(host_path),
        };
        self.hub
            .session_for_identity(&identity)
            .ok_or_else(|| BridgeError::NotConnected {
                method: method.to_string(),
                detail: format!("no session for host `{host_path}`"),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::hosts::health::HealthProbe;
    use crate::hosts::RegistrySettings;
    use crate::sessions::{HubSettings, Registration};
    use async_trait::async_trait;
    use hl_protocol::{HostRecord, WsMessage};
    use serde_json::json;
    use tokio::sync::mpsc;

    struct NeverProbe;

    #[async_trait]
    impl HealthProbe for NeverProbe {
        async fn probe(&self, _record: &HostRecord) -> bool {
            false
        }
    }

    fn hub() -> Arc<SessionHub> {
        Arc::new(SessionHub::new(HubSettings {
            grace_period: Duration::ZERO,
            ..HubSettings::default()
        }))
    }

    /// Registers a host under the identity of `path` that echoes the method.
    fn connect_host(hub: &Arc<SessionHub>, path: &str) -> String {
        let (tx, mut rx) = mpsc::channel(16);
        let ticket = hub
            .register_session(
                Registration {
                    project_name: path.into(),
                    project_hash: hl_domain::identity::host_identity_hash(path),
                    host_version: "1.0".into(),
                    client_name: None,
                    platform: None,
                },
                tx,
            )
            .unwrap();
        let session_id = ticket.session_id.clone();
        let hub = hub.clone();
        let id = session_id.clone();
        tokio::spawn(async move {
            let _keep = ticket;
            while let Some(msg) = rx.recv().await {
                if let WsMessage::Execute { id: cid, name, .. } = msg {
                    hub.complete_command(&id, &cid, json!({ "method": name }));
                }
            }
        });
        session_id
    }

    fn record(path: &str) -> HostRecord {
        HostRecord {
            host_path: path.into(),
            host_label: path.into(),
            advertised_endpoint: "127.0.0.1:1".into(),
            pid: 1,
            last_seen: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn single_host_reply_carries_session() {
        let hub = hub();
        let session = connect_host(&hub, "/work/a");
        let bridge = Bridge::new(hub, None);

        let reply = bridge.call("ping", json!({}), None).await.unwrap();
        assert_eq!(reply.session_id, session);
        assert_eq!(reply.result["method"], "ping");
    }

    #[tokio::test]
    async fn ambiguous_without_registry_is_multiple_instances() {
        let hub = hub();
        connect_host(&hub, "/work/a");
        connect_host(&hub, "/work/b");
        let bridge = Bridge::new(hub, None);

        match bridge.call("ping", json!({}), None).await.unwrap_err() {
            BridgeError::MultipleInstances { method, candidates } => {
                assert_eq!(method, "ping");
                assert_eq!(candidates.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn active_host_breaks_the_tie() {
        let hub = hub();
        connect_host(&hub, "/work/a");
        let b = connect_host(&hub, "/work/b");

        let registry = Arc::new(HostRegistry::new(
            PathBuf::from("/nonexistent/hosts.json"),
            RegistrySettings {
                health_interval: Duration::from_secs(5),
                stale_after: Duration::from_secs(30),
                retry_max_attempts: 5,
            },
            Arc::new(NeverProbe),
        ));
        registry.replace_candidates(vec![record("/work/a"), record("/work/b")]);
        registry.apply_probe("/work/b", true, tokio::time::Instant::now());

        let bridge = Bridge::new(hub, Some(registry));
        let reply = bridge.call("ping", json!({}), None).await.unwrap();
        assert_eq!(reply.session_id, b);
    }

    #[tokio::test]
    async fn host_hint_maps_through_identity() {
        let hub = hub();
        let a = connect_host(&hub, "/work/a");
        connect_host(&hub, "/work/b");
        let bridge = Bridge::new(hub, None);

        let reply = bridge
            .call("ping", json!({}), Some(TargetHint::Host("/work/a".into())))
            .await
            .unwrap();
        assert_eq!(reply.session_id, a);

        let err = bridge
            .call("ping", json!({}), Some(TargetHint::Host("/work/zzz".into())))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_CONNECTED");
    }

    #[tokio::test]
    async fn unknown_session_hint_is_not_connected() {
        let bridge = Bridge::new(hub(), None);
        let err = bridge
            .call("ping", json!({}), Some(TargetHint::Session("nope".into())))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_CONNECTED");
        assert_eq!(err.method(), "ping");
    }
}
