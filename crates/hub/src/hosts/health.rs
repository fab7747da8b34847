//! Reachability probes for registry entries, independent of host sessions.

use std::time::Duration;

use async_trait::async_trait;
use hl_protocol::{HealthReply, HostRecord};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;

#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Whether the host behind `record` is alive right now.
    async fn probe(&self, record: &HostRecord) -> bool;
}

/// Connects to the advertised endpoint and expects one `ok` JSON line
/// naming the same host path.
pub struct TcpHealthProbe {
    timeout: Duration,
}

impl TcpHealthProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn read_reply(&self, endpoint: &str) -> anyhow::Result<HealthReply> {
        let stream = TcpStream::connect(endpoint).await?;
        let mut line = String::new();
        BufReader::new(stream).read_line(&mut line).await?;
        Ok(serde_json::from_str(line.trim())?)
    }
}

#[async_trait]
impl HealthProbe for TcpHealthProbe {
    async fn probe(&self, record: &HostRecord) -> bool {
        match tokio::time::timeout(self.timeout, self.read_reply(&record.advertised_endpoint)).await
        {
            Ok(Ok(reply)) => {
                let healthy = reply.is_ok() && reply.host_path == record.host_path;
                if !healthy {
                    tracing::debug!(
                        host_path = %record.host_path,
                        status = %reply.status,
                        reported_path = %reply.host_path,
                        "health reply rejected"
                    );
                }
                healthy
            }
            Ok(Err(e)) => {
                tracing::debug!(host_path = %record.host_path, error = %e, "health probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(host_path = %record.host_path, "health probe timed out");
                false
            }
        }
    }
}
