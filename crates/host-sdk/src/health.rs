//! Loopback health listener.
//!
//! The hub health-checks hosts independently of the session socket by
//! connecting to the `advertisedEndpoint` published in the host file.  Each
//! connection gets a single JSON line and is closed.

use std::net::SocketAddr;
use std::time::Duration;

use hl_protocol::HealthReply;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub struct HealthListener {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl HealthListener {
    /// Bind an ephemeral loopback port and start answering probes.
    pub async fn bind(host_path: String) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let reply = HealthReply {
            status: "ok".into(),
            pid: std::process::id(),
            host_path,
        };
        let mut line = serde_json::to_string(&reply).map_err(std::io::Error::other)?;
        line.push('\n');

        let task = tokio::spawn(async move {
            let mut errors = 0u32;
            loop {
                match listener.accept().await {
                    Ok((mut stream, _peer)) => {
                        errors = 0;
                        let line = line.clone();
                        tokio::spawn(async move {
                            let _ = stream.write_all(line.as_bytes()).await;
                            let _ = stream.shutdown().await;
                        });
                    }
                    Err(e) => {
                        let delay = accept_retry_delay(errors);
                        errors = errors.saturating_add(1);
                        tracing::warn!(
                            error = %e,
                            retry_ms = delay.as_millis() as u64,
                            "health listener accept failed"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        });

        tracing::debug!(addr = %addr, "health listener bound");
        Ok(Self { addr, task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

/// Pause after consecutive accept errors (fd exhaustion and the like):
/// 50ms doubling up to 1s.
fn accept_retry_delay(consecutive_errors: u32) -> Duration {
    let ms = 50u64.saturating_mul(1 << consecutive_errors.min(5));
    Duration::from_millis(ms.min(1000))
}

impl Drop for HealthListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}
