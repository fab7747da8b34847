//! Listener binding and the serve loop.

use std::io::ErrorKind;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;

use crate::state::AppState;

/// Bind `host:port`, moving up one port at a time on conflict.  Returns
/// `None` when all `attempts` ports are taken.
pub async fn bind_with_fallback(host: &str, port: u16, attempts: u16) -> Option<TcpListener> {
    for offset in 0..attempts {
        let Some(candidate) = port.checked_add(offset) else {
            break;
        };
        let addr = format!("{host}:{candidate}");
        match TcpListener::bind(&addr).await {
            Ok(listener) => {
                if offset > 0 {
                    tracing::warn!(
                        requested = port,
                        bound = candidate,
                        "configured port busy, using the next free one"
                    );
                }
                return Some(listener);
            }
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                tracing::debug!(addr = %addr, "port in use");
            }
            Err(e) => {
                tracing::warn!(addr = %addr, error = %e, "bind failed");
            }
        }
    }
    None
}

/// Serve `app` until `state.shutdown` fires.
///
/// Without a free port the hub stays up in degraded mode: no inbound
/// listener, but the host registry and any other background work keep
/// running until shutdown.
pub async fn serve(state: &AppState, app: Router) -> anyhow::Result<()> {
    let server = &state.config.server;
    match bind_with_fallback(&server.host, server.port, server.port_attempts).await {
        Some(listener) => serve_on(listener, state, app).await,
        None => {
            tracing::error!(
                host = %server.host,
                first_port = server.port,
                attempts = server.port_attempts,
                "no free port, running without inbound listener"
            );
            state.shutdown.cancelled().await;
            Ok(())
        }
    }
}

/// Serve on an already-bound listener.
pub async fn serve_on(listener: TcpListener, state: &AppState, app: Router) -> anyhow::Result<()> {
    let addr = listener.local_addr().context("reading bound address")?;
    tracing::info!(addr = %addr, "hostlink hub listening");

    let shutdown = state.shutdown.clone();
    let hub = state.hub.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            // Evict host sockets so open connections do not hold the server.
            hub.shutdown();
        })
        .await
        .context("axum server error")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn busy_port_falls_through_to_next() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        // The neighbour may be busy on a shared machine; allow a few.
        if let Some(listener) = bind_with_fallback("127.0.0.1", port, 8).await {
            assert_ne!(listener.local_addr().unwrap().port(), port);
        }
    }

    #[tokio::test]
    async fn exhausted_attempts_is_none() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        assert!(bind_with_fallback("127.0.0.1", port, 1).await.is_none());
    }
}
