//! Local control endpoint of the daemon and its client side.

use super::utils::CONTROL_HOST;
use crate::core::Coordinator;
use crate::core::Status;

use anyhow::bail;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::routing::post;
use axum::Json;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

#[derive(Clone)]
struct ControlHandler {
    coordinator: Coordinator,
    stop_daemon: broadcast::Sender<()>,
}

pub fn router(coordinator: Coordinator, stop_daemon: broadcast::Sender<()>) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/shutdown", post(shutdown_handler))
        .with_state(ControlHandler {
            coordinator,
            stop_daemon,
        })
}

async fn status_handler(State(handler): State<ControlHandler>) -> Json<Status> {
    Json(handler.coordinator.status().await)
}

async fn shutdown_handler(State(handler): State<ControlHandler>) -> (StatusCode, &'static str) {
    let span = &handler.coordinator.logger().span;
    info!(parent: span, "shutdown requested over control port");
    if handler.stop_daemon.send(()).is_err() {
        warn!(parent: span, "stop signal has no receivers");
        return (StatusCode::SERVICE_UNAVAILABLE, "daemon is not listening for stop");
    }
    (StatusCode::OK, "stopping")
}

pub async fn start_control(
    coordinator: Coordinator,
    listener: TcpListener,
    stop_daemon: broadcast::Sender<()>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let span = coordinator.logger().new_child("control").span;
    if let Ok(addr) = listener.local_addr() {
        info!(parent: &span, "control listening on {addr}");
    }

    if let Err(err) = axum::serve(listener, router(coordinator, stop_daemon))
        .with_graceful_shutdown(token.cancelled_owned())
        .await
    {
        bail!("control server failed: {err}")
    }
    debug!(parent: &span, "control stopped");

    Ok(())
}

fn control_url(control_port: u16, path: &str) -> String {
    format!("http://{CONTROL_HOST}:{control_port}/{path}")
}

pub async fn status(control_port: u16) -> anyhow::Result<Status> {
    let response = reqwest::get(control_url(control_port, "status")).await?;
    if !response.status().is_success() {
        bail!("control answered {}", response.status())
    }
    Ok(response.json().await?)
}

pub async fn stop(control_port: u16) -> anyhow::Result<()> {
    let response = reqwest::Client::new()
        .post(control_url(control_port, "shutdown"))
        .send()
        .await?;
    if !response.status().is_success() {
        bail!("control answered {}", response.status())
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::utils::ControlListener;
    use crate::net::utils::NewTcpListener;
    use crate::test::utils::test_config;
    use crate::test::utils::TestNode;
    use crate::test::MemLedger;
    use std::sync::Arc;

    #[tokio::test]
    async fn status_and_shutdown() {
        let ledger = Arc::new(MemLedger::new(2));
        let node = TestNode::start(ledger, test_config(3)).await.unwrap();
        let listener = ControlListener::bind(0).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (stop_daemon, mut stopped) = broadcast::channel(1);
        let token = CancellationToken::new();
        tokio::spawn(start_control(
            node.coordinator.clone(),
            listener,
            stop_daemon,
            token.clone(),
        ));

        let received = status(port).await.unwrap();
        assert_eq!(received, node.coordinator.status().await);
        assert_eq!(received.self_epoch, 3);
        assert_eq!(received.current_epoch, 2);
        assert!(received.is_new_committee);
        assert_eq!(received.address, node.pair.address().to_string());

        stop(port).await.unwrap();
        assert_eq!(stopped.recv().await, Ok(()));
        token.cancel();
    }

    #[tokio::test]
    async fn shutdown_without_stop_listener() {
        let ledger = Arc::new(MemLedger::new(2));
        let node = TestNode::start(ledger, test_config(3)).await.unwrap();
        let listener = ControlListener::bind(0).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (stop_daemon, stopped) = broadcast::channel(1);
        drop(stopped);
        let token = CancellationToken::new();
        tokio::spawn(start_control(
            node.coordinator.clone(),
            listener,
            stop_daemon,
            token.clone(),
        ));

        let err = stop(port).await.unwrap_err();
        assert!(err.to_string().contains("503"), "{err}");
        token.cancel();
    }
}
