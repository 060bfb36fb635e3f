//! Peer facing JSON-RPC server answering signed `ConnectionDetails` requests.

use super::details::ConnectionDetailsParams;
use super::details::ConnectionDetailsResult;
use super::details::PeerError;
use super::details::RpcErrorBody;
use super::details::RpcRequest;
use super::details::RpcResponse;
use super::details::CONNECTION_DETAILS_METHOD;
use super::details::INVALID_PARAMS;
use super::details::METHOD_NOT_FOUND;
use crate::core::Coordinator;
use crate::key::ChainAddress;

use axum::extract::State;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

pub fn router(coordinator: Coordinator) -> Router {
    Router::new()
        .route("/rpc", post(rpc))
        .with_state(coordinator)
}

async fn rpc(
    State(coordinator): State<Coordinator>,
    Json(request): Json<RpcRequest<Value>>,
) -> Json<RpcResponse<ConnectionDetailsResult>> {
    let outcome = if request.method == CONNECTION_DETAILS_METHOD {
        connection_details(&coordinator, request.params).await
    } else {
        Err(RpcErrorBody {
            code: METHOD_NOT_FOUND,
            message: "method not found".into(),
            data: Some(request.method),
        })
    };

    let (result, error) = match outcome {
        Ok(result) => (Some(result), None),
        Err(error) => {
            debug!(parent: &coordinator.logger().span, "rejected peer request: {:?}", error.data);
            (None, Some(error))
        }
    };
    Json(RpcResponse {
        jsonrpc: "2.0".into(),
        id: request.id,
        result,
        error,
    })
}

async fn connection_details(
    coordinator: &Coordinator,
    params: Value,
) -> Result<ConnectionDetailsResult, RpcErrorBody> {
    let invalid = |data: String| RpcErrorBody {
        code: INVALID_PARAMS,
        message: "invalid params".into(),
        data: Some(data),
    };

    let params: ConnectionDetailsParams =
        serde_json::from_value(params).map_err(|e| invalid(e.to_string()))?;
    let claimed = params.public_key().map_err(|e| invalid(e.to_string()))?;
    let message = &params.connection_details_message;
    let address: ChainAddress = message
        .node_address
        .parse()
        .map_err(|_| invalid(format!("invalid node address {}", message.node_address)))?;

    let recorded = coordinator
        .node_pub_key(address)
        .await
        .map_err(|e| invalid(format!("public key of {address}: {e}")))?;
    if recorded != claimed {
        return Err(invalid(PeerError::InvalidPublicKey.to_string()));
    }
    message
        .validate(&claimed, &params.signature, chrono::Utc::now().timestamp())
        .map_err(|e| invalid(e.to_string()))?;

    Ok(coordinator.connection_details().into())
}

/// Serves the peer RPC until `token` is cancelled.
pub async fn start_public(
    coordinator: Coordinator,
    listener: TcpListener,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let span = coordinator.logger().new_child("public").span;
    if let Ok(addr) = listener.local_addr() {
        info!(parent: &span, "peer rpc listening on {addr}");
    }

    let server = axum::serve(listener, router(coordinator))
        .with_graceful_shutdown(token.cancelled_owned());
    if let Err(err) = server.await {
        warn!(parent: &span, "peer rpc terminated: {err}");
        return Err(err.into());
    }
    debug!(parent: &span, "peer rpc stopped");

    Ok(())
}
