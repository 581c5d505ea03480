//! Live viewer WebSocket endpoints
//!
//! Each socket is bridged to a hub through a [`ChannelConnection`]: hub
//! deliveries land in the connection's bounded buffer and this task writes
//! them to the socket in order. Inbound `ping` frames are answered directly.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Path, State,
    },
    http::HeaderMap,
    response::Response,
};
use riskpulse::hub::{control_reply, ChannelConnection};
use riskpulse::ratelimit::policy::PolicyKind;
use riskpulse::{Channel, TenantId};
use tracing::{debug, info, warn};

use super::handlers::{admit, is_privileged, ApiError, AppState};

/// `GET /ws/public`
pub async fn public_ws(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    admit(&state, &headers, peer, PolicyKind::ConnectionHandshake).await?;
    Ok(ws.on_upgrade(move |socket| serve_socket(state, socket, Channel::Public, None)))
}

/// `GET /ws/tenant/:tenant_id`
pub async fn tenant_ws(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(tenant_id): Path<TenantId>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    admit(&state, &headers, peer, PolicyKind::ConnectionHandshake).await?;
    if tenant_id.trim().is_empty() {
        return Err(ApiError::BadRequest("tenant_id must not be empty".to_string()));
    }
    Ok(ws.on_upgrade(move |socket| {
        serve_socket(state, socket, Channel::Tenant, Some(tenant_id))
    }))
}

/// `GET /ws/regulator`
pub async fn regulator_ws(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    admit(&state, &headers, peer, PolicyKind::ConnectionHandshake).await?;
    if !is_privileged(&headers) {
        return Err(ApiError::Forbidden);
    }
    Ok(ws.on_upgrade(move |socket| serve_socket(state, socket, Channel::Regulator, None)))
}

/// Pump frames between one socket and its hub until either side goes away
async fn serve_socket(
    state: Arc<AppState>,
    mut socket: WebSocket,
    channel: Channel,
    tenant_id: Option<TenantId>,
) {
    let broadcast = &state.config.pipeline.broadcast;
    let (connection, mut outbound) =
        ChannelConnection::pair(broadcast.connection_buffer, broadcast.send_timeout());

    let id = match state
        .ctx
        .connect(channel, Arc::new(connection), tenant_id.clone())
        .await
    {
        Ok(id) => id,
        Err(e) => {
            warn!(channel = %channel, error = %e, "Failed to register live connection");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };
    info!(
        channel = %channel,
        connection = %id,
        tenant_id = tenant_id.as_deref().unwrap_or("-"),
        "Live viewer connected"
    );

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                match frame {
                    Some(frame) => {
                        if socket.send(Message::Text(frame.to_string())).await.is_err() {
                            break;
                        }
                    }
                    // Hub dropped the connection after a failed delivery
                    None => break,
                }
            }

            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let Some(reply) = control_reply(&text) else {
                            debug!(connection = %id, "Ignoring inbound frame");
                            continue;
                        };
                        match reply.to_frame() {
                            Ok(frame) => {
                                if socket.send(Message::Text(frame.to_string())).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!(error = %e, "Failed to encode control reply"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.ctx.disconnect(channel, id);
    info!(channel = %channel, connection = %id, "Live viewer disconnected");
}
