//! Peer WebSocket server: admission policy, the per-connection reader and
//! writer tasks, and the server lifecycle handle.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tower_http::cors::CorsLayer;

use arbor_core::frames::{
    ExtensionFrame, CLOSE_GOING_AWAY, CLOSE_HANDSHAKE, CLOSE_RATE_LIMITED,
    CLOSE_REJECTED_CREDENTIAL, CLOSE_REJECTED_ORIGIN,
};

use crate::handlers;
use crate::heartbeat;
use crate::outbound::Outbound;
use crate::peer::{ConnectRateLimiter, PeerHandle};
use crate::state::BridgeState;

const HANDSHAKE_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Clone)]
struct AppState {
    bridge: Arc<BridgeState>,
    limiter: Arc<ConnectRateLimiter>,
}

/// Admission verdict computed from the upgrade request.
enum Admission {
    /// Token checked out; install the browser session immediately.
    Browser { tab_id: String },
    /// No token presented; the peer must lead with an extension handshake.
    PendingHandshake,
    Reject { code: u16, reason: &'static str },
}

#[derive(Clone, Copy)]
enum PeerKind {
    Browser,
    Extension,
}

/// Start the peer server and the heartbeat supervisor.
/// Binds loopback only; the bridge is a local process.
pub async fn start(bridge: Arc<BridgeState>) -> Result<ServerHandle, std::io::Error> {
    let limiter = Arc::new(ConnectRateLimiter::new(
        bridge.config.connect_rate_burst,
        bridge.config.connect_rate_per_sec,
    ));
    let app_state = AppState {
        bridge: Arc::clone(&bridge),
        limiter,
    };

    let router = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
        .layer(CorsLayer::permissive());

    let listener =
        tokio::net::TcpListener::bind(("127.0.0.1", bridge.config.port)).await?;
    let port = listener.local_addr()?.port();

    let shutdown = bridge.shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
        })
        .await
        .ok();
    });

    let supervisor = heartbeat::start_supervisor(Arc::clone(&bridge));

    tracing::info!(port, "Bridge peer server started");
    Ok(ServerHandle {
        port,
        state: bridge,
        server,
        supervisor,
    })
}

/// Keeps the server tasks alive; `shutdown()` then `drain()` to stop.
pub struct ServerHandle {
    pub port: u16,
    pub state: Arc<BridgeState>,
    server: tokio::task::JoinHandle<()>,
    supervisor: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Graceful shutdown: close every peer with 1001, fail outstanding
    /// forwards, cancel timers, stop accepting connections.
    pub fn shutdown(&self) {
        tracing::info!("Bridge shutdown initiated");
        let peers = self
            .state
            .registry
            .browsers_snapshot()
            .into_iter()
            .chain(self.state.registry.extensions_snapshot());
        for peer in peers {
            peer.close(CLOSE_GOING_AWAY, "bridge shutting down");
        }
        self.state.correlation.drain_all();
        self.state.shutdown.cancel();
    }

    /// Wait for the server tasks after `shutdown()`.
    pub async fn drain(self) {
        let _ = self.server.await;
        let _ = self.supervisor.await;
        tracing::debug!("Server tasks drained");
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let admission = admit(&app, addr, &headers, &params);
    let bridge = app.bridge;
    ws.on_upgrade(move |socket| handle_socket(socket, bridge, admission))
}

/// Origin → rate limit → credential, in that order. Pure decision; the
/// close frame is sent after the upgrade completes.
fn admit(
    app: &AppState,
    addr: SocketAddr,
    headers: &HeaderMap,
    params: &HashMap<String, String>,
) -> Admission {
    let origin = headers.get("origin").and_then(|v| v.to_str().ok());
    if !app.bridge.config.origin_allowed(origin) {
        tracing::warn!(origin = origin.unwrap_or("<none>"), "Rejected origin");
        return Admission::Reject {
            code: CLOSE_REJECTED_ORIGIN,
            reason: "origin not allowed",
        };
    }

    if !app.limiter.check(addr.ip()) {
        tracing::warn!(addr = %addr, "Connection rate limit exceeded");
        return Admission::Reject {
            code: CLOSE_RATE_LIMITED,
            reason: "too many connection attempts",
        };
    }

    match params.get("token") {
        Some(token) if app.bridge.config.token_matches(token) => Admission::Browser {
            tab_id: params
                .get("tabId")
                .cloned()
                .unwrap_or_else(|| "default".to_string()),
        },
        Some(_) => Admission::Reject {
            code: CLOSE_REJECTED_CREDENTIAL,
            reason: "invalid token",
        },
        None => Admission::PendingHandshake,
    }
}

async fn handle_socket(mut socket: WebSocket, bridge: Arc<BridgeState>, admission: Admission) {
    match admission {
        Admission::Reject { code, reason } => {
            bridge.metrics.connection_rejected();
            let _ = socket
                .send(WsMessage::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                })))
                .await;
        }

        Admission::Browser { tab_id } => {
            let (handle, replaced) = bridge.registry.register_browser(&tab_id);
            if let Some(old) = replaced {
                // Forwards in flight belonged to the replaced connection.
                bridge.correlation.cancel_for_peer(&old.key);
                tracing::info!(tab_id = %tab_id, "Replaced existing browser session");
            }
            bridge.metrics.connection_accepted();
            tracing::info!(tab_id = %tab_id, "Browser connected");

            handle.send(&json!({
                "type": "connection_established",
                "tabId": tab_id,
            }));
            // Late pickup: deliver messages queued while no tab was live.
            for msg in bridge.channel.drain_for_browser() {
                handle.send(&msg.to_browser_frame());
            }

            run_peer(socket, bridge, handle, PeerKind::Browser).await;
        }

        Admission::PendingHandshake => match await_handshake(&mut socket, &bridge).await {
            Ok((client_id, capabilities)) => {
                let (handle, replaced) = bridge
                    .registry
                    .register_extension(&client_id, &capabilities);
                if let Some(old) = replaced {
                    bridge.correlation.cancel_for_peer(&old.key);
                    tracing::info!(client_id = %client_id, "Replaced existing extension session");
                }
                bridge.metrics.connection_accepted();
                tracing::info!(
                    client_id = %client_id,
                    capabilities = capabilities.len(),
                    "Extension connected"
                );

                handle.send(&json!({
                    "type": "handshake_ack",
                    "clientId": client_id,
                }));

                run_peer(socket, bridge, handle, PeerKind::Extension).await;
            }
            Err((code, reason)) => {
                bridge.metrics.connection_rejected();
                let _ = socket
                    .send(WsMessage::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })))
                    .await;
            }
        },
    }
}

/// An unauthenticated peer may only send a handshake frame, and must do so
/// promptly.
async fn await_handshake(
    socket: &mut WebSocket,
    bridge: &Arc<BridgeState>,
) -> Result<(String, Vec<arbor_core::frames::ExtensionCapability>), (u16, &'static str)> {
    let first = tokio::time::timeout(HANDSHAKE_DEADLINE, socket.recv())
        .await
        .map_err(|_| (CLOSE_HANDSHAKE, "handshake required"))?;

    let text = match first {
        Some(Ok(WsMessage::Text(text))) => text.to_string(),
        _ => return Err((CLOSE_HANDSHAKE, "handshake required")),
    };

    match serde_json::from_str::<ExtensionFrame>(&text) {
        Ok(ExtensionFrame::Handshake {
            client_type,
            client_id,
            pairing_token,
            capabilities,
        }) => {
            if client_type != "extension" {
                return Err((CLOSE_HANDSHAKE, "unsupported client type"));
            }
            if !bridge.config.token_matches(&pairing_token) {
                tracing::warn!(client_id = %client_id, "Extension presented invalid pairing token");
                return Err((CLOSE_REJECTED_CREDENTIAL, "invalid pairing token"));
            }
            Ok((client_id, capabilities))
        }
        _ => Err((CLOSE_HANDSHAKE, "handshake required")),
    }
}

/// Per-connection reader/writer split. The writer owns the socket sink and
/// drains the peer's outbound queue; the reader feeds frames to the
/// handlers in arrival order. Closing the peer wakes both tasks.
async fn run_peer(
    socket: WebSocket,
    bridge: Arc<BridgeState>,
    handle: Arc<PeerHandle>,
    kind: PeerKind,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_queue = Arc::clone(&handle.queue);
    let writer = tokio::spawn(async move {
        while let Some(item) = writer_queue.recv().await {
            match item {
                Outbound::Frame(text) => {
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Ping => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close { code, reason } => {
                    let _ = ws_tx
                        .send(WsMessage::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    let reader_bridge = Arc::clone(&bridge);
    let reader_handle = Arc::clone(&handle);
    let reader = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = reader_handle.cancel.cancelled() => break,
                _ = reader_bridge.shutdown.cancelled() => break,
                msg = ws_rx.next() => match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        dispatch_text(&reader_bridge, &reader_handle, kind, text.as_str()).await;
                    }
                    Some(Ok(WsMessage::Binary(bytes))) => {
                        if let Ok(text) = String::from_utf8(bytes.to_vec()) {
                            dispatch_text(&reader_bridge, &reader_handle, kind, &text).await;
                        }
                    }
                    Some(Ok(WsMessage::Pong(_))) => reader_handle.record_heartbeat(),
                    Some(Ok(WsMessage::Ping(_))) => {} // axum answers pings itself
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(_)) => break,
                },
            }
        }
    });

    // Either task ending tears the connection down.
    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    handle.queue.close();
    handle.cancel.cancel();
    bridge.drop_peer(&handle, "closed");
}

async fn dispatch_text(
    bridge: &Arc<BridgeState>,
    handle: &Arc<PeerHandle>,
    kind: PeerKind,
    text: &str,
) {
    match kind {
        PeerKind::Browser => handlers::handle_browser_text(bridge, handle, text).await,
        PeerKind::Extension => handlers::handle_extension_text(bridge, handle, text).await,
    }
}

/// Liveness probe with registry and queue counts.
async fn health_handler(State(app): State<AppState>) -> impl IntoResponse {
    let state = &app.bridge;
    axum::Json(json!({
        "status": "healthy",
        "browsers": state.registry.browser_count(),
        "extensions": state.registry.extension_count(),
        "inFlightForwards": state.correlation.len(),
        "pendingTasks": state.tasks.pending_len(),
        "metrics": state.metrics.snapshot(),
    }))
}
