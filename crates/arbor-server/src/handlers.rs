//! Inbound peer frame handling: typed frames and bare JSON-RPC replies.

use std::sync::Arc;

use serde_json::{json, Value};

use arbor_core::frames::{classify_peer_text, BrowserFrame, ExtensionFrame, PeerText};
use arbor_core::ids::RequestId;

use crate::correlate::PeerReply;
use crate::dispatch;
use crate::peer::PeerHandle;
use crate::state::BridgeState;
use crate::tasks::TaskKind;

/// Process one text frame from a browser tab.
pub async fn handle_browser_text(state: &Arc<BridgeState>, peer: &Arc<PeerHandle>, text: &str) {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(peer = %peer.key, error = %e, "Dropped malformed browser frame");
            state.metrics.frame_dropped();
            return;
        }
    };

    match classify_peer_text(&value) {
        PeerText::RpcReply => deliver_reply(state, &value),
        PeerText::Typed => match serde_json::from_value::<BrowserFrame>(value) {
            Ok(frame) => handle_browser_frame(state, peer, frame).await,
            Err(e) => {
                tracing::warn!(peer = %peer.key, error = %e, "Dropped unrecognized browser frame");
                state.metrics.frame_dropped();
            }
        },
        PeerText::Unknown => {
            tracing::warn!(peer = %peer.key, "Dropped untyped browser frame");
            state.metrics.frame_dropped();
        }
    }
}

async fn handle_browser_frame(
    state: &Arc<BridgeState>,
    peer: &Arc<PeerHandle>,
    frame: BrowserFrame,
) {
    match frame {
        BrowserFrame::TaskSubmit {
            agent_id,
            prompt,
            requested_capabilities,
        } => {
            let tab_id = match &peer.key {
                crate::peer::PeerKey::Browser(tab) => tab.clone(),
                _ => "default".to_string(),
            };
            let submitted = state.tasks.submit(
                &tab_id,
                &agent_id,
                &prompt,
                requested_capabilities,
                TaskKind::Agent,
            );
            state.metrics.task_submitted();
            peer.send(&submitted.ack);
            state.registry.broadcast_to_browsers(&submitted.broadcast);
        }

        BrowserFrame::TaskAcknowledge {
            task_id,
            action,
            selected_ops,
        } => match state.tasks.acknowledge(&task_id, action, selected_ops) {
            Ok(acked) => {
                if acked.changed {
                    state.registry.broadcast_to_browsers(&acked.broadcast);
                } else {
                    peer.send(&acked.broadcast);
                }
            }
            Err(message) => {
                peer.send(&json!({
                    "type": "error",
                    "error": "task_not_completed",
                    "message": message,
                }));
            }
        },

        BrowserFrame::TbMessage { message, context } => {
            let id = state.channel.push_from_browser(&message, context);
            peer.send(&json!({"type": "message_queued", "messageId": id}));
        }

        BrowserFrame::GetCcCapabilities {} => {
            let view = crate::capabilities::render(&state.probe_context());
            peer.send(&json!({
                "type": "cc_capabilities",
                "capabilities": view["capabilities"],
            }));
        }

        BrowserFrame::CcActionRequest { action, params } => {
            let tab_id = match &peer.key {
                crate::peer::PeerKey::Browser(tab) => tab.clone(),
                _ => "default".to_string(),
            };
            let submitted = state.tasks.submit(
                &tab_id,
                &action,
                &json!({"action": action, "params": params}).to_string(),
                Vec::new(),
                TaskKind::ActionRequest,
            );
            state.metrics.task_submitted();
            peer.send(&json!({
                "type": "action_request_queued",
                "taskId": submitted.task_id,
            }));
            state.registry.broadcast_to_browsers(&submitted.broadcast);
        }

        BrowserFrame::OpenFile { path } => {
            let payload = state
                .providers
                .opener
                .open(&path)
                .await
                .unwrap_or_else(|e| e.to_payload());
            peer.send(&json!({"type": "open_file_result", "payload": payload}));
        }

        BrowserFrame::GmailRequest {
            request_id,
            op,
            args,
        } => {
            let payload = run_gmail_op(state, &op, &args).await;
            peer.send(&json!({
                "type": "gmail_response",
                "requestId": request_id,
                "payload": payload,
            }));
        }

        BrowserFrame::ExtensionRequest {
            request_id,
            action,
            params,
        } => match dispatch::begin_extension_forward(state, &action, &params) {
            Ok(rx) => {
                // Settle off this reader so a slow extension never blocks
                // the browser's frame processing.
                let state = Arc::clone(state);
                let peer = Arc::clone(peer);
                tokio::spawn(async move {
                    match dispatch::settle_forward(&state, rx.await) {
                        Ok(result) => {
                            let result = dispatch::compress_capture_reply(
                                result,
                                state.config.capture_size_limit,
                            );
                            peer.send(&json!({
                                "type": "extension_response",
                                "requestId": request_id,
                                "result": result,
                            }));
                        }
                        Err(err) => {
                            let message = match err {
                                dispatch::DispatchError::App(m)
                                | dispatch::DispatchError::InvalidParams(m) => m,
                            };
                            peer.send(&json!({
                                "type": "extension_error",
                                "requestId": request_id,
                                "error": message,
                            }));
                        }
                    }
                });
            }
            Err(message) => {
                peer.send(&json!({
                    "type": "extension_error",
                    "requestId": request_id,
                    "error": message,
                }));
            }
        },

        BrowserFrame::Ping {} => {
            peer.record_heartbeat();
            peer.send(&json!({"type": "pong"}));
        }
    }
}

/// Process one text frame from an authenticated extension.
pub async fn handle_extension_text(state: &Arc<BridgeState>, peer: &Arc<PeerHandle>, text: &str) {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(peer = %peer.key, error = %e, "Dropped malformed extension frame");
            state.metrics.frame_dropped();
            return;
        }
    };

    if classify_peer_text(&value) == PeerText::RpcReply {
        deliver_reply(state, &value);
        return;
    }

    match serde_json::from_value::<ExtensionFrame>(value) {
        Ok(ExtensionFrame::Ping {}) => {
            peer.record_heartbeat();
            peer.send(&json!({"type": "pong"}));
        }
        Ok(ExtensionFrame::Response { id, result, error }) => {
            deliver_reply(
                state,
                &json!({"id": id, "result": result, "error": error}),
            );
        }
        Ok(ExtensionFrame::ManualCapture { data }) => {
            let client_id = match &peer.key {
                crate::peer::PeerKey::Extension(id) => id.clone(),
                _ => String::new(),
            };
            state.registry.broadcast_to_browsers(&json!({
                "type": "manual_capture",
                "clientId": client_id,
                "data": data,
            }));
        }
        Ok(ExtensionFrame::Handshake { .. }) => {
            tracing::warn!(peer = %peer.key, "Ignored repeated handshake");
        }
        Err(e) => {
            tracing::warn!(peer = %peer.key, error = %e, "Dropped unrecognized extension frame");
            state.metrics.frame_dropped();
        }
    }
}

/// Correlate a JSON-RPC reply back to its waiter. Orphans are logged and
/// discarded.
fn deliver_reply(state: &Arc<BridgeState>, value: &Value) {
    let Some(id) = value.get("id").and_then(|v| v.as_str()) else {
        tracing::warn!("Dropped reply with non-string id");
        state.metrics.frame_dropped();
        return;
    };
    let id = RequestId::from(id);
    let reply = PeerReply {
        result: value.get("result").filter(|v| !v.is_null()).cloned(),
        error: value.get("error").filter(|v| !v.is_null()).cloned(),
    };
    if !state.correlation.satisfy(&id, reply) {
        tracing::warn!(id = %id, "Dropped orphan reply (late or unknown)");
        state.metrics.frame_dropped();
    }
}

async fn run_gmail_op(state: &Arc<BridgeState>, op: &str, args: &Value) -> Value {
    let mail = &state.providers.mail;
    let outcome = match op {
        "search" => {
            let query = args.get("query").and_then(|v| v.as_str()).unwrap_or("");
            let max = args
                .get("maxResults")
                .and_then(|v| v.as_u64())
                .map(|v| v as u32);
            mail.search(query, max).await
        }
        "get_message" => match args.get("messageId").and_then(|v| v.as_str()) {
            Some(id) => mail.get_message(id).await,
            None => return missing_field_payload("messageId"),
        },
        "archive" => match args.get("messageId").and_then(|v| v.as_str()) {
            Some(id) => mail.archive(id).await,
            None => return missing_field_payload("messageId"),
        },
        "mark_read" => match args.get("messageId").and_then(|v| v.as_str()) {
            Some(id) => mail.mark_read(id).await,
            None => return missing_field_payload("messageId"),
        },
        other => {
            return json!({
                "success": false,
                "error": "unknown_operation",
                "message": format!("Unknown mail operation: {other}"),
            })
        }
    };
    outcome.unwrap_or_else(|e| e.to_payload())
}

fn missing_field_payload(field: &str) -> Value {
    json!({
        "success": false,
        "error": "invalid_arguments",
        "message": format!("Missing required field: {field}"),
    })
}
