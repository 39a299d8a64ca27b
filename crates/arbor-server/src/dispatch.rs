//! Tool dispatcher: classifies `tools/call` by name and routes to a local
//! handler or a peer forward.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::oneshot;

use arbor_core::errors::ForwardError;
use arbor_core::ids::RequestId;
use arbor_core::rpc::{optional_bool, optional_str, optional_str_array, require_str};
use arbor_core::tools::{extension_action, route_for, RouteClass};

use crate::correlate::ForwardOutcome;
use crate::state::BridgeState;
use crate::tasks::TaskKind;

/// How a failed dispatch surfaces to the assistant.
#[derive(Debug, PartialEq, Eq)]
pub enum DispatchError {
    /// Missing or malformed argument → -32602.
    InvalidParams(String),
    /// Routing failure, timeout, or peer error → -32000.
    App(String),
}

impl DispatchError {
    fn missing(err: String) -> Self {
        Self::InvalidParams(err)
    }
}

/// Service one `tools/call`. Returns the structured payload to wrap as a
/// tool result, or the error to map onto a JSON-RPC error object.
pub async fn dispatch_tool_call(
    state: &Arc<BridgeState>,
    name: &str,
    args: &Value,
) -> Result<Value, DispatchError> {
    match route_for(name) {
        RouteClass::TaskQueue => handle_tasks(state, name, args),
        RouteClass::Opener => handle_opener(state, args).await,
        RouteClass::Mail => handle_mail(state, name, args).await,
        RouteClass::Repo => handle_repo(state, name, args).await,
        RouteClass::Monitor => handle_monitor(state, name).await,
        RouteClass::Channel => handle_channel(state, name, args),
        RouteClass::ExtensionForward => forward_to_extension(state, name, args).await,
        RouteClass::BrowserForward => forward_to_browser(state, name, args).await,
    }
}

// ── Task queue ──

fn handle_tasks(state: &Arc<BridgeState>, name: &str, args: &Value) -> Result<Value, DispatchError> {
    match name {
        "tasks_claimNext" => {
            let provided = optional_str_array(args, "capabilities").unwrap_or_default();
            match state.tasks.claim_next(&provided) {
                Some((task, broadcast)) => {
                    state.registry.broadcast_to_browsers(&broadcast);
                    Ok(task)
                }
                None => Ok(Value::Null),
            }
        }
        "tasks_progress" => {
            let task_id = require_str(args, "taskId").map_err(DispatchError::missing)?;
            let message = require_str(args, "message").map_err(DispatchError::missing)?;
            let percent = args.get("percent").and_then(|v| v.as_f64());
            let broadcast = state
                .tasks
                .progress(task_id, message, percent)
                .map_err(DispatchError::App)?;
            state.registry.broadcast_to_browsers(&broadcast);
            Ok(json!({"success": true, "taskId": task_id}))
        }
        "tasks_complete" => {
            let task_id = require_str(args, "taskId").map_err(DispatchError::missing)?;
            let summary = require_str(args, "summary").map_err(DispatchError::missing)?;
            let proposed_ops = args
                .get("proposedOps")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            let citations = optional_str_array(args, "citations").unwrap_or_default();
            let (task, broadcast) = state
                .tasks
                .complete(task_id, proposed_ops, summary, citations)
                .map_err(DispatchError::App)?;
            state.registry.broadcast_to_browsers(&broadcast);
            state.metrics.task_completed();
            Ok(json!({"success": true, "task": task}))
        }
        "tasks_getQueue" => Ok(state.tasks.snapshot()),
        other => Err(DispatchError::InvalidParams(format!("Unknown tool: {other}"))),
    }
}

// ── Providers ──

async fn handle_opener(state: &Arc<BridgeState>, args: &Value) -> Result<Value, DispatchError> {
    let path = require_str(args, "path").map_err(DispatchError::missing)?;
    Ok(state
        .providers
        .opener
        .open(path)
        .await
        .unwrap_or_else(|e| e.to_payload()))
}

async fn handle_mail(
    state: &Arc<BridgeState>,
    name: &str,
    args: &Value,
) -> Result<Value, DispatchError> {
    let mail = &state.providers.mail;
    let outcome = match name {
        "gmail_search" => {
            let query = require_str(args, "query").map_err(DispatchError::missing)?;
            let max = args
                .get("maxResults")
                .and_then(|v| v.as_u64())
                .map(|v| v as u32);
            mail.search(query, max).await
        }
        "gmail_get_message" => {
            let id = require_str(args, "messageId").map_err(DispatchError::missing)?;
            mail.get_message(id).await
        }
        "gmail_archive" => {
            let id = require_str(args, "messageId").map_err(DispatchError::missing)?;
            mail.archive(id).await
        }
        "gmail_mark_read" => {
            let id = require_str(args, "messageId").map_err(DispatchError::missing)?;
            mail.mark_read(id).await
        }
        other => return Err(DispatchError::InvalidParams(format!("Unknown tool: {other}"))),
    };
    Ok(outcome.unwrap_or_else(|e| e.to_payload()))
}

async fn handle_repo(
    state: &Arc<BridgeState>,
    name: &str,
    args: &Value,
) -> Result<Value, DispatchError> {
    let repo_provider = &state.providers.repo;
    let repo = optional_str(args, "repo");
    let limit = args
        .get("limit")
        .and_then(|v| v.as_u64())
        .map(|v| v as u32);
    let outcome = match name {
        "github_repo_view" => {
            let repo = require_str(args, "repo").map_err(DispatchError::missing)?;
            repo_provider.repo_view(repo).await
        }
        "github_pr_list" => repo_provider.pr_list(repo, limit).await,
        "github_issue_list" => repo_provider.issue_list(repo, limit).await,
        other => return Err(DispatchError::InvalidParams(format!("Unknown tool: {other}"))),
    };
    Ok(outcome.unwrap_or_else(|e| e.to_payload()))
}

async fn handle_monitor(state: &Arc<BridgeState>, name: &str) -> Result<Value, DispatchError> {
    let monitor = state.providers.monitor();
    let outcome = match name {
        "triage_status" => monitor.status().await,
        "triage_run" => monitor.run_once().await,
        other => return Err(DispatchError::InvalidParams(format!("Unknown tool: {other}"))),
    };
    Ok(outcome.unwrap_or_else(|e| e.to_payload()))
}

// ── Direct message channel & capabilities ──

fn handle_channel(
    state: &Arc<BridgeState>,
    name: &str,
    args: &Value,
) -> Result<Value, DispatchError> {
    match name {
        "cc_send_message" => {
            let message = require_str(args, "message").map_err(DispatchError::missing)?;
            let context = args.get("context").cloned().unwrap_or(Value::Null);
            let queued = state.channel.send_to_browser(message, context);
            let delivered = state
                .registry
                .broadcast_to_browsers(&queued.to_browser_frame());
            Ok(json!({
                "success": true,
                "messageId": queued.id,
                "delivered": delivered,
            }))
        }
        "cc_get_messages" => {
            let peek = optional_bool(args, "peek").unwrap_or(false);
            let messages = state.channel.pickup_for_assistant(peek);
            let count = messages.len();
            let remaining = state.channel.pending_counts().1;
            Ok(json!({
                "messages": messages,
                "count": count,
                "remaining": remaining,
            }))
        }
        "cc_status" => {
            let (to_browser, to_assistant) = state.channel.pending_counts();
            Ok(json!({
                "success": true,
                "pendingToBrowser": to_browser,
                "pendingToAssistant": to_assistant,
                "browsersConnected": state.registry.browser_count(),
                "extensionsConnected": state.registry.extension_count(),
            }))
        }
        "cc_get_capabilities" => Ok(crate::capabilities::render(&state.probe_context())),
        "cc_action_request" => {
            let action = require_str(args, "action").map_err(DispatchError::missing)?;
            let params = args.get("params").cloned().unwrap_or(Value::Null);
            let submitted = state.tasks.submit(
                "assistant",
                action,
                &json!({"action": action, "params": params}).to_string(),
                Vec::new(),
                TaskKind::ActionRequest,
            );
            state.metrics.task_submitted();
            state.registry.broadcast_to_browsers(&submitted.broadcast);
            Ok(json!({
                "success": true,
                "taskId": submitted.task_id,
                "status": "queued",
            }))
        }
        other => Err(DispatchError::InvalidParams(format!("Unknown tool: {other}"))),
    }
}

// ── Forwards ──

/// Forward to a browser tab. Prefers an exact `tabId` match from the
/// arguments, falling back to the deterministic pick.
async fn forward_to_browser(
    state: &Arc<BridgeState>,
    name: &str,
    args: &Value,
) -> Result<Value, DispatchError> {
    let peer = match optional_str(args, "tabId") {
        Some(tab) => state
            .registry
            .browser(tab)
            .or_else(|| state.registry.any_browser()),
        None => state.registry.any_browser(),
    };
    let Some(peer) = peer else {
        return Err(DispatchError::App(ForwardError::no_browser().to_string()));
    };
    if !peer.is_fresh(state.config.stale_budget) {
        return Err(DispatchError::App("Browser connection is stale".into()));
    }

    let rx = begin_forward(state, &peer, name, format!("Operation {name}"), args)?;
    settle_forward(state, rx.await)
}

/// Forward to the first live extension declaring the required action.
/// Oversized capture payloads are rewritten before returning.
async fn forward_to_extension(
    state: &Arc<BridgeState>,
    name: &str,
    args: &Value,
) -> Result<Value, DispatchError> {
    let action = extension_action(name);
    let rx = begin_extension_forward(state, action, args)
        .map_err(DispatchError::App)?;
    let value = settle_forward(state, rx.await)?;
    Ok(compress_capture_reply(value, state.config.capture_size_limit))
}

/// Start a browser-originated extension forward. Shared with the
/// `extension_request` frame handler so both paths behave identically.
pub(crate) fn begin_extension_forward(
    state: &Arc<BridgeState>,
    action: &str,
    params: &Value,
) -> Result<oneshot::Receiver<ForwardOutcome>, String> {
    let peer = state
        .registry
        .extension_with(action)
        .filter(|p| p.is_fresh(state.config.stale_budget))
        .ok_or_else(|| ForwardError::no_extension(action).to_string())?;

    begin_forward(state, &peer, action, format!("Extension {action}"), params)
        .map_err(|e| match e {
            DispatchError::App(msg) | DispatchError::InvalidParams(msg) => msg,
        })
}

/// Allocate an internal id, insert the correlation entry with the tool
/// deadline, and send the request frame to the peer.
fn begin_forward(
    state: &Arc<BridgeState>,
    peer: &Arc<crate::peer::PeerHandle>,
    method: &str,
    label: String,
    params: &Value,
) -> Result<oneshot::Receiver<ForwardOutcome>, DispatchError> {
    let id = RequestId::new();
    let rx = state.correlation.insert(
        id.clone(),
        label,
        peer.key.clone(),
        state.config.forward_timeout,
    );
    state.metrics.forward_started();

    let frame = json!({
        "jsonrpc": "2.0",
        "id": id.clone(),
        "method": method,
        "params": params,
    });
    if !peer.send(&frame) {
        // The peer's queue is closed or refused the frame; undo the entry.
        state.correlation.cancel(&id);
        state.metrics.forward_settled(false);
        state.metrics.frame_dropped();
        return Err(DispatchError::App(format!(
            "Failed to deliver request to {}",
            peer.key
        )));
    }
    Ok(rx)
}

/// Account for a settled forward and convert the outcome.
pub(crate) fn settle_forward(
    state: &Arc<BridgeState>,
    outcome: Result<ForwardOutcome, oneshot::error::RecvError>,
) -> Result<Value, DispatchError> {
    let outcome = outcome.unwrap_or(Err(ForwardError::Cancelled));
    state
        .metrics
        .forward_settled(matches!(outcome, Err(ForwardError::Timeout { .. })));

    match outcome {
        Ok(reply) => {
            if let Some(error) = reply.error {
                let message = error
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(String::from)
                    .unwrap_or_else(|| error.to_string());
                Err(DispatchError::App(message))
            } else {
                Ok(reply.result.unwrap_or(Value::Null))
            }
        }
        Err(err) => Err(DispatchError::App(err.to_string())),
    }
}

/// Rewrite an oversized screen-capture payload to a structured descriptor.
/// The underlying bytes are never decoded.
pub fn compress_capture_reply(value: Value, limit: usize) -> Value {
    const PAYLOAD_FIELDS: &[&str] = &["data", "screenshot", "image", "dataUrl"];

    let oversized: Option<&str> = match &value {
        Value::String(s) if s.len() > limit => Some(s.as_str()),
        Value::Object(map) => PAYLOAD_FIELDS.iter().find_map(|key| {
            map.get(*key)
                .and_then(|v| v.as_str())
                .filter(|s| s.len() > limit)
        }),
        _ => None,
    };

    let Some(payload) = oversized else {
        return value;
    };

    // Base64 expands bytes 4:3; report the decoded size.
    let original_kb = (payload.len() as u64 * 3 / 4) / 1024;
    let preview: String = payload.chars().take(96).collect();
    json!({
        "_compressed": true,
        "_originalSizeKB": original_kb,
        "_message": format!(
            "Screen capture received ({original_kb} KB); payload too large to inline"
        ),
        "_preview": preview,
    })
}
