//! Assistant endpoint: newline-delimited JSON-RPC 2.0 on stdio, plus the
//! control plane (initialize / tools / resources).
//!
//! One reader task parses requests; `tools/call` is serviced on spawned
//! tasks so slow forwards never block the stream, and responses go out in
//! satisfaction order. Stdout has a single writer draining a fan-in
//! channel, so the stream is always a sequence of complete JSON lines.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use arbor_core::rpc::{
    tool_result, JsonRpcRequest, JsonRpcResponse, APPLICATION_ERROR, INVALID_PARAMS,
    INVALID_REQUEST,
};
use arbor_core::tools;

use crate::dispatch::{dispatch_tool_call, DispatchError};
use crate::state::BridgeState;

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "arbor-bridge";

const OUTBOUND_BUFFER: usize = 256;

/// Drive the assistant channel until EOF or shutdown.
pub async fn run_assistant_endpoint<R, W>(state: Arc<BridgeState>, reader: R, writer: W)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);

    // Single writer: everything bound for stdout funnels through here.
    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(line) = out_rx.recv().await {
            if writer.write_all(line.as_bytes()).await.is_err()
                || writer.write_all(b"\n").await.is_err()
                || writer.flush().await.is_err()
            {
                break;
            }
        }
    });

    let initialized = Arc::new(AtomicBool::new(false));
    let mut lines = BufReader::new(reader).lines();

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => handle_line(&state, &initialized, &out_tx, &line).await,
                Ok(None) => {
                    tracing::info!("Assistant stream closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Assistant stream read failed");
                    break;
                }
            },
        }
    }

    drop(out_tx);
    let _ = writer_task.await;
}

async fn handle_line(
    state: &Arc<BridgeState>,
    initialized: &Arc<AtomicBool>,
    out_tx: &mpsc::Sender<String>,
    line: &str,
) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let request: JsonRpcRequest = match serde_json::from_str(line) {
        Ok(req) => req,
        Err(e) => {
            tracing::warn!(error = %e, "Dropped unparseable assistant line");
            send(out_tx, &JsonRpcResponse::parse_error()).await;
            return;
        }
    };

    match request.method.as_str() {
        "initialize" => {
            if let Some(id) = request.id {
                send(
                    out_tx,
                    &JsonRpcResponse::success(
                        id,
                        json!({
                            "protocolVersion": PROTOCOL_VERSION,
                            "serverInfo": {
                                "name": SERVER_NAME,
                                "version": env!("CARGO_PKG_VERSION"),
                            },
                            "capabilities": {
                                "tools": {},
                                "resources": {},
                            },
                        }),
                    ),
                )
                .await;
            }
        }

        "initialized" | "notifications/initialized" => {
            initialized.store(true, Ordering::Release);
            tracing::info!("Assistant initialized");
        }

        "tools/list" => {
            if let Some(id) = request.id {
                let tools: Vec<Value> = tools::catalog().iter().map(|t| t.to_wire()).collect();
                send(out_tx, &JsonRpcResponse::success(id, json!({"tools": tools}))).await;
            }
        }

        "resources/list" => {
            if let Some(id) = request.id {
                send(
                    out_tx,
                    &JsonRpcResponse::success(
                        id,
                        json!({
                            "resources": [{
                                "uri": "arbor://status",
                                "name": "Bridge status",
                                "mimeType": "application/json",
                            }],
                        }),
                    ),
                )
                .await;
            }
        }

        "tools/call" => {
            let Some(id) = request.id else {
                // tools/call must carry an id; nothing to correlate otherwise.
                tracing::warn!("Dropped tools/call notification");
                return;
            };
            if !initialized.load(Ordering::Acquire) {
                send(
                    out_tx,
                    &JsonRpcResponse::error(id, INVALID_REQUEST, "Server not initialized"),
                )
                .await;
                return;
            }
            let Some(name) = request
                .params
                .get("name")
                .and_then(|v| v.as_str())
                .map(String::from)
            else {
                send(
                    out_tx,
                    &JsonRpcResponse::invalid_params(id, "Missing required parameter: name"),
                )
                .await;
                return;
            };
            let args = request
                .params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));

            // Serviced off the reader so forwards run concurrently and
            // replies land in satisfaction order.
            let state = Arc::clone(state);
            let out_tx = out_tx.clone();
            tokio::spawn(async move {
                let response = match dispatch_tool_call(&state, &name, &args).await {
                    Ok(payload) => JsonRpcResponse::success(id, tool_result(&payload)),
                    Err(DispatchError::InvalidParams(msg)) => {
                        JsonRpcResponse::error(id, INVALID_PARAMS, msg)
                    }
                    Err(DispatchError::App(msg)) => {
                        JsonRpcResponse::error(id, APPLICATION_ERROR, msg)
                    }
                };
                send(&out_tx, &response).await;
            });
        }

        other => {
            if let Some(id) = request.id {
                send(out_tx, &JsonRpcResponse::method_not_found(id, other)).await;
            } else {
                tracing::debug!(method = other, "Ignored unknown notification");
            }
        }
    }
}

async fn send(out_tx: &mpsc::Sender<String>, response: &JsonRpcResponse) {
    match serde_json::to_string(response) {
        Ok(line) => {
            if out_tx.send(line).await.is_err() {
                tracing::warn!("Assistant writer gone; response dropped");
            }
        }
        Err(e) => tracing::error!(error = %e, "Failed to serialize response"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::config::BridgeConfig;
    use arbor_core::ids::RequestId;
    use arbor_providers::ProviderSet;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    struct Harness {
        state: Arc<BridgeState>,
        input: tokio::io::DuplexStream,
        output: tokio::io::DuplexStream,
        _endpoint: tokio::task::JoinHandle<()>,
    }

    fn harness_with(state: Arc<BridgeState>) -> Harness {
        let (input, endpoint_reader) = tokio::io::duplex(16 * 1024);
        let (endpoint_writer, output) = tokio::io::duplex(16 * 1024);
        let endpoint = tokio::spawn(run_assistant_endpoint(
            Arc::clone(&state),
            endpoint_reader,
            endpoint_writer,
        ));
        Harness {
            state,
            input,
            output,
            _endpoint: endpoint,
        }
    }

    fn harness() -> Harness {
        harness_with(BridgeState::new(
            BridgeConfig::default(),
            ProviderSet::absent(),
        ))
    }

    impl Harness {
        async fn send_line(&mut self, line: &str) {
            use tokio::io::AsyncWriteExt;
            self.input.write_all(line.as_bytes()).await.unwrap();
            self.input.write_all(b"\n").await.unwrap();
        }

        async fn read_response(&mut self) -> Value {
            let mut line = Vec::new();
            loop {
                let mut byte = [0u8; 1];
                let n = tokio::time::timeout(
                    Duration::from_secs(5),
                    self.output.read(&mut byte),
                )
                .await
                .expect("response within deadline")
                .unwrap();
                assert!(n > 0, "stream ended early");
                if byte[0] == b'\n' {
                    break;
                }
                line.push(byte[0]);
            }
            serde_json::from_slice(&line).expect("stdout carries only complete JSON lines")
        }

        async fn initialize(&mut self) {
            self.send_line(r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#)
                .await;
            let init = self.read_response().await;
            assert_eq!(init["result"]["serverInfo"]["name"], SERVER_NAME);
            self.send_line(r#"{"jsonrpc":"2.0","method":"initialized"}"#)
                .await;
        }
    }

    #[tokio::test]
    async fn initialize_and_list_tools() {
        let mut h = harness();
        h.initialize().await;

        h.send_line(r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#)
            .await;
        let resp = h.read_response().await;
        assert_eq!(resp["id"], 2);
        let tools = resp["result"]["tools"].as_array().unwrap();
        assert!(tools.iter().any(|t| t["name"] == "tasks_claimNext"));
        assert!(tools.iter().any(|t| t["name"] == "get_tree"));
        assert!(tools[0]["inputSchema"].is_object());
    }

    #[tokio::test]
    async fn resources_list_is_static() {
        let mut h = harness();
        h.initialize().await;
        h.send_line(r#"{"jsonrpc":"2.0","id":3,"method":"resources/list"}"#)
            .await;
        let resp = h.read_response().await;
        assert_eq!(resp["result"]["resources"][0]["uri"], "arbor://status");
    }

    #[tokio::test]
    async fn parse_error_yields_32700() {
        let mut h = harness();
        h.send_line("this is not json").await;
        let resp = h.read_response().await;
        assert_eq!(resp["error"]["code"], -32700);
        assert!(resp["id"].is_null());
    }

    #[tokio::test]
    async fn unknown_method_yields_32601() {
        let mut h = harness();
        h.send_line(r#"{"jsonrpc":"2.0","id":4,"method":"bogus/method"}"#)
            .await;
        let resp = h.read_response().await;
        assert_eq!(resp["error"]["code"], -32601);
        assert!(resp["error"]["message"]
            .as_str()
            .unwrap()
            .contains("bogus/method"));
    }

    #[tokio::test]
    async fn tools_call_before_initialized_is_rejected() {
        let mut h = harness();
        h.send_line(
            r#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{"name":"tasks_getQueue"}}"#,
        )
        .await;
        let resp = h.read_response().await;
        assert_eq!(resp["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn tools_call_without_name_is_invalid_params() {
        let mut h = harness();
        h.initialize().await;
        h.send_line(r#"{"jsonrpc":"2.0","id":6,"method":"tools/call","params":{}}"#)
            .await;
        let resp = h.read_response().await;
        assert_eq!(resp["error"]["code"], -32602);
        assert!(resp["error"]["message"].as_str().unwrap().contains("name"));
    }

    #[tokio::test]
    async fn provider_absent_tool_call_returns_structured_result() {
        let mut h = harness();
        h.initialize().await;
        h.send_line(
            r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"gmail_archive","arguments":{"messageId":"m1"}}}"#,
        )
        .await;
        let resp = h.read_response().await;
        assert!(resp.get("error").is_none());
        let text = resp["result"]["content"][0]["text"].as_str().unwrap();
        let payload: Value = serde_json::from_str(text).unwrap();
        assert_eq!(payload["success"], false);
        assert_eq!(payload["error"], "gmail_not_available");
    }

    #[tokio::test]
    async fn no_browser_tool_call_returns_routing_error() {
        let mut h = harness();
        h.initialize().await;
        h.send_line(
            r#"{"jsonrpc":"2.0","id":8,"method":"tools/call","params":{"name":"get_tree"}}"#,
        )
        .await;
        let resp = h.read_response().await;
        assert_eq!(resp["error"]["code"], -32000);
        assert_eq!(resp["error"]["message"], "No browser connected");
    }

    #[tokio::test]
    async fn forwarded_call_wraps_reply_as_text_content() {
        let mut h = harness();
        h.initialize().await;
        let (browser, _) = h.state.registry.register_browser("default");

        h.send_line(
            r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"get_node","arguments":{"node_id":"abc"}}}"#,
        )
        .await;

        // Pull the forwarded frame off the browser queue and reply.
        let forwarded = loop {
            match browser.queue.recv().await.unwrap() {
                crate::outbound::Outbound::Frame(f) => break f,
                _ => continue,
            }
        };
        let parsed: Value = serde_json::from_str(&forwarded).unwrap();
        assert_eq!(parsed["jsonrpc"], "2.0");
        assert_eq!(parsed["method"], "get_node");
        let internal = RequestId::from(parsed["id"].as_str().unwrap());
        h.state.correlation.satisfy(
            &internal,
            crate::correlate::PeerReply {
                result: Some(json!({"id": "abc", "name": "X"})),
                error: None,
            },
        );

        let resp = h.read_response().await;
        assert_eq!(resp["id"], 7);
        let text = resp["result"]["content"][0]["text"].as_str().unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(text).unwrap(),
            json!({"id": "abc", "name": "X"})
        );
    }

    #[tokio::test]
    async fn responses_arrive_in_satisfaction_order() {
        let mut h = harness();
        h.initialize().await;
        let (browser, _) = h.state.registry.register_browser("default");

        h.send_line(
            r#"{"jsonrpc":"2.0","id":10,"method":"tools/call","params":{"name":"get_node","arguments":{"node_id":"first"}}}"#,
        )
        .await;
        h.send_line(
            r#"{"jsonrpc":"2.0","id":11,"method":"tools/call","params":{"name":"get_node","arguments":{"node_id":"second"}}}"#,
        )
        .await;

        let mut forwarded = Vec::new();
        while forwarded.len() < 2 {
            match browser.queue.recv().await.unwrap() {
                crate::outbound::Outbound::Frame(f) => {
                    forwarded.push(serde_json::from_str::<Value>(&f).unwrap())
                }
                _ => continue,
            }
        }

        // Satisfy the second request first.
        for want in ["second", "first"] {
            let frame = forwarded
                .iter()
                .find(|f| f["params"]["node_id"] == want)
                .unwrap();
            h.state.correlation.satisfy(
                &RequestId::from(frame["id"].as_str().unwrap()),
                crate::correlate::PeerReply {
                    result: Some(json!({"node": want})),
                    error: None,
                },
            );
            // Let the spawned call task settle before the next satisfy.
            let resp = h.read_response().await;
            let expect_id = if want == "second" { 11 } else { 10 };
            assert_eq!(resp["id"], expect_id);
        }
    }

    #[tokio::test]
    async fn task_lifecycle_via_tools() {
        let mut h = harness();
        h.initialize().await;

        let submitted = h.state.tasks.submit(
            "default",
            "research",
            "collect references",
            vec!["webSearch".to_string()],
            crate::tasks::TaskKind::Agent,
        );

        h.send_line(
            r#"{"jsonrpc":"2.0","id":20,"method":"tools/call","params":{"name":"tasks_claimNext","arguments":{"capabilities":["webSearch","fileRead"]}}}"#,
        )
        .await;
        let resp = h.read_response().await;
        let task: Value =
            serde_json::from_str(resp["result"]["content"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(task["id"], submitted.task_id.as_str());
        assert_eq!(task["state"], "claimed");

        let complete = json!({
            "jsonrpc": "2.0",
            "id": 21,
            "method": "tools/call",
            "params": {
                "name": "tasks_complete",
                "arguments": {
                    "taskId": submitted.task_id.clone(),
                    "summary": "two changes proposed",
                    "proposedOps": [{"op": "add"}, {"op": "update"}],
                },
            },
        });
        h.send_line(&complete.to_string()).await;
        let resp = h.read_response().await;
        let payload: Value =
            serde_json::from_str(resp["result"]["content"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(payload["success"], true);
        assert_eq!(payload["task"]["state"], "completed");
    }
}
