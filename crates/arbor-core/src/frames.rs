use serde::{Deserialize, Serialize};
use serde_json::Value;

// Close codes carry application meaning on the peer channel.
pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_GOING_AWAY: u16 = 1001;
pub const CLOSE_REJECTED_ORIGIN: u16 = 4001;
pub const CLOSE_REJECTED_CREDENTIAL: u16 = 4002;
pub const CLOSE_HANDSHAKE: u16 = 4003;
pub const CLOSE_RATE_LIMITED: u16 = 4004;

/// Typed frames received from a browser tab.
///
/// Browser frames either carry a `type` tag (handled here) or are bare
/// JSON-RPC responses to a forwarded call (no `type`, an `id`) — those are
/// recognized by [`classify_peer_text`] before deserialization is attempted.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum BrowserFrame {
    #[serde(rename = "task.submit", rename_all = "camelCase")]
    TaskSubmit {
        agent_id: String,
        prompt: String,
        #[serde(default)]
        requested_capabilities: Vec<String>,
    },

    #[serde(rename = "task.acknowledge", rename_all = "camelCase")]
    TaskAcknowledge {
        task_id: String,
        action: UserAction,
        #[serde(default)]
        selected_ops: Vec<usize>,
    },

    /// Browser → assistant direct message.
    #[serde(rename = "tb_message", rename_all = "camelCase")]
    TbMessage {
        message: String,
        #[serde(default)]
        context: Value,
    },

    #[serde(rename = "get_cc_capabilities")]
    GetCcCapabilities {},

    /// Enqueued as an action-request task for the assistant to claim.
    #[serde(rename = "cc_action_request", rename_all = "camelCase")]
    CcActionRequest {
        action: String,
        #[serde(default)]
        params: Value,
    },

    /// Browser-initiated local file open (same semantics as the
    /// `open_local_file` tool).
    #[serde(rename = "open_file")]
    OpenFile { path: String },

    /// Browser-initiated mail operation, serviced by the mail provider.
    #[serde(rename = "gmail_request", rename_all = "camelCase")]
    GmailRequest {
        request_id: Value,
        op: String,
        #[serde(default)]
        args: Value,
    },

    /// Browser-originated forward to an extension.
    #[serde(rename = "extension_request", rename_all = "camelCase")]
    ExtensionRequest {
        request_id: Value,
        action: String,
        #[serde(default)]
        params: Value,
    },

    /// Application-level keep-alive.
    #[serde(rename = "ping")]
    Ping {},
}

/// User verdict attached to a completed task on acknowledgement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserAction {
    Approved,
    Rejected,
    Partial,
}

/// Capability descriptor declared by an extension during handshake.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtensionCapability {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Typed frames received from an extension.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ExtensionFrame {
    /// Must be the very first frame on an extension connection.
    #[serde(rename = "handshake", rename_all = "camelCase")]
    Handshake {
        client_type: String,
        client_id: String,
        pairing_token: String,
        #[serde(default)]
        capabilities: Vec<ExtensionCapability>,
    },

    #[serde(rename = "ping")]
    Ping {},

    /// JSON-RPC reply to a bridge-issued request.
    #[serde(rename = "response")]
    Response {
        id: Value,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<Value>,
    },

    /// Unsolicited capture event, relayed to browsers.
    #[serde(rename = "manual_capture", rename_all = "camelCase")]
    ManualCapture {
        #[serde(default)]
        data: Value,
    },
}

/// Coarse classification of a raw peer text frame, decided before any
/// typed deserialization.
#[derive(Debug, PartialEq, Eq)]
pub enum PeerText {
    /// Carries a `type` tag; deserialize as a typed frame.
    Typed,
    /// No `type`, has an `id`: a bare JSON-RPC reply to a forward.
    RpcReply,
    /// Neither; logged and dropped.
    Unknown,
}

pub fn classify_peer_text(value: &Value) -> PeerText {
    if value.get("type").and_then(|t| t.as_str()).is_some() {
        PeerText::Typed
    } else if value.get("id").is_some() {
        PeerText::RpcReply
    } else {
        PeerText::Unknown
    }
}
