use serde_json::{json, Value};

/// Where a tool call is serviced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteClass {
    /// Cooperative task queue, serviced in the bridge.
    TaskQueue,
    /// Local OS file opener.
    Opener,
    /// Mail provider.
    Mail,
    /// Repo CLI provider.
    Repo,
    /// Triage monitor provider.
    Monitor,
    /// Direct message channel + capability registry.
    Channel,
    /// Forwarded to an extension with the required capability.
    ExtensionForward,
    /// Forwarded to a browser tab.
    BrowserForward,
}

/// The routing policy as an explicit finite list of (predicate, route)
/// pairs, evaluated in order. The final entry is the browser-forward
/// catch-all.
const ROUTES: &[(fn(&str) -> bool, RouteClass)] = &[
    (|n| n.starts_with("tasks_"), RouteClass::TaskQueue),
    (|n| n == "open_local_file", RouteClass::Opener),
    (|n| n.starts_with("gmail_"), RouteClass::Mail),
    (|n| n.starts_with("github_"), RouteClass::Repo),
    (|n| n.starts_with("triage_"), RouteClass::Monitor),
    (|n| n.starts_with("cc_"), RouteClass::Channel),
    (|n| n.starts_with("ext_"), RouteClass::ExtensionForward),
    (|_| true, RouteClass::BrowserForward),
];

/// Classify a tool name. Total: unknown names fall through to the
/// browser forward.
pub fn route_for(name: &str) -> RouteClass {
    for (matches, route) in ROUTES {
        if matches(name) {
            return *route;
        }
    }
    RouteClass::BrowserForward
}

/// The extension action behind an `ext_*` tool name.
pub fn extension_action(tool: &str) -> &str {
    tool.strip_prefix("ext_").unwrap_or(tool)
}

/// Static tool definition advertised during initialization.
#[derive(Clone, Debug)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

impl ToolSpec {
    pub fn route(&self) -> RouteClass {
        route_for(self.name)
    }

    /// Wire shape for `tools/list`.
    pub fn to_wire(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema,
        })
    }
}

fn empty_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

/// The static tool catalog, advertised once via `tools/list`.
pub fn catalog() -> Vec<ToolSpec> {
    vec![
        // ── Task queue ──
        ToolSpec {
            name: "tasks_claimNext",
            description: "Claim the next pending task matching the provided capabilities",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "capabilities": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Capabilities the claimer can provide"
                    }
                }
            }),
        },
        ToolSpec {
            name: "tasks_progress",
            description: "Report progress on a claimed task",
            input_schema: json!({
                "type": "object",
                "required": ["taskId", "message"],
                "properties": {
                    "taskId": {"type": "string"},
                    "message": {"type": "string"},
                    "percent": {"type": "number"}
                }
            }),
        },
        ToolSpec {
            name: "tasks_complete",
            description: "Complete a claimed task with proposed operations and a summary",
            input_schema: json!({
                "type": "object",
                "required": ["taskId", "summary"],
                "properties": {
                    "taskId": {"type": "string"},
                    "summary": {"type": "string"},
                    "proposedOps": {"type": "array", "items": {"type": "object"}},
                    "citations": {"type": "array", "items": {"type": "string"}}
                }
            }),
        },
        ToolSpec {
            name: "tasks_getQueue",
            description: "Inspect the task queue",
            input_schema: empty_schema(),
        },
        // ── Local file opener ──
        ToolSpec {
            name: "open_local_file",
            description: "Open a local file with the platform default application",
            input_schema: json!({
                "type": "object",
                "required": ["path"],
                "properties": {"path": {"type": "string"}}
            }),
        },
        // ── Mail provider ──
        ToolSpec {
            name: "gmail_search",
            description: "Search mail with a Gmail query string",
            input_schema: json!({
                "type": "object",
                "required": ["query"],
                "properties": {
                    "query": {"type": "string"},
                    "maxResults": {"type": "integer"}
                }
            }),
        },
        ToolSpec {
            name: "gmail_get_message",
            description: "Fetch a single mail message by id",
            input_schema: json!({
                "type": "object",
                "required": ["messageId"],
                "properties": {"messageId": {"type": "string"}}
            }),
        },
        ToolSpec {
            name: "gmail_archive",
            description: "Archive a mail message",
            input_schema: json!({
                "type": "object",
                "required": ["messageId"],
                "properties": {"messageId": {"type": "string"}}
            }),
        },
        ToolSpec {
            name: "gmail_mark_read",
            description: "Mark a mail message as read",
            input_schema: json!({
                "type": "object",
                "required": ["messageId"],
                "properties": {"messageId": {"type": "string"}}
            }),
        },
        // ── Repo CLI provider ──
        ToolSpec {
            name: "github_repo_view",
            description: "View repository metadata via the gh CLI",
            input_schema: json!({
                "type": "object",
                "required": ["repo"],
                "properties": {"repo": {"type": "string"}}
            }),
        },
        ToolSpec {
            name: "github_pr_list",
            description: "List open pull requests via the gh CLI",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "repo": {"type": "string"},
                    "limit": {"type": "integer"}
                }
            }),
        },
        ToolSpec {
            name: "github_issue_list",
            description: "List open issues via the gh CLI",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "repo": {"type": "string"},
                    "limit": {"type": "integer"}
                }
            }),
        },
        // ── Triage monitor ──
        ToolSpec {
            name: "triage_status",
            description: "Status of the mail triage monitor",
            input_schema: empty_schema(),
        },
        ToolSpec {
            name: "triage_run",
            description: "Run one triage pass over the inbox",
            input_schema: empty_schema(),
        },
        // ── Direct message channel & capabilities ──
        ToolSpec {
            name: "cc_send_message",
            description: "Send a direct message to the browser agent",
            input_schema: json!({
                "type": "object",
                "required": ["message"],
                "properties": {
                    "message": {"type": "string"},
                    "context": {"type": "object"}
                }
            }),
        },
        ToolSpec {
            name: "cc_get_messages",
            description: "Pick up queued messages from the browser agent",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "peek": {
                        "type": "boolean",
                        "description": "Leave messages queued instead of draining"
                    }
                }
            }),
        },
        ToolSpec {
            name: "cc_status",
            description: "Pending message counts and browser connectivity",
            input_schema: empty_schema(),
        },
        ToolSpec {
            name: "cc_get_capabilities",
            description: "Capability families with live availability",
            input_schema: empty_schema(),
        },
        ToolSpec {
            name: "cc_action_request",
            description: "Enqueue an action request task",
            input_schema: json!({
                "type": "object",
                "required": ["action"],
                "properties": {
                    "action": {"type": "string"},
                    "params": {"type": "object"}
                }
            }),
        },
        // ── Extension forward ──
        ToolSpec {
            name: "ext_capture_screen",
            description: "Capture the visible tab via the browser extension",
            input_schema: json!({
                "type": "object",
                "properties": {"format": {"type": "string"}}
            }),
        },
        // ── Browser forward ──
        ToolSpec {
            name: "get_tree",
            description: "Fetch the full tree from the connected tab",
            input_schema: json!({
                "type": "object",
                "properties": {"tabId": {"type": "string"}}
            }),
        },
        ToolSpec {
            name: "get_node",
            description: "Fetch a single node by id",
            input_schema: json!({
                "type": "object",
                "required": ["node_id"],
                "properties": {
                    "node_id": {"type": "string"},
                    "tabId": {"type": "string"}
                }
            }),
        },
        ToolSpec {
            name: "create_node",
            description: "Create a node under a parent",
            input_schema: json!({
                "type": "object",
                "required": ["parent_id", "name"],
                "properties": {
                    "parent_id": {"type": "string"},
                    "name": {"type": "string"},
                    "tabId": {"type": "string"}
                }
            }),
        },
        ToolSpec {
            name: "update_node",
            description: "Update fields on a node",
            input_schema: json!({
                "type": "object",
                "required": ["node_id"],
                "properties": {
                    "node_id": {"type": "string"},
                    "fields": {"type": "object"},
                    "tabId": {"type": "string"}
                }
            }),
        },
        ToolSpec {
            name: "delete_node",
            description: "Delete a node and its children",
            input_schema: json!({
                "type": "object",
                "required": ["node_id"],
                "properties": {
                    "node_id": {"type": "string"},
                    "tabId": {"type": "string"}
                }
            }),
        },
        ToolSpec {
            name: "move_node",
            description: "Move a node to a new parent",
            input_schema: json!({
                "type": "object",
                "required": ["node_id", "new_parent_id"],
                "properties": {
                    "node_id": {"type": "string"},
                    "new_parent_id": {"type": "string"},
                    "position": {"type": "integer"},
                    "tabId": {"type": "string"}
                }
            }),
        },
        ToolSpec {
            name: "search_nodes",
            description: "Search nodes by text",
            input_schema: json!({
                "type": "object",
                "required": ["query"],
                "properties": {
                    "query": {"type": "string"},
                    "tabId": {"type": "string"}
                }
            }),
        },
        ToolSpec {
            name: "open_file_dialog",
            description: "Ask the tab to open its file picker",
            input_schema: json!({
                "type": "object",
                "properties": {"tabId": {"type": "string"}}
            }),
        },
    ]
}
