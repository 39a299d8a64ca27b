use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC 2.0 request as received from the assistant on stdin.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    /// Requests without an id are notifications and never get a response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC 2.0 response written to the assistant on stdout.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// Standard JSON-RPC error codes.
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
/// Application errors: routing failures and forward timeouts.
pub const APPLICATION_ERROR: i64 = -32000;

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    pub fn parse_error() -> Self {
        Self::error(Value::Null, PARSE_ERROR, "Parse error")
    }

    pub fn method_not_found(id: Value, method: &str) -> Self {
        Self::error(id, METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn invalid_params(id: Value, msg: impl Into<String>) -> Self {
        Self::error(id, INVALID_PARAMS, msg)
    }
}

/// One part of a tool result. The wire shape is the MCP content array;
/// only text parts are produced today.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Wrap a structured payload as a `tools/call` result:
/// `{content:[{type:"text", text:<stringified JSON>}]}`.
pub fn tool_result(payload: &Value) -> Value {
    let text = match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    serde_json::json!({
        "content": [ContentPart::text(text)]
    })
}

/// Extract a required string argument, naming the field on failure.
pub fn require_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("Missing required parameter: {key}"))
}

/// Extract an optional string argument.
pub fn optional_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

/// Extract an optional bool argument.
pub fn optional_bool(params: &Value, key: &str) -> Option<bool> {
    params.get(key).and_then(|v| v.as_bool())
}

/// Extract an optional string-array argument.
pub fn optional_str_array(params: &Value, key: &str) -> Option<Vec<String>> {
    params.get(key).and_then(|v| v.as_array()).map(|arr| {
        arr.iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_request() {
        let line = r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"get_node","arguments":{"node_id":"abc"}}}"#;
        let req: JsonRpcRequest = serde_json::from_str(line).unwrap();
        assert_eq!(req.method, "tools/call");
        assert_eq!(req.id, Some(json!(7)));
        assert!(!req.is_notification());
    }

    #[test]
    fn notification_has_no_id() {
        let line = r#"{"jsonrpc":"2.0","method":"initialized"}"#;
        let req: JsonRpcRequest = serde_json::from_str(line).unwrap();
        assert!(req.is_notification());
    }

    #[test]
    fn success_response_omits_error() {
        let resp = JsonRpcResponse::success(json!(1), json!({"ok": true}));
        let line = serde_json::to_string(&resp).unwrap();
        assert!(line.contains("\"result\""));
        assert!(!line.contains("\"error\""));
        assert!(line.contains("\"jsonrpc\":\"2.0\""));
    }

    #[test]
    fn error_response_omits_result() {
        let resp = JsonRpcResponse::method_not_found(json!(2), "bogus");
        let line = serde_json::to_string(&resp).unwrap();
        assert!(line.contains("-32601"));
        assert!(line.contains("bogus"));
        assert!(!line.contains("\"result\""));
    }

    #[test]
    fn parse_error_has_null_id() {
        let resp = JsonRpcResponse::parse_error();
        assert_eq!(resp.id, Value::Null);
        assert_eq!(resp.error.as_ref().unwrap().code, PARSE_ERROR);
    }

    #[test]
    fn tool_result_stringifies_payload() {
        let payload = json!({"id": "abc", "name": "X"});
        let wrapped = tool_result(&payload);
        assert_eq!(wrapped["content"][0]["type"], "text");
        let text = wrapped["content"][0]["text"].as_str().unwrap();
        let round: Value = serde_json::from_str(text).unwrap();
        assert_eq!(round, payload);
    }

    #[test]
    fn tool_result_passes_strings_through() {
        let wrapped = tool_result(&json!("plain message"));
        assert_eq!(wrapped["content"][0]["text"], "plain message");
    }

    #[test]
    fn content_part_wire_shape() {
        let part = ContentPart::text("hello");
        let v = serde_json::to_value(&part).unwrap();
        assert_eq!(v, json!({"type": "text", "text": "hello"}));
    }

    #[test]
    fn require_str_names_missing_field() {
        let params = json!({"name": "x"});
        let err = require_str(&params, "tabId").unwrap_err();
        assert!(err.contains("tabId"));
    }

    #[test]
    fn optional_helpers() {
        let params = json!({"peek": true, "capabilities": ["webSearch", 3]});
        assert_eq!(optional_bool(&params, "peek"), Some(true));
        assert_eq!(optional_bool(&params, "missing"), None);
        assert_eq!(
            optional_str_array(&params, "capabilities").unwrap(),
            vec!["webSearch".to_string()]
        );
        assert_eq!(optional_str(&params, "peek"), None);
    }
}
