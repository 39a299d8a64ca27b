use std::time::Duration;

use serde_json::{json, Value};

/// Provider failure taxonomy. Absence and failure both surface to the
/// assistant as a structured payload, never as an RPC error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// The provider is not configured on this host. Carries the wire
    /// error code and an enablement hint.
    #[error("{message}")]
    Absent {
        code: &'static str,
        message: String,
    },

    #[error("{0} is not installed")]
    NotInstalled(String),

    #[error("not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("command timed out after {}ms", .0.as_millis())]
    CommandTimedOut(Duration),

    #[error("command failed (exit {exit_code}): {stderr}")]
    CommandFailed { exit_code: i32, stderr: String },

    #[error("api error: {0}")]
    Api(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),
}

impl ProviderError {
    /// Machine-parseable error code for the structured payload.
    pub fn code(&self) -> &str {
        match self {
            Self::Absent { code, .. } => code,
            Self::NotInstalled(_) => "not_installed",
            Self::NotAuthenticated(_) => "not_authenticated",
            Self::CommandTimedOut(_) => "command_timed_out",
            Self::CommandFailed { .. } => "command_failed",
            Self::Api(_) => "api_error",
            Self::InvalidPath(_) => "invalid_path",
        }
    }

    /// The structured failure object returned as a successful tool result.
    pub fn to_payload(&self) -> Value {
        json!({
            "success": false,
            "error": self.code(),
            "message": self.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_carries_wire_code() {
        let err = ProviderError::Absent {
            code: "gmail_not_available",
            message: "Set BRIDGE_GMAIL_TOKEN to enable mail tools".into(),
        };
        assert_eq!(err.code(), "gmail_not_available");
        let payload = err.to_payload();
        assert_eq!(payload["success"], false);
        assert_eq!(payload["error"], "gmail_not_available");
        assert!(payload["message"].as_str().unwrap().contains("BRIDGE_GMAIL_TOKEN"));
    }

    #[test]
    fn taxonomy_codes() {
        assert_eq!(ProviderError::NotInstalled("gh".into()).code(), "not_installed");
        assert_eq!(
            ProviderError::NotAuthenticated("run gh auth login".into()).code(),
            "not_authenticated"
        );
        assert_eq!(
            ProviderError::CommandTimedOut(Duration::from_secs(10)).code(),
            "command_timed_out"
        );
        assert_eq!(
            ProviderError::CommandFailed { exit_code: 1, stderr: "boom".into() }.code(),
            "command_failed"
        );
    }

    #[test]
    fn timeout_message_in_ms() {
        let err = ProviderError::CommandTimedOut(Duration::from_secs(10));
        assert!(err.to_string().contains("10000ms"));
    }
}
