use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use crate::ProviderError;

/// Environment variable holding a Gmail API access token. The token lives
/// on the bridge host only and is never transported to peers.
pub const GMAIL_TOKEN_ENV: &str = "BRIDGE_GMAIL_TOKEN";

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const DEFAULT_MAX_RESULTS: u32 = 20;

/// Mail operations surfaced to the assistant and to browsers.
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Availability probe; cheap and local, used by the capability registry.
    fn is_configured(&self) -> bool;

    async fn search(&self, query: &str, max_results: Option<u32>) -> Result<Value, ProviderError>;
    async fn get_message(&self, message_id: &str) -> Result<Value, ProviderError>;
    async fn archive(&self, message_id: &str) -> Result<Value, ProviderError>;
    async fn mark_read(&self, message_id: &str) -> Result<Value, ProviderError>;
}

fn absent() -> ProviderError {
    ProviderError::Absent {
        code: "gmail_not_available",
        message: format!(
            "Mail provider is not configured. Set {GMAIL_TOKEN_ENV} with a Gmail API access token to enable gmail_* tools."
        ),
    }
}

/// Stub selected when no mail credentials are present.
pub struct AbsentMail;

#[async_trait]
impl MailProvider for AbsentMail {
    fn is_configured(&self) -> bool {
        false
    }

    async fn search(&self, _query: &str, _max: Option<u32>) -> Result<Value, ProviderError> {
        Err(absent())
    }

    async fn get_message(&self, _id: &str) -> Result<Value, ProviderError> {
        Err(absent())
    }

    async fn archive(&self, _id: &str) -> Result<Value, ProviderError> {
        Err(absent())
    }

    async fn mark_read(&self, _id: &str) -> Result<Value, ProviderError> {
        Err(absent())
    }
}

/// Live adapter over the Gmail REST API.
pub struct GmailClient {
    http: reqwest::Client,
    token: SecretString,
    base_url: String,
}

impl GmailClient {
    pub fn from_env() -> Option<Self> {
        let token = std::env::var(GMAIL_TOKEN_ENV).ok()?;
        if token.is_empty() {
            return None;
        }
        Some(Self::new(SecretString::from(token)))
    }

    pub fn new(token: SecretString) -> Self {
        Self {
            http: reqwest::Client::new(),
            token,
            base_url: GMAIL_API_BASE.to_string(),
        }
    }

    /// Point the client at a different API host. Used by tests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value, ProviderError> {
        let resp = self
            .http
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(self.token.expose_secret())
            .query(query)
            .send()
            .await
            .map_err(|e| ProviderError::Api(e.to_string()))?;
        Self::decode(resp).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, ProviderError> {
        let resp = self
            .http
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(self.token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Api(e.to_string()))?;
        Self::decode(resp).await
    }

    async fn decode(resp: reqwest::Response) -> Result<Value, ProviderError> {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ProviderError::NotAuthenticated(
                "Gmail token rejected; refresh the access token".into(),
            ));
        }
        if !status.is_success() {
            return Err(ProviderError::Api(format!("gmail api {status}: {body}")));
        }
        if body.is_empty() {
            return Ok(json!({}));
        }
        serde_json::from_str(&body).map_err(|e| ProviderError::Api(format!("bad gmail response: {e}")))
    }
}

#[async_trait]
impl MailProvider for GmailClient {
    fn is_configured(&self) -> bool {
        true
    }

    async fn search(&self, query: &str, max_results: Option<u32>) -> Result<Value, ProviderError> {
        let max = max_results.unwrap_or(DEFAULT_MAX_RESULTS).to_string();
        let result = self
            .get(
                "/messages",
                &[("q", query.to_string()), ("maxResults", max)],
            )
            .await?;
        Ok(json!({
            "success": true,
            "messages": result.get("messages").cloned().unwrap_or(json!([])),
            "resultSizeEstimate": result.get("resultSizeEstimate").cloned().unwrap_or(json!(0)),
        }))
    }

    async fn get_message(&self, message_id: &str) -> Result<Value, ProviderError> {
        let result = self
            .get(
                &format!("/messages/{message_id}"),
                &[("format", "metadata".to_string())],
            )
            .await?;
        Ok(json!({"success": true, "message": result}))
    }

    async fn archive(&self, message_id: &str) -> Result<Value, ProviderError> {
        self.post(
            &format!("/messages/{message_id}/modify"),
            json!({"removeLabelIds": ["INBOX"]}),
        )
        .await?;
        Ok(json!({"success": true, "messageId": message_id, "archived": true}))
    }

    async fn mark_read(&self, message_id: &str) -> Result<Value, ProviderError> {
        self.post(
            &format!("/messages/{message_id}/modify"),
            json!({"removeLabelIds": ["UNREAD"]}),
        )
        .await?;
        Ok(json!({"success": true, "messageId": message_id, "read": true}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absent_mail_returns_structured_error() {
        let mail = AbsentMail;
        let err = mail.search("is:unread", None).await.unwrap_err();
        assert_eq!(err.code(), "gmail_not_available");
        let payload = err.to_payload();
        assert_eq!(payload["success"], false);
        assert!(payload["message"].as_str().unwrap().contains(GMAIL_TOKEN_ENV));
    }

    #[test]
    fn absent_mail_is_not_configured() {
        assert!(!AbsentMail.is_configured());
        assert!(GmailClient::new(SecretString::from("tok".to_string())).is_configured());
    }

    #[tokio::test]
    async fn live_client_reports_api_error_on_unreachable_host() {
        // Points at a port nothing listens on; the error must be the
        // api_error taxonomy entry, not a panic or a hang.
        let client = GmailClient::new(SecretString::from("tok".to_string()))
            .with_base_url("http://127.0.0.1:1/gmail/v1/users/me");
        let err = client.archive("m1").await.unwrap_err();
        assert_eq!(err.code(), "api_error");
    }
}
