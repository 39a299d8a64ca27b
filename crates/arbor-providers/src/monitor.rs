use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::{MailProvider, ProviderError};

const TRIAGE_QUERY: &str = "is:unread newer_than:1d";
const TRIAGE_BATCH: u32 = 25;

/// Keywords that flag a message as needing attention.
const URGENT_MARKERS: &[&str] = &["urgent", "asap", "action required", "deadline"];

/// Autonomous inbox triage. Runs one pass at a time on demand.
#[async_trait]
pub trait TriageMonitor: Send + Sync {
    async fn status(&self) -> Result<Value, ProviderError>;
    async fn run_once(&self) -> Result<Value, ProviderError>;
}

fn absent() -> ProviderError {
    ProviderError::Absent {
        code: "triage_not_available",
        message: "Triage monitor requires the mail provider; configure mail first.".into(),
    }
}

/// Stub selected while the mail provider is absent.
pub struct AbsentMonitor;

#[async_trait]
impl TriageMonitor for AbsentMonitor {
    async fn status(&self) -> Result<Value, ProviderError> {
        Err(absent())
    }

    async fn run_once(&self) -> Result<Value, ProviderError> {
        Err(absent())
    }
}

#[derive(Default)]
struct MonitorState {
    runs: u64,
    last_run: Option<DateTime<Utc>>,
    last_unread: u64,
    last_flagged: u64,
}

/// Live monitor riding on the mail provider.
pub struct InboxMonitor {
    mail: Arc<dyn MailProvider>,
    state: Mutex<MonitorState>,
}

impl InboxMonitor {
    pub fn new(mail: Arc<dyn MailProvider>) -> Self {
        Self {
            mail,
            state: Mutex::new(MonitorState::default()),
        }
    }

    fn is_urgent(snippet: &str) -> bool {
        let lower = snippet.to_lowercase();
        URGENT_MARKERS.iter().any(|m| lower.contains(m))
    }
}

#[async_trait]
impl TriageMonitor for InboxMonitor {
    async fn status(&self) -> Result<Value, ProviderError> {
        let state = self.state.lock();
        Ok(json!({
            "success": true,
            "runs": state.runs,
            "lastRun": state.last_run.map(|t| t.to_rfc3339()),
            "lastUnread": state.last_unread,
            "lastFlagged": state.last_flagged,
        }))
    }

    async fn run_once(&self) -> Result<Value, ProviderError> {
        let result = self.mail.search(TRIAGE_QUERY, Some(TRIAGE_BATCH)).await?;
        let messages = result
            .get("messages")
            .and_then(|m| m.as_array())
            .cloned()
            .unwrap_or_default();

        let flagged: Vec<Value> = messages
            .iter()
            .filter(|m| {
                m.get("snippet")
                    .and_then(|s| s.as_str())
                    .map(Self::is_urgent)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        let mut state = self.state.lock();
        state.runs += 1;
        state.last_run = Some(Utc::now());
        state.last_unread = messages.len() as u64;
        state.last_flagged = flagged.len() as u64;

        tracing::info!(
            unread = messages.len(),
            flagged = flagged.len(),
            "Triage pass complete"
        );

        Ok(json!({
            "success": true,
            "unread": messages.len(),
            "flagged": flagged,
        }))
    }
}
