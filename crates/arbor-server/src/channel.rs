use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use arbor_core::ids::MessageId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    ToBrowser,
    ToAssistant,
}

/// One queued direct message.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessage {
    pub id: MessageId,
    pub direction: Direction,
    pub message: String,
    pub context: Value,
    pub created_at: DateTime<Utc>,
}

impl DirectMessage {
    fn new(direction: Direction, message: &str, context: Value) -> Self {
        Self {
            id: MessageId::new(),
            direction,
            message: message.to_string(),
            context,
            created_at: Utc::now(),
        }
    }

    /// The unsolicited frame broadcast to browsers for an
    /// assistant-originated message.
    pub fn to_browser_frame(&self) -> Value {
        json!({
            "type": "cc_message",
            "messageId": self.id.clone(),
            "message": self.message,
            "context": self.context,
            "createdAt": self.created_at,
        })
    }
}

struct ChannelInner {
    to_browser: VecDeque<DirectMessage>,
    to_assistant: VecDeque<DirectMessage>,
}

/// Two buffered queues with pickup semantics: messages wait until the
/// other side collects them.
pub struct MessageChannel {
    inner: Mutex<ChannelInner>,
}

impl Default for MessageChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageChannel {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ChannelInner {
                to_browser: VecDeque::new(),
                to_assistant: VecDeque::new(),
            }),
        }
    }

    /// Enqueue an assistant → browser message. The canonical copy stays
    /// queued for late pickup; the caller broadcasts the returned message
    /// to currently-live browsers.
    pub fn send_to_browser(&self, message: &str, context: Value) -> DirectMessage {
        let msg = DirectMessage::new(Direction::ToBrowser, message, context);
        self.inner.lock().to_browser.push_back(msg.clone());
        msg
    }

    /// Enqueue a browser → assistant message.
    pub fn push_from_browser(&self, message: &str, context: Value) -> MessageId {
        let msg = DirectMessage::new(Direction::ToAssistant, message, context);
        let id = msg.id.clone();
        self.inner.lock().to_assistant.push_back(msg);
        id
    }

    /// Assistant pickup. Destructive by default; `peek` leaves the queue
    /// untouched.
    pub fn pickup_for_assistant(&self, peek: bool) -> Vec<DirectMessage> {
        let mut inner = self.inner.lock();
        if peek {
            inner.to_assistant.iter().cloned().collect()
        } else {
            inner.to_assistant.drain(..).collect()
        }
    }

    /// Drain the browser-bound queue for a newly registered tab.
    pub fn drain_for_browser(&self) -> Vec<DirectMessage> {
        self.inner.lock().to_browser.drain(..).collect()
    }

    /// Pending counts: (browser-bound, assistant-bound).
    pub fn pending_counts(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        (inner.to_browser.len(), inner.to_assistant.len())
    }
}
