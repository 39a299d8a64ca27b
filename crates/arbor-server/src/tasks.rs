use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use arbor_core::frames::UserAction;
use arbor_core::ids::TaskId;

/// Task lifecycle. Transitions are monotonic:
/// pending → claimed → completed → acknowledged, or pending → expired.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Claimed,
    Completed,
    Acknowledged,
    Expired,
}

/// What kind of work a task carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Agent,
    ActionRequest,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgress {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutcome {
    pub proposed_ops: Vec<Value>,
    pub summary: String,
    pub citations: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAck {
    pub action: UserAction,
    pub selected_ops: Vec<usize>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub tab_id: String,
    pub agent_id: String,
    pub prompt: String,
    pub requested_capabilities: Vec<String>,
    pub kind: TaskKind,
    pub state: TaskState,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<TaskProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack: Option<TaskAck>,
}

impl Task {
    /// A task matches a claimer when its requested capabilities are a
    /// subset of what the claimer provides. An empty set matches anyone.
    fn matches(&self, provided: &[String]) -> bool {
        self.requested_capabilities
            .iter()
            .all(|cap| provided.contains(cap))
    }
}

/// Result of a submit: the submitter's acknowledgement plus the frame to
/// broadcast. The queue never performs I/O itself.
pub struct Submitted {
    pub task_id: TaskId,
    pub ack: Value,
    pub broadcast: Value,
}

pub struct Acknowledged {
    /// False when this was a repeat acknowledgement (idempotent no-op).
    pub changed: bool,
    pub broadcast: Value,
}

struct QueueInner {
    pending: VecDeque<Task>,
    claimed: Vec<Task>,
    /// Completed / acknowledged / expired, oldest first. Hard-capped at
    /// every transition.
    history: VecDeque<Task>,
}

/// In-memory FIFO of browser-submitted work, claimed by the assistant.
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    history_cap: usize,
}

impl TaskQueue {
    pub fn new(history_cap: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                pending: VecDeque::new(),
                claimed: Vec::new(),
                history: VecDeque::new(),
            }),
            history_cap,
        }
    }

    pub fn submit(
        &self,
        tab_id: &str,
        agent_id: &str,
        prompt: &str,
        requested_capabilities: Vec<String>,
        kind: TaskKind,
    ) -> Submitted {
        let task = Task {
            id: TaskId::new(),
            tab_id: tab_id.to_string(),
            agent_id: agent_id.to_string(),
            prompt: prompt.to_string(),
            requested_capabilities,
            kind,
            state: TaskState::Pending,
            submitted_at: Utc::now(),
            claimed_at: None,
            completed_at: None,
            progress: None,
            result: None,
            ack: None,
        };

        let mut inner = self.inner.lock();
        inner.pending.push_back(task.clone());
        let position = inner.pending.len();
        Self::enforce_cap(&mut inner, self.history_cap);
        drop(inner);

        tracing::info!(task_id = %task.id, agent_id = %task.agent_id, position, "Task queued");
        Submitted {
            ack: json!({
                "type": "task.submitted",
                "taskId": task.id.clone(),
                "status": "queued",
                "position": position,
            }),
            broadcast: json!({
                "type": "task_queued",
                "taskId": task.id.clone(),
                "agentId": task.agent_id,
                "position": position,
                "requestedCapabilities": task.requested_capabilities,
            }),
            task_id: task.id,
        }
    }

    /// Claim the first pending task whose requirements the provided
    /// capability set covers. FIFO among matching candidates.
    pub fn claim_next(&self, provided: &[String]) -> Option<(Value, Value)> {
        let mut inner = self.inner.lock();
        let idx = inner.pending.iter().position(|t| t.matches(provided))?;
        let mut task = inner.pending.remove(idx)?;
        task.state = TaskState::Claimed;
        task.claimed_at = Some(Utc::now());
        inner.claimed.push(task.clone());
        Self::enforce_cap(&mut inner, self.history_cap);
        drop(inner);

        tracing::info!(task_id = %task.id, "Task claimed");
        let task_json = serde_json::to_value(&task).unwrap_or(Value::Null);
        let broadcast = json!({"type": "task_claimed", "taskId": task.id});
        Some((task_json, broadcast))
    }

    pub fn progress(
        &self,
        task_id: &str,
        message: &str,
        percent: Option<f64>,
    ) -> Result<Value, String> {
        let mut inner = self.inner.lock();
        let task = inner
            .claimed
            .iter_mut()
            .find(|t| t.id.as_str() == task_id)
            .ok_or_else(|| format!("Task {task_id} is not claimed"))?;

        task.progress = Some(TaskProgress {
            message: message.to_string(),
            percent,
            updated_at: Utc::now(),
        });
        let broadcast = json!({
            "type": "task_progress",
            "taskId": task.id.clone(),
            "message": message,
            "percent": percent,
        });
        drop(inner);
        Ok(broadcast)
    }

    pub fn complete(
        &self,
        task_id: &str,
        proposed_ops: Vec<Value>,
        summary: &str,
        citations: Vec<String>,
    ) -> Result<(Value, Value), String> {
        let mut inner = self.inner.lock();
        let idx = inner
            .claimed
            .iter()
            .position(|t| t.id.as_str() == task_id)
            .ok_or_else(|| format!("Task {task_id} is not claimed"))?;

        let mut task = inner.claimed.remove(idx);
        task.state = TaskState::Completed;
        task.completed_at = Some(Utc::now());
        let ops_count = proposed_ops.len();
        task.result = Some(TaskOutcome {
            proposed_ops,
            summary: summary.to_string(),
            citations,
        });
        let task_json = serde_json::to_value(&task).unwrap_or(Value::Null);
        let broadcast = json!({
            "type": "task_completed",
            "taskId": task.id.clone(),
            "summary": summary,
            "opsCount": ops_count,
        });
        inner.history.push_back(task);
        Self::enforce_cap(&mut inner, self.history_cap);
        drop(inner);

        tracing::info!(task_id = task_id, ops = ops_count, "Task completed");
        Ok((task_json, broadcast))
    }

    /// Acknowledge a completed task. Repeat acknowledgements are
    /// idempotent and keep the first verdict.
    pub fn acknowledge(
        &self,
        task_id: &str,
        action: UserAction,
        selected_ops: Vec<usize>,
    ) -> Result<Acknowledged, String> {
        let mut inner = self.inner.lock();
        let task = inner
            .history
            .iter_mut()
            .find(|t| t.id.as_str() == task_id)
            .ok_or_else(|| format!("Task {task_id} is not completed"))?;

        match task.state {
            TaskState::Completed => {
                task.state = TaskState::Acknowledged;
                task.ack = Some(TaskAck {
                    action,
                    selected_ops,
                });
                let broadcast = json!({
                    "type": "task_acknowledged",
                    "taskId": task.id.clone(),
                    "action": action,
                });
                Self::enforce_cap(&mut inner, self.history_cap);
                Ok(Acknowledged {
                    changed: true,
                    broadcast,
                })
            }
            TaskState::Acknowledged => {
                let action = task.ack.as_ref().map(|a| a.action).unwrap_or(action);
                Ok(Acknowledged {
                    changed: false,
                    broadcast: json!({
                        "type": "task_acknowledged",
                        "taskId": task.id.clone(),
                        "action": action,
                    }),
                })
            }
            _ => Err(format!("Task {task_id} is not completed")),
        }
    }

    /// Expire pending tasks older than `ttl`. Returns the broadcasts.
    pub fn expire_stale(&self, ttl: std::time::Duration) -> Vec<Value> {
        let cutoff = Utc::now() - chrono::Duration::from_std(ttl).unwrap_or_default();
        let mut inner = self.inner.lock();
        let mut broadcasts = Vec::new();

        while let Some(front) = inner.pending.front() {
            if front.submitted_at >= cutoff {
                break;
            }
            let mut task = inner.pending.pop_front().expect("front exists");
            task.state = TaskState::Expired;
            tracing::warn!(task_id = %task.id, "Pending task expired");
            broadcasts.push(json!({"type": "task_expired", "taskId": task.id.clone()}));
            inner.history.push_back(task);
        }
        if !broadcasts.is_empty() {
            Self::enforce_cap(&mut inner, self.history_cap);
        }
        broadcasts
    }

    /// Queue snapshot for `tasks_getQueue`.
    pub fn snapshot(&self) -> Value {
        let inner = self.inner.lock();
        json!({
            "pending": inner.pending.iter().collect::<Vec<_>>(),
            "claimed": inner.claimed.iter().collect::<Vec<_>>(),
            "completed": inner.history.iter().collect::<Vec<_>>(),
            "counts": {
                "pending": inner.pending.len(),
                "claimed": inner.claimed.len(),
                "completed": inner.history.len(),
            }
        })
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn history_len(&self) -> usize {
        self.inner.lock().history.len()
    }

    /// Hard retention cap, applied at every transition: oldest completed
    /// entries are evicted first.
    fn enforce_cap(inner: &mut QueueInner, cap: usize) {
        while inner.history.len() > cap {
            if let Some(evicted) = inner.history.pop_front() {
                tracing::debug!(task_id = %evicted.id, "Evicted completed task from history");
            }
        }
    }
}
