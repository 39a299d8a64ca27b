use std::collections::VecDeque;

/// Priority attached to an outbound peer frame.
/// When the queue is full, the lowest-priority oldest frame is evicted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum FramePriority {
    /// Progress chatter.
    Low = 0,
    /// Task and message broadcasts.
    Normal = 1,
    /// RPC requests/replies, handshake acks, control frames.
    Critical = 2,
}

/// What the peer writer task sends next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// A serialized JSON text frame.
    Frame(String),
    /// A low-level keep-alive ping.
    Ping,
    /// Close the connection with an application close code, then stop.
    Close { code: u16, reason: String },
}

/// Classify a serialized frame's priority from its content.
pub fn classify_frame(json: &str) -> FramePriority {
    // Forwarded RPC requests and replies must not be evicted.
    if json.contains("\"method\"") || json.contains("\"result\"") || json.contains("\"error\"") {
        return FramePriority::Critical;
    }
    if json.contains("\"handshake_ack\"") || json.contains("\"pong\"") {
        return FramePriority::Critical;
    }
    if json.contains("\"task_progress\"") {
        return FramePriority::Low;
    }
    FramePriority::Normal
}

/// Priority-aware bounded queue feeding one peer's writer task.
///
/// When full, the lowest-priority oldest frame is evicted to make room,
/// unless the new frame is strictly lower priority than everything queued,
/// in which case the new frame itself is dropped.
pub struct OutboundQueue {
    inner: std::sync::Mutex<QueueInner>,
    notify: tokio::sync::Notify,
}

struct QueueInner {
    buffer: VecDeque<(FramePriority, Outbound)>,
    capacity: usize,
    dropped: u64,
    closed: bool,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: std::sync::Mutex::new(QueueInner {
                buffer: VecDeque::with_capacity(capacity),
                capacity,
                dropped: 0,
                closed: false,
            }),
            notify: tokio::sync::Notify::new(),
        }
    }

    /// Enqueue a text frame, classifying its priority from content.
    /// Returns `true` if enqueued.
    pub fn send_frame(&self, json: String) -> bool {
        let priority = classify_frame(&json);
        self.push(priority, Outbound::Frame(json))
    }

    /// Enqueue a keep-alive ping.
    pub fn send_ping(&self) -> bool {
        self.push(FramePriority::Critical, Outbound::Ping)
    }

    /// Enqueue a close frame. The writer sends it and stops.
    pub fn send_close(&self, code: u16, reason: impl Into<String>) -> bool {
        self.push(
            FramePriority::Critical,
            Outbound::Close {
                code,
                reason: reason.into(),
            },
        )
    }

    fn push(&self, priority: FramePriority, item: Outbound) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return false;
        }

        if inner.buffer.len() < inner.capacity {
            inner.buffer.push_back((priority, item));
            drop(inner);
            self.notify.notify_one();
            return true;
        }

        // Buffer full: evict the lowest-priority oldest entry.
        let lowest = inner
            .buffer
            .iter()
            .enumerate()
            .min_by_key(|(_, (p, _))| *p)
            .map(|(i, (p, _))| (i, *p));

        if let Some((idx, lowest_prio)) = lowest {
            if priority >= lowest_prio {
                inner.buffer.remove(idx);
                inner.buffer.push_back((priority, item));
                inner.dropped += 1;
                tracing::debug!(evicted_priority = ?lowest_prio, "Outbound queue evicted frame");
                drop(inner);
                self.notify.notify_one();
                return true;
            }
        }

        inner.dropped += 1;
        false
    }

    /// Wait for the next item. `None` once the queue is closed and drained.
    pub async fn recv(&self) -> Option<Outbound> {
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some((_, item)) = inner.buffer.pop_front() {
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Close the queue. Further sends fail; `recv()` drains, then ends.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        drop(inner);
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().buffer.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.inner.lock().unwrap().dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn fifo_within_capacity() {
        let queue = OutboundQueue::new(8);
        assert!(queue.send_frame(r#"{"type":"task_queued"}"#.into()));
        assert!(queue.send_ping());
        assert_eq!(queue.len(), 2);

        assert!(matches!(queue.recv().await.unwrap(), Outbound::Frame(_)));
        assert!(matches!(queue.recv().await.unwrap(), Outbound::Ping));
    }

    #[tokio::test]
    async fn full_queue_evicts_lowest_priority() {
        let queue = OutboundQueue::new(2);
        queue.send_frame(r#"{"type":"task_progress","taskId":"t"}"#.into()); // Low
        queue.send_frame(r#"{"jsonrpc":"2.0","id":"req_1","method":"get_tree"}"#.into()); // Critical

        // Full; a Normal broadcast evicts the Low progress frame.
        assert!(queue.send_frame(r#"{"type":"task_queued"}"#.into()));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);

        let first = queue.recv().await.unwrap();
        assert!(matches!(first, Outbound::Frame(f) if f.contains("method")));
    }

    #[test]
    fn full_queue_drops_strictly_lower_new_frame() {
        let queue = OutboundQueue::new(2);
        queue.send_frame(r#"{"jsonrpc":"2.0","id":"1","result":{}}"#.into());
        queue.send_frame(r#"{"jsonrpc":"2.0","id":"2","result":{}}"#.into());

        let sent = queue.send_frame(r#"{"type":"task_progress"}"#.into());
        assert!(!sent);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let queue = OutboundQueue::new(8);
        queue.send_frame(r#"{"type":"task_queued"}"#.into());
        queue.send_close(1000, "bye");
        queue.close();

        assert!(matches!(queue.recv().await.unwrap(), Outbound::Frame(_)));
        assert!(matches!(
            queue.recv().await.unwrap(),
            Outbound::Close { code: 1000, .. }
        ));
        assert!(queue.recv().await.is_none());
        assert!(!queue.send_ping());
    }

    #[tokio::test]
    async fn recv_waits_for_send() {
        let queue = Arc::new(OutboundQueue::new(8));
        let waiter = Arc::clone(&queue);
        let handle = tokio::spawn(async move { waiter.recv().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.send_ping();

        let item = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("timeout")
            .expect("join")
            .unwrap();
        assert_eq!(item, Outbound::Ping);
    }

    #[test]
    fn classification() {
        assert_eq!(
            classify_frame(r#"{"jsonrpc":"2.0","id":"req_1","method":"get_node","params":{}}"#),
            FramePriority::Critical
        );
        assert_eq!(
            classify_frame(r#"{"type":"handshake_ack"}"#),
            FramePriority::Critical
        );
        assert_eq!(
            classify_frame(r#"{"type":"task_progress","taskId":"t"}"#),
            FramePriority::Low
        );
        assert_eq!(
            classify_frame(r#"{"type":"task_queued","taskId":"t"}"#),
            FramePriority::Normal
        );
    }
}
