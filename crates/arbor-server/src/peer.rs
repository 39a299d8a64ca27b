use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use arbor_core::frames::{ExtensionCapability, CLOSE_HANDSHAKE};

use crate::outbound::OutboundQueue;

/// Registry key: one live session per tab id, one per extension client id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PeerKey {
    Browser(String),
    Extension(String),
}

impl PeerKey {
    pub fn is_browser(&self) -> bool {
        matches!(self, Self::Browser(_))
    }
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Browser(tab) => write!(f, "browser:{tab}"),
            Self::Extension(client) => write!(f, "extension:{client}"),
        }
    }
}

/// A live, authenticated peer connection.
pub struct PeerHandle {
    pub key: PeerKey,
    pub queue: Arc<OutboundQueue>,
    pub cancel: CancellationToken,
    /// Action names declared at handshake. Empty for browsers.
    pub capabilities: Vec<String>,
    last_heartbeat: AtomicU64,
}

impl PeerHandle {
    fn new(key: PeerKey, queue: Arc<OutboundQueue>, capabilities: Vec<String>) -> Self {
        Self {
            key,
            queue,
            cancel: CancellationToken::new(),
            capabilities,
            last_heartbeat: AtomicU64::new(now_secs()),
        }
    }

    pub fn record_heartbeat(&self) {
        self.last_heartbeat.store(now_secs(), Ordering::Relaxed);
    }

    /// Whether the peer has been heard from within the staleness budget.
    pub fn is_fresh(&self, stale_budget: Duration) -> bool {
        let last = self.last_heartbeat.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) <= stale_budget.as_secs()
    }

    pub fn has_capability(&self, action: &str) -> bool {
        self.capabilities.iter().any(|c| c == action)
    }

    /// Serialize and enqueue a frame. Returns `false` if dropped.
    pub fn send(&self, frame: &Value) -> bool {
        match serde_json::to_string(frame) {
            Ok(json) => self.queue.send_frame(json),
            Err(_) => false,
        }
    }

    /// Ask the writer to close the connection, then cancel both tasks.
    pub fn close(&self, code: u16, reason: &str) {
        self.queue.send_close(code, reason);
        self.queue.close();
        // Give the writer a chance to flush the close frame; the reader is
        // woken via the cancellation token.
        self.cancel.cancel();
    }

    #[cfg(test)]
    pub fn set_last_heartbeat_secs_ago(&self, secs: u64) {
        self.last_heartbeat
            .store(now_secs().saturating_sub(secs), Ordering::Relaxed);
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Two independent indexes of live peers: browsers by tab id, extensions
/// by client id. Insertion happens only after the handshake succeeds.
pub struct ConnectionRegistry {
    browsers: DashMap<String, Arc<PeerHandle>>,
    extensions: DashMap<String, Arc<PeerHandle>>,
    max_send_queue: usize,
}

impl ConnectionRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            browsers: DashMap::new(),
            extensions: DashMap::new(),
            max_send_queue,
        }
    }

    /// Install a browser session. Any prior session for the same tab id is
    /// removed first, closed with 4003, and returned so the caller can
    /// cancel its in-flight forwards.
    pub fn register_browser(&self, tab_id: &str) -> (Arc<PeerHandle>, Option<Arc<PeerHandle>>) {
        let replaced = self.browsers.remove(tab_id).map(|(_, old)| {
            old.close(CLOSE_HANDSHAKE, "replaced by a newer session");
            old
        });

        let handle = Arc::new(PeerHandle::new(
            PeerKey::Browser(tab_id.to_string()),
            Arc::new(OutboundQueue::new(self.max_send_queue)),
            Vec::new(),
        ));
        self.browsers.insert(tab_id.to_string(), Arc::clone(&handle));
        (handle, replaced)
    }

    /// Install an extension session after a successful handshake.
    pub fn register_extension(
        &self,
        client_id: &str,
        capabilities: &[ExtensionCapability],
    ) -> (Arc<PeerHandle>, Option<Arc<PeerHandle>>) {
        let replaced = self.extensions.remove(client_id).map(|(_, old)| {
            old.close(CLOSE_HANDSHAKE, "replaced by a newer session");
            old
        });

        let handle = Arc::new(PeerHandle::new(
            PeerKey::Extension(client_id.to_string()),
            Arc::new(OutboundQueue::new(self.max_send_queue)),
            capabilities.iter().map(|c| c.name.clone()).collect(),
        ));
        self.extensions
            .insert(client_id.to_string(), Arc::clone(&handle));
        (handle, replaced)
    }

    /// Remove a peer, but only if the stored session is this exact handle.
    /// Keeps a replaced session's teardown from evicting its successor.
    /// Returns `true` if the entry was removed; duplicate closes are no-ops.
    pub fn remove_exact(&self, handle: &Arc<PeerHandle>) -> bool {
        match &handle.key {
            PeerKey::Browser(tab) => self
                .browsers
                .remove_if(tab, |_, stored| Arc::ptr_eq(stored, handle))
                .is_some(),
            PeerKey::Extension(client) => self
                .extensions
                .remove_if(client, |_, stored| Arc::ptr_eq(stored, handle))
                .is_some(),
        }
    }

    pub fn browser(&self, tab_id: &str) -> Option<Arc<PeerHandle>> {
        self.browsers.get(tab_id).map(|e| Arc::clone(e.value()))
    }

    /// Deterministic pick when no tab id matches: smallest tab id wins.
    pub fn any_browser(&self) -> Option<Arc<PeerHandle>> {
        self.browsers
            .iter()
            .min_by(|a, b| a.key().cmp(b.key()))
            .map(|e| Arc::clone(e.value()))
    }

    /// First live extension (smallest client id) declaring the action.
    pub fn extension_with(&self, action: &str) -> Option<Arc<PeerHandle>> {
        self.extensions
            .iter()
            .filter(|e| e.value().has_capability(action))
            .min_by(|a, b| a.key().cmp(b.key()))
            .map(|e| Arc::clone(e.value()))
    }

    pub fn browser_count(&self) -> usize {
        self.browsers.len()
    }

    pub fn extension_count(&self) -> usize {
        self.extensions.len()
    }

    /// Snapshot for iteration outside any shard lock.
    pub fn browsers_snapshot(&self) -> Vec<Arc<PeerHandle>> {
        self.browsers.iter().map(|e| Arc::clone(e.value())).collect()
    }

    pub fn extensions_snapshot(&self) -> Vec<Arc<PeerHandle>> {
        self.extensions
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    /// Send a frame to every live browser. Iterates a snapshot so no map
    /// lock is held across the sends.
    pub fn broadcast_to_browsers(&self, frame: &Value) -> usize {
        let json = match serde_json::to_string(frame) {
            Ok(json) => json,
            Err(_) => return 0,
        };
        let mut delivered = 0;
        for peer in self.browsers_snapshot() {
            if peer.queue.send_frame(json.clone()) {
                delivered += 1;
            }
        }
        delivered
    }
}

/// Token-bucket limiter for connection attempts, keyed by source address.
pub struct ConnectRateLimiter {
    buckets: DashMap<IpAddr, std::sync::Mutex<TokenBucket>>,
    max_tokens: u32,
    refill_rate: f64,
}

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl ConnectRateLimiter {
    pub fn new(max_tokens: u32, refill_rate: f64) -> Self {
        Self {
            buckets: DashMap::new(),
            max_tokens,
            refill_rate,
        }
    }

    /// Consume one token for `addr`. Returns `true` if the attempt is allowed.
    pub fn check(&self, addr: IpAddr) -> bool {
        let max = self.max_tokens;
        let rate = self.refill_rate;
        let entry = self.buckets.entry(addr).or_insert_with(|| {
            std::sync::Mutex::new(TokenBucket {
                tokens: max as f64,
                last_refill: Instant::now(),
            })
        });

        let mut bucket = entry.value().lock().unwrap();
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rate).min(max as f64);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::Outbound;
    use serde_json::json;

    #[test]
    fn register_and_lookup_browser() {
        let registry = ConnectionRegistry::new(32);
        let (handle, replaced) = registry.register_browser("default");
        assert!(replaced.is_none());
        assert_eq!(registry.browser_count(), 1);
        assert!(Arc::ptr_eq(&registry.browser("default").unwrap(), &handle));
    }

    #[tokio::test]
    async fn duplicate_tab_id_replaces_older_session() {
        let registry = ConnectionRegistry::new(32);
        let (old, _) = registry.register_browser("default");
        let (new, replaced) = registry.register_browser("default");

        let replaced = replaced.expect("old session returned");
        assert!(Arc::ptr_eq(&replaced, &old));
        assert_eq!(registry.browser_count(), 1);
        assert!(Arc::ptr_eq(&registry.browser("default").unwrap(), &new));

        // The old session was told to close with the handshake code.
        let item = old.queue.recv().await.unwrap();
        assert!(matches!(item, Outbound::Close { code: CLOSE_HANDSHAKE, .. }));
        assert!(old.cancel.is_cancelled());
    }

    #[test]
    fn remove_exact_is_idempotent_and_ptr_checked() {
        let registry = ConnectionRegistry::new(32);
        let (old, _) = registry.register_browser("default");
        let (_new, _) = registry.register_browser("default");

        // The replaced handle cannot evict its successor.
        assert!(!registry.remove_exact(&old));
        assert_eq!(registry.browser_count(), 1);

        let current = registry.browser("default").unwrap();
        assert!(registry.remove_exact(&current));
        assert!(!registry.remove_exact(&current));
        assert_eq!(registry.browser_count(), 0);
    }

    #[test]
    fn extension_capability_lookup() {
        let registry = ConnectionRegistry::new(32);
        let caps = vec![ExtensionCapability {
            name: "capture_screen".into(),
            description: None,
        }];
        let (ext, _) = registry.register_extension("ext-1", &caps);

        assert!(ext.has_capability("capture_screen"));
        let found = registry.extension_with("capture_screen").unwrap();
        assert!(Arc::ptr_eq(&found, &ext));
        assert!(registry.extension_with("read_dom").is_none());
    }

    #[test]
    fn extension_pick_is_deterministic() {
        let registry = ConnectionRegistry::new(32);
        let caps = vec![ExtensionCapability {
            name: "capture_screen".into(),
            description: None,
        }];
        registry.register_extension("ext-b", &caps);
        registry.register_extension("ext-a", &caps);

        let picked = registry.extension_with("capture_screen").unwrap();
        assert_eq!(picked.key, PeerKey::Extension("ext-a".into()));
    }

    #[test]
    fn any_browser_picks_smallest_tab() {
        let registry = ConnectionRegistry::new(32);
        registry.register_browser("zeta");
        registry.register_browser("alpha");
        let picked = registry.any_browser().unwrap();
        assert_eq!(picked.key, PeerKey::Browser("alpha".into()));
    }

    #[test]
    fn broadcast_reaches_every_browser() {
        let registry = ConnectionRegistry::new(32);
        let (b1, _) = registry.register_browser("one");
        let (b2, _) = registry.register_browser("two");
        let (ext, _) = registry.register_extension("ext-1", &[]);

        let delivered = registry.broadcast_to_browsers(&json!({"type": "task_queued"}));
        assert_eq!(delivered, 2);
        assert_eq!(b1.queue.len(), 1);
        assert_eq!(b2.queue.len(), 1);
        assert_eq!(ext.queue.len(), 0);
    }

    #[test]
    fn freshness_tracks_heartbeat() {
        let registry = ConnectionRegistry::new(32);
        let (peer, _) = registry.register_browser("default");
        assert!(peer.is_fresh(Duration::from_secs(30)));

        peer.set_last_heartbeat_secs_ago(45);
        assert!(!peer.is_fresh(Duration::from_secs(30)));

        peer.record_heartbeat();
        assert!(peer.is_fresh(Duration::from_secs(30)));
    }

    #[test]
    fn rate_limiter_enforces_burst_per_address() {
        let limiter = ConnectRateLimiter::new(2, 0.0);
        let a: IpAddr = "127.0.0.1".parse().unwrap();
        let b: IpAddr = "192.168.1.9".parse().unwrap();

        assert!(limiter.check(a));
        assert!(limiter.check(a));
        assert!(!limiter.check(a));
        // Other addresses have their own bucket.
        assert!(limiter.check(b));
    }
}
