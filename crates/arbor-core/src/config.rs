use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};

/// Origins accepted without any extra configuration: the hosted app plus
/// the common local dev servers.
pub const DEFAULT_ALLOWED_ORIGINS: &[&str] = &[
    "https://treelisty.app",
    "http://localhost:3000",
    "http://localhost:5173",
];

/// Origin scheme used by the browser extension. Extension pages carry an
/// opaque per-install host, so only the scheme is matched.
pub const EXTENSION_ORIGIN_SCHEME: &str = "chrome-extension://";

/// Bridge configuration, threaded through construction.
#[derive(Clone)]
pub struct BridgeConfig {
    /// Listen port. `0` asks the OS for an ephemeral port.
    pub port: u16,
    /// Shared secret peers must present as the `token` query parameter.
    pub token: SecretString,
    /// Debug mode: allows connections without an Origin header and
    /// lowers the log filter.
    pub debug: bool,
    /// Exact-match origin allow-list.
    pub allowed_origins: Vec<String>,
    /// Accept any loopback origin (localhost / 127.0.0.1) regardless of port.
    pub allow_loopback_origins: bool,
    /// Heartbeat sweep cadence.
    pub heartbeat_interval: Duration,
    /// A peer silent for longer than this is terminated.
    pub stale_budget: Duration,
    /// Deadline applied to forwarded tool calls.
    pub forward_timeout: Duration,
    /// Screen-capture payloads above this many base64 bytes are rewritten
    /// to a compressed descriptor.
    pub capture_size_limit: usize,
    /// Completed tasks retained, oldest evicted first.
    pub task_history_cap: usize,
    /// Pending tasks older than this are expired by the supervisor sweep.
    pub task_pending_ttl: Duration,
    /// Outbound frame queue capacity per peer.
    pub max_send_queue: usize,
    /// Connection attempts allowed per source address (burst).
    pub connect_rate_burst: u32,
    /// Connection-attempt tokens restored per second per source address.
    pub connect_rate_per_sec: f64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: 3456,
            token: SecretString::from(generate_token()),
            debug: false,
            allowed_origins: DEFAULT_ALLOWED_ORIGINS.iter().map(|s| s.to_string()).collect(),
            allow_loopback_origins: true,
            heartbeat_interval: Duration::from_secs(10),
            stale_budget: Duration::from_secs(30),
            forward_timeout: Duration::from_secs(15),
            capture_size_limit: 10 * 1024,
            task_history_cap: 50,
            task_pending_ttl: Duration::from_secs(600),
            max_send_queue: 256,
            connect_rate_burst: 30,
            connect_rate_per_sec: 0.5,
        }
    }
}

impl BridgeConfig {
    /// The shared secret in the clear, for the startup banner and token
    /// comparison. Never log this outside the banner.
    pub fn token_value(&self) -> &str {
        self.token.expose_secret()
    }

    /// Check a presented token against the shared secret.
    pub fn token_matches(&self, presented: &str) -> bool {
        !presented.is_empty() && presented == self.token.expose_secret()
    }

    /// Evaluate an `Origin` header value against the allow policy.
    /// `None` (no header) is accepted only in debug mode.
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        let Some(origin) = origin else {
            return self.debug;
        };
        if self.allowed_origins.iter().any(|o| o == origin) {
            return true;
        }
        if origin.starts_with(EXTENSION_ORIGIN_SCHEME) {
            return true;
        }
        if self.allow_loopback_origins && is_loopback_origin(origin) {
            return true;
        }
        false
    }
}

fn is_loopback_origin(origin: &str) -> bool {
    let rest = origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"));
    let Some(rest) = rest else { return false };
    let host = rest.split(':').next().unwrap_or(rest);
    host == "localhost" || host == "127.0.0.1" || host == "[::1]"
}

/// Generate a fresh shared secret for sessions started without
/// `BRIDGE_TOKEN`.
pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BridgeConfig {
        BridgeConfig {
            token: SecretString::from("secret-token".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn defaults() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.port, 3456);
        assert_eq!(cfg.forward_timeout, Duration::from_secs(15));
        assert_eq!(cfg.stale_budget, Duration::from_secs(30));
        assert_eq!(cfg.task_history_cap, 50);
        assert_eq!(cfg.capture_size_limit, 10240);
    }

    #[test]
    fn generated_token_is_long_enough() {
        let token = generate_token();
        assert_eq!(token.len(), 32);
        assert_ne!(token, generate_token());
    }

    #[test]
    fn token_match() {
        let cfg = config();
        assert!(cfg.token_matches("secret-token"));
        assert!(!cfg.token_matches("wrong"));
        assert!(!cfg.token_matches(""));
    }

    #[test]
    fn origin_exact_match() {
        let cfg = config();
        assert!(cfg.origin_allowed(Some("https://treelisty.app")));
        assert!(!cfg.origin_allowed(Some("https://evil.example")));
    }

    #[test]
    fn origin_loopback_policy() {
        let mut cfg = config();
        assert!(cfg.origin_allowed(Some("http://localhost:9999")));
        assert!(cfg.origin_allowed(Some("http://127.0.0.1:4000")));
        cfg.allow_loopback_origins = false;
        assert!(!cfg.origin_allowed(Some("http://localhost:9999")));
        // Exact list entries still pass.
        assert!(cfg.origin_allowed(Some("http://localhost:3000")));
    }

    #[test]
    fn origin_extension_scheme() {
        let cfg = config();
        assert!(cfg.origin_allowed(Some("chrome-extension://abcdefghijkl")));
    }

    #[test]
    fn missing_origin_only_in_debug() {
        let mut cfg = config();
        assert!(!cfg.origin_allowed(None));
        cfg.debug = true;
        assert!(cfg.origin_allowed(None));
    }

    #[test]
    fn loopback_detection_rejects_lookalikes() {
        assert!(!is_loopback_origin("https://localhost.evil.example"));
        assert!(!is_loopback_origin("ftp://localhost"));
        assert!(is_loopback_origin("http://localhost"));
        assert!(is_loopback_origin("https://127.0.0.1:8443"));
    }
}
