use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use arbor_core::config::BridgeConfig;
use arbor_providers::ProviderSet;
use arbor_telemetry::BridgeMetrics;

use crate::capabilities::ProbeContext;
use crate::channel::MessageChannel;
use crate::correlate::CorrelationTable;
use crate::peer::{ConnectionRegistry, PeerHandle, PeerKey};
use crate::tasks::TaskQueue;

/// Everything the bridge's components share. Constructed once; no
/// process-wide globals.
pub struct BridgeState {
    pub config: BridgeConfig,
    pub registry: ConnectionRegistry,
    pub correlation: Arc<CorrelationTable>,
    pub tasks: TaskQueue,
    pub channel: MessageChannel,
    pub providers: ProviderSet,
    pub metrics: BridgeMetrics,
    pub shutdown: CancellationToken,
}

impl BridgeState {
    pub fn new(config: BridgeConfig, providers: ProviderSet) -> Arc<Self> {
        Arc::new(Self {
            registry: ConnectionRegistry::new(config.max_send_queue),
            correlation: CorrelationTable::new(),
            tasks: TaskQueue::new(config.task_history_cap),
            channel: MessageChannel::new(),
            providers,
            metrics: BridgeMetrics::new(),
            shutdown: CancellationToken::new(),
            config,
        })
    }

    /// Fresh probe context for capability availability predicates.
    pub fn probe_context(&self) -> ProbeContext {
        ProbeContext {
            browsers_connected: self.registry.browser_count(),
            extensions_connected: self.registry.extension_count(),
            mail_configured: self.providers.mail.is_configured(),
            repo_available: self.providers.repo.is_available(),
        }
    }

    /// Tear down a peer exactly once: deregister, cancel its in-flight
    /// forwards, and notify the remaining browsers. Safe to call from both
    /// the supervisor and the connection task; the loser is a no-op.
    pub fn drop_peer(&self, handle: &Arc<PeerHandle>, reason: &str) {
        if !self.registry.remove_exact(handle) {
            return;
        }

        let cancelled = self.correlation.cancel_for_peer(&handle.key);
        tracing::info!(peer = %handle.key, reason, cancelled_forwards = cancelled, "Peer disconnected");

        let notification = match &handle.key {
            PeerKey::Browser(tab_id) => json!({
                "type": "peer_disconnected",
                "tabId": tab_id,
                "reason": reason,
            }),
            PeerKey::Extension(client_id) => json!({
                "type": "extension_disconnected",
                "clientId": client_id,
                "reason": reason,
            }),
        };
        self.registry.broadcast_to_browsers(&notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn state() -> Arc<BridgeState> {
        BridgeState::new(BridgeConfig::default(), ProviderSet::absent())
    }

    #[test]
    fn probe_context_reflects_registry() {
        let state = state();
        assert_eq!(state.probe_context().browsers_connected, 0);
        state.registry.register_browser("default");
        assert_eq!(state.probe_context().browsers_connected, 1);
        assert!(!state.probe_context().mail_configured);
    }

    #[tokio::test]
    async fn drop_peer_cancels_forwards_and_notifies_browsers() {
        let state = state();
        let (watcher, _) = state.registry.register_browser("watcher");
        let (ext, _) = state.registry.register_extension("ext-1", &[]);

        let rx = state.correlation.insert(
            arbor_core::ids::RequestId::new(),
            "Extension capture_screen",
            ext.key.clone(),
            Duration::from_secs(15),
        );

        state.drop_peer(&ext, "stale");
        assert_eq!(state.registry.extension_count(), 0);
        assert!(rx.await.unwrap().is_err());

        // The remaining browser saw the disconnect notification.
        let frame = watcher.queue.recv().await.unwrap();
        match frame {
            crate::outbound::Outbound::Frame(json) => {
                assert!(json.contains("extension_disconnected"));
                assert!(json.contains("stale"));
            }
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn drop_peer_is_idempotent() {
        let state = state();
        let (browser, _) = state.registry.register_browser("default");
        state.drop_peer(&browser, "closed");
        // Second drop is a no-op.
        state.drop_peer(&browser, "closed");
        assert_eq!(state.registry.browser_count(), 0);
    }
}
