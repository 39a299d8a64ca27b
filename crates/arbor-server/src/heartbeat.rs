//! Heartbeat supervisor: periodic sweep that pings live peers, terminates
//! stale ones, and expires abandoned pending tasks.

use std::sync::Arc;

use arbor_core::frames::CLOSE_NORMAL;

use crate::state::BridgeState;

/// Run one sweep over every live peer. Returns how many were closed as
/// stale. Split out from the loop for direct testing.
pub fn sweep(state: &Arc<BridgeState>) -> usize {
    let stale_budget = state.config.stale_budget;
    let mut closed = 0;

    let peers = state
        .registry
        .browsers_snapshot()
        .into_iter()
        .chain(state.registry.extensions_snapshot());

    for peer in peers {
        if peer.is_fresh(stale_budget) {
            peer.queue.send_ping();
        } else {
            tracing::warn!(peer = %peer.key, "Peer exceeded staleness budget");
            peer.close(CLOSE_NORMAL, "stale");
            state.drop_peer(&peer, "stale");
            state.metrics.stale_peer_closed();
            closed += 1;
        }
    }

    for broadcast in state.tasks.expire_stale(state.config.task_pending_ttl) {
        state.registry.broadcast_to_browsers(&broadcast);
    }

    closed
}

/// Spawn the supervisor loop. Stops when the bridge shuts down.
pub fn start_supervisor(state: Arc<BridgeState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.config.heartbeat_interval);
        ticker.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = state.shutdown.cancelled() => break,
            }

            let closed = sweep(&state);
            let browsers = state.registry.browser_count();
            let extensions = state.registry.extension_count();
            if browsers + extensions > 0 || closed > 0 {
                tracing::info!(
                    browsers,
                    extensions,
                    stale_closed = closed,
                    in_flight = state.correlation.len(),
                    pending_tasks = state.tasks.pending_len(),
                    "Heartbeat sweep"
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::Outbound;
    use arbor_core::config::BridgeConfig;
    use arbor_providers::ProviderSet;
    use std::time::Duration;

    fn state() -> Arc<BridgeState> {
        BridgeState::new(BridgeConfig::default(), ProviderSet::absent())
    }

    #[tokio::test]
    async fn fresh_peers_receive_pings() {
        let state = state();
        let (browser, _) = state.registry.register_browser("default");
        let (ext, _) = state.registry.register_extension("ext-1", &[]);

        let closed = sweep(&state);
        assert_eq!(closed, 0);
        assert!(matches!(browser.queue.recv().await.unwrap(), Outbound::Ping));
        assert!(matches!(ext.queue.recv().await.unwrap(), Outbound::Ping));
    }

    #[tokio::test]
    async fn stale_extension_is_closed_and_announced() {
        let state = state();
        let (browser, _) = state.registry.register_browser("default");
        let (ext, _) = state.registry.register_extension("ext-1", &[]);
        ext.set_last_heartbeat_secs_ago(60);

        let closed = sweep(&state);
        assert_eq!(closed, 1);
        assert_eq!(state.registry.extension_count(), 0);
        assert_eq!(state.metrics.snapshot().stale_peers_closed, 1);

        // The stale peer's writer got the close order.
        let mut saw_close = false;
        while let Some(item) = ext.queue.recv().await {
            if matches!(item, Outbound::Close { .. }) {
                saw_close = true;
                break;
            }
        }
        assert!(saw_close);

        // Browsers were told about the disconnect.
        let mut saw_notification = false;
        loop {
            match browser.queue.recv().await.unwrap() {
                Outbound::Frame(json) if json.contains("extension_disconnected") => {
                    assert!(json.contains("\"reason\":\"stale\""));
                    saw_notification = true;
                    break;
                }
                Outbound::Ping | Outbound::Frame(_) => continue,
                Outbound::Close { .. } => break,
            }
        }
        assert!(saw_notification);
    }

    #[tokio::test]
    async fn heartbeat_refresh_survives_next_sweep() {
        let state = state();
        let (browser, _) = state.registry.register_browser("default");
        browser.set_last_heartbeat_secs_ago(29);

        // Ping received just in time.
        browser.record_heartbeat();
        assert_eq!(sweep(&state), 0);
        assert_eq!(state.registry.browser_count(), 1);
    }

    #[tokio::test]
    async fn sweep_expires_abandoned_pending_tasks() {
        let config = BridgeConfig {
            task_pending_ttl: Duration::ZERO,
            ..Default::default()
        };
        let state = BridgeState::new(config, ProviderSet::absent());
        let (browser, _) = state.registry.register_browser("default");
        state
            .tasks
            .submit("default", "a", "p", Vec::new(), crate::tasks::TaskKind::Agent);

        sweep(&state);
        assert_eq!(state.tasks.pending_len(), 0);

        let mut saw_expired = false;
        for _ in 0..4 {
            match browser.queue.recv().await.unwrap() {
                Outbound::Frame(json) if json.contains("task_expired") => {
                    saw_expired = true;
                    break;
                }
                _ => continue,
            }
        }
        assert!(saw_expired);
    }

    #[tokio::test]
    async fn supervisor_stops_on_shutdown() {
        let state = state();
        let handle = start_supervisor(Arc::clone(&state));
        state.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("supervisor exits")
            .unwrap();
    }
}
