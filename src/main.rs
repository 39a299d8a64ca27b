use std::sync::Arc;

use clap::Parser;
use secrecy::SecretString;

use arbor_core::config::{generate_token, BridgeConfig};
use arbor_providers::ProviderSet;
use arbor_server::BridgeState;

/// Local bridge between an AI coding assistant (JSON-RPC on stdio) and
/// tree-outline web app tabs and extension helpers (WebSocket).
#[derive(Parser, Debug)]
#[command(name = "arbor", version)]
struct Args {
    /// Listen port for peer connections. 0 picks an ephemeral port.
    #[arg(long, env = "BRIDGE_PORT", default_value_t = 3456)]
    port: u16,

    /// Shared secret peers must present. Generated when unset.
    #[arg(long, env = "BRIDGE_TOKEN")]
    token: Option<String>,

    /// Allow connections without an Origin header and verbose logs.
    #[arg(long, env = "BRIDGE_DEBUG")]
    debug: bool,

    /// Extra allowed origins, comma-separated.
    #[arg(long, env = "BRIDGE_ALLOWED_ORIGINS", value_delimiter = ',')]
    allowed_origins: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    arbor_telemetry::init_logging(args.debug);

    let mut config = BridgeConfig {
        port: args.port,
        token: SecretString::from(args.token.unwrap_or_else(generate_token)),
        debug: args.debug,
        ..Default::default()
    };
    config.allowed_origins.extend(args.allowed_origins);

    let providers = ProviderSet::from_env();
    let state = BridgeState::new(config, providers);

    let server = arbor_server::start(Arc::clone(&state)).await?;
    tracing::info!(port = server.port, "Bridge ready");

    // Startup banner: one JSON object on stderr so peers can discover the
    // port and token. Stdout stays a pure JSON-RPC stream.
    let banner = serde_json::json!({
        "type": "bridge_ready",
        "port": server.port,
        "token": state.config.token_value(),
        "version": env!("CARGO_PKG_VERSION"),
    });
    eprintln!("{banner}");

    // Assistant channel on stdio.
    let stdio_state = Arc::clone(&state);
    let stdio = tokio::spawn(async move {
        arbor_server::stdio::run_assistant_endpoint(
            stdio_state,
            tokio::io::stdin(),
            tokio::io::stdout(),
        )
        .await;
    });

    shutdown_signal().await;
    tracing::info!("Termination signal received");

    server.shutdown();
    server.drain().await;
    let _ = stdio.await;

    tracing::info!("Bridge stopped");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
