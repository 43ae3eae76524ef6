//! # courier
//!
//! Gateway binary: loads settings, connects to the pub/sub backend, and
//! serves WebSocket clients until Ctrl-C or SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use courier_server::bridge::{BridgeStatus, EventBridge, RedisTopic};
use courier_server::{GatewayServer, Registry};
use courier_settings::GatewaySettings;

/// Real-time fan-out gateway.
#[derive(Parser, Debug)]
#[command(name = "courier", about = "Real-time WebSocket fan-out gateway")]
struct Cli {
    /// Path to a JSON settings file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Redis URL (overrides settings).
    #[arg(long)]
    redis_url: Option<String>,

    /// Topic to subscribe to (overrides settings).
    #[arg(long)]
    topic: Option<String>,
}

impl Cli {
    /// Apply flags on top of loaded settings.
    fn apply(self, settings: &mut GatewaySettings) {
        if let Some(host) = self.host {
            settings.server.host = host;
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(url) = self.redis_url {
            settings.pubsub.url = url;
        }
        if let Some(topic) = self.topic {
            settings.pubsub.topic = topic;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let mut settings = courier_settings::load_settings(args.config.as_deref())
        .context("Failed to load settings")?;
    args.apply(&mut settings);

    courier_core::logging::init_subscriber(&settings.logging.level, settings.logging.format);
    tracing::info!(
        bind = %settings.server.bind_addr(),
        topic = %settings.pubsub.topic,
        default_channel = %settings.connection.default_channel,
        "starting courier"
    );

    let metrics = courier_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let topic = RedisTopic::connect(&settings.pubsub.url, &settings.pubsub.topic)
        .await
        .with_context(|| format!("Failed to subscribe to redis at {}", settings.pubsub.url))?;

    let (registry, _registry_task) = Registry::spawn();

    let GatewaySettings {
        server: server_settings,
        connection,
        pubsub,
        ..
    } = settings;

    let bridge_status = BridgeStatus::new();
    let server = GatewayServer::new(
        server_settings,
        connection,
        registry.clone(),
        bridge_status.clone(),
        metrics,
    );
    let bridge = EventBridge::new(topic, registry, pubsub.retry, server.shutdown().token())
        .with_status(bridge_status);
    let bridge_task = tokio::spawn(bridge.run());

    let (addr, server_task) = server.listen().await.context("Failed to start server")?;
    tracing::info!(%addr, "courier ready");

    courier_server::shutdown::signal().await;
    tracing::info!("shutting down");
    server
        .shutdown()
        .graceful_shutdown(vec![server_task, bridge_task], None)
        .await;

    Ok(())
}
