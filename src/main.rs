//! CLI for relaysub
//!
//! Subcommands:
//! - `serve`: run the embedded WebSocket broker
//! - `relay`: run the relay components against the in-process router

use std::sync::Arc;

use clap::Parser;
use relaysub::bridge::{BridgeConfig, BrokerBridge, WsConnector};
use relaysub::config::{Settings, load_config};
use relaysub::forwarder::{Forwarder, ForwarderConfig};
use relaysub::intercept::{CounterStage, InterceptorChain, UuidInjectorStage};
use relaysub::message::JsonConverter;
use relaysub::plugin::Plugin;
use relaysub::provenance::StageId;
use relaysub::router::LocalRouter;
use relaysub::scheduler::Scheduler;
use relaysub::sender::{LoggingReceiver, PeriodicSender, SenderConfig};
use relaysub::transport::BrokerServer;
use relaysub::utils::logging;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "relaysub", version)]
enum Command {
    /// Run the embedded broker until Ctrl+C
    Serve,
    /// Run the relay until Ctrl+C
    Relay,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cmd = Command::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    logging::init(&settings.logging.level);

    let result = match cmd {
        Command::Serve => run_server(&settings).await,
        Command::Relay => run_relay(&settings).await,
    };
    if let Err(e) = result {
        error!("relaysub failed: {}", e);
        std::process::exit(1);
    }
}

async fn run_server(settings: &Settings) -> relaysub::Result<()> {
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let server = BrokerServer::bind(&addr).await?;
    let shutdown = CancellationToken::new();
    let running = tokio::spawn(server.run(shutdown.clone()));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for Ctrl+C: {}", e);
    }
    info!("Shutdown signal received. Exiting gracefully.");
    shutdown.cancel();
    match running.await {
        Ok(result) => result,
        Err(e) => {
            error!("Broker task failed: {}", e);
            Ok(())
        }
    }
}

async fn run_relay(settings: &Settings) -> relaysub::Result<()> {
    let host_chain = InterceptorChain::new()
        .with_stage(Arc::new(CounterStage::new(StageId::new("host-counter")?)))
        .with_stage(Arc::new(UuidInjectorStage::new(StageId::new("host-uuid")?)));
    let router = Arc::new(LocalRouter::new(host_chain));

    // started in this order, stopped in reverse
    let mut plugins: Vec<Arc<dyn Plugin>> = Vec::new();

    router.register(Arc::new(LoggingReceiver::new())).await;

    let forwarder = Arc::new(Forwarder::new(
        StageId::new("forwarder")?,
        ForwarderConfig::from_settings(&settings.relay)?,
        router.clone(),
    )?);
    router.register(forwarder.clone()).await;
    plugins.push(forwarder);

    if settings.bridge.url.is_some() {
        let bridge = Arc::new(BrokerBridge::new(
            BridgeConfig::from_settings(&settings.bridge)?,
            Arc::new(WsConnector),
            Arc::new(JsonConverter),
            router.clone(),
        ));
        router.register(bridge.clone()).await;
        plugins.push(bridge);
    }

    if settings.sender.enabled {
        let scheduler = Arc::new(Scheduler::from_settings(&settings.scheduler)?);
        plugins.push(Arc::new(PeriodicSender::new(
            StageId::new("periodic-sender")?,
            SenderConfig::from_settings(&settings.sender)?,
            router.clone(),
            scheduler,
        )));
    }

    router.start().await?;
    let mut started: Vec<Arc<dyn Plugin>> = Vec::new();
    for plugin in plugins {
        if let Err(e) = plugin.start().await {
            error!("{} failed to start: {}", plugin.name(), e);
            stop_all(&started, &router).await;
            return Err(e);
        }
        info!("{} started", plugin.name());
        started.push(plugin);
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for Ctrl+C: {}", e);
    }
    info!("Shutdown signal received. Exiting gracefully.");
    stop_all(&started, &router).await;
    Ok(())
}

async fn stop_all(started: &[Arc<dyn Plugin>], router: &LocalRouter) {
    for plugin in started.iter().rev() {
        plugin.stop().await;
    }
    router.stop().await;
}
