//! solc-broker Binary
//!
//! Runs the session broker behind a TCP listener until interrupted.

use anyhow::Context;
use clap::Parser;
use solc_broker::broker::Broker;
use solc_broker::cache::SledContractCache;
use solc_broker::cli::Cli;
use solc_broker::config::{BrokerConfig, ConfigLoader};
use solc_broker::engine::HttpArtifactLoader;
use solc_broker::logging::init_logging;
use solc_broker::protocol::{self, ClientMessage, Version};
use solc_broker::transport;
use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}", e);
            process::exit(1);
        }
    };

    // Initialize logging early
    if let Err(e) = init_logging(Some(&config.logging)) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    if let Err(e) = run(&cli, config).await {
        error!("Broker failed: {:#}", e);
        eprintln!("{:#}", e);
        process::exit(1);
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<BrokerConfig> {
    let mut config = ConfigLoader::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    Ok(config.validated()?)
}

async fn run(cli: &Cli, config: BrokerConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = config
        .listen
        .parse()
        .with_context(|| format!("invalid listen address {}", config.listen))?;

    let loader = HttpArtifactLoader::new(config.artifacts.clone())?;
    let (mut broker, handle) = Broker::new(Arc::new(loader));
    if config.cache.enabled {
        let cache = SledContractCache::new(&config.cache.path)
            .with_context(|| format!("opening contract cache at {}", config.cache.path.display()))?;
        info!(path = %config.cache.path.display(), "Contract cache opened");
        broker = broker.with_cache(Arc::new(cache));
    }
    let broker_task = broker.spawn();

    let mut preload = cli.preload.clone();
    if preload.is_empty() {
        preload.push(config.default_version.clone());
    }
    let warmup = handle.connect();
    for version in preload {
        info!(version = %version, "Preloading compiler");
        let init = protocol::encode(&ClientMessage::Init {
            version: Version::new(version),
        })?;
        let _ = warmup.outbound.send(init);
    }

    tokio::select! {
        served = transport::bind_and_serve(addr, handle.clone()) => served?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("waiting for ctrl-c")?;
            info!("Shutting down");
        }
    }

    drop(warmup);
    drop(handle);
    broker_task.abort();
    Ok(())
}
