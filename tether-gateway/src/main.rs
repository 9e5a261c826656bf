use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::Context as _;
use clap::Parser;
use tether::{BrokerProbe, Gateway, GatewayState, MonotonicClock, MqttTransport, config::GatewayConfig};
use tokio::runtime::Handle;

#[derive(Parser)]
struct Args {
    /// Path to the JSON gateway description
    config: PathBuf,

    /// MQTT broker address, overrides the config file
    #[arg(long)]
    broker: Option<String>,

    /// MQTT client ID, overrides the config file
    #[arg(long)]
    client_id: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tether::log::init();

    let args = Args::parse();

    let mut config = GatewayConfig::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;

    if let Some(broker) = args.broker {
        config.broker = broker;
    }
    if let Some(client_id) = args.client_id {
        config.client_id = client_id;
    }

    let (vars, registry) = config.build().context("invalid gateway description")?;

    tracing::info!(
        broker = %config.broker,
        client_id = %config.client_id,
        properties = registry.len(),
        "Loaded gateway description",
    );

    let transport = MqttTransport::new(&config.client_id, &config.broker, Handle::current());
    let gateway = Gateway::with_registry(
        registry,
        transport,
        BrokerProbe::new(&config.broker),
        MonotonicClock::new(),
    );

    let stop = Arc::new(AtomicBool::new(false));

    let worker = tokio::task::spawn_blocking({
        let stop = stop.clone();
        let interval = config.tick_interval();

        move || run(gateway, vars, &stop, interval)
    });

    tokio::select! {
        res = worker => res.context("gateway thread panicked")?,
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for ctrl-c")?;
            tracing::info!("Shutting down");
            stop.store(true, Ordering::Relaxed);
            Ok(())
        }
    }
}

fn run(
    mut gateway: Gateway<MqttTransport, BrokerProbe>,
    mut vars: tether::Variables,
    stop: &AtomicBool,
    interval: std::time::Duration,
) -> anyhow::Result<()> {
    let mut waiting = false;

    while !stop.load(Ordering::Relaxed) {
        match gateway.tick(&mut vars)? {
            GatewayState::AwaitingTransport if !waiting => {
                tracing::info!(broker = gateway.transport().addr(), "Waiting for broker");
                waiting = true;
            }
            GatewayState::Running if waiting => {
                tracing::info!("Gateway running");
                waiting = false;
            }
            _ => {}
        }

        std::thread::sleep(interval);
    }

    Ok(())
}
