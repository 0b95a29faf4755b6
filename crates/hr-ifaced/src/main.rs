use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use tokio::sync::{Mutex, broadcast};
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use hr_iface::{
    EventBusUser, IfaceConfig, IfaceEvent, InterfaceEntry, InterfaceRegistry, IpCommandPlatform,
    PrefixEvent, PrefixStore, TokioTimer, run_timer_loop,
};

type SharedRegistry = Arc<Mutex<InterfaceRegistry<IpCommandPlatform, TokioTimer>>>;

fn config_path() -> PathBuf {
    PathBuf::from(
        std::env::var("IFACE_CONFIG_PATH")
            .unwrap_or_else(|_| "/var/lib/server-dashboard/iface-config.json".to_string()),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("hr_ifaced=info,hr_iface=info")),
        )
        .init();

    info!("hr-ifaced starting...");

    let path = config_path();
    let config = if path.exists() {
        IfaceConfig::load_from_file(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?
    } else {
        info!("No config file found at {}, using defaults", path.display());
        IfaceConfig::default()
    };
    info!(
        interfaces = config.interfaces.len(),
        discovery_delay_ms = config.discovery_delay_ms,
        "Config loaded"
    );

    let store = match PrefixStore::open(&config.prefix_store_path) {
        Ok(store) => {
            if let Some(best) = store.get_best(None, None) {
                info!(ifname = %best.ifname, prefix = %best.prefix, "Last recorded prefix");
            }
            Some(store)
        }
        Err(e) => {
            warn!("Prefix store unavailable at {}: {}", config.prefix_store_path, e);
            None
        }
    };

    std::fs::create_dir_all(&config.state_dir)
        .with_context(|| format!("Failed to create state dir {}", config.state_dir))?;
    let (platform, worker) = IpCommandPlatform::new(&config.state_dir);
    let worker_task = tokio::spawn(worker.run());

    let (timer, deadline) = TokioTimer::new();
    let mut registry = InterfaceRegistry::new(platform, timer, &config);

    let bus = Arc::new(EventBusUser::new(256));
    let events = bus.subscribe();
    registry.register_user(bus.clone());

    for entry in &config.interfaces {
        let handle = Some(entry.handle.as_str());
        if let Err(e) = registry.create_or_get(&entry.name, handle, entry.flags) {
            error!(ifname = %entry.name, "Failed to create interface: {}", e);
        }
    }

    let registry: SharedRegistry = Arc::new(Mutex::new(registry));

    let timer_task = tokio::spawn(run_timer_loop(registry.clone(), deadline));
    let events_task = tokio::spawn(log_events(events, store));

    let managed: Vec<InterfaceEntry> = config
        .interfaces
        .iter()
        .filter(|e| !e.handle.is_empty())
        .cloned()
        .collect();
    let carrier_task = tokio::spawn(poll_carrier(
        registry.clone(),
        managed,
        Duration::from_secs(config.carrier_poll_secs.max(1)),
    ));

    wait_for_shutdown().await?;
    info!("Shutting down, removing interfaces...");

    carrier_task.abort();
    timer_task.abort();
    let _ = carrier_task.await;
    let _ = timer_task.await;

    {
        let mut reg = registry.lock().await;
        for name in reg.names() {
            if let Err(e) = reg.remove(&name) {
                warn!(ifname = %name, "Failed to remove interface: {}", e);
            }
        }
    }

    // Dropping the registry closes the job queue and the event channel; let
    // both consumers drain what is left.
    drop(registry);
    drop(bus);
    if tokio::time::timeout(Duration::from_secs(5), worker_task).await.is_err() {
        warn!("ip command worker did not finish in time");
    }
    let _ = tokio::time::timeout(Duration::from_secs(1), events_task).await;

    info!("hr-ifaced stopped");
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    let mut signals = Signals::new([SIGTERM, SIGINT]).context("Failed to install signal handler")?;
    if let Some(signal) = signals.next().await {
        info!(signal, "Received shutdown signal");
    }
    Ok(())
}

/// Log every interface event and remember announced prefixes.
async fn log_events(mut events: broadcast::Receiver<IfaceEvent>, mut store: Option<PrefixStore>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                match serde_json::to_string(&event) {
                    Ok(json) => info!(ifname = event.ifname(), event = %json, "Interface event"),
                    Err(e) => warn!("Failed to serialize interface event: {}", e),
                }
                if let (IfaceEvent::Prefix { ifname, event: PrefixEvent::Announced(prefix) }, Some(store)) =
                    (&event, store.as_mut())
                {
                    if let Err(e) = store.record(ifname, prefix.prefix) {
                        warn!(ifname = %ifname, "Failed to record prefix: {}", e);
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Interface event log lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Feed link state from sysfs into the registry.
async fn poll_carrier(registry: SharedRegistry, interfaces: Vec<InterfaceEntry>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        for entry in &interfaces {
            let up = read_carrier(&entry.handle).await;
            match registry.lock().await.set_carrier(&entry.name, up) {
                Ok(true) => info!(ifname = %entry.name, "Carrier up, border discovery scheduled"),
                Ok(false) => {}
                Err(e) => debug!(ifname = %entry.name, "Carrier update skipped: {}", e),
            }
        }
    }
}

async fn read_carrier(device: &str) -> bool {
    let path = format!("/sys/class/net/{}/carrier", device);
    match tokio::fs::read_to_string(&path).await {
        Ok(value) => value.trim() == "1",
        // Reading carrier of an administratively down link fails with EINVAL.
        Err(_) => false,
    }
}
