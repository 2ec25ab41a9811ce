use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use kvstore::{AsyncKVDb, KVDb};
use tokio::sync::mpsc;

use crate::argsets::RunArgs;
use crate::data_mgmt::{spawn_flush_worker, CacheSink, FleetCoordinator, FlushSink, MqttSink};
use crate::device::SessionFactory;
use crate::interfaces::kvpath;
use crate::node_mgmt::config::{self, DeviceDescriptor, FleetConfig, SharedDescriptor};
use crate::node_mgmt::descriptor_store::{load_descriptors, KvDescriptorStore};

/// Poll the configured fleet until interrupted
pub async fn run(args: RunArgs) -> Result<()> {
    let kvs = AsyncKVDb::new(kvpath::SQLITE_STORE.as_path()).await?;
    let config = match &args.config {
        Some(path) => config::from_file(path)?,
        None => config::get_async(&kvs).await?,
    };

    let stored = load_stored_descriptors(&config.category).await?;
    let descriptors = prepare_descriptors(&config, stored, args.port.as_deref());
    let factory = session_factory(&config)?;

    let (flush_tx, flush_rx) = mpsc::unbounded_channel();
    let sinks: Vec<Arc<dyn FlushSink>> = vec![
        Arc::new(CacheSink::default()),
        Arc::new(MqttSink::new(Some(config.schedule.interval()))),
    ];
    let flush_worker = spawn_flush_worker(flush_rx, sinks, config.refined_fields.clone());

    let coordinator = FleetCoordinator::init(
        config.category.clone(),
        config.schedule.clone(),
        descriptors,
        factory.as_ref(),
        flush_tx,
    )?;

    tokio::select! {
        started = coordinator.start() => started?,
        _ = tokio::signal::ctrl_c() => {
            log::info!("Interrupted before the first round");
            return Ok(());
        }
    }
    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down");

    coordinator.stop();
    drop(coordinator);
    let rounds = flush_worker.await?;
    log::info!("Flushed {rounds} round(s)");
    Ok(())
}

async fn load_stored_descriptors(category: &str) -> Result<Vec<DeviceDescriptor>> {
    let category = category.to_string();
    let descriptors = tokio::task::spawn_blocking(move || -> Result<_> {
        let kvs = KVDb::new(kvpath::SQLITE_STORE.as_path())?;
        Ok(load_descriptors(&KvDescriptorStore::new(&kvs), &category)?)
    })
    .await??;
    Ok(descriptors)
}

/// Configured devices first, then stored ones whose id is not taken yet, with the
/// serial port override applied to all of them
fn prepare_descriptors(
    config: &FleetConfig,
    stored: Vec<DeviceDescriptor>,
    port: Option<&str>,
) -> Vec<SharedDescriptor> {
    let mut seen: HashSet<String> = config.devices.iter().map(|d| d.id.clone()).collect();
    let stored = stored.into_iter().filter(|d| {
        let fresh = seen.insert(d.id.clone());
        if !fresh {
            log::warn!("Stored device '{}' is already configured, ignoring it", d.id);
        }
        fresh
    });
    let mut descriptors: Vec<DeviceDescriptor> =
        config.devices.iter().cloned().chain(stored).collect();

    if let Some(port) = port {
        let changed = config::override_serial_port(&mut descriptors, port);
        log::info!("Serial port set to {port} for {changed} device(s)");
    }
    descriptors.into_iter().map(Arc::new).collect()
}

fn session_factory(config: &FleetConfig) -> Result<Box<dyn SessionFactory>> {
    #[cfg(feature = "dev-echo")]
    {
        if config.dev_mode {
            log::info!("Dev mode: devices are simulated by the echo transport");
            return Ok(Box::new(crate::device::echo::EchoSessionFactory));
        }
    }
    Err(anyhow!(
        "no device transport available for category '{}'; set devMode with the dev-echo feature enabled",
        config.category
    ))
}
