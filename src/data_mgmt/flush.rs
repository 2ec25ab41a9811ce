//! Hand-off of closed rounds to the persistence sinks
use std::sync::Arc;

use kvstore::KVStoreError;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::interfaces::mqtt::MqttError;
use crate::node_mgmt::config::FieldMapping;

use super::payload::{payload_from_flush, RoundFlush, RoundPayload};

#[derive(Error, Debug)]
pub enum FlushError {
    #[error(transparent)]
    KVStore(#[from] KVStoreError),
    #[error("MQTT error: {0}")]
    Mqtt(#[from] MqttError),
    #[error("could not serialize round payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Destination for closed rounds; called on the blocking pool
pub trait FlushSink: Send + Sync {
    fn name(&self) -> &str;

    fn flush(&self, payload: &RoundPayload) -> Result<(), FlushError>;
}

/// Deliver every received flush to all sinks, one round at a time
///
/// Returns the number of rounds processed once the sending side is dropped.
/// A failing sink is logged and does not keep the others from the payload.
pub fn spawn_flush_worker(
    mut rounds: mpsc::UnboundedReceiver<RoundFlush>,
    sinks: Vec<Arc<dyn FlushSink>>,
    refined_fields: Vec<FieldMapping>,
) -> JoinHandle<usize> {
    let refined_fields = Arc::new(refined_fields);
    tokio::spawn(async move {
        let mut processed = 0;
        while let Some(flush) = rounds.recv().await {
            let payload = payload_from_flush(&flush, &refined_fields);
            let sinks = sinks.clone();
            let round_id = flush.round_id;
            let result = tokio::task::spawn_blocking(move || {
                for sink in &sinks {
                    match sink.flush(&payload) {
                        Ok(()) => log::debug!("[round {round_id}] flushed to {}", sink.name()),
                        Err(e) => log::error!("[round {round_id}] {} flush failed: {}", sink.name(), e),
                    }
                }
            })
            .await;
            if let Err(e) = result {
                log::error!("[round {round_id}] flush task failed: {e}");
            }
            processed += 1;
        }
        log::debug!("Flush channel closed after {processed} rounds");
        processed
    })
}
