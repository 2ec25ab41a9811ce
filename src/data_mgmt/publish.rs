use std::time::Duration;

use crate::{
    constants::topics,
    helpers::backoff_retry,
    interfaces::mqtt::{self, MqttMessage},
};

use super::flush::{FlushError, FlushSink};
use super::payload::RoundPayload;

const CLIENT_PREFIX: &str = "fp-pub-data";

/// Publishes each closed round on `u/data/<category>`
pub struct MqttSink {
    max_elapsed: Option<Duration>,
}

impl MqttSink {
    /// `max_elapsed` bounds the retry time per round; `None` keeps the backoff default
    pub fn new(max_elapsed: Option<Duration>) -> Self {
        Self { max_elapsed }
    }
}

pub fn construct_message(payload: &RoundPayload) -> Result<MqttMessage, serde_json::Error> {
    Ok(MqttMessage::new(
        topics::data_topic(&payload.category),
        serde_json::to_string(payload)?,
    ))
}

impl FlushSink for MqttSink {
    fn name(&self) -> &str {
        "mqtt"
    }

    fn flush(&self, payload: &RoundPayload) -> Result<(), FlushError> {
        let messages = [construct_message(payload)?];
        log::trace!("Publishing messages: {:?}", &messages);

        backoff_retry(
            || mqtt::publish_msgs(&messages, Some(CLIENT_PREFIX), false).map_err(backoff::Error::transient),
            self.max_elapsed,
        )
        .map_err(|e| match e {
            backoff::Error::Permanent(err) | backoff::Error::Transient { err, .. } => err,
        })?;
        Ok(())
    }
}
