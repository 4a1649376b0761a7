//! Stockpile Kafka - Kafka topic as a [`RecordSource`]
//!
//! Wraps an rdkafka `BaseConsumer` in the blocking pull interface the
//! pipeline loop expects. Each message payload is decoded as one JSON
//! record; payloads that fail to decode are logged and skipped.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;

use stockpile_core::{decode_record, is_shutdown_requested, PipelineError, Record, RecordSource};

/// Kafka consumer settings
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub bootstrap_servers: String,
    pub topic: String,
    pub group_id: String,
    /// `earliest` or `latest`; applies when the group has no committed offset
    pub auto_offset_reset: String,
    /// How long a single poll blocks before checking for shutdown
    pub poll_timeout: Duration,
    /// End the stream after this long without a message (`None` = never)
    pub idle_timeout: Option<Duration>,
    /// Extra librdkafka properties, applied last
    pub properties: BTreeMap<String, String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            topic: "stock-quotes".to_string(),
            group_id: "stockpile".to_string(),
            auto_offset_reset: "earliest".to_string(),
            poll_timeout: Duration::from_secs(1),
            idle_timeout: None,
            properties: BTreeMap::new(),
        }
    }
}

impl KafkaConfig {
    /// librdkafka client configuration for this consumer
    pub fn client_config(&self) -> ClientConfig {
        let mut cfg = ClientConfig::new();
        cfg.set("bootstrap.servers", &self.bootstrap_servers)
            .set("group.id", &self.group_id)
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("enable.auto.commit", "true");
        for (key, value) in &self.properties {
            cfg.set(key, value);
        }
        cfg
    }
}

/// Blocking Kafka record source
pub struct KafkaSource {
    consumer: BaseConsumer,
    topic: String,
    poll_timeout: Duration,
    idle_timeout: Option<Duration>,
    last_message: Instant,
    skipped: usize,
}

impl std::fmt::Debug for KafkaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaSource")
            .field("topic", &self.topic)
            .field("skipped", &self.skipped)
            .finish_non_exhaustive()
    }
}

impl KafkaSource {
    /// Create the consumer and subscribe to the configured topic.
    pub fn connect(config: &KafkaConfig) -> Result<Self, PipelineError> {
        let consumer: BaseConsumer = config
            .client_config()
            .create()
            .map_err(|e| PipelineError::source_unavailable(format!("create consumer: {e}")))?;
        consumer.subscribe(&[config.topic.as_str()]).map_err(|e| {
            PipelineError::source_unavailable(format!("subscribe to {}: {e}", config.topic))
        })?;

        log::info!(
            "Subscribed to '{}' on {} as group '{}'",
            config.topic,
            config.bootstrap_servers,
            config.group_id
        );

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
            poll_timeout: config.poll_timeout,
            idle_timeout: config.idle_timeout,
            last_message: Instant::now(),
            skipped: 0,
        })
    }

    fn idle_expired(&self) -> bool {
        self.idle_timeout
            .is_some_and(|idle| self.last_message.elapsed() >= idle)
    }
}

impl RecordSource for KafkaSource {
    fn next_record(&mut self) -> Result<Option<Record>, PipelineError> {
        loop {
            if is_shutdown_requested() {
                return Ok(None);
            }

            let message = match self.consumer.poll(self.poll_timeout) {
                None => {
                    if self.idle_expired() {
                        log::info!(
                            "No messages on '{}' for {:?}, ending stream",
                            self.topic,
                            self.idle_timeout.unwrap_or_default()
                        );
                        return Ok(None);
                    }
                    continue;
                }
                Some(Err(KafkaError::PartitionEOF(partition))) => {
                    log::debug!("{}: reached end of partition {partition}", self.topic);
                    continue;
                }
                Some(Err(e)) => {
                    return Err(PipelineError::source_unavailable(format!(
                        "{}: {e}",
                        self.topic
                    )))
                }
                Some(Ok(message)) => message,
            };

            self.last_message = Instant::now();

            let Some(payload) = message.payload() else {
                self.skipped += 1;
                log::warn!(
                    "{}[{}]@{}: empty payload, skipping",
                    message.topic(),
                    message.partition(),
                    message.offset()
                );
                continue;
            };

            match decode_record(payload) {
                Ok(record) => return Ok(Some(record)),
                Err(e) => {
                    self.skipped += 1;
                    log::warn!(
                        "{}[{}]@{}: skipping message: {e}",
                        message.topic(),
                        message.partition(),
                        message.offset()
                    );
                }
            }
        }
    }

    fn skipped_messages(&self) -> usize {
        self.skipped
    }

    fn describe(&self) -> String {
        format!("kafka topic '{}'", self.topic)
    }
}
