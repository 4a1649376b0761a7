//! Run subcommand - consume the Kafka topic and upload batches

use anyhow::{Context, Result};
use clap::Args;
use stockpile_core::ProgressContext;
use stockpile_kafka::KafkaSource;

use super::BatchArgs;
use crate::config::Config;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Topic to consume (overrides kafka.topic)
    #[arg(short, long)]
    pub topic: Option<String>,

    /// Broker list (overrides kafka.bootstrap_servers)
    #[arg(long)]
    pub bootstrap_servers: Option<String>,

    /// Consumer group (overrides kafka.group_id)
    #[arg(short, long)]
    pub group_id: Option<String>,

    /// Stop after this many seconds without a message (overrides kafka.idle_timeout_secs)
    #[arg(long)]
    pub idle_timeout: Option<u64>,

    #[command(flatten)]
    pub batch: BatchArgs,
}

pub fn run(args: RunArgs, config: &Config, progress: &ProgressContext) -> Result<()> {
    let mut config = config.clone();
    if let Some(topic) = args.topic {
        config.kafka.topic = topic;
    }
    if let Some(servers) = args.bootstrap_servers {
        config.kafka.bootstrap_servers = servers;
    }
    if let Some(group) = args.group_id {
        config.kafka.group_id = group;
    }
    if let Some(secs) = args.idle_timeout {
        config.kafka.idle_timeout_secs = secs;
    }

    log::info!("Listening to Kafka topic: {}", config.kafka.topic);

    let mut source = KafkaSource::connect(&config.kafka_config())
        .with_context(|| format!("Failed to connect to {}", config.kafka.bootstrap_servers))?;

    super::execute(&mut source, &args.batch, &config, progress)?;
    Ok(())
}
