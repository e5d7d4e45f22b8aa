//! Command-line front end: runs one broker batch against a definition file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use broker_core::MemoryCache;
use broker_server::service::{build_broker, BrokerConfig, WorkQueue};
use broker_server::{logging, InMemoryRepository, ReqwestTransport};
use clap::Parser;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "broker-cli")]
#[command(about = "Call downstream services through the service broker")]
struct Args {
    /// JSON file holding an array of service definitions
    #[arg(short, long, env = "BROKER_DEFINITIONS")]
    definitions: PathBuf,

    /// Cache region the batch runs in
    #[arg(short, long, env = "BROKER_REGION", default_value = "cli")]
    region: String,

    /// Batch timeout in milliseconds (defaults to the broker default)
    #[arg(short, long, env = "BROKER_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Print the region's user profile after the batch
    #[arg(long)]
    profile: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, env = "BROKER_JSON_LOGS")]
    json_logs: bool,

    /// Service or token ids to call
    #[arg(required = true)]
    ids: Vec<Uuid>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(args.verbose, args.json_logs)?;

    let config = Arc::new(BrokerConfig::default());
    let repository = InMemoryRepository::from_json_file(&args.definitions).with_context(|| {
        format!("failed to load definitions from {}", args.definitions.display())
    })?;
    tracing::info!(services = repository.len(), "definitions loaded");

    let (mut worker, queue) = WorkQueue::start(&config);
    let (broker, _services) = build_broker(
        Arc::new(repository),
        Arc::new(MemoryCache::new()),
        Arc::new(ReqwestTransport::with_connect_timeout(config.default_timeout)?),
        Arc::new(queue),
        Arc::clone(&config),
    );

    let timeout = args
        .timeout_ms
        .map_or(config.default_timeout, Duration::from_millis);
    let response = broker.call_services(&args.ids, &args.region, timeout).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);

    if args.profile {
        println!("{}", broker.user_profile_xml(&args.region, false).await?);
    }

    worker.stop().await;
    Ok(())
}
