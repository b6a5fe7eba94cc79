//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{redact, PublisherBlueprint, SinkSettings};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;
use crate::error::CliError;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    destinations: Vec<DestinationInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    clears_with: Option<String>,
    cache: CacheInfo,
    dispatch: DispatchInfo,
}

#[derive(Serialize)]
struct DestinationInfo {
    id: String,
    interval_s: f64,
    max_per_interval: u64,
    sink_type: String,
    /// Connection details, credentials redacted
    sink: serde_json::Value,
}

#[derive(Serialize)]
struct CacheInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_records: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tick_interval_s: Option<f64>,
}

#[derive(Serialize)]
struct DispatchInfo {
    queue_capacity: usize,
    workers: usize,
    drop_policy: String,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&blueprint);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&blueprint);
    }

    Ok(())
}

/// Sink options as JSON with every password replaced
fn redacted_sink(sink: &SinkSettings) -> serde_json::Value {
    match sink {
        SinkSettings::Mqtt(opts) => serde_json::json!({
            "hostname": opts.hostname,
            "port": opts.port,
            "client_id": opts.client_id,
            "topic": opts.topic,
            "auth": opts.auth.as_ref().map(|a| serde_json::json!({
                "username": a.username,
                "password": redact(&a.password),
            })),
            "tls": opts.tls.as_ref().map(|t| serde_json::json!({ "ca_certs": t.ca_certs })),
            "keepalive_s": opts.keepalive_s,
            "timeout_s": opts.timeout_s,
        }),
        SinkSettings::Couchdb(opts) => serde_json::json!({
            "url": opts.url,
            "database": opts.database,
            "username": opts.username,
            "password": redact(&opts.password),
            "timeout_s": opts.timeout_s,
        }),
        SinkSettings::Log(opts) => serde_json::json!({
            "include_records": opts.include_records,
        }),
    }
}

fn build_config_info(blueprint: &PublisherBlueprint) -> ConfigInfo {
    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        destinations: blueprint
            .destinations
            .iter()
            .map(|d| DestinationInfo {
                id: d.id.to_string(),
                interval_s: d.interval_s,
                max_per_interval: d.max_per_interval,
                sink_type: d.sink.kind().to_string(),
                sink: redacted_sink(&d.sink),
            })
            .collect(),
        clears_with: blueprint
            .longest_interval_destination()
            .map(|d| d.id.to_string()),
        cache: CacheInfo {
            max_records: blueprint.cache.max_records,
            tick_interval_s: blueprint.cache.tick_interval_s,
        },
        dispatch: DispatchInfo {
            queue_capacity: blueprint.dispatch.queue_capacity,
            workers: blueprint.dispatch.workers,
            drop_policy: format!("{:?}", blueprint.dispatch.drop_policy),
        },
    }
}

fn print_config_info(blueprint: &PublisherBlueprint) {
    println!("=== Cache Publisher Configuration ===\n");
    println!("Version: {:?}", blueprint.version);

    println!("\nDestinations ({})", blueprint.destinations.len());
    for (i, destination) in blueprint.destinations.iter().enumerate() {
        let is_last = i == blueprint.destinations.len() - 1;
        let prefix = if is_last { "└─" } else { "├─" };
        let child_prefix = if is_last { "   " } else { "│  " };

        println!(
            "   {} {} (every {}s, max {})",
            prefix, destination.id, destination.interval_s, destination.max_per_interval
        );
        println!("   {}  └─ {}", child_prefix, destination.sink.describe());
    }

    if let Some(clear) = blueprint.longest_interval_destination() {
        println!("\nCache cleared with: {}", clear.id);
    }

    println!("\nCache");
    match blueprint.cache.max_records {
        Some(max) => println!("   ├─ Max records: {}", max),
        None => println!("   ├─ Max records: unbounded"),
    }
    match blueprint.cache.tick_interval_s {
        Some(secs) => println!("   └─ Ticker: every {}s", secs),
        None => println!("   └─ Ticker: disabled"),
    }

    println!("\nDispatch");
    println!("   ├─ Queue capacity: {}", blueprint.dispatch.queue_capacity);
    println!("   ├─ Workers: {}", blueprint.dispatch.workers);
    println!("   └─ Drop policy: {:?}", blueprint.dispatch.drop_policy);

    println!();
}
