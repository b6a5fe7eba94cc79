//! `run` command implementation.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{error, info};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let mut blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    // Apply CLI overrides
    if let Some(secs) = args.tick_interval {
        info!(tick_interval_s = secs, "Overriding tick interval from CLI");
        blueprint.cache.tick_interval_s = Some(secs);
        config_loader::ConfigLoader::validate(&blueprint)
            .context("Invalid --tick-interval override")?;
    }

    info!(
        destinations = blueprint.destinations.len(),
        max_records = ?blueprint.cache.max_records,
        queue_capacity = blueprint.dispatch.queue_capacity,
        workers = blueprint.dispatch.workers,
        "Configuration loaded"
    );

    let pipeline_config = PipelineConfig {
        tick_interval: blueprint.cache.tick_interval(),
        blueprint,
        dry_run: args.dry_run,
        metrics_port: if args.metrics_port == 0 {
            None
        } else {
            Some(args.metrics_port)
        },
    };

    let input: Box<dyn AsyncBufRead + Unpin + Send> = match &args.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .map_err(CliError::from)
                .with_context(|| format!("Failed to open input {}", path.display()))?;
            info!(input = %path.display(), "Reading records from file");
            Box::new(BufReader::new(file))
        }
        None => {
            info!("Reading records from stdin");
            Box::new(BufReader::new(tokio::io::stdin()))
        }
    };

    let stats = Pipeline::new(pipeline_config)
        .run(input, setup_shutdown_signal())
        .await
        .context("Pipeline execution failed")?;

    stats.print_summary();
    info!("Cache Publisher finished");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn setup_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
