//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::PublisherBlueprint;
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    destination_count: usize,
    clears_with: String,
    max_records: Option<usize>,
    tick_interval_s: Option<f64>,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => {
            let warnings = collect_warnings(&blueprint);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    version: format!("{:?}", blueprint.version),
                    destination_count: blueprint.destinations.len(),
                    clears_with: blueprint
                        .longest_interval_destination()
                        .map(|d| d.id.to_string())
                        .unwrap_or_default(),
                    max_records: blueprint.cache.max_records,
                    tick_interval_s: blueprint.cache.tick_interval_s,
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(blueprint: &PublisherBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    if blueprint.destinations.len() != 2 {
        warnings.push(format!(
            "{} destination(s) configured; the usual setup pairs one broker with one document store",
            blueprint.destinations.len()
        ));
    }

    let first_interval = blueprint.destinations.first().map(|d| d.interval_s);
    if blueprint.destinations.len() > 1
        && blueprint
            .destinations
            .iter()
            .all(|d| Some(d.interval_s) == first_interval)
    {
        warnings.push(
            "All destinations share one interval - the cache is cleared on every trigger"
                .to_string(),
        );
    }

    for destination in &blueprint.destinations {
        if destination.sink.kind() == "log" {
            warnings.push(format!(
                "Destination '{}' uses the log sink - samples never leave the process",
                destination.id
            ));
        }
    }

    if blueprint.cache.max_records.is_none() && blueprint.cache.tick_interval_s.is_none() {
        warnings.push(
            "cache.max_records is unset and no ticker is configured - the cache only shrinks when records keep arriving"
                .to_string(),
        );
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Destinations: {}", summary.destination_count);
            println!("  Cache cleared with: {}", summary.clears_with);
            match summary.max_records {
                Some(max) => println!("  Cache limit: {} records", max),
                None => println!("  Cache limit: unbounded"),
            }
            match summary.tick_interval_s {
                Some(secs) => println!("  Ticker: every {}s", secs),
                None => println!("  Ticker: disabled (write-driven only)"),
            }
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
