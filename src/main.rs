//! powder-engine: ski conditions aggregation and scoring service.
//!
//! Single-binary Tokio application that:
//! 1. Pulls snow telemetry, forecasts and alerts per mountain
//! 2. Merges them into one conditions snapshot
//! 3. Scores powder quality and derives parking and arrival advice
//! 4. Serves the results over HTTP behind a TTL cache

mod config;
mod sources;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use conditions_api::AppState;
use engine::ConditionsService;
use tracing::{error, info};

/// Powder conditions engine
#[derive(Parser)]
#[command(name = "powder-engine", about = "Ski conditions aggregation and scoring service")]
struct Cli {
    /// Score one mountain, print the JSON payload and exit.
    #[arg(long, value_name = "ID")]
    score: Option<String>,

    /// Query every connector for one mountain and exit.
    #[arg(long, value_name = "ID")]
    check_sources: Option<String>,

    /// Override the HTTP bind address.
    #[arg(long)]
    bind: Option<String>,

    /// Path to the TOML config file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "powder_engine=info,engine=info,noaa_client=info,snotel_client=info,open_meteo_client=info,conditions_api=info".into()
            }),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    info!("Powder engine starting up...");

    let mut cfg = match config::load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(bind) = cli.bind {
        cfg.bind_addr = bind;
    }

    info!(
        "Mountains: {:?}",
        cfg.mountains.iter().map(|m| &m.id).collect::<Vec<_>>()
    );
    info!(
        "Timeouts: connector={}s, aggregation={}s; no-data policy {:?}",
        cfg.sources.connector_timeout_secs, cfg.sources.aggregator_timeout_secs, cfg.scoring.no_data_policy,
    );

    let connectors = match sources::build_connectors(&cfg) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to build connectors: {}", e);
            std::process::exit(1);
        }
    };
    let narrator = match sources::build_narrator(&cfg) {
        Ok(n) => n,
        Err(e) => {
            error!("Failed to build narrative client: {}", e);
            std::process::exit(1);
        }
    };
    if narrator.is_none() {
        info!("No LLM API key; arrival advice uses the fixed fallback");
    }

    let bind_addr = cfg.bind_addr.clone();
    let mut service = ConditionsService::new(cfg, connectors);
    if let Some(n) = narrator {
        service = service.with_narrator(n);
    }
    let service = Arc::new(service);

    if let Some(id) = cli.check_sources {
        match service.check_sources(&id).await {
            Ok(reports) => {
                for r in &reports {
                    match &r.error {
                        None => info!("  ✅ {} ok in {}ms", r.source, r.elapsed_ms),
                        Some(e) => error!("  ❌ {} failed in {}ms: {}", r.source, r.elapsed_ms, e),
                    }
                }
                let ok = reports.iter().filter(|r| r.ok).count();
                info!("{}/{} sources healthy for {}", ok, reports.len(), id);
            }
            Err(e) => {
                error!("Source check failed: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    if let Some(id) = cli.score {
        info!("Dry run: scoring {}", id);
        match service.powder_score_or_unavailable(&id).await {
            Ok(payload) => match serde_json::to_string_pretty(&payload) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    error!("Failed to serialize payload: {}", e);
                    std::process::exit(1);
                }
            },
            Err(e) => {
                error!("Scoring failed: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    if let Err(e) = conditions_api::serve(AppState::new(service), &bind_addr).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
