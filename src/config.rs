//! Configuration loader: merges `.env`, an optional TOML file and env vars.

use std::path::Path;

use common::config::{EngineConfig, NoDataPolicy, MAX_BATCH_IDS};
use common::Error;

fn parse_positive_u64(raw: &str, env_name: &str) -> Result<u64, Error> {
    match raw.trim().parse::<u64>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(Error::Config(format!("{env_name} must be an integer > 0"))),
    }
}

fn parse_no_data_policy(raw: &str) -> Result<NoDataPolicy, Error> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "unavailable" => Ok(NoDataPolicy::Unavailable),
        "neutral" => Ok(NoDataPolicy::Neutral),
        other => Err(Error::Config(format!(
            "POWDER_NO_DATA_POLICY must be 'unavailable' or 'neutral', got '{other}'"
        ))),
    }
}

fn validate_config(config: &EngineConfig) -> Result<(), Error> {
    let mut issues: Vec<String> = Vec::new();

    if config.mountains.is_empty() {
        issues.push("mountains must contain at least one mountain".into());
    }
    let mut seen = std::collections::HashSet::new();
    for m in &config.mountains {
        if m.id.is_empty()
            || !m
                .id
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            issues.push(format!("mountain id '{}' must match [a-z0-9-]+", m.id));
        }
        if !seen.insert(m.id.as_str()) {
            issues.push(format!("mountain id '{}' is duplicated", m.id));
        }
        if !(-90.0..=90.0).contains(&m.lat) || !(-180.0..=180.0).contains(&m.lon) {
            issues.push(format!("{}: lat/lon out of range", m.id));
        }
        if m.summit_elevation_ft < m.base_elevation_ft {
            issues.push(format!("{}: summit_elevation_ft must be >= base_elevation_ft", m.id));
        }
        if chrono::NaiveTime::parse_from_str(&m.lifts_open, "%H:%M").is_err() {
            issues.push(format!("{}: lifts_open must be HH:MM", m.id));
        }
        if chrono::FixedOffset::east_opt(m.utc_offset_minutes * 60).is_none() {
            issues.push(format!("{}: utc_offset_minutes out of range", m.id));
        }
    }

    if config.sources.connector_timeout_secs == 0 {
        issues.push("sources.connector_timeout_secs must be > 0".into());
    }
    if config.sources.aggregator_timeout_secs == 0 {
        issues.push("sources.aggregator_timeout_secs must be > 0".into());
    }
    if config.sources.user_agent.trim().is_empty() {
        issues.push("sources.user_agent must not be empty".into());
    }

    if config.cache.powder_score_secs == 0
        || config.cache.multi_day_secs == 0
        || config.cache.narrative_secs == 0
        || config.cache.parking_secs == 0
    {
        issues.push("cache TTLs must all be > 0".into());
    }

    if config.batch.max_ids == 0 || config.batch.max_ids > MAX_BATCH_IDS {
        issues.push(format!("batch.max_ids must be in 1..={MAX_BATCH_IDS}"));
    }
    if config.batch.concurrency == 0 {
        issues.push("batch.concurrency must be > 0".into());
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "Invalid config:\n - {}",
            issues.join("\n - ")
        )))
    }
}

/// Apply environment overrides. `lookup` is `std::env::var` in production.
fn apply_env_overrides<F>(config: &mut EngineConfig, lookup: F) -> Result<(), Error>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(addr) = lookup("POWDER_BIND_ADDR") {
        config.bind_addr = addr;
    }
    if let Some(policy) = lookup("POWDER_NO_DATA_POLICY") {
        config.scoring.no_data_policy = parse_no_data_policy(&policy)?;
    }
    if let Some(raw) = lookup("POWDER_AGGREGATOR_TIMEOUT_SECS") {
        config.sources.aggregator_timeout_secs =
            parse_positive_u64(&raw, "POWDER_AGGREGATOR_TIMEOUT_SECS")?;
    }
    if let Some(raw) = lookup("POWDER_CONNECTOR_TIMEOUT_SECS") {
        config.sources.connector_timeout_secs =
            parse_positive_u64(&raw, "POWDER_CONNECTOR_TIMEOUT_SECS")?;
    }
    if let Some(raw) = lookup("POWDER_BATCH_CONCURRENCY") {
        config.batch.concurrency = parse_positive_u64(&raw, "POWDER_BATCH_CONCURRENCY")? as usize;
    }
    if let Some(key) = lookup("ANTHROPIC_API_KEY") {
        config.llm.api_key = key;
    }
    if let Some(model) = lookup("POWDER_LLM_MODEL") {
        config.llm.model = model;
    }
    Ok(())
}

fn parse_config_file(path: &Path) -> Result<EngineConfig, Error> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
    toml::from_str(&contents)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Load engine configuration from environment and optional config file.
pub fn load_config(path: &Path) -> Result<EngineConfig, Error> {
    // 1. Load .env file from project root or parent directories.
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    // 2. Defaults, replaced wholesale by the TOML file if present.
    let mut config = if path.exists() {
        parse_config_file(path)?
    } else {
        tracing::debug!("{} not found, using defaults", path.display());
        EngineConfig::default()
    };

    // 3. Environment variables win.
    apply_env_overrides(&mut config, |k| std::env::var(k).ok())?;

    validate_config(&config)?;
    Ok(config)
}
