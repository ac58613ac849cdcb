//! Engine configuration types.

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound on ids in one batch request.
pub const MAX_BATCH_IDS: usize = 10;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Address the HTTP server binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Mountains the engine knows about. Requests for any other id are 404s.
    #[serde(default = "default_mountains")]
    pub mountains: Vec<MountainConfig>,

    /// Upstream connector settings.
    #[serde(default)]
    pub sources: SourcesConfig,

    /// Cache TTLs per product class.
    #[serde(default)]
    pub cache: CacheTtlConfig,

    /// Scoring policy.
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Batch endpoint limits.
    #[serde(default)]
    pub batch: BatchConfig,

    /// Text-generation collaborator used by the arrival advisor.
    #[serde(default)]
    pub llm: LlmConfig,
}

/// Configuration for a single mountain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountainConfig {
    /// Stable identifier used in URLs (e.g., "stevens-pass").
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Latitude.
    pub lat: f64,
    /// Longitude.
    pub lon: f64,
    /// Base area elevation in feet.
    pub base_elevation_ft: f64,
    /// Summit elevation in feet.
    pub summit_elevation_ft: f64,
    /// Fixed offset from UTC in minutes, used for day-of-week and hour rules.
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
    /// NRCS SNOTEL station triplet (e.g., "791:WA:SNTL").
    #[serde(default)]
    pub snotel_triplet: Option<String>,
    /// NWS forecast grid for the base area.
    #[serde(default)]
    pub nws: Option<NwsGrid>,
    /// Parking lots, nearest first.
    #[serde(default)]
    pub parking_lots: Vec<ParkingLot>,
    /// First chair, local time "HH:MM".
    #[serde(default = "default_lifts_open")]
    pub lifts_open: String,
}

impl MountainConfig {
    /// Local timezone offset for this mountain, falling back to UTC if the
    /// configured offset is out of range.
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}

/// NWS Weather Forecast Office grid point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NwsGrid {
    /// NWS Weather Forecast Office ID (e.g., "SEW").
    pub office: String,
    pub grid_x: u32,
    pub grid_y: u32,
}

/// Kind of parking lot; drives which lots are recommended as difficulty rises.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LotKind {
    Main,
    Overflow,
    Shuttle,
    Paid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParkingLot {
    pub name: String,
    pub kind: LotKind,
    /// Approximate stall count.
    #[serde(default)]
    pub capacity: u32,
}

/// Connector timeouts and toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Per-connector timeout (seconds).
    #[serde(default = "default_connector_timeout")]
    pub connector_timeout_secs: u64,

    /// Global deadline for one aggregation pass (seconds).
    #[serde(default = "default_aggregator_timeout")]
    pub aggregator_timeout_secs: u64,

    #[serde(default = "default_true")]
    pub snotel_enabled: bool,
    #[serde(default = "default_true")]
    pub noaa_enabled: bool,
    #[serde(default = "default_true")]
    pub open_meteo_enabled: bool,
    #[serde(default = "default_true")]
    pub alerts_enabled: bool,

    /// Requests per second allowed against api.weather.gov.
    #[serde(default = "default_noaa_rps")]
    pub noaa_requests_per_sec: u32,

    /// User-Agent sent to providers (NWS requires a contact).
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// TTLs in seconds per product class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheTtlConfig {
    #[serde(default = "default_powder_score_ttl")]
    pub powder_score_secs: u64,
    #[serde(default = "default_multi_day_ttl")]
    pub multi_day_secs: u64,
    #[serde(default = "default_narrative_ttl")]
    pub narrative_secs: u64,
    #[serde(default = "default_parking_ttl")]
    pub parking_secs: u64,
}

/// What to emit when every source for a location failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NoDataPolicy {
    /// Refuse to score; respond with an explicit "unavailable" payload.
    #[default]
    Unavailable,
    /// Score the empty snapshot, which lands on neutral factor values.
    Neutral,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScoringConfig {
    #[serde(default)]
    pub no_data_policy: NoDataPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum ids accepted by one batch request.
    #[serde(default = "default_batch_max_ids")]
    pub max_ids: usize,
    /// Simultaneous location fan-outs.
    #[serde(default = "default_batch_concurrency")]
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API key for the text-generation provider; empty disables the advisor
    /// and every request uses the fixed fallback.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
}

// ── Defaults ──────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".into()
}
fn default_utc_offset_minutes() -> i32 {
    -480
}
fn default_lifts_open() -> String {
    "09:00".into()
}

fn default_connector_timeout() -> u64 {
    6
}
fn default_aggregator_timeout() -> u64 {
    10
}
fn default_noaa_rps() -> u32 {
    5
}
fn default_user_agent() -> String {
    "powder-engine/0.1 (conditions service; contact@example.com)".into()
}

fn default_powder_score_ttl() -> u64 {
    600
}
fn default_multi_day_ttl() -> u64 {
    1800
}
fn default_narrative_ttl() -> u64 {
    3600
}
fn default_parking_ttl() -> u64 {
    600
}

fn default_batch_max_ids() -> usize {
    MAX_BATCH_IDS
}
fn default_batch_concurrency() -> usize {
    8
}

fn default_llm_model() -> String {
    "claude-3-5-haiku-latest".into()
}
fn default_llm_timeout_ms() -> u64 {
    8000
}
fn default_llm_max_retries() -> u32 {
    1
}

fn lot(name: &str, kind: LotKind, capacity: u32) -> ParkingLot {
    ParkingLot {
        name: name.into(),
        kind,
        capacity,
    }
}

fn default_mountains() -> Vec<MountainConfig> {
    vec![
        MountainConfig {
            id: "stevens-pass".into(),
            name: "Stevens Pass".into(),
            lat: 47.7448,
            lon: -121.0890,
            base_elevation_ft: 4061.0,
            summit_elevation_ft: 5845.0,
            utc_offset_minutes: default_utc_offset_minutes(),
            snotel_triplet: Some("791:WA:SNTL".into()),
            nws: Some(NwsGrid {
                office: "SEW".into(),
                grid_x: 164,
                grid_y: 66,
            }),
            parking_lots: vec![
                lot("Lot A", LotKind::Main, 600),
                lot("Lot B", LotKind::Main, 500),
                lot("Lot E (overflow)", LotKind::Overflow, 700),
                lot("Skeena Paid Lot", LotKind::Paid, 150),
            ],
            lifts_open: "09:00".into(),
        },
        MountainConfig {
            id: "crystal-mountain".into(),
            name: "Crystal Mountain".into(),
            lat: 46.9282,
            lon: -121.5045,
            base_elevation_ft: 4400.0,
            summit_elevation_ft: 7012.0,
            utc_offset_minutes: default_utc_offset_minutes(),
            snotel_triplet: Some("642:WA:SNTL".into()),
            nws: Some(NwsGrid {
                office: "SEW".into(),
                grid_x: 145,
                grid_y: 31,
            }),
            parking_lots: vec![
                lot("Base Area Lot", LotKind::Main, 900),
                lot("Lower Lots C-D", LotKind::Overflow, 1200),
                lot("Crystal Shuttle (Enumclaw)", LotKind::Shuttle, 0),
                lot("Premium Lot", LotKind::Paid, 200),
            ],
            lifts_open: "09:00".into(),
        },
        MountainConfig {
            id: "mt-baker".into(),
            name: "Mt. Baker".into(),
            lat: 48.8573,
            lon: -121.6654,
            base_elevation_ft: 3500.0,
            summit_elevation_ft: 5089.0,
            utc_offset_minutes: default_utc_offset_minutes(),
            snotel_triplet: Some("909:WA:SNTL".into()),
            nws: Some(NwsGrid {
                office: "SEW".into(),
                grid_x: 157,
                grid_y: 123,
            }),
            parking_lots: vec![
                lot("White Salmon Lodge", LotKind::Main, 450),
                lot("Heather Meadows", LotKind::Main, 400),
                lot("Upper Road Shoulder", LotKind::Overflow, 250),
            ],
            lifts_open: "09:00".into(),
        },
        MountainConfig {
            id: "snoqualmie".into(),
            name: "Summit at Snoqualmie".into(),
            lat: 47.4245,
            lon: -121.4138,
            base_elevation_ft: 3000.0,
            summit_elevation_ft: 5420.0,
            utc_offset_minutes: default_utc_offset_minutes(),
            snotel_triplet: Some("908:WA:SNTL".into()),
            nws: Some(NwsGrid {
                office: "SEW".into(),
                grid_x: 152,
                grid_y: 54,
            }),
            parking_lots: vec![
                lot("Summit West", LotKind::Main, 800),
                lot("Summit Central", LotKind::Main, 700),
                lot("Alpental Lower", LotKind::Overflow, 400),
                lot("Summit East Paid", LotKind::Paid, 120),
            ],
            lifts_open: "09:00".into(),
        },
    ]
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            connector_timeout_secs: default_connector_timeout(),
            aggregator_timeout_secs: default_aggregator_timeout(),
            snotel_enabled: true,
            noaa_enabled: true,
            open_meteo_enabled: true,
            alerts_enabled: true,
            noaa_requests_per_sec: default_noaa_rps(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            powder_score_secs: default_powder_score_ttl(),
            multi_day_secs: default_multi_day_ttl(),
            narrative_secs: default_narrative_ttl(),
            parking_secs: default_parking_ttl(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_ids: default_batch_max_ids(),
            concurrency: default_batch_concurrency(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_llm_model(),
            timeout_ms: default_llm_timeout_ms(),
            max_retries: default_llm_max_retries(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            mountains: default_mountains(),
            sources: SourcesConfig::default(),
            cache: CacheTtlConfig::default(),
            scoring: ScoringConfig::default(),
            batch: BatchConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_fills_defaults() {
        let cfg: EngineConfig = toml::from_str(
            r#"
            bind_addr = "127.0.0.1:9000"

            [scoring]
            no_data_policy = "neutral"

            [cache]
            powder_score_secs = 120
            "#,
        )
        .expect("config should parse");

        assert_eq!(cfg.bind_addr, "127.0.0.1:9000");
        assert_eq!(cfg.scoring.no_data_policy, NoDataPolicy::Neutral);
        assert_eq!(cfg.cache.powder_score_secs, 120);
        assert_eq!(cfg.cache.multi_day_secs, 1800);
        assert_eq!(cfg.batch.max_ids, 10);
        assert!(!cfg.mountains.is_empty());
    }

    #[test]
    fn test_cache_ttl_keys_match_products() {
        let json = serde_json::to_value(CacheTtlConfig::default()).expect("serializes");
        let mut keys: Vec<&str> = json
            .as_object()
            .expect("object")
            .keys()
            .map(String::as_str)
            .collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            ["multi_day_secs", "narrative_secs", "parking_secs", "powder_score_secs"]
        );
    }

    #[test]
    fn test_mountain_offset() {
        let cfg = EngineConfig::default();
        let m = &cfg.mountains[0];
        assert_eq!(m.offset().local_minus_utc(), -8 * 3600);
    }
}
