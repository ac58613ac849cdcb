//! Domain types shared across the engine.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ── Sources ───────────────────────────────────────────────────────────

/// Upstream data domains. One connector per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Source {
    /// SNOTEL snow telemetry: depth and recent snowfall.
    Snotel,
    /// NWS point forecast: temperature, wind, sky, precipitation.
    Noaa,
    /// Open-Meteo multi-day forecast and freezing level.
    OpenMeteo,
    /// NWS active alerts.
    Alerts,
}

impl Source {
    pub const ALL: [Source; 4] = [Source::Snotel, Source::Noaa, Source::OpenMeteo, Source::Alerts];

    pub fn label(&self) -> &'static str {
        match self {
            Source::Snotel => "snotel",
            Source::Noaa => "noaa",
            Source::OpenMeteo => "openMeteo",
            Source::Alerts => "alerts",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-source availability for one aggregation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataAvailability {
    pub snotel: bool,
    pub noaa: bool,
    pub open_meteo: bool,
    pub alerts: bool,
}

impl DataAvailability {
    pub fn set(&mut self, source: Source, ok: bool) {
        match source {
            Source::Snotel => self.snotel = ok,
            Source::Noaa => self.noaa = ok,
            Source::OpenMeteo => self.open_meteo = ok,
            Source::Alerts => self.alerts = ok,
        }
    }

    pub fn get(&self, source: Source) -> bool {
        match source {
            Source::Snotel => self.snotel,
            Source::Noaa => self.noaa,
            Source::OpenMeteo => self.open_meteo,
            Source::Alerts => self.alerts,
        }
    }

    pub fn any(&self) -> bool {
        self.snotel || self.noaa || self.open_meteo || self.alerts
    }

    pub fn count(&self) -> usize {
        Source::ALL.iter().filter(|s| self.get(**s)).count()
    }
}

// ── Connector fragments ───────────────────────────────────────────────

/// Snow telemetry from a SNOTEL station.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnowTelemetry {
    pub snowfall_24h_in: Option<f64>,
    pub snowfall_48h_in: Option<f64>,
    pub snowfall_72h_in: Option<f64>,
    pub base_depth_in: Option<f64>,
    pub observed_at: Option<DateTime<Utc>>,
}

/// Near-term point forecast from NWS.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointForecast {
    pub temperature_f: Option<f64>,
    pub wind_speed_mph: Option<f64>,
    pub wind_gust_mph: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub sky_cover_pct: Option<f64>,
    pub precip_probability_pct: Option<f64>,
    /// Forecast snowfall over the next 48 hours.
    pub upcoming_snow_in: Option<f64>,
    pub short_forecast: Option<String>,
}

/// One day of a multi-day forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyForecast {
    pub date: NaiveDate,
    pub snowfall_in: f64,
    pub high_f: Option<f64>,
    pub low_f: Option<f64>,
    pub precip_probability_pct: Option<f64>,
    pub max_wind_mph: Option<f64>,
}

/// Multi-day forecast, current model conditions and freezing level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtendedForecast {
    /// Today and following days, in date order.
    pub days: Vec<DailyForecast>,
    pub freezing_level_ft: Option<f64>,
    pub upcoming_snow_in: Option<f64>,
    /// Modeled snowfall over the past day(s); used when SNOTEL is missing.
    pub modeled_snowfall_24h_in: Option<f64>,
    pub modeled_snowfall_48h_in: Option<f64>,
    pub current_temperature_f: Option<f64>,
    pub current_wind_mph: Option<f64>,
    pub current_gust_mph: Option<f64>,
    pub current_humidity_pct: Option<f64>,
    pub current_cloud_cover_pct: Option<f64>,
}

/// Active alert summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertSummary {
    pub storm: Option<StormInfo>,
    pub active_alerts: usize,
}

/// One connector's contribution to a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SnapshotFragment {
    Snow(SnowTelemetry),
    Forecast(PointForecast),
    Extended(ExtendedForecast),
    Alerts(AlertSummary),
}

impl SnapshotFragment {
    pub fn source(&self) -> Source {
        match self {
            SnapshotFragment::Snow(_) => Source::Snotel,
            SnapshotFragment::Forecast(_) => Source::Noaa,
            SnapshotFragment::Extended(_) => Source::OpenMeteo,
            SnapshotFragment::Alerts(_) => Source::Alerts,
        }
    }
}

/// Outcome of one bounded connector call. `ok == false` means the fragment
/// is absent; the reason is in `error`.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceReport {
    pub source: Source,
    pub ok: bool,
    pub fragment: Option<SnapshotFragment>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl SourceReport {
    pub fn success(fragment: SnapshotFragment, elapsed_ms: u64) -> Self {
        Self {
            source: fragment.source(),
            ok: true,
            fragment: Some(fragment),
            error: None,
            elapsed_ms,
        }
    }

    pub fn unavailable(source: Source, error: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            source,
            ok: false,
            fragment: None,
            error: Some(error.into()),
            elapsed_ms,
        }
    }
}

// ── Snapshot ──────────────────────────────────────────────────────────

/// An active weather alert relevant to skiing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StormInfo {
    pub is_active: bool,
    /// Alert type favors fresh snow (winter storm family).
    pub is_powder_boost: bool,
    pub event_type: String,
    pub expected_snowfall_inches: Option<f64>,
    pub hours_remaining: f64,
    pub severity: String,
}

/// The merged, per-location bundle of all currently available signals.
///
/// Every measurement is optional: `None` means the source was unavailable,
/// which is distinct from a measured zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionsSnapshot {
    pub location_id: String,
    pub snowfall_24h: Option<f64>,
    pub snowfall_48h: Option<f64>,
    pub snowfall_72h: Option<f64>,
    pub base_depth: Option<f64>,
    pub temperature: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_gust: Option<f64>,
    pub humidity: Option<f64>,
    pub sky_cover_percent: Option<f64>,
    pub precip_probability_percent: Option<f64>,
    pub freezing_level_feet: Option<f64>,
    pub upcoming_snow_inches: Option<f64>,
    pub active_storm: Option<StormInfo>,
    pub short_forecast: Option<String>,
    #[serde(default)]
    pub forecast_days: Vec<DailyForecast>,
    pub data_available: DataAvailability,
    pub observed_at: Option<DateTime<Utc>>,
}

impl ConditionsSnapshot {
    pub fn empty(location_id: impl Into<String>) -> Self {
        Self {
            location_id: location_id.into(),
            ..Default::default()
        }
    }

    /// max(sustained, 0.8 × gust); `None` when neither is known.
    pub fn effective_wind(&self) -> Option<f64> {
        match (self.wind_speed, self.wind_gust) {
            (Some(s), Some(g)) => Some(s.max(0.8 * g)),
            (Some(s), None) => Some(s),
            (None, Some(g)) => Some(0.8 * g),
            (None, None) => None,
        }
    }
}

// ── Scores ────────────────────────────────────────────────────────────

/// One row of the score breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreFactor {
    pub name: String,
    /// Raw input value, when the factor has one.
    pub value: Option<f64>,
    /// Effective weight in the final score; 0 for modifiers.
    pub weight: f64,
    pub contribution: f64,
    pub description: String,
    pub is_positive: bool,
}

/// A powder score with its full breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Score {
    pub value: f64,
    pub factors: Vec<ScoreFactor>,
    pub verdict: String,
}

/// Rain-risk sub-score derived from freezing level vs. base elevation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RainRisk {
    /// 0 (rain certain at base) to 10 (no risk).
    pub score: f64,
    pub description: String,
}

// ── Auxiliary signals ─────────────────────────────────────────────────

/// Access road status for a mountain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoadStatus {
    Open,
    ChainsRequired,
    Closed,
    #[default]
    Unknown,
}
