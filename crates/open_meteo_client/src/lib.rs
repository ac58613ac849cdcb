//! Open-Meteo forecast client.
//!
//! One request returns the multi-day outlook, current model conditions and
//! the hourly freezing level; [`summarize_forecast`] folds it into an
//! `ExtendedForecast`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use common::config::MountainConfig;
use common::{body_snippet, DailyForecast, Error, ExtendedForecast, SnapshotFragment, Source, SourceConnector};
use serde::Deserialize;
use tracing::debug;

const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";
const FEET_PER_METER: f64 = 3.280_84;
const PAST_DAYS: u32 = 2;
const FORECAST_DAYS: u32 = 7;

const DAILY_FIELDS: &str =
    "snowfall_sum,temperature_2m_max,temperature_2m_min,precipitation_probability_max,wind_speed_10m_max";
const CURRENT_FIELDS: &str =
    "temperature_2m,relative_humidity_2m,wind_speed_10m,wind_gusts_10m,cloud_cover";

#[derive(Debug, Clone)]
pub struct OpenMeteoClient {
    client: reqwest::Client,
}

// ── Response types ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ForecastResponse {
    #[serde(default)]
    pub current: Option<CurrentBlock>,
    #[serde(default)]
    pub hourly_units: Option<HourlyUnits>,
    #[serde(default)]
    pub hourly: Option<HourlyBlock>,
    #[serde(default)]
    pub daily: Option<DailyBlock>,
}

#[derive(Debug, Deserialize)]
pub struct CurrentBlock {
    /// Local time, "YYYY-MM-DDTHH:MM".
    pub time: String,
    pub temperature_2m: Option<f64>,
    pub relative_humidity_2m: Option<f64>,
    pub wind_speed_10m: Option<f64>,
    pub wind_gusts_10m: Option<f64>,
    pub cloud_cover: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct HourlyUnits {
    #[serde(default)]
    pub freezing_level_height: String,
}

#[derive(Debug, Deserialize)]
pub struct HourlyBlock {
    #[serde(default)]
    pub time: Vec<String>,
    #[serde(default)]
    pub freezing_level_height: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
pub struct DailyBlock {
    #[serde(default)]
    pub time: Vec<String>,
    #[serde(default)]
    pub snowfall_sum: Vec<Option<f64>>,
    #[serde(default)]
    pub temperature_2m_max: Vec<Option<f64>>,
    #[serde(default)]
    pub temperature_2m_min: Vec<Option<f64>>,
    #[serde(default)]
    pub precipitation_probability_max: Vec<Option<f64>>,
    #[serde(default)]
    pub wind_speed_10m_max: Vec<Option<f64>>,
}

// ── Implementation ────────────────────────────────────────────────────

impl OpenMeteoClient {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .pool_max_idle_per_host(4)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::OpenMeteo(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Fetch the raw forecast for a point, in imperial units and local time.
    pub async fn fetch_forecast(&self, lat: f64, lon: f64) -> Result<ForecastResponse, Error> {
        let query = [
            ("latitude", format!("{lat:.4}")),
            ("longitude", format!("{lon:.4}")),
            ("daily", DAILY_FIELDS.to_string()),
            ("hourly", "freezing_level_height".to_string()),
            ("current", CURRENT_FIELDS.to_string()),
            ("temperature_unit", "fahrenheit".to_string()),
            ("wind_speed_unit", "mph".to_string()),
            ("precipitation_unit", "inch".to_string()),
            ("timezone", "auto".to_string()),
            ("past_days", PAST_DAYS.to_string()),
            ("forecast_days", FORECAST_DAYS.to_string()),
        ];

        debug!("Fetching Open-Meteo forecast for ({:.4}, {:.4})", lat, lon);

        let resp = self
            .client
            .get(FORECAST_URL)
            .query(&query)
            .send()
            .await
            .map_err(|e| Error::OpenMeteo(format!("HTTP error: {e}")))?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::OpenMeteo(format!(
                "returned {}: {}",
                status,
                body_snippet(&body, 500)
            )));
        }

        resp.json()
            .await
            .map_err(|e| Error::OpenMeteo(format!("JSON parse error: {e}")))
    }

    pub async fn get_extended_forecast(&self, lat: f64, lon: f64) -> Result<ExtendedForecast, Error> {
        let resp = self.fetch_forecast(lat, lon).await?;
        summarize_forecast(&resp)
    }
}

fn at(values: &[Option<f64>], i: usize) -> Option<f64> {
    values.get(i).copied().flatten()
}

fn parse_day(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d").ok()
}

/// Fold an Open-Meteo response into the extended-forecast fragment.
///
/// "Today" is the local date of the `current` block. Rows before today are
/// past days and only feed the modeled snowfall; rows from today on become
/// `days`. Upcoming snow is today plus tomorrow.
pub fn summarize_forecast(resp: &ForecastResponse) -> Result<ExtendedForecast, Error> {
    let daily = resp
        .daily
        .as_ref()
        .filter(|d| !d.time.is_empty())
        .ok_or_else(|| Error::OpenMeteo("response has no daily block".into()))?;

    let rows: Vec<(NaiveDate, usize)> = daily
        .time
        .iter()
        .enumerate()
        .filter_map(|(i, t)| parse_day(t).map(|d| (d, i)))
        .collect();

    let today = resp
        .current
        .as_ref()
        .and_then(|c| parse_day(&c.time))
        .or_else(|| rows.get(PAST_DAYS as usize).map(|(d, _)| *d))
        .ok_or_else(|| Error::OpenMeteo("cannot determine local date".into()))?;

    let snow_on = |date: NaiveDate| {
        rows.iter()
            .find(|(d, _)| *d == date)
            .and_then(|(_, i)| at(&daily.snowfall_sum, *i))
    };

    let days: Vec<DailyForecast> = rows
        .iter()
        .filter(|(d, _)| *d >= today)
        .map(|(date, i)| DailyForecast {
            date: *date,
            snowfall_in: at(&daily.snowfall_sum, *i).unwrap_or(0.0),
            high_f: at(&daily.temperature_2m_max, *i),
            low_f: at(&daily.temperature_2m_min, *i),
            precip_probability_pct: at(&daily.precipitation_probability_max, *i),
            max_wind_mph: at(&daily.wind_speed_10m_max, *i),
        })
        .collect();

    let yesterday = today.pred_opt().and_then(snow_on);
    let day_before = today
        .pred_opt()
        .and_then(|d| d.pred_opt())
        .and_then(snow_on);
    let modeled_48h = match (yesterday, day_before) {
        (Some(a), Some(b)) => Some(a + b),
        (Some(a), None) => Some(a),
        _ => None,
    };

    let upcoming = match (snow_on(today), today.succ_opt().and_then(snow_on)) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0.0) + b.unwrap_or(0.0)),
    };

    let current = resp.current.as_ref();

    let forecast = ExtendedForecast {
        days,
        freezing_level_ft: current_freezing_level(resp),
        upcoming_snow_in: upcoming,
        modeled_snowfall_24h_in: yesterday,
        modeled_snowfall_48h_in: modeled_48h,
        current_temperature_f: current.and_then(|c| c.temperature_2m),
        current_wind_mph: current.and_then(|c| c.wind_speed_10m),
        current_gust_mph: current.and_then(|c| c.wind_gusts_10m),
        current_humidity_pct: current.and_then(|c| c.relative_humidity_2m),
        current_cloud_cover_pct: current.and_then(|c| c.cloud_cover),
    };

    debug!(
        "Open-Meteo: {} days, freezing level {:?} ft, upcoming {:?} in",
        forecast.days.len(),
        forecast.freezing_level_ft,
        forecast.upcoming_snow_in
    );

    Ok(forecast)
}

/// Freezing level for the current hour in feet; the first later hour with a
/// value when the current one is missing.
fn current_freezing_level(resp: &ForecastResponse) -> Option<f64> {
    let hourly = resp.hourly.as_ref()?;
    let hour_prefix = resp.current.as_ref().and_then(|c| c.time.get(..13));

    let start = hour_prefix
        .and_then(|p| hourly.time.iter().position(|t| t.starts_with(p)))
        .unwrap_or(0);

    let raw = hourly
        .freezing_level_height
        .iter()
        .skip(start)
        .flatten()
        .next()
        .copied()?;

    let in_feet = resp
        .hourly_units
        .as_ref()
        .map_or(false, |u| u.freezing_level_height.eq_ignore_ascii_case("ft"));

    Some(if in_feet { raw } else { (raw * FEET_PER_METER).round() })
}

/// Multi-day forecast connector.
pub struct OpenMeteoConnector {
    client: OpenMeteoClient,
    timeout: Duration,
}

impl OpenMeteoConnector {
    pub fn new(client: OpenMeteoClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl SourceConnector for OpenMeteoConnector {
    fn source(&self) -> Source {
        Source::OpenMeteo
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, mountain: &MountainConfig) -> Result<SnapshotFragment, Error> {
        let forecast = self
            .client
            .get_extended_forecast(mountain.lat, mountain.lon)
            .await?;
        Ok(SnapshotFragment::Extended(forecast))
    }
}
