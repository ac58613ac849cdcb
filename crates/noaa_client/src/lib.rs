//! NOAA / NWS Weather API client.
//!
//! Fetches hourly and raw gridpoint forecast data from `api.weather.gov`
//! and reduces it to the `PointForecast` fragment the aggregator merges.
//! Active alerts live in [`alerts`].

pub mod alerts;
pub mod rate_limit;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::config::{MountainConfig, NwsGrid};
use common::{body_snippet, Error, PointForecast, SnapshotFragment, Source, SourceConnector};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

pub use alerts::NwsAlertsConnector;
pub use rate_limit::RateLimiter;

const API_BASE: &str = "https://api.weather.gov";
const MM_PER_INCH: f64 = 25.4;
const MPH_PER_KMH: f64 = 0.621_371;
const MPH_PER_MS: f64 = 2.236_94;
const UPCOMING_WINDOW_HOURS: i64 = 48;

/// NWS API client with connection pooling, User-Agent header and a shared
/// rate limiter.
#[derive(Debug, Clone)]
pub struct NoaaClient {
    client: reqwest::Client,
    limiter: RateLimiter,
}

// ── NWS response types ────────────────────────────────────────────────

/// Hourly forecast response from `/gridpoints/{wfo}/{x},{y}/forecast/hourly`.
#[derive(Debug, Deserialize)]
pub struct HourlyForecastResponse {
    pub properties: HourlyForecastProperties,
}

#[derive(Debug, Deserialize)]
pub struct HourlyForecastProperties {
    #[serde(default)]
    pub periods: Vec<ForecastPeriod>,
}

#[derive(Debug, Deserialize)]
pub struct ForecastPeriod {
    #[serde(rename = "startTime")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "endTime")]
    pub end_time: DateTime<Utc>,
    pub temperature: serde_json::Value, // can be int or QuantitativeValue
    #[serde(rename = "temperatureUnit", default)]
    pub temperature_unit: Option<String>,
    #[serde(rename = "probabilityOfPrecipitation", default)]
    pub probability_of_precipitation: Option<QuantValue>,
    #[serde(rename = "relativeHumidity", default)]
    pub relative_humidity: Option<QuantValue>,
    #[serde(rename = "windSpeed", default)]
    pub wind_speed: Option<serde_json::Value>,
    #[serde(rename = "shortForecast", default)]
    pub short_forecast: String,
}

#[derive(Debug, Deserialize)]
pub struct QuantValue {
    #[serde(rename = "unitCode", default)]
    pub unit_code: String,
    pub value: Option<f64>,
}

/// Raw gridpoint data from `/gridpoints/{wfo}/{x},{y}`.
#[derive(Debug, Deserialize)]
pub struct GridpointResponse {
    pub properties: GridpointProperties,
}

#[derive(Debug, Deserialize)]
pub struct GridpointProperties {
    #[serde(rename = "skyCover", default)]
    pub sky_cover: Option<GridpointLayer>,
    #[serde(rename = "relativeHumidity", default)]
    pub relative_humidity: Option<GridpointLayer>,
    #[serde(rename = "windGust", default)]
    pub wind_gust: Option<GridpointLayer>,
    #[serde(rename = "snowfallAmount", default)]
    pub snowfall_amount: Option<GridpointLayer>,
}

#[derive(Debug, Deserialize)]
pub struct GridpointLayer {
    #[serde(default)]
    pub uom: String,
    #[serde(default)]
    pub values: Vec<GridpointValue>,
}

#[derive(Debug, Deserialize)]
pub struct GridpointValue {
    /// ISO 8601 interval, e.g. `2024-01-15T12:00:00+00:00/PT3H`.
    #[serde(rename = "validTime")]
    pub valid_time: String,
    pub value: Option<f64>,
}

// ── Implementation ────────────────────────────────────────────────────

impl NoaaClient {
    pub fn new(user_agent: &str, limiter: RateLimiter, timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .pool_max_idle_per_host(4)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Noaa(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, limiter })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, label: &str) -> Result<T, Error> {
        self.limiter.wait().await;
        debug!("Fetching NWS {}: {}", label, url);

        let resp = self
            .client
            .get(url)
            .header("Accept", "application/geo+json")
            .send()
            .await
            .map_err(|e| Error::Noaa(format!("HTTP error for {label}: {e}")))?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Noaa(format!(
                "NWS returned {} for {}: {}",
                status,
                label,
                body_snippet(&body, 500)
            )));
        }

        resp.json()
            .await
            .map_err(|e| Error::Noaa(format!("JSON parse error for {label}: {e}")))
    }

    /// Fetch the hourly forecast for a grid point.
    pub async fn fetch_hourly_forecast(&self, grid: &NwsGrid) -> Result<HourlyForecastResponse, Error> {
        let url = format!(
            "{}/gridpoints/{}/{},{}/forecast/hourly",
            API_BASE, grid.office, grid.grid_x, grid.grid_y
        );
        self.get_json(&url, "hourly forecast").await
    }

    /// Fetch raw gridpoint quantitative data.
    pub async fn fetch_gridpoint_data(&self, grid: &NwsGrid) -> Result<GridpointResponse, Error> {
        let url = format!(
            "{}/gridpoints/{}/{},{}",
            API_BASE, grid.office, grid.grid_x, grid.grid_y
        );
        self.get_json(&url, "gridpoint").await
    }

    /// Fetch active alerts covering a point.
    pub async fn fetch_active_alerts(&self, lat: f64, lon: f64) -> Result<alerts::AlertsResponse, Error> {
        let url = format!("{}/alerts/active?point={:.4},{:.4}", API_BASE, lat, lon);
        self.get_json(&url, "active alerts").await
    }

    /// Fetch and reduce the point forecast for a grid.
    pub async fn get_point_forecast(&self, grid: &NwsGrid) -> Result<PointForecast, Error> {
        let (hourly, gridpoint) = tokio::join!(
            self.fetch_hourly_forecast(grid),
            self.fetch_gridpoint_data(grid)
        );
        let hourly = hourly?;
        // The raw gridpoint only adds sky cover, gusts and snowfall; the
        // hourly forecast alone is still a usable fragment.
        let gridpoint = match gridpoint {
            Ok(g) => Some(g),
            Err(e) => {
                debug!("NWS gridpoint unavailable for {}: {}", grid.office, e);
                None
            }
        };
        summarize_point_forecast(&hourly, gridpoint.as_ref(), Utc::now())
    }
}

/// Reduce NWS responses to the fragment for `now`.
pub fn summarize_point_forecast(
    hourly: &HourlyForecastResponse,
    gridpoint: Option<&GridpointResponse>,
    now: DateTime<Utc>,
) -> Result<PointForecast, Error> {
    let periods = &hourly.properties.periods;
    let current = periods
        .iter()
        .find(|p| p.start_time <= now && now < p.end_time)
        .or_else(|| periods.iter().find(|p| p.start_time > now))
        .ok_or_else(|| Error::Noaa("no hourly periods covering the current time".into()))?;

    let temperature_f = period_temperature_f(current);
    let wind_speed_mph = current.wind_speed.as_ref().and_then(parse_wind_mph);
    let precip_probability_pct = current
        .probability_of_precipitation
        .as_ref()
        .and_then(|q| q.value);
    let hourly_humidity = current.relative_humidity.as_ref().and_then(|q| q.value);

    let mut forecast = PointForecast {
        temperature_f,
        wind_speed_mph,
        precip_probability_pct,
        humidity_pct: hourly_humidity,
        short_forecast: Some(current.short_forecast.clone()).filter(|s| !s.is_empty()),
        ..Default::default()
    };

    if let Some(grid) = gridpoint {
        let props = &grid.properties;
        forecast.sky_cover_pct = props.sky_cover.as_ref().and_then(|l| layer_value_at(l, now));
        if let Some(h) = props.relative_humidity.as_ref().and_then(|l| layer_value_at(l, now)) {
            forecast.humidity_pct = Some(h);
        }
        forecast.wind_gust_mph = props
            .wind_gust
            .as_ref()
            .and_then(|l| layer_value_at(l, now).map(|v| speed_to_mph(v, &l.uom)));
        forecast.upcoming_snow_in = props.snowfall_amount.as_ref().map(|l| {
            let end = now + chrono::Duration::hours(UPCOMING_WINDOW_HOURS);
            length_to_inches(layer_sum_between(l, now, end), &l.uom)
        });
    }

    debug!(
        "NWS point forecast: temp={:?}°F wind={:?}mph gust={:?}mph sky={:?}% upcoming={:?}in",
        forecast.temperature_f,
        forecast.wind_speed_mph,
        forecast.wind_gust_mph,
        forecast.sky_cover_pct,
        forecast.upcoming_snow_in
    );

    Ok(forecast)
}

fn period_temperature_f(period: &ForecastPeriod) -> Option<f64> {
    let t = match &period.temperature {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::Object(obj) => obj.get("value").and_then(|v| v.as_f64()),
        _ => None,
    }?;
    match period.temperature_unit.as_deref() {
        Some("C") => Some(t * 9.0 / 5.0 + 32.0),
        _ => Some(t),
    }
}

/// Parse "10 mph", "5 to 15 mph" (upper bound), or a QuantitativeValue in km/h.
pub fn parse_wind_mph(raw: &serde_json::Value) -> Option<f64> {
    match raw {
        serde_json::Value::String(s) => s
            .split_whitespace()
            .filter_map(|tok| tok.parse::<f64>().ok())
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v)))),
        serde_json::Value::Object(obj) => {
            let value = obj.get("value").and_then(|v| v.as_f64())?;
            let unit = obj.get("unitCode").and_then(|u| u.as_str()).unwrap_or("");
            Some(speed_to_mph(value, unit))
        }
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn speed_to_mph(value: f64, uom: &str) -> f64 {
    if uom.ends_with("km_h-1") {
        value * MPH_PER_KMH
    } else if uom.ends_with("m_s-1") {
        value * MPH_PER_MS
    } else {
        value
    }
}

fn length_to_inches(value: f64, uom: &str) -> f64 {
    let inches = if uom.ends_with(":mm") {
        value / MM_PER_INCH
    } else if uom.ends_with(":m") {
        value * 1000.0 / MM_PER_INCH
    } else {
        value
    };
    (inches * 10.0).round() / 10.0
}

/// Parse an ISO 8601 `start/duration` interval.
pub fn parse_valid_time(raw: &str) -> Option<(DateTime<Utc>, chrono::Duration)> {
    let (start, duration) = raw.split_once('/')?;
    let start = DateTime::parse_from_rfc3339(start).ok()?.with_timezone(&Utc);
    Some((start, parse_iso_duration(duration)?))
}

/// Parse the day/hour/minute subset of ISO 8601 durations NWS emits
/// (`PT1H`, `P1DT6H`, `P2D`).
pub fn parse_iso_duration(raw: &str) -> Option<chrono::Duration> {
    let rest = raw.strip_prefix('P')?;
    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, t)) => (d, t),
        None => (rest, ""),
    };

    let mut total = chrono::Duration::zero();
    let mut number = String::new();
    for ch in date_part.chars() {
        if ch.is_ascii_digit() {
            number.push(ch);
        } else {
            let n: i64 = number.parse().ok()?;
            number.clear();
            total += match ch {
                'D' => chrono::Duration::days(n),
                'W' => chrono::Duration::weeks(n),
                _ => return None,
            };
        }
    }
    for ch in time_part.chars() {
        if ch.is_ascii_digit() {
            number.push(ch);
        } else {
            let n: i64 = number.parse().ok()?;
            number.clear();
            total += match ch {
                'H' => chrono::Duration::hours(n),
                'M' => chrono::Duration::minutes(n),
                'S' => chrono::Duration::seconds(n),
                _ => return None,
            };
        }
    }
    if !number.is_empty() || total <= chrono::Duration::zero() {
        return None;
    }
    Some(total)
}

/// Value of the interval containing `at`, or the next one after it.
fn layer_value_at(layer: &GridpointLayer, at: DateTime<Utc>) -> Option<f64> {
    let mut next: Option<(DateTime<Utc>, f64)> = None;
    for v in &layer.values {
        let (Some((start, dur)), Some(value)) = (parse_valid_time(&v.valid_time), v.value) else {
            continue;
        };
        if start <= at && at < start + dur {
            return Some(value);
        }
        if start > at && next.map_or(true, |(s, _)| start < s) {
            next = Some((start, value));
        }
    }
    next.map(|(_, v)| v)
}

/// Sum of interval values within `[from, to)`, prorated by overlap.
fn layer_sum_between(layer: &GridpointLayer, from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    layer
        .values
        .iter()
        .filter_map(|v| Some((parse_valid_time(&v.valid_time)?, v.value?)))
        .map(|((start, dur), value)| {
            let end = start + dur;
            let overlap_start = start.max(from);
            let overlap_end = end.min(to);
            if overlap_end <= overlap_start {
                return 0.0;
            }
            let overlap = (overlap_end - overlap_start).num_seconds() as f64;
            value * overlap / dur.num_seconds() as f64
        })
        .sum()
}

// ── Connector ─────────────────────────────────────────────────────────

/// Point-forecast connector backed by the NWS gridpoint endpoints.
pub struct NoaaForecastConnector {
    client: NoaaClient,
    timeout: Duration,
}

impl NoaaForecastConnector {
    pub fn new(client: NoaaClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl SourceConnector for NoaaForecastConnector {
    fn source(&self) -> Source {
        Source::Noaa
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, mountain: &MountainConfig) -> Result<SnapshotFragment, Error> {
        let grid = mountain
            .nws
            .as_ref()
            .ok_or_else(|| Error::Noaa(format!("no NWS grid configured for {}", mountain.id)))?;
        let forecast = self.client.get_point_forecast(grid).await?;
        Ok(SnapshotFragment::Forecast(forecast))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .expect("valid timestamp")
            .with_timezone(&Utc)
    }

    fn sample_hourly() -> HourlyForecastResponse {
        serde_json::from_str(
            r#"{
                "properties": {
                    "periods": [
                        {
                            "number": 1,
                            "startTime": "2026-01-10T08:00:00-08:00",
                            "endTime": "2026-01-10T09:00:00-08:00",
                            "isDaytime": true,
                            "temperature": 24,
                            "temperatureUnit": "F",
                            "probabilityOfPrecipitation": {"unitCode": "wmoUnit:percent", "value": 80},
                            "relativeHumidity": {"unitCode": "wmoUnit:percent", "value": 90},
                            "windSpeed": "5 to 10 mph",
                            "shortForecast": "Snow"
                        },
                        {
                            "number": 2,
                            "startTime": "2026-01-10T09:00:00-08:00",
                            "endTime": "2026-01-10T10:00:00-08:00",
                            "isDaytime": true,
                            "temperature": 26,
                            "temperatureUnit": "F",
                            "windSpeed": "15 mph",
                            "shortForecast": "Snow Showers"
                        }
                    ]
                }
            }"#,
        )
        .expect("hourly fixture should deserialize")
    }

    fn sample_gridpoint() -> GridpointResponse {
        serde_json::from_str(
            r#"{
                "properties": {
                    "skyCover": {"uom": "wmoUnit:percent", "values": [
                        {"validTime": "2026-01-10T15:00:00+00:00/PT2H", "value": 95}
                    ]},
                    "relativeHumidity": {"uom": "wmoUnit:percent", "values": [
                        {"validTime": "2026-01-10T16:00:00+00:00/PT1H", "value": 85}
                    ]},
                    "windGust": {"uom": "wmoUnit:km_h-1", "values": [
                        {"validTime": "2026-01-10T16:00:00+00:00/PT6H", "value": 40.0}
                    ]},
                    "snowfallAmount": {"uom": "wmoUnit:mm", "values": [
                        {"validTime": "2026-01-10T12:00:00+00:00/PT6H", "value": 50.8},
                        {"validTime": "2026-01-10T18:00:00+00:00/PT6H", "value": 25.4},
                        {"validTime": "2026-01-14T00:00:00+00:00/PT6H", "value": 100.0}
                    ]}
                }
            }"#,
        )
        .expect("gridpoint fixture should deserialize")
    }

    #[test]
    fn test_parse_iso_duration() {
        assert_eq!(parse_iso_duration("PT1H"), Some(chrono::Duration::hours(1)));
        assert_eq!(parse_iso_duration("P1DT6H"), Some(chrono::Duration::hours(30)));
        assert_eq!(parse_iso_duration("P2D"), Some(chrono::Duration::days(2)));
        assert_eq!(parse_iso_duration("PT"), None);
        assert_eq!(parse_iso_duration("1H"), None);
    }

    #[test]
    fn test_parse_wind_takes_upper_bound() {
        assert_eq!(parse_wind_mph(&serde_json::json!("5 to 10 mph")), Some(10.0));
        assert_eq!(parse_wind_mph(&serde_json::json!("15 mph")), Some(15.0));
        assert_eq!(parse_wind_mph(&serde_json::json!("calm")), None);
        let kmh = parse_wind_mph(&serde_json::json!({"unitCode": "wmoUnit:km_h-1", "value": 10.0}))
            .expect("quantitative wind parses");
        assert!((kmh - 6.21).abs() < 0.01);
    }

    #[test]
    fn test_summarize_hourly_only() {
        let hourly = sample_hourly();
        let now = at("2026-01-10T16:30:00Z"); // 08:30 local

        let fc = summarize_point_forecast(&hourly, None, now).expect("summary should build");

        assert_eq!(fc.temperature_f, Some(24.0));
        assert_eq!(fc.wind_speed_mph, Some(10.0));
        assert_eq!(fc.precip_probability_pct, Some(80.0));
        assert_eq!(fc.humidity_pct, Some(90.0));
        assert_eq!(fc.short_forecast.as_deref(), Some("Snow"));
        assert_eq!(fc.upcoming_snow_in, None);
        assert_eq!(fc.sky_cover_pct, None);
    }

    #[test]
    fn test_summarize_with_gridpoint_layers() {
        let hourly = sample_hourly();
        let grid = sample_gridpoint();
        let now = at("2026-01-10T16:30:00Z");

        let fc = summarize_point_forecast(&hourly, Some(&grid), now).expect("summary should build");

        assert_eq!(fc.sky_cover_pct, Some(95.0));
        assert_eq!(fc.humidity_pct, Some(85.0));
        let gust = fc.wind_gust_mph.expect("gust present");
        assert!((gust - 24.85).abs() < 0.1);
        // 1.5h of the first 2in block remain plus the whole 1in block;
        // the Jan 14 block is outside the 48h window.
        let snow = fc.upcoming_snow_in.expect("snowfall present");
        assert!((snow - 1.5).abs() < 0.05, "got {snow}");
    }

    #[test]
    fn test_summarize_rejects_stale_forecast() {
        let hourly = sample_hourly();
        let now = at("2026-01-12T00:00:00Z");
        assert!(summarize_point_forecast(&hourly, None, now).is_err());
    }
}
