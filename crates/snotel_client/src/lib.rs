//! NRCS SNOTEL client.
//!
//! Pulls daily snow depth (`SNWD`) from the AWDB REST service and derives
//! recent snowfall from positive depth changes.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use common::config::MountainConfig;
use common::{body_snippet, Error, SnapshotFragment, SnowTelemetry, Source, SourceConnector};
use serde::Deserialize;
use tracing::debug;

const DATA_URL: &str = "https://wcc.sc.egov.usda.gov/awdbRestApi/services/v1/data";
const LOOKBACK_DAYS: i64 = 4;
/// Readings older than this are treated as a dead station.
const MAX_READING_AGE_DAYS: i64 = 2;

/// SNOTEL AWDB client.
#[derive(Debug, Clone)]
pub struct SnotelClient {
    client: reqwest::Client,
}

/// One station's block in the AWDB `data` response.
#[derive(Debug, Deserialize)]
pub struct StationData {
    #[serde(rename = "stationTriplet")]
    pub station_triplet: String,
    #[serde(default)]
    pub data: Vec<ElementData>,
}

#[derive(Debug, Deserialize)]
pub struct ElementData {
    #[serde(rename = "stationElement")]
    pub station_element: StationElement,
    #[serde(default)]
    pub values: Vec<DailyValue>,
}

#[derive(Debug, Deserialize)]
pub struct StationElement {
    #[serde(rename = "elementCode")]
    pub element_code: String,
}

#[derive(Debug, Deserialize)]
pub struct DailyValue {
    pub date: String,
    pub value: Option<f64>,
}

impl SnotelClient {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .pool_max_idle_per_host(4)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Snotel(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Fetch the last few days of snow depth for a station.
    pub async fn fetch_snow_depth(&self, triplet: &str, today: NaiveDate) -> Result<Vec<StationData>, Error> {
        let begin = today - chrono::Duration::days(LOOKBACK_DAYS);
        let query = [
            ("stationTriplets", triplet.to_string()),
            ("elements", "SNWD".to_string()),
            ("duration", "DAILY".to_string()),
            ("beginDate", begin.format("%Y-%m-%d").to_string()),
            ("endDate", today.format("%Y-%m-%d").to_string()),
        ];

        debug!("Fetching SNOTEL depth: {} triplet={}", DATA_URL, triplet);

        let resp = self
            .client
            .get(DATA_URL)
            .query(&query)
            .send()
            .await
            .map_err(|e| Error::Snotel(format!("HTTP error for {triplet}: {e}")))?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Snotel(format!(
                "AWDB returned {} for {}: {}",
                status,
                triplet,
                body_snippet(&body, 500)
            )));
        }

        resp.json()
            .await
            .map_err(|e| Error::Snotel(format!("JSON parse error for {triplet}: {e}")))
    }

    pub async fn get_telemetry(&self, triplet: &str) -> Result<SnowTelemetry, Error> {
        let today = Utc::now().date_naive();
        let stations = self.fetch_snow_depth(triplet, today).await?;
        summarize_depths(triplet, &stations, today)
    }
}

/// Derive depth and 24/48/72h snowfall from daily depth readings.
///
/// Snowfall over N days is the positive depth change against the reading N
/// days before the latest one; settling and melt clamp to zero.
pub fn summarize_depths(
    triplet: &str,
    stations: &[StationData],
    today: NaiveDate,
) -> Result<SnowTelemetry, Error> {
    let mut readings: Vec<(NaiveDate, f64)> = stations
        .iter()
        .filter(|s| s.station_triplet == triplet)
        .flat_map(|s| s.data.iter())
        .filter(|d| d.station_element.element_code == "SNWD")
        .flat_map(|d| d.values.iter())
        .filter_map(|v| {
            let date = NaiveDate::parse_from_str(v.date.get(..10)?, "%Y-%m-%d").ok()?;
            Some((date, v.value?))
        })
        .collect();
    readings.sort_by_key(|(d, _)| *d);

    let &(latest_date, latest_depth) = readings
        .last()
        .ok_or_else(|| Error::Snotel(format!("no snow depth readings for {triplet}")))?;

    if (today - latest_date).num_days() > MAX_READING_AGE_DAYS {
        return Err(Error::Snotel(format!(
            "latest reading for {} is from {}",
            triplet, latest_date
        )));
    }

    let depth_on = |days_before: i64| {
        let target = latest_date - chrono::Duration::days(days_before);
        readings.iter().find(|(d, _)| *d == target).map(|(_, v)| *v)
    };
    let snowfall_since = |days_before: i64| depth_on(days_before).map(|prior| (latest_depth - prior).max(0.0));

    let telemetry = SnowTelemetry {
        snowfall_24h_in: snowfall_since(1),
        snowfall_48h_in: snowfall_since(2),
        snowfall_72h_in: snowfall_since(3),
        base_depth_in: Some(latest_depth),
        observed_at: latest_date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc()),
    };

    debug!(
        "{}: depth={}in 24h={:?} 48h={:?} 72h={:?}",
        triplet, latest_depth, telemetry.snowfall_24h_in, telemetry.snowfall_48h_in, telemetry.snowfall_72h_in
    );

    Ok(telemetry)
}

/// Snow telemetry connector.
pub struct SnotelConnector {
    client: SnotelClient,
    timeout: Duration,
}

impl SnotelConnector {
    pub fn new(client: SnotelClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl SourceConnector for SnotelConnector {
    fn source(&self) -> Source {
        Source::Snotel
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, mountain: &MountainConfig) -> Result<SnapshotFragment, Error> {
        let triplet = mountain
            .snotel_triplet
            .as_deref()
            .ok_or_else(|| Error::Snotel(format!("no SNOTEL station for {}", mountain.id)))?;
        Ok(SnapshotFragment::Snow(self.client.get_telemetry(triplet).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("valid date")
    }

    fn sample_response() -> Vec<StationData> {
        serde_json::from_str(
            r#"[{
                "stationTriplet": "791:WA:SNTL",
                "data": [{
                    "stationElement": {"elementCode": "SNWD", "storedUnitCode": "in"},
                    "values": [
                        {"date": "2026-01-06", "value": 58},
                        {"date": "2026-01-07", "value": 60},
                        {"date": "2026-01-08", "value": 57},
                        {"date": "2026-01-09", "value": 62},
                        {"date": "2026-01-10", "value": 70}
                    ]
                }]
            }]"#,
        )
        .expect("fixture should deserialize")
    }

    #[test]
    fn test_snowfall_from_depth_deltas() {
        let t = summarize_depths("791:WA:SNTL", &sample_response(), date("2026-01-10"))
            .expect("summary should build");

        assert_eq!(t.base_depth_in, Some(70.0));
        assert_eq!(t.snowfall_24h_in, Some(8.0));
        assert_eq!(t.snowfall_48h_in, Some(13.0));
        assert_eq!(t.snowfall_72h_in, Some(10.0));
    }

    #[test]
    fn test_settling_clamps_to_zero() {
        let stations: Vec<StationData> = serde_json::from_str(
            r#"[{"stationTriplet": "1:WA:SNTL", "data": [{
                "stationElement": {"elementCode": "SNWD"},
                "values": [
                    {"date": "2026-01-09", "value": 65},
                    {"date": "2026-01-10", "value": 61}
                ]
            }]}]"#,
        )
        .expect("fixture parses");
        let t = summarize_depths("1:WA:SNTL", &stations, date("2026-01-10")).expect("summary");

        assert_eq!(t.snowfall_24h_in, Some(0.0));
        assert_eq!(t.snowfall_48h_in, None, "missing prior reading is unknown, not zero");
    }

    #[test]
    fn test_missing_values_are_skipped() {
        let stations: Vec<StationData> = serde_json::from_str(
            r#"[{"stationTriplet": "1:WA:SNTL", "data": [{
                "stationElement": {"elementCode": "SNWD"},
                "values": [
                    {"date": "2026-01-09", "value": 40},
                    {"date": "2026-01-10", "value": null}
                ]
            }]}]"#,
        )
        .expect("fixture parses");
        let t = summarize_depths("1:WA:SNTL", &stations, date("2026-01-10")).expect("summary");
        assert_eq!(t.base_depth_in, Some(40.0));
        assert_eq!(t.snowfall_24h_in, None);
    }

    #[test]
    fn test_stale_station_is_an_error() {
        let result = summarize_depths("791:WA:SNTL", &sample_response(), date("2026-01-20"));
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_response_is_an_error() {
        assert!(summarize_depths("791:WA:SNTL", &[], date("2026-01-10")).is_err());
    }
}
