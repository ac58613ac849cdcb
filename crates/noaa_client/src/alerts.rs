//! NWS active alerts → `StormInfo`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::config::MountainConfig;
use common::{AlertSummary, Error, SnapshotFragment, Source, SourceConnector, StormInfo};
use serde::Deserialize;
use tracing::debug;

use crate::NoaaClient;

/// Winter-storm family events; these favor fresh snow.
const POWDER_EVENTS: &[&str] = &[
    "Winter Storm Warning",
    "Winter Storm Watch",
    "Blizzard Warning",
    "Winter Weather Advisory",
    "Lake Effect Snow Warning",
    "Heavy Snow Warning",
    "Snow Squall Warning",
];

#[derive(Debug, Deserialize)]
pub struct AlertsResponse {
    #[serde(default)]
    pub features: Vec<AlertFeature>,
}

#[derive(Debug, Deserialize)]
pub struct AlertFeature {
    pub properties: AlertProperties,
}

#[derive(Debug, Deserialize)]
pub struct AlertProperties {
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub ends: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
}

pub fn is_powder_event(event: &str) -> bool {
    POWDER_EVENTS.iter().any(|e| e.eq_ignore_ascii_case(event))
}

fn severity_rank(severity: &str) -> u8 {
    match severity.to_ascii_lowercase().as_str() {
        "extreme" => 4,
        "severe" => 3,
        "moderate" => 2,
        "minor" => 1,
        _ => 0,
    }
}

/// Reduce the active alert list to the one alert that matters most for
/// skiing: powder events first, then highest severity.
pub fn summarize_alerts(resp: &AlertsResponse, now: DateTime<Utc>) -> AlertSummary {
    let chosen = resp
        .features
        .iter()
        .map(|f| &f.properties)
        .filter(|p| p.ends.or(p.expires).map_or(true, |end| end > now))
        .max_by_key(|p| (is_powder_event(&p.event), severity_rank(&p.severity)));

    let storm = chosen.map(|p| {
        let hours_remaining = p
            .ends
            .or(p.expires)
            .map(|end| ((end - now).num_minutes() as f64 / 60.0).max(0.0))
            .map(|h| (h * 10.0).round() / 10.0)
            .unwrap_or(0.0);
        StormInfo {
            is_active: true,
            is_powder_boost: is_powder_event(&p.event),
            event_type: p.event.clone(),
            expected_snowfall_inches: p.description.as_deref().and_then(parse_expected_snowfall),
            hours_remaining,
            severity: p.severity.clone(),
        }
    });

    AlertSummary {
        storm,
        active_alerts: resp.features.len(),
    }
}

/// Largest snowfall amount mentioned in alert text, in inches.
///
/// Understands "8 to 14 inches", "8-14 inches", "up to 6 inches" and
/// "1 to 2 feet"; ranges resolve to their upper bound.
pub fn parse_expected_snowfall(text: &str) -> Option<f64> {
    let lowered = text.to_ascii_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| c.is_whitespace() || c == ',' || c == ';' || c == '(' || c == ')')
        .filter(|t| !t.is_empty())
        .collect();

    let mut best: Option<f64> = None;
    for (i, tok) in tokens.iter().enumerate() {
        let word = tok.trim_end_matches('.');
        let scale = match word {
            "inch" | "inches" => 1.0,
            "foot" | "feet" => 12.0,
            _ => continue,
        };
        let Some(prev) = i.checked_sub(1).map(|j| tokens[j]) else {
            continue;
        };
        let upper = match prev.split_once('-') {
            Some((_, hi)) => hi.parse::<f64>().ok(),
            None => prev.parse::<f64>().ok(),
        };
        if let Some(v) = upper {
            // "above 4000 feet" is an elevation, not an accumulation.
            if scale > 1.0 && v > 10.0 {
                continue;
            }
            let inches = v * scale;
            best = Some(best.map_or(inches, |b| b.max(inches)));
        }
    }
    best
}

/// Active-alert connector.
pub struct NwsAlertsConnector {
    client: NoaaClient,
    timeout: Duration,
}

impl NwsAlertsConnector {
    pub fn new(client: NoaaClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl SourceConnector for NwsAlertsConnector {
    fn source(&self) -> Source {
        Source::Alerts
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, mountain: &MountainConfig) -> Result<SnapshotFragment, Error> {
        let resp = self.client.fetch_active_alerts(mountain.lat, mountain.lon).await?;
        let summary = summarize_alerts(&resp, Utc::now());
        debug!(
            "{}: {} active alerts, storm={:?}",
            mountain.id,
            summary.active_alerts,
            summary.storm.as_ref().map(|s| s.event_type.as_str())
        );
        Ok(SnapshotFragment::Alerts(summary))
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

    fn sample_alerts() -> AlertsResponse {
        serde_json::from_str(
            r#"{
                "features": [
                    {"properties": {
                        "event": "Wind Advisory",
                        "severity": "Severe",
                        "description": "Southwest winds 25 to 35 mph.",
                        "ends": "2026-01-10T20:00:00Z"
                    }},
                    {"properties": {
                        "event": "Winter Storm Warning",
                        "severity": "Moderate",
                        "description": "Heavy snow expected. Total snow accumulations of 10 to 18 inches, with 2-3 inches per hour at times.",
                        "ends": "2026-01-11T04:00:00Z",
                        "expires": "2026-01-10T22:00:00Z"
                    }}
                ]
            }"#,
        )
        .expect("alerts fixture should deserialize")
    }

    #[test]
    fn test_powder_event_wins_over_higher_severity() {
        let summary = summarize_alerts(&sample_alerts(), at("2026-01-10T16:00:00Z"));
        let storm = summary.storm.expect("storm present");

        assert_eq!(summary.active_alerts, 2);
        assert_eq!(storm.event_type, "Winter Storm Warning");
        assert!(storm.is_powder_boost);
        assert!(storm.is_active);
        assert_eq!(storm.expected_snowfall_inches, Some(18.0));
        assert!((storm.hours_remaining - 12.0).abs() < 0.01);
    }

    #[test]
    fn test_non_powder_alert_is_active_without_boost() {
        let resp: AlertsResponse = serde_json::from_str(
            r#"{"features": [{"properties": {"event": "Ice Storm Warning", "severity": "Severe"}}]}"#,
        )
        .expect("fixture parses");
        let storm = summarize_alerts(&resp, Utc::now()).storm.expect("storm present");
        assert!(!storm.is_powder_boost);
        assert_eq!(storm.expected_snowfall_inches, None);
        assert_eq!(storm.hours_remaining, 0.0);
    }

    #[test]
    fn test_expired_alerts_are_ignored() {
        let summary = summarize_alerts(&sample_alerts(), at("2026-01-12T00:00:00Z"));
        assert!(summary.storm.is_none());
    }

    #[test]
    fn test_parse_expected_snowfall_variants() {
        assert_eq!(parse_expected_snowfall("accumulations of 8 to 14 inches"), Some(14.0));
        assert_eq!(parse_expected_snowfall("8-12 inches above 4000 feet"), Some(12.0));
        assert_eq!(parse_expected_snowfall("up to 6 inches."), Some(6.0));
        assert_eq!(parse_expected_snowfall("1 to 2 feet of snow"), Some(24.0));
        assert_eq!(parse_expected_snowfall("gusty winds"), None);
    }
}
