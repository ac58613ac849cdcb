//! Parallel fan-out to source connectors and the snapshot merge.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use common::{
    AlertSummary, ConditionsSnapshot, ExtendedForecast, MountainConfig, PointForecast, Result,
    SnapshotFragment, SnowTelemetry, Source, SourceConnector, SourceReport,
};
use futures::future::join_all;
use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::registry::MountainRegistry;

/// Fans out to every registered connector for one location and merges
/// whatever comes back.
pub struct Aggregator {
    registry: Arc<MountainRegistry>,
    connectors: Vec<Arc<dyn SourceConnector>>,
    deadline: Duration,
}

impl Aggregator {
    pub fn new(
        registry: Arc<MountainRegistry>,
        connectors: Vec<Arc<dyn SourceConnector>>,
        deadline: Duration,
    ) -> Self {
        Self {
            registry,
            connectors,
            deadline,
        }
    }

    pub fn sources(&self) -> Vec<Source> {
        self.connectors.iter().map(|c| c.source()).collect()
    }

    /// Snapshot for a known location id. Fails only for unknown ids.
    pub async fn aggregate(&self, location_id: &str) -> Result<ConditionsSnapshot> {
        let mountain = self.registry.get(location_id)?;
        Ok(self.aggregate_mountain(mountain).await)
    }

    pub async fn aggregate_mountain(&self, mountain: &MountainConfig) -> ConditionsSnapshot {
        let reports = self.collect(mountain).await;
        let snapshot = merge_fragments(&mountain.id, &reports, Utc::now());
        info!(
            "{}: aggregated {}/{} sources",
            mountain.id,
            snapshot.data_available.count(),
            reports.len()
        );
        snapshot
    }

    /// Run every connector concurrently and wait for all of them to settle.
    pub async fn collect(&self, mountain: &MountainConfig) -> Vec<SourceReport> {
        let started = Instant::now();
        let deadline = started + self.deadline;
        let calls = self
            .connectors
            .iter()
            .map(|c| bounded_fetch(c.as_ref(), mountain, deadline));
        let reports = join_all(calls).await;
        debug!(
            "{}: connectors settled in {}ms",
            mountain.id,
            started.elapsed().as_millis()
        );
        reports
    }
}

/// One connector call, bounded by the sooner of its own timeout and the
/// aggregation deadline. Never fails; errors, timeouts and panics become
/// `ok = false`.
pub async fn bounded_fetch(
    connector: &dyn SourceConnector,
    mountain: &MountainConfig,
    deadline: Instant,
) -> SourceReport {
    let source = connector.source();
    let started = Instant::now();
    let budget = connector
        .timeout()
        .min(deadline.saturating_duration_since(started));

    let call = AssertUnwindSafe(connector.fetch(mountain)).catch_unwind();
    let result = tokio::time::timeout(budget, call).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let result = match result {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(_)) => {
            warn!("{}: {} connector panicked", mountain.id, source);
            return SourceReport::unavailable(source, "connector panicked", elapsed_ms);
        }
        Err(elapsed) => Err(elapsed),
    };

    match result {
        Ok(Ok(fragment)) if fragment.source() == source => SourceReport::success(fragment, elapsed_ms),
        Ok(Ok(fragment)) => {
            warn!(
                "{}: {} connector returned a {} fragment",
                mountain.id,
                source,
                fragment.source()
            );
            SourceReport::unavailable(source, "fragment type mismatch", elapsed_ms)
        }
        Ok(Err(e)) => {
            warn!("{}: {} unavailable: {}", mountain.id, source, e);
            SourceReport::unavailable(source, e.to_string(), elapsed_ms)
        }
        Err(_) => {
            warn!("{}: {} timed out after {}ms", mountain.id, source, budget.as_millis());
            SourceReport::unavailable(source, format!("timed out after {}ms", budget.as_millis()), elapsed_ms)
        }
    }
}

fn max_of(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, y) => x.or(y),
    }
}

/// Merge connector fragments into one snapshot.
///
/// Dedicated sources win for what they measure (SNOTEL for snow on the
/// ground, NWS for point weather); Open-Meteo fills the gaps. Upcoming snow
/// takes the larger of the two forecasts. Availability is recorded per
/// source from each report's `ok` flag.
pub fn merge_fragments(
    location_id: &str,
    reports: &[SourceReport],
    observed_at: DateTime<Utc>,
) -> ConditionsSnapshot {
    let mut snow: Option<&SnowTelemetry> = None;
    let mut point: Option<&PointForecast> = None;
    let mut extended: Option<&ExtendedForecast> = None;
    let mut alerts: Option<&AlertSummary> = None;

    let mut snapshot = ConditionsSnapshot::empty(location_id);

    for report in reports {
        snapshot
            .data_available
            .set(report.source, report.ok || snapshot.data_available.get(report.source));
        if !report.ok {
            continue;
        }
        match &report.fragment {
            Some(SnapshotFragment::Snow(s)) => snow = snow.or(Some(s)),
            Some(SnapshotFragment::Forecast(p)) => point = point.or(Some(p)),
            Some(SnapshotFragment::Extended(x)) => extended = extended.or(Some(x)),
            Some(SnapshotFragment::Alerts(a)) => alerts = alerts.or(Some(a)),
            None => {}
        }
    }

    snapshot.snowfall_24h = snow
        .and_then(|s| s.snowfall_24h_in)
        .or_else(|| extended.and_then(|x| x.modeled_snowfall_24h_in));
    snapshot.snowfall_48h = snow
        .and_then(|s| s.snowfall_48h_in)
        .or_else(|| extended.and_then(|x| x.modeled_snowfall_48h_in));
    snapshot.snowfall_72h = snow.and_then(|s| s.snowfall_72h_in);
    snapshot.base_depth = snow.and_then(|s| s.base_depth_in);

    snapshot.temperature = point
        .and_then(|p| p.temperature_f)
        .or_else(|| extended.and_then(|x| x.current_temperature_f));
    snapshot.wind_speed = point
        .and_then(|p| p.wind_speed_mph)
        .or_else(|| extended.and_then(|x| x.current_wind_mph));
    snapshot.wind_gust = point
        .and_then(|p| p.wind_gust_mph)
        .or_else(|| extended.and_then(|x| x.current_gust_mph));
    snapshot.humidity = point
        .and_then(|p| p.humidity_pct)
        .or_else(|| extended.and_then(|x| x.current_humidity_pct));
    snapshot.sky_cover_percent = point
        .and_then(|p| p.sky_cover_pct)
        .or_else(|| extended.and_then(|x| x.current_cloud_cover_pct));
    snapshot.precip_probability_percent = point.and_then(|p| p.precip_probability_pct).or_else(|| {
        extended
            .and_then(|x| x.days.first())
            .and_then(|d| d.precip_probability_pct)
    });
    snapshot.short_forecast = point.and_then(|p| p.short_forecast.clone());

    snapshot.freezing_level_feet = extended.and_then(|x| x.freezing_level_ft);
    snapshot.upcoming_snow_inches = max_of(
        point.and_then(|p| p.upcoming_snow_in),
        extended.and_then(|x| x.upcoming_snow_in),
    );
    snapshot.forecast_days = extended.map(|x| x.days.clone()).unwrap_or_default();

    snapshot.active_storm = alerts.and_then(|a| a.storm.clone());
    snapshot.observed_at = Some(observed_at);

    snapshot
}
