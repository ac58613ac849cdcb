//! Conditions service: registry, cache, aggregator, scorer and planners
//! behind one object that the HTTP layer and CLI share.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::config::{EngineConfig, NoDataPolicy};
use common::{
    ConditionsSnapshot, DataAvailability, Error, MountainConfig, NarrativeGenerator, RainRisk, Result,
    ScoreFactor, SourceConnector, SourceReport, StormInfo,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregator::Aggregator;
use crate::batch::{self, BatchOutcome};
use crate::cache::{cache_key, Cached, ConditionsCache};
use crate::planners::arrival::AdviceSource;
use crate::planners::{
    advise_arrival, plan_powder_days, predict_parking, ArrivalInputs, ArrivalRecommendation, ParkingInputs,
    ParkingPrediction, PowderDayPlan,
};
use crate::registry::MountainRegistry;
use crate::roads::{RoadStatusProvider, UnknownRoads};
use crate::scoring::{self, ScoringContext};

const NO_FORECAST: &str = "Multi-day forecast unavailable";

/// Cached product classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Product {
    PowderScore,
    Parking,
    PowderDayPlan,
    ArrivalTime,
    SnowfallHistory,
}

impl Product {
    pub fn name(&self) -> &'static str {
        match self {
            Product::PowderScore => "powder-score",
            Product::Parking => "parking",
            Product::PowderDayPlan => "powder-day-plan",
            Product::ArrivalTime => "arrival-time",
            Product::SnowfallHistory => "snowfall-history",
        }
    }
}

// ── Payloads ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowderScorePayload {
    pub score: Option<f64>,
    pub factors: Vec<ScoreFactor>,
    pub verdict: Option<String>,
    pub conditions: ConditionsSnapshot,
    pub freezing_level: Option<f64>,
    pub rain_risk: Option<RainRisk>,
    pub storm_info: Option<StormInfo>,
    pub data_available: DataAvailability,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl PowderScorePayload {
    /// Explicit "no data" state: no score, reason in `error`.
    pub fn unavailable(location_id: &str, reason: impl Into<String>) -> Self {
        Self {
            score: None,
            factors: Vec::new(),
            verdict: None,
            conditions: ConditionsSnapshot::empty(location_id),
            freezing_level: None,
            rain_risk: None,
            storm_info: None,
            data_available: DataAvailability::default(),
            error: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnowfallHistory {
    pub snowfall_24h: Option<f64>,
    pub snowfall_48h: Option<f64>,
    pub snowfall_72h: Option<f64>,
    pub base_depth: Option<f64>,
    /// Whether the numbers came from station telemetry or the model.
    pub measured: bool,
}

/// A payload with its cache age.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedPayload<T> {
    #[serde(flatten)]
    pub payload: T,
    pub computed_at: DateTime<Utc>,
    pub age_seconds: i64,
    pub stale: bool,
}

impl<T> From<Cached<T>> for CachedPayload<T> {
    fn from(c: Cached<T>) -> Self {
        Self {
            payload: c.value,
            computed_at: c.computed_at,
            age_seconds: c.age_secs,
            stale: c.stale,
        }
    }
}

impl<T> CachedPayload<T> {
    /// A payload computed just now and not stored.
    pub fn uncached(payload: T) -> Self {
        Self {
            payload,
            computed_at: Utc::now(),
            age_seconds: 0,
            stale: false,
        }
    }
}

/// Batch response: one entry per id plus an `errors` map.
#[derive(Debug, Clone, Serialize)]
pub struct BatchPayload<T> {
    #[serde(flatten)]
    pub results: BTreeMap<String, T>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
}

impl<T> From<BatchOutcome<T>> for BatchPayload<T> {
    fn from(o: BatchOutcome<T>) -> Self {
        Self {
            results: o.results,
            errors: o.errors,
        }
    }
}

// ── Service ───────────────────────────────────────────────────────────

pub struct ConditionsService {
    config: EngineConfig,
    registry: Arc<MountainRegistry>,
    cache: Arc<ConditionsCache>,
    aggregator: Aggregator,
    roads: Arc<dyn RoadStatusProvider>,
    narrator: Option<Arc<dyn NarrativeGenerator>>,
}

impl ConditionsService {
    pub fn new(config: EngineConfig, connectors: Vec<Arc<dyn SourceConnector>>) -> Self {
        let registry = Arc::new(MountainRegistry::new(config.mountains.clone()));
        let deadline = Duration::from_secs(config.sources.aggregator_timeout_secs);
        let aggregator = Aggregator::new(Arc::clone(&registry), connectors, deadline);
        Self {
            config,
            registry,
            cache: Arc::new(ConditionsCache::new()),
            aggregator,
            roads: Arc::new(UnknownRoads),
            narrator: None,
        }
    }

    pub fn with_roads(mut self, roads: Arc<dyn RoadStatusProvider>) -> Self {
        self.roads = roads;
        self
    }

    pub fn with_narrator(mut self, narrator: Arc<dyn NarrativeGenerator>) -> Self {
        self.narrator = Some(narrator);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &MountainRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &ConditionsCache {
        &self.cache
    }

    pub fn ttl(&self, product: Product) -> Duration {
        let c = &self.config.cache;
        Duration::from_secs(match product {
            Product::PowderScore | Product::SnowfallHistory => c.powder_score_secs,
            Product::Parking => c.parking_secs,
            Product::PowderDayPlan => c.multi_day_secs,
            Product::ArrivalTime => c.narrative_secs,
        })
    }

    fn context(&self, mountain: &MountainConfig) -> ScoringContext {
        ScoringContext::for_mountain(mountain, Utc::now())
    }

    /// Aggregate and score without touching the cache.
    async fn compute_powder_score(&self, mountain: &MountainConfig) -> Result<PowderScorePayload> {
        let snapshot = self.aggregator.aggregate_mountain(mountain).await;
        let ctx = self.context(mountain);

        let mut note = None;
        if !snapshot.data_available.any() {
            match self.config.scoring.no_data_policy {
                NoDataPolicy::Unavailable => return Err(Error::NoData(mountain.id.clone())),
                NoDataPolicy::Neutral => {
                    warn!("{}: every source failed, emitting neutral score", mountain.id);
                    note = Some("No live data; neutral score".to_string());
                }
            }
        }

        let score = scoring::score(&snapshot, &ctx);
        info!("{}: powder score {:.1} ({})", mountain.id, score.value, score.verdict);

        Ok(PowderScorePayload {
            score: Some(score.value),
            factors: score.factors,
            verdict: Some(score.verdict),
            freezing_level: snapshot.freezing_level_feet,
            rain_risk: scoring::rain_risk(snapshot.freezing_level_feet, mountain.base_elevation_ft),
            storm_info: snapshot.active_storm.clone(),
            data_available: snapshot.data_available,
            conditions: snapshot,
            error: note,
        })
    }

    /// Cached powder score. `Error::NoData` when every source failed and
    /// nothing was ever cached for this location.
    pub async fn powder_score(&self, id: &str) -> Result<CachedPayload<PowderScorePayload>> {
        let mountain = self.registry.get(id)?;
        let key = cache_key(id, Product::PowderScore.name(), &[]);
        let cached = self
            .cache
            .get_or_compute(&key, self.ttl(Product::PowderScore), || self.compute_powder_score(mountain))
            .await?;
        Ok(cached.into())
    }

    /// Powder score for the HTTP surface: total unavailability becomes a
    /// payload with `error` set and no score.
    pub async fn powder_score_or_unavailable(&self, id: &str) -> Result<CachedPayload<PowderScorePayload>> {
        match self.powder_score(id).await {
            Ok(p) => Ok(p),
            Err(e) if e.is_client_error() => Err(e),
            Err(e) => {
                warn!("{}: conditions unavailable: {}", id, e);
                Ok(CachedPayload::uncached(PowderScorePayload::unavailable(
                    id,
                    "Conditions data is temporarily unavailable",
                )))
            }
        }
    }

    pub async fn parking(&self, id: &str) -> Result<CachedPayload<ParkingPrediction>> {
        let mountain = self.registry.get(id)?;
        let ctx = self.context(mountain);
        let date = ctx.local_time.format("%Y-%m-%d").to_string();
        let hour = ctx.hour().to_string();
        let key = cache_key(id, Product::Parking.name(), &[("date", &date), ("hour", &hour)]);

        let cached = self
            .cache
            .get_or_compute(&key, self.ttl(Product::Parking), || async {
                let score = self.powder_score(id).await.ok();
                let road_status = self.roads.road_status(mountain).await;
                let inputs = ParkingInputs {
                    powder_score: score.as_ref().and_then(|s| s.payload.score),
                    snowfall_24h: score.as_ref().and_then(|s| s.payload.conditions.snowfall_24h),
                    sources_available: score
                        .as_ref()
                        .map_or(0, |s| s.payload.data_available.count()),
                    road_status,
                };
                Ok(predict_parking(mountain, &inputs, &ctx))
            })
            .await?;
        Ok(cached.into())
    }

    pub async fn powder_day_plan(&self, id: &str) -> Result<CachedPayload<PowderDayPlan>> {
        let mountain = self.registry.get(id)?;
        let current = match self.powder_score(id).await {
            Ok(p) => p,
            Err(e) if e.is_client_error() => return Err(e),
            Err(e) => {
                warn!("{}: no plan, conditions unavailable: {}", id, e);
                return Ok(CachedPayload::uncached(PowderDayPlan::unavailable(
                    "Conditions data is temporarily unavailable",
                )));
            }
        };

        let ctx = self.context(mountain);
        let date = ctx.local_time.format("%Y-%m-%d").to_string();
        let key = cache_key(id, Product::PowderDayPlan.name(), &[("date", &date)]);

        // An empty plan is a failed compute so an earlier plan can be served stale.
        let result = self
            .cache
            .get_or_compute(&key, self.ttl(Product::PowderDayPlan), || async {
                let road_status = self.roads.road_status(mountain).await;
                let payload = &current.payload;
                let score = common::Score {
                    value: payload.score.unwrap_or(0.0),
                    factors: payload.factors.clone(),
                    verdict: payload.verdict.clone().unwrap_or_default(),
                };
                let plan = plan_powder_days(&payload.conditions, &score, road_status, &ctx);
                if plan.days.is_empty() {
                    return Err(Error::Other(plan.error.unwrap_or_else(|| NO_FORECAST.to_string())));
                }
                Ok(plan)
            })
            .await;

        match result {
            Ok(cached) => Ok(cached.into()),
            Err(e) => {
                warn!("{}: no plan: {}", id, e);
                Ok(CachedPayload::uncached(PowderDayPlan::unavailable(NO_FORECAST)))
            }
        }
    }

    pub async fn arrival_time(&self, id: &str) -> Result<CachedPayload<ArrivalRecommendation>> {
        let mountain = self.registry.get(id)?;
        let ctx = self.context(mountain);
        let date = ctx.local_time.date();
        let key = cache_key(
            id,
            Product::ArrivalTime.name(),
            &[("date", &date.format("%Y-%m-%d").to_string())],
        );

        // With a generator configured, a full fallback means it failed; that
        // is not stored, so an earlier answer is served stale instead.
        let result = self
            .cache
            .get_or_compute(&key, self.ttl(Product::ArrivalTime), || async {
                let score = self.powder_score(id).await.ok();
                let parking = self.parking(id).await?;
                let road_status = self.roads.road_status(mountain).await;
                let inputs = ArrivalInputs {
                    mountain,
                    snapshot: score.as_ref().map(|s| &s.payload.conditions),
                    powder_score: score.as_ref().and_then(|s| s.payload.score),
                    verdict: score.as_ref().and_then(|s| s.payload.verdict.as_deref()),
                    parking: &parking.payload,
                    road_status,
                    local_date: date,
                };
                let advice = advise_arrival(self.narrator.as_ref(), &inputs).await;
                if self.narrator.is_some() && advice.source == AdviceSource::Fallback {
                    return Err(Error::Llm("arrival advisor unavailable".into()));
                }
                Ok(advice)
            })
            .await;

        match result {
            Ok(cached) => Ok(cached.into()),
            Err(e) => {
                warn!("{}: arrival advice degraded to defaults: {}", id, e);
                Ok(CachedPayload::uncached(ArrivalRecommendation::fallback()))
            }
        }
    }

    fn check_known(&self, ids: &[String]) -> Result<()> {
        match ids.iter().find(|id| !self.registry.contains(id)) {
            Some(unknown) => Err(Error::UnknownLocation(unknown.clone())),
            None => Ok(()),
        }
    }

    /// Powder scores for up to `batch.max_ids` locations.
    pub async fn batch_powder_scores(&self, raw_ids: &str) -> Result<BatchPayload<CachedPayload<PowderScorePayload>>> {
        let ids = batch::parse_ids(raw_ids, self.config.batch.max_ids)?;
        self.check_known(&ids)?;
        let outcome = batch::run_batch(&ids, self.config.batch.concurrency, |id| async move {
            self.powder_score(&id).await
        })
        .await;
        Ok(outcome.into())
    }

    /// Recent snowfall and depth per location.
    pub async fn batch_snowfall_history(&self, raw_ids: &str) -> Result<BatchPayload<SnowfallHistory>> {
        let ids = batch::parse_ids(raw_ids, self.config.batch.max_ids)?;
        self.check_known(&ids)?;
        let outcome = batch::run_batch(&ids, self.config.batch.concurrency, |id| async move {
            let p = self.powder_score(&id).await?;
            let c = &p.payload.conditions;
            Ok::<_, Error>(SnowfallHistory {
                snowfall_24h: c.snowfall_24h,
                snowfall_48h: c.snowfall_48h,
                snowfall_72h: c.snowfall_72h,
                base_depth: c.base_depth,
                measured: c.data_available.snotel,
            })
        })
        .await;
        Ok(outcome.into())
    }

    /// Query every connector for one location without caching.
    pub async fn check_sources(&self, id: &str) -> Result<Vec<SourceReport>> {
        let mountain = self.registry.get(id)?;
        Ok(self.aggregator.collect(mountain).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::tests::{FakeConnector, PanickingConnector};
    use crate::roads::StaticRoads;
    use async_trait::async_trait;
    use common::{
        AlertSummary, DailyForecast, ExtendedForecast, NarrativePrompt, PointForecast, RoadStatus,
        SnapshotFragment, SnowTelemetry, Source,
    };
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn snow() -> SnapshotFragment {
        SnapshotFragment::Snow(SnowTelemetry {
            snowfall_24h_in: Some(8.0),
            snowfall_48h_in: Some(14.0),
            snowfall_72h_in: Some(16.0),
            base_depth_in: Some(60.0),
            observed_at: None,
        })
    }

    fn point() -> SnapshotFragment {
        SnapshotFragment::Forecast(PointForecast {
            temperature_f: Some(22.0),
            wind_speed_mph: Some(8.0),
            humidity_pct: Some(55.0),
            sky_cover_pct: Some(80.0),
            upcoming_snow_in: Some(5.0),
            ..Default::default()
        })
    }

    fn extended() -> SnapshotFragment {
        let today = Utc::now().date_naive();
        let days = (0..4)
            .filter_map(|i| today.checked_add_days(chrono::Days::new(i)))
            .map(|date| DailyForecast {
                date,
                snowfall_in: 4.0,
                high_f: Some(28.0),
                low_f: Some(18.0),
                precip_probability_pct: Some(70.0),
                max_wind_mph: Some(10.0),
            })
            .collect();
        SnapshotFragment::Extended(ExtendedForecast {
            days,
            freezing_level_ft: Some(2500.0),
            ..Default::default()
        })
    }

    /// Counts fetches so cache behavior is observable.
    struct CountingConnector {
        inner: FakeConnector,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SourceConnector for CountingConnector {
        fn source(&self) -> Source {
            self.inner.source()
        }
        fn timeout(&self) -> Duration {
            self.inner.timeout()
        }
        async fn fetch(&self, mountain: &MountainConfig) -> Result<SnapshotFragment> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch(mountain).await
        }
    }

    fn healthy() -> Vec<Arc<dyn SourceConnector>> {
        vec![
            Arc::new(FakeConnector::ok(snow())),
            Arc::new(FakeConnector::ok(point())),
            Arc::new(FakeConnector::ok(extended())),
            Arc::new(FakeConnector::ok(SnapshotFragment::Alerts(AlertSummary::default()))),
        ]
    }

    fn all_failing() -> Vec<Arc<dyn SourceConnector>> {
        Source::ALL
            .iter()
            .map(|s| Arc::new(FakeConnector::failing(*s)) as Arc<dyn SourceConnector>)
            .collect()
    }

    #[tokio::test]
    async fn test_powder_score_is_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let connectors: Vec<Arc<dyn SourceConnector>> = vec![Arc::new(CountingConnector {
            inner: FakeConnector::ok(snow()),
            calls: Arc::clone(&calls),
        })];
        let service = ConditionsService::new(EngineConfig::default(), connectors);

        let first = service.powder_score("stevens-pass").await.expect("score");
        let second = service.powder_score("stevens-pass").await.expect("score");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.payload.score, second.payload.score);
        assert!(first.payload.data_available.snotel);
        assert!(!first.payload.data_available.noaa);
    }

    #[tokio::test]
    async fn test_full_payload() {
        let service = ConditionsService::new(EngineConfig::default(), healthy());
        let p = service.powder_score("stevens-pass").await.expect("score");

        let value = p.payload.score.expect("scored");
        assert!((1.0..=10.0).contains(&value));
        assert_eq!(p.payload.freezing_level, Some(2500.0));
        assert_eq!(p.payload.rain_risk.as_ref().map(|r| r.score), Some(10.0));
        assert!(p.payload.error.is_none());
        assert!(!p.stale);

        let json = serde_json::to_value(&p).expect("serializes");
        assert!(json["score"].is_number());
        assert!(json["factors"].is_array());
        assert!(json["dataAvailable"]["openMeteo"].as_bool().expect("bool"));
        assert!(json["computedAt"].is_string());
        assert_eq!(json["ageSeconds"], 0);
    }

    #[tokio::test]
    async fn test_total_failure_is_unavailable_by_default() {
        let service = ConditionsService::new(EngineConfig::default(), all_failing());

        let err = service.powder_score("mt-baker").await.expect_err("no data");
        assert!(matches!(err, Error::NoData(_)));

        let p = service
            .powder_score_or_unavailable("mt-baker")
            .await
            .expect("payload");
        assert_eq!(p.payload.score, None);
        assert!(p.payload.error.is_some());
        assert!(!p.payload.data_available.any());
    }

    #[tokio::test]
    async fn test_neutral_policy_scores_empty_snapshot() {
        let mut config = EngineConfig::default();
        config.scoring.no_data_policy = NoDataPolicy::Neutral;
        let service = ConditionsService::new(config, all_failing());

        let p = service.powder_score("mt-baker").await.expect("neutral score");
        assert!(p.payload.score.is_some());
        assert!(p.payload.error.is_some());
    }

    #[tokio::test]
    async fn test_unknown_location() {
        let service = ConditionsService::new(EngineConfig::default(), healthy());
        assert!(matches!(
            service.powder_score("atlantis").await,
            Err(Error::UnknownLocation(_))
        ));
        assert!(matches!(
            service.powder_score_or_unavailable("atlantis").await,
            Err(Error::UnknownLocation(_))
        ));
        assert!(matches!(service.parking("atlantis").await, Err(Error::UnknownLocation(_))));
    }

    #[tokio::test]
    async fn test_planners_run_off_cached_score() {
        let service = ConditionsService::new(EngineConfig::default(), healthy())
            .with_roads(Arc::new(StaticRoads(RoadStatus::ChainsRequired)));

        let parking = service.parking("crystal-mountain").await.expect("parking");
        assert_eq!(parking.payload.context.road_status, RoadStatus::ChainsRequired);
        assert!(!parking.payload.recommended_lots.is_empty());

        let plan = service.powder_day_plan("crystal-mountain").await.expect("plan");
        assert!(plan.payload.error.is_none());
        assert!(!plan.payload.days.is_empty());

        let arrival = service.arrival_time("crystal-mountain").await.expect("arrival");
        assert_eq!(arrival.payload, ArrivalRecommendation::fallback());
    }

    #[tokio::test]
    async fn test_plan_fails_soft_without_data() {
        let service = ConditionsService::new(EngineConfig::default(), all_failing());
        let plan = service.powder_day_plan("snoqualmie").await.expect("soft failure");
        assert!(plan.payload.days.is_empty());
        assert!(plan.payload.error.is_some());
    }

    /// Serves its fragment only while `up` is set.
    struct SwitchableConnector {
        inner: FakeConnector,
        up: Arc<AtomicBool>,
    }

    #[async_trait]
    impl SourceConnector for SwitchableConnector {
        fn source(&self) -> Source {
            self.inner.source()
        }
        fn timeout(&self) -> Duration {
            self.inner.timeout()
        }
        async fn fetch(&self, mountain: &MountainConfig) -> Result<SnapshotFragment> {
            if !self.up.load(Ordering::SeqCst) {
                return Err(Error::OpenMeteo("HTTP 503".into()));
            }
            self.inner.fetch(mountain).await
        }
    }

    #[tokio::test]
    async fn test_plan_served_stale_when_forecast_drops() {
        let up = Arc::new(AtomicBool::new(true));
        let mut config = EngineConfig::default();
        config.cache.powder_score_secs = 0;
        config.cache.multi_day_secs = 0;
        let connectors: Vec<Arc<dyn SourceConnector>> = vec![
            Arc::new(FakeConnector::ok(snow())),
            Arc::new(SwitchableConnector {
                inner: FakeConnector::ok(extended()),
                up: Arc::clone(&up),
            }),
        ];
        let service = ConditionsService::new(config, connectors);

        let first = service.powder_day_plan("stevens-pass").await.expect("plan");
        assert!(!first.payload.days.is_empty());
        assert!(!first.stale);

        up.store(false, Ordering::SeqCst);
        let second = service.powder_day_plan("stevens-pass").await.expect("stale plan");
        assert!(second.stale);
        assert!(second.payload.error.is_none());
        assert_eq!(second.payload.days, first.payload.days);
    }

    #[tokio::test]
    async fn test_plan_without_forecast_is_not_cached() {
        let up = Arc::new(AtomicBool::new(false));
        let connectors: Vec<Arc<dyn SourceConnector>> = vec![
            Arc::new(FakeConnector::ok(snow())),
            Arc::new(SwitchableConnector {
                inner: FakeConnector::ok(extended()),
                up: Arc::clone(&up),
            }),
        ];
        let mut config = EngineConfig::default();
        config.cache.powder_score_secs = 0;
        let service = ConditionsService::new(config, connectors);

        let soft = service.powder_day_plan("crystal-mountain").await.expect("soft failure");
        assert!(soft.payload.days.is_empty());
        assert!(soft.payload.error.is_some());
        assert!(!soft.stale);

        // Default plan TTL is long; a cached failure would still be served.
        up.store(true, Ordering::SeqCst);
        let recovered = service.powder_day_plan("crystal-mountain").await.expect("plan");
        assert!(!recovered.payload.days.is_empty());
    }

    #[tokio::test]
    async fn test_batch_survives_panicking_connector() {
        let connectors: Vec<Arc<dyn SourceConnector>> =
            vec![Arc::new(FakeConnector::ok(snow())), Arc::new(PanickingConnector)];
        let service = ConditionsService::new(EngineConfig::default(), connectors);

        let batch = service
            .batch_powder_scores("stevens-pass,mt-baker")
            .await
            .expect("batch");
        assert_eq!(batch.results.len(), 2);
        assert!(batch.errors.is_empty());
        assert!(!batch.results["mt-baker"].payload.data_available.noaa);
    }

    struct ScriptedNarrator;

    #[async_trait]
    impl NarrativeGenerator for ScriptedNarrator {
        async fn generate(&self, prompt: &NarrativePrompt) -> Result<String> {
            assert_eq!(prompt.context["mountain"]["id"], "stevens-pass");
            Ok(r#"{"recommendedArrivalTime": "07:00", "arrivalWindow": {"earliest": "06:30", "latest": "07:15"},
                "confidence": "medium", "reasoning": "Fresh snow draws crowds.", "tips": ["Carpool"]}"#
                .to_string())
        }
    }

    #[tokio::test]
    async fn test_arrival_uses_narrator() {
        let service =
            ConditionsService::new(EngineConfig::default(), healthy()).with_narrator(Arc::new(ScriptedNarrator));
        let arrival = service.arrival_time("stevens-pass").await.expect("arrival");
        assert_eq!(arrival.payload.recommended_arrival_time, "07:00");
    }

    /// Answers like `ScriptedNarrator` while `up` is set, errors otherwise.
    struct FlakyNarrator {
        up: Arc<AtomicBool>,
    }

    #[async_trait]
    impl NarrativeGenerator for FlakyNarrator {
        async fn generate(&self, prompt: &NarrativePrompt) -> Result<String> {
            if !self.up.load(Ordering::SeqCst) {
                return Err(Error::Llm("HTTP 529: overloaded".into()));
            }
            ScriptedNarrator.generate(prompt).await
        }
    }

    #[tokio::test]
    async fn test_arrival_served_stale_when_narrator_fails() {
        let up = Arc::new(AtomicBool::new(true));
        let mut config = EngineConfig::default();
        config.cache.narrative_secs = 0;
        let service = ConditionsService::new(config, healthy()).with_narrator(Arc::new(FlakyNarrator {
            up: Arc::clone(&up),
        }));

        let first = service.arrival_time("stevens-pass").await.expect("arrival");
        assert_eq!(first.payload.recommended_arrival_time, "07:00");

        up.store(false, Ordering::SeqCst);
        let second = service.arrival_time("stevens-pass").await.expect("stale arrival");
        assert!(second.stale);
        assert_eq!(second.payload.recommended_arrival_time, "07:00");
    }

    #[tokio::test]
    async fn test_arrival_fallback_is_not_cached() {
        let up = Arc::new(AtomicBool::new(false));
        let service = ConditionsService::new(EngineConfig::default(), healthy()).with_narrator(Arc::new(
            FlakyNarrator {
                up: Arc::clone(&up),
            },
        ));

        let fallback = service.arrival_time("stevens-pass").await.expect("fallback");
        assert_eq!(fallback.payload, ArrivalRecommendation::fallback());
        assert!(!fallback.stale);

        up.store(true, Ordering::SeqCst);
        let generated = service.arrival_time("stevens-pass").await.expect("arrival");
        assert_eq!(generated.payload.recommended_arrival_time, "07:00");
    }

    #[tokio::test]
    async fn test_batch_with_partial_failure() {
        let mut config = EngineConfig::default();
        // Every connector fails for mt-baker only.
        struct FailsFor(&'static str, FakeConnector);

        #[async_trait]
        impl SourceConnector for FailsFor {
            fn source(&self) -> Source {
                self.1.source()
            }
            fn timeout(&self) -> Duration {
                self.1.timeout()
            }
            async fn fetch(&self, mountain: &MountainConfig) -> Result<SnapshotFragment> {
                if mountain.id == self.0 {
                    return Err(Error::Other("down".into()));
                }
                self.1.fetch(mountain).await
            }
        }

        let connectors: Vec<Arc<dyn SourceConnector>> = vec![
            Arc::new(FailsFor("mt-baker", FakeConnector::ok(snow()))),
            Arc::new(FailsFor("mt-baker", FakeConnector::ok(point()))),
        ];
        config.mountains.push(MountainConfig {
            id: "mission-ridge".into(),
            name: "Mission Ridge".into(),
            ..config.mountains[0].clone()
        });
        let service = ConditionsService::new(config, connectors);

        let batch = service
            .batch_powder_scores("stevens-pass,crystal-mountain,mt-baker,snoqualmie,mission-ridge")
            .await
            .expect("batch");
        assert_eq!(batch.results.len(), 4);
        assert_eq!(batch.errors.len(), 1);
        assert!(batch.errors.contains_key("mt-baker"));

        let json = serde_json::to_value(&batch).expect("serializes");
        assert!(json["stevens-pass"]["score"].is_number());
        assert!(json["errors"]["mt-baker"].is_string());
    }

    #[tokio::test]
    async fn test_batch_validation() {
        let service = ConditionsService::new(EngineConfig::default(), healthy());
        assert!(matches!(
            service.batch_powder_scores("").await,
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            service.batch_powder_scores("stevens-pass,atlantis").await,
            Err(Error::UnknownLocation(_))
        ));
        let ids = (0..11).map(|i| format!("m{i}")).collect::<Vec<_>>().join(",");
        assert!(matches!(
            service.batch_powder_scores(&ids).await,
            Err(Error::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_snowfall_history() {
        let service = ConditionsService::new(EngineConfig::default(), healthy());
        let history = service
            .batch_snowfall_history("stevens-pass,mt-baker")
            .await
            .expect("history");
        let stevens = &history.results["stevens-pass"];
        assert_eq!(stevens.snowfall_72h, Some(16.0));
        assert!(stevens.measured);
        assert!(history.errors.is_empty());
    }

    #[tokio::test]
    async fn test_check_sources_reports_each_connector() {
        let service = ConditionsService::new(EngineConfig::default(), all_failing());
        let reports = service.check_sources("stevens-pass").await.expect("reports");
        assert_eq!(reports.len(), 4);
        assert!(reports.iter().all(|r| !r.ok));
    }
}
