//! Multi-day "when should I go" planner.
//!
//! Each forecast day is scored by running the regular scoring rules over a
//! snapshot synthesized from that day's forecast: the previous day's snow is
//! the morning's fresh snow, and the crowd factor uses that date's calendar.

use chrono::{NaiveDate, NaiveTime};
use common::{ConditionsSnapshot, DailyForecast, RoadStatus, Score};
use serde::{Deserialize, Serialize};

use crate::calendar;
use crate::scoring::{self, ScoringContext, Verdict};

/// Plans only look this far ahead.
pub const MAX_PLAN_DAYS: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrowdRisk {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayPlan {
    pub date: NaiveDate,
    /// "SEND IT", "great", "decent" or "wait".
    pub verdict: String,
    pub predicted_score: f64,
    pub crowd_risk: CrowdRisk,
    pub best_window: String,
    pub snowfall_inches: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowderDayPlan {
    pub days: Vec<DayPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PowderDayPlan {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            days: Vec::new(),
            error: Some(reason.into()),
        }
    }
}

fn crowd_risk(ctx: &ScoringContext) -> CrowdRisk {
    let score = scoring::crowd_score(ctx);
    if score >= 8.0 {
        CrowdRisk::Low
    } else if score >= 5.0 {
        CrowdRisk::Medium
    } else {
        CrowdRisk::High
    }
}

fn day_context(base: &ScoringContext, date: NaiveDate) -> ScoringContext {
    let morning = NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN);
    ScoringContext {
        base_elevation_ft: base.base_elevation_ft,
        local_time: date.and_time(morning),
        is_holiday: calendar::is_ski_holiday(date),
    }
}

/// Conditions expected on the morning of `days[i]`.
fn synthesize(current: &ConditionsSnapshot, days: &[DailyForecast], i: usize) -> ConditionsSnapshot {
    let day = &days[i];
    let prev = i.checked_sub(1).map(|j| days[j].snowfall_in);
    let prev2 = i.checked_sub(2).map(|j| days[j].snowfall_in);

    let temperature = match (day.high_f, day.low_f) {
        (Some(h), Some(l)) => Some((h + l) / 2.0),
        (h, l) => h.or(l),
    };

    ConditionsSnapshot {
        location_id: current.location_id.clone(),
        snowfall_24h: prev.or(current.snowfall_24h),
        snowfall_48h: match (prev, prev2) {
            (Some(a), Some(b)) => Some(a + b),
            (Some(a), None) => current.snowfall_24h.map(|c| a + c).or(Some(a)),
            _ => current.snowfall_48h,
        },
        base_depth: current.base_depth,
        temperature,
        wind_speed: day.max_wind_mph,
        precip_probability_percent: day.precip_probability_pct,
        freezing_level_feet: None,
        upcoming_snow_inches: Some(day.snowfall_in),
        data_available: current.data_available,
        ..ConditionsSnapshot::empty(current.location_id.clone())
    }
}

fn best_window(verdict: Verdict, crowd: CrowdRisk, day: &DailyForecast) -> String {
    if verdict == Verdict::Wait {
        return "Rest day; conditions don't justify the drive".to_string();
    }
    if day.snowfall_in >= 2.0 {
        return "All day; snowing through the day refills runs".to_string();
    }
    match crowd {
        CrowdRisk::High => "First chair to 10:30, before tracks and crowds".to_string(),
        CrowdRisk::Medium => "First chair to noon".to_string(),
        CrowdRisk::Low => "First chair to early afternoon".to_string(),
    }
}

/// Build a day-by-day plan. Today uses the live score; later days use the
/// forecast. A closed road turns today into a "wait".
pub fn plan_powder_days(
    current: &ConditionsSnapshot,
    current_score: &Score,
    road_status: RoadStatus,
    ctx: &ScoringContext,
) -> PowderDayPlan {
    let days = &current.forecast_days;
    if days.is_empty() {
        return PowderDayPlan::unavailable("Multi-day forecast unavailable");
    }

    let today = ctx.local_time.date();
    let plans = days
        .iter()
        .enumerate()
        .filter(|(_, d)| d.date >= today)
        .take(MAX_PLAN_DAYS)
        .map(|(i, day)| {
            let day_ctx = day_context(ctx, day.date);
            let (predicted, reason) = if day.date == today {
                (current_score.value, "Current conditions".to_string())
            } else {
                let snap = synthesize(current, days, i);
                let fresh = snap.snowfall_24h.unwrap_or(0.0);
                (
                    scoring::score(&snap, &day_ctx).value,
                    format!("{fresh:.1}\" expected overnight, {:.1}\" during the day", day.snowfall_in),
                )
            };

            let mut verdict = Verdict::from_score(predicted);
            let mut reason = reason;
            if day.date == today && road_status == RoadStatus::Closed {
                verdict = Verdict::Wait;
                reason = "Access road closed".to_string();
            }

            let crowd = crowd_risk(&day_ctx);
            DayPlan {
                date: day.date,
                verdict: verdict.label().to_string(),
                predicted_score: predicted,
                crowd_risk: crowd,
                best_window: best_window(verdict, crowd, day),
                snowfall_inches: day.snowfall_in,
                reason,
            }
        })
        .collect::<Vec<_>>();

    if plans.is_empty() {
        return PowderDayPlan::unavailable("Forecast has no upcoming days");
    }

    PowderDayPlan {
        days: plans,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, d).expect("valid date")
    }

    fn day(d: u32, snow: f64, high: f64, low: f64, wind: f64) -> DailyForecast {
        DailyForecast {
            date: date(d),
            snowfall_in: snow,
            high_f: Some(high),
            low_f: Some(low),
            precip_probability_pct: Some(if snow > 0.0 { 80.0 } else { 10.0 }),
            max_wind_mph: Some(wind),
        }
    }

    fn ctx() -> ScoringContext {
        ScoringContext {
            base_elevation_ft: 4000.0,
            local_time: date(13).and_hms_opt(7, 0, 0).expect("valid time"),
            is_holiday: false,
        }
    }

    fn current() -> (ConditionsSnapshot, Score) {
        let snap = ConditionsSnapshot {
            snowfall_24h: Some(1.0),
            snowfall_48h: Some(2.0),
            base_depth: Some(70.0),
            forecast_days: vec![
                day(13, 1.0, 30.0, 22.0, 10.0),
                day(14, 14.0, 26.0, 18.0, 8.0),
                day(15, 0.0, 28.0, 15.0, 5.0),
                day(16, 0.0, 40.0, 30.0, 35.0),
            ],
            ..ConditionsSnapshot::empty("stevens-pass")
        };
        let score = scoring::score(&snap, &ctx());
        (snap, score)
    }

    #[test]
    fn test_day_after_big_snow_is_best() {
        let (snap, score) = current();
        let plan = plan_powder_days(&snap, &score, RoadStatus::Open, &ctx());

        assert!(plan.error.is_none());
        assert_eq!(plan.days.len(), 4);
        assert_eq!(plan.days[0].predicted_score, score.value);

        let best = plan
            .days
            .iter()
            .max_by(|a, b| a.predicted_score.total_cmp(&b.predicted_score))
            .expect("non-empty");
        assert_eq!(best.date, date(15));
        assert!(best.verdict == "SEND IT" || best.verdict == "great");
    }

    #[test]
    fn test_past_days_are_skipped() {
        let (mut snap, score) = current();
        snap.forecast_days.insert(0, day(12, 5.0, 30.0, 20.0, 5.0));
        let plan = plan_powder_days(&snap, &score, RoadStatus::Open, &ctx());
        assert_eq!(plan.days[0].date, date(13));
    }

    #[test]
    fn test_closed_road_means_wait_today() {
        let (snap, score) = current();
        let plan = plan_powder_days(&snap, &score, RoadStatus::Closed, &ctx());
        assert_eq!(plan.days[0].verdict, "wait");
        assert_eq!(plan.days[0].reason, "Access road closed");
        assert_ne!(plan.days[2].verdict, "wait");
    }

    #[test]
    fn test_missing_forecast_fails_soft() {
        let snap = ConditionsSnapshot::empty("stevens-pass");
        let score = scoring::score(&snap, &ctx());
        let plan = plan_powder_days(&snap, &score, RoadStatus::Unknown, &ctx());
        assert!(plan.days.is_empty());
        assert!(plan.error.is_some());

        let json = serde_json::to_value(&plan).expect("serializes");
        assert_eq!(json["days"], serde_json::json!([]));
    }

    #[test]
    fn test_weekend_day_has_high_crowd_risk() {
        let weekend = day_context(&ctx(), date(17));
        assert_eq!(crowd_risk(&weekend), CrowdRisk::High);
        let weekday = day_context(&ctx(), date(14));
        assert_eq!(crowd_risk(&weekday), CrowdRisk::Low);
    }
}
