//! Powder score: a pure, rule-based fusion of a conditions snapshot.
//!
//! Nine base factors in three tiers produce a weighted total; modifiers then
//! add bonuses, apply the wind penalty and cap the result. Every step is
//! recorded as a `ScoreFactor` so the breakdown sums to the reported value.

use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc, Weekday};
use common::{ConditionsSnapshot, MountainConfig, RainRisk, Score, ScoreFactor};
use serde::{Deserialize, Serialize};

use crate::calendar;

pub const PRIMARY_WEIGHT: f64 = 0.60;
pub const SECONDARY_WEIGHT: f64 = 0.25;
pub const TERTIARY_WEIGHT: f64 = 0.15;

const NEUTRAL: f64 = 5.0;

const STORM_CYCLING_48H_IN: f64 = 24.0;
const STORM_CYCLING_BONUS: f64 = 1.0;
const STORM_BOOST_MAX: f64 = 1.5;
const WIND_HOLD_MPH: f64 = 30.0;
const WIND_PENALTY: f64 = 2.0;
const NO_SNOW_CAP: f64 = 3.0;
const RAIN_RISK_THRESHOLD: f64 = 4.0;
const RAIN_CAP: f64 = 2.0;

/// Everything besides the snapshot that the score depends on.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringContext {
    pub base_elevation_ft: f64,
    /// Wall-clock time at the mountain.
    pub local_time: NaiveDateTime,
    pub is_holiday: bool,
}

impl ScoringContext {
    pub fn for_mountain(mountain: &MountainConfig, now: DateTime<Utc>) -> Self {
        let local_time = now.with_timezone(&mountain.offset()).naive_local();
        Self {
            base_elevation_ft: mountain.base_elevation_ft,
            local_time,
            is_holiday: calendar::is_ski_holiday(local_time.date()),
        }
    }

    pub fn is_weekend(&self) -> bool {
        calendar::is_weekend(self.local_time.date())
    }

    /// Weekend or holiday.
    pub fn is_busy_day(&self) -> bool {
        self.is_weekend() || self.is_holiday
    }

    pub fn hour(&self) -> u32 {
        self.local_time.hour()
    }
}

/// Verdict bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Verdict {
    Wait,
    Decent,
    Great,
    SendIt,
}

impl Verdict {
    pub fn from_score(value: f64) -> Self {
        if value >= 8.0 {
            Verdict::SendIt
        } else if value >= 6.0 {
            Verdict::Great
        } else if value >= 4.0 {
            Verdict::Decent
        } else {
            Verdict::Wait
        }
    }

    /// Short label used in day plans.
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::SendIt => "SEND IT",
            Verdict::Great => "great",
            Verdict::Decent => "decent",
            Verdict::Wait => "wait",
        }
    }

    pub fn headline(&self) -> &'static str {
        match self {
            Verdict::SendIt => "SEND IT! Epic powder conditions",
            Verdict::Great => "Great day for skiing",
            Verdict::Decent => "Decent conditions, worth a few laps",
            Verdict::Wait => "Wait for better conditions",
        }
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

// ── Base factors ──────────────────────────────────────────────────────

/// Sub-score on 0–10 with a human description.
struct SubScore {
    score: f64,
    description: String,
}

fn sub(score: f64, description: impl Into<String>) -> SubScore {
    SubScore {
        score,
        description: description.into(),
    }
}

fn unavailable(what: &str) -> SubScore {
    sub(NEUTRAL, format!("{what} data unavailable"))
}

pub fn snowfall_score(snowfall_24h: f64) -> f64 {
    if snowfall_24h <= 0.0 {
        0.0
    } else if snowfall_24h <= 3.0 {
        4.0
    } else if snowfall_24h <= 6.0 {
        6.0
    } else if snowfall_24h <= 12.0 {
        8.0
    } else {
        10.0
    }
}

fn snowfall_factor(snow_24h: Option<f64>) -> SubScore {
    match snow_24h {
        None => unavailable("Snowfall"),
        Some(s) if s <= 0.0 => sub(0.0, "No new snow in the last 24 hours"),
        Some(s) => sub(snowfall_score(s), format!("{s:.1}\" of new snow in the last 24 hours")),
    }
}

/// Colder and drier snow is lighter.
fn density_factor(temp: Option<f64>, humidity: Option<f64>) -> SubScore {
    let Some(t) = temp else {
        return unavailable("Temperature");
    };
    let mut score: f64 = if t <= 10.0 {
        10.0
    } else if t <= 20.0 {
        9.0
    } else if t <= 28.0 {
        7.0
    } else if t <= 32.0 {
        5.0
    } else if t <= 36.0 {
        3.0
    } else {
        2.0
    };
    match humidity {
        Some(h) if h > 85.0 => score -= 1.0,
        Some(h) if h < 50.0 => score += 0.5,
        _ => {}
    }
    let score = score.clamp(2.0, 10.0);
    let description = if score >= 8.0 {
        "Light, dry snow"
    } else if score >= 6.0 {
        "Medium density snow"
    } else if score >= 4.0 {
        "Heavy, dense snow"
    } else {
        "Wet, heavy snow"
    };
    sub(score, description)
}

/// Share of the 48h total that fell in the last 24h.
fn freshness_factor(snow_24h: Option<f64>, snow_48h: Option<f64>) -> SubScore {
    let (Some(s24), Some(s48)) = (snow_24h, snow_48h) else {
        return unavailable("Snowfall history");
    };
    if s48 <= 0.0 {
        return sub(0.0, "No snow in the last 48 hours");
    }
    let ratio = (s24.max(0.0) / s48).min(1.0);
    if ratio >= 0.5 {
        sub(10.0, "Most of the recent snow fell overnight")
    } else {
        sub(2.0 + 16.0 * ratio, "Recent snow is more than a day old")
    }
}

fn wind_factor(effective: Option<f64>) -> SubScore {
    let Some(w) = effective else {
        return unavailable("Wind");
    };
    let (score, description) = if w <= 5.0 {
        (10.0, "Calm winds")
    } else if w <= 10.0 {
        (9.0, "Light winds")
    } else if w <= 15.0 {
        (7.0, "Moderate winds")
    } else if w <= 20.0 {
        (5.0, "Breezy; some wind effect on snow")
    } else if w <= 30.0 {
        (3.0, "Strong winds; wind-affected snow")
    } else {
        (1.0, "High winds; lift holds likely")
    };
    sub(score, format!("{description} ({w:.0} mph)"))
}

fn temperature_factor(temp: Option<f64>) -> SubScore {
    let Some(t) = temp else {
        return unavailable("Temperature");
    };
    let score = if (15.0..=25.0).contains(&t) {
        10.0
    } else if (10.0..15.0).contains(&t) || (25.0..=28.0).contains(&t) {
        8.0
    } else if (5.0..10.0).contains(&t) || (28.0..=32.0).contains(&t) {
        6.0
    } else if (0.0..5.0).contains(&t) || (32.0..=36.0).contains(&t) {
        4.0
    } else {
        2.0
    };
    let description = if score >= 10.0 {
        "Ideal powder temperature"
    } else if t < 15.0 {
        "Cold"
    } else {
        "Warm"
    };
    sub(score, format!("{description} ({t:.0}°F)"))
}

fn aspect_factor() -> SubScore {
    // No per-slope data yet; every mountain gets the same neutral value.
    sub(NEUTRAL, "Aspect not modeled; neutral")
}

fn base_depth_factor(depth: Option<f64>) -> SubScore {
    let Some(d) = depth else {
        return unavailable("Base depth");
    };
    let score = if d >= 72.0 {
        10.0
    } else if d >= 48.0 {
        8.0
    } else if d >= 36.0 {
        6.0
    } else if d >= 24.0 {
        4.0
    } else if d > 0.0 {
        2.0
    } else {
        1.0
    };
    sub(score, format!("{d:.0}\" base"))
}

fn sky_factor(sky_cover: Option<f64>, precip_probability: Option<f64>, temp: Option<f64>) -> SubScore {
    let snowing = precip_probability.is_some_and(|p| p >= 50.0) && temp.map_or(true, |t| t <= 32.0);
    if snowing {
        return sub(10.0, "Actively snowing");
    }
    let Some(c) = sky_cover else {
        return unavailable("Sky cover");
    };
    if c >= 80.0 {
        sub(9.0, "Overcast; snow stays soft")
    } else if c >= 50.0 {
        sub(7.0, "Mostly cloudy")
    } else if c >= 20.0 {
        sub(5.0, "Partly cloudy")
    } else {
        sub(4.0, "Clear skies; sun will bake the snow")
    }
}

/// Crowd pressure on 1 (packed) to 10 (empty) from the calendar alone.
pub fn crowd_score(ctx: &ScoringContext) -> f64 {
    let mut score: f64 = if ctx.is_busy_day() {
        3.0
    } else if ctx.local_time.weekday() == Weekday::Fri {
        6.0
    } else {
        9.0
    };
    let hour = ctx.hour();
    if hour < 9 {
        score += 1.0;
    } else if (10..14).contains(&hour) {
        score -= 1.0;
    }
    score.clamp(1.0, 10.0)
}

fn crowd_factor(ctx: &ScoringContext) -> SubScore {
    let score = crowd_score(ctx);
    let day = if ctx.is_holiday {
        "Holiday"
    } else if ctx.is_weekend() {
        "Weekend"
    } else {
        "Weekday"
    };
    let level = if score >= 8.0 {
        "light crowds"
    } else if score >= 5.0 {
        "moderate crowds"
    } else {
        "heavy crowds"
    };
    sub(score, format!("{day}; {level} expected"))
}

// ── Rain risk ─────────────────────────────────────────────────────────

/// Rain risk from freezing level relative to the base area. `None` without
/// a freezing level.
pub fn rain_risk(freezing_level_ft: Option<f64>, base_elevation_ft: f64) -> Option<RainRisk> {
    let fl = freezing_level_ft?;
    let (score, description) = if fl <= base_elevation_ft - 1000.0 {
        (10.0, "Freezing level well below base; snow top to bottom")
    } else if fl <= base_elevation_ft {
        (8.0, "Freezing level below base")
    } else if fl <= base_elevation_ft + 500.0 {
        (5.0, "Freezing level near base; wet snow down low")
    } else if fl <= base_elevation_ft + 1000.0 {
        (3.0, "Rain possible at base")
    } else {
        (1.0, "Rain likely at base")
    };
    Some(RainRisk {
        score,
        description: format!("{description} ({fl:.0} ft)"),
    })
}

// ── Score ─────────────────────────────────────────────────────────────

fn base_factor(name: &str, value: Option<f64>, weight: f64, s: SubScore) -> (ScoreFactor, f64) {
    let contribution = s.score * weight;
    let factor = ScoreFactor {
        name: name.to_string(),
        value,
        weight,
        contribution: round3(contribution),
        description: s.description,
        is_positive: s.score >= 6.0,
    };
    (factor, contribution)
}

fn modifier(name: &str, value: Option<f64>, delta: f64, description: String) -> ScoreFactor {
    ScoreFactor {
        name: name.to_string(),
        value,
        weight: 0.0,
        contribution: round3(delta),
        description,
        is_positive: delta > 0.0,
    }
}

/// Score a snapshot. Pure and deterministic.
pub fn score(snapshot: &ConditionsSnapshot, ctx: &ScoringContext) -> Score {
    let s24 = snapshot.snowfall_24h;
    let s48 = snapshot.snowfall_48h;
    let wind = snapshot.effective_wind();

    let base = [
        ("24h Snowfall", s24, PRIMARY_WEIGHT * 0.40, snowfall_factor(s24)),
        (
            "Snow Density",
            snapshot.temperature,
            PRIMARY_WEIGHT * 0.30,
            density_factor(snapshot.temperature, snapshot.humidity),
        ),
        ("Freshness", s48, PRIMARY_WEIGHT * 0.30, freshness_factor(s24, s48)),
        ("Wind", wind, SECONDARY_WEIGHT * 0.40, wind_factor(wind)),
        (
            "Temperature",
            snapshot.temperature,
            SECONDARY_WEIGHT * 0.35,
            temperature_factor(snapshot.temperature),
        ),
        ("Aspect", None, SECONDARY_WEIGHT * 0.25, aspect_factor()),
        (
            "Base Depth",
            snapshot.base_depth,
            TERTIARY_WEIGHT * 0.30,
            base_depth_factor(snapshot.base_depth),
        ),
        (
            "Sky",
            snapshot.sky_cover_percent,
            TERTIARY_WEIGHT * 0.35,
            sky_factor(
                snapshot.sky_cover_percent,
                snapshot.precip_probability_percent,
                snapshot.temperature,
            ),
        ),
        ("Crowds", Some(crowd_score(ctx)), TERTIARY_WEIGHT * 0.35, crowd_factor(ctx)),
    ];

    let mut factors = Vec::with_capacity(base.len() + 6);
    let mut total = 0.0;
    for (name, value, weight, s) in base {
        let (factor, contribution) = base_factor(name, value, weight, s);
        total += contribution;
        factors.push(factor);
    }

    // Bonuses first so the penalty and caps below always have the last word.
    if let Some(s) = s48.filter(|s| *s > STORM_CYCLING_48H_IN) {
        total += STORM_CYCLING_BONUS;
        factors.push(modifier(
            "Storm Cycling",
            Some(s),
            STORM_CYCLING_BONUS,
            format!("{s:.0}\" in 48 hours; storm cycle in progress"),
        ));
    }

    if let Some(storm) = snapshot
        .active_storm
        .as_ref()
        .filter(|s| s.is_active && s.is_powder_boost)
    {
        let expected = storm.expected_snowfall_inches.unwrap_or(0.0);
        let boost = round1((expected / 12.0).min(STORM_BOOST_MAX));
        if boost > 0.0 {
            total += boost;
            factors.push(modifier(
                "Storm Boost",
                Some(expected),
                boost,
                format!("{} expecting {expected:.0}\"", storm.event_type),
            ));
        }
    }

    if let Some(w) = wind.filter(|w| *w > WIND_HOLD_MPH) {
        let penalized = (total - WIND_PENALTY).max(1.0).min(total);
        factors.push(modifier(
            "Wind Hold Risk",
            Some(w),
            penalized - total,
            format!("Effective wind {w:.0} mph; expect lift holds"),
        ));
        total = penalized;
    }

    if s24.is_some_and(|s| s <= 0.0) && s48.is_some_and(|s| s <= 0.0) {
        let capped = total.min(NO_SNOW_CAP);
        factors.push(modifier(
            "No New Snow",
            Some(0.0),
            capped - total,
            format!("No snow in 48 hours; capped at {NO_SNOW_CAP:.0}"),
        ));
        total = capped;
    }

    if let Some(risk) = rain_risk(snapshot.freezing_level_feet, ctx.base_elevation_ft)
        .filter(|r| r.score < RAIN_RISK_THRESHOLD)
    {
        let capped = total.min(RAIN_CAP);
        factors.push(modifier(
            "Rain Risk",
            Some(risk.score),
            capped - total,
            format!("{}; capped at {RAIN_CAP:.0}", risk.description),
        ));
        total = capped;
    }

    let rounded = round1(total);
    let value = rounded.clamp(1.0, 10.0);
    if value != rounded {
        factors.push(modifier(
            "Score bounds",
            Some(rounded),
            value - rounded,
            "Score limited to the 1-10 range".to_string(),
        ));
    }

    Score {
        value,
        factors,
        verdict: Verdict::from_score(value).headline().to_string(),
    }
}
