//! Parking-difficulty prediction from score, calendar and clock.

use chrono::{Datelike, NaiveTime, Timelike};
use common::config::{LotKind, MountainConfig};
use common::RoadStatus;
use serde::{Deserialize, Serialize};

use crate::scoring::ScoringContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParkingDifficulty {
    Easy,
    Moderate,
    Challenging,
    Difficult,
    Extreme,
}

impl ParkingDifficulty {
    fn from_pressure(points: f64) -> Self {
        if points < 1.5 {
            ParkingDifficulty::Easy
        } else if points < 3.0 {
            ParkingDifficulty::Moderate
        } else if points < 4.5 {
            ParkingDifficulty::Challenging
        } else if points < 6.0 {
            ParkingDifficulty::Difficult
        } else {
            ParkingDifficulty::Extreme
        }
    }

    /// How long before first chair to be parked.
    fn lead_minutes(&self) -> i64 {
        match self {
            ParkingDifficulty::Easy => 15,
            ParkingDifficulty::Moderate => 30,
            ParkingDifficulty::Challenging => 60,
            ParkingDifficulty::Difficult => 90,
            ParkingDifficulty::Extreme => 120,
        }
    }

    fn lot_kinds(&self) -> &'static [LotKind] {
        match self {
            ParkingDifficulty::Easy | ParkingDifficulty::Moderate => &[LotKind::Main],
            ParkingDifficulty::Challenging => &[LotKind::Main, LotKind::Overflow],
            ParkingDifficulty::Difficult => &[LotKind::Overflow, LotKind::Shuttle, LotKind::Paid],
            ParkingDifficulty::Extreme => &[LotKind::Shuttle, LotKind::Paid],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Confidence::Low),
            "medium" => Some(Confidence::Medium),
            "high" => Some(Confidence::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LotRecommendation {
    pub name: String,
    pub kind: LotKind,
    pub capacity: u32,
}

/// Inputs echoed back so clients can explain the prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParkingContext {
    pub powder_score: Option<f64>,
    pub day_of_week: String,
    pub is_weekend: bool,
    pub is_holiday: bool,
    pub hour: u32,
    pub road_status: RoadStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParkingPrediction {
    pub difficulty: ParkingDifficulty,
    pub confidence: Confidence,
    pub recommended_arrival_time: String,
    pub recommended_lots: Vec<LotRecommendation>,
    pub tips: Vec<String>,
    pub context: ParkingContext,
}

/// What the predictor looks at.
#[derive(Debug, Clone)]
pub struct ParkingInputs {
    pub powder_score: Option<f64>,
    pub snowfall_24h: Option<f64>,
    /// Sources that contributed to the score.
    pub sources_available: usize,
    pub road_status: RoadStatus,
}

pub fn lifts_open_time(mountain: &MountainConfig) -> NaiveTime {
    NaiveTime::parse_from_str(&mountain.lifts_open, "%H:%M")
        .ok()
        .or_else(|| NaiveTime::from_hms_opt(9, 0, 0))
        .unwrap_or(NaiveTime::MIN)
}

fn pressure(inputs: &ParkingInputs, ctx: &ScoringContext) -> f64 {
    let mut points = if ctx.is_busy_day() {
        3.0
    } else if ctx.local_time.weekday() == chrono::Weekday::Fri {
        1.5
    } else {
        0.0
    };
    if ctx.is_holiday {
        points += 0.5;
    }

    // Unknown score is treated as an average day.
    let score = inputs.powder_score.unwrap_or(5.0);
    points += if score >= 8.0 {
        2.5
    } else if score >= 6.0 {
        1.5
    } else if score >= 4.0 {
        0.5
    } else {
        0.0
    };

    if inputs.snowfall_24h.is_some_and(|s| s >= 6.0) {
        points += 0.5;
    }
    if ctx.hour() >= 10 {
        points += 1.0;
    }
    points
}

/// Predict how hard parking will be for someone arriving now.
pub fn predict_parking(mountain: &MountainConfig, inputs: &ParkingInputs, ctx: &ScoringContext) -> ParkingPrediction {
    let difficulty = ParkingDifficulty::from_pressure(pressure(inputs, ctx));

    let confidence = match (inputs.powder_score, inputs.sources_available) {
        (None, _) | (_, 0) => Confidence::Low,
        (Some(_), n) if n >= 3 && !ctx.is_holiday => Confidence::High,
        _ => Confidence::Medium,
    };

    let arrive_by = lifts_open_time(mountain) - chrono::Duration::minutes(difficulty.lead_minutes());

    let kinds = difficulty.lot_kinds();
    let mut lots: Vec<LotRecommendation> = mountain
        .parking_lots
        .iter()
        .filter(|l| kinds.contains(&l.kind))
        .map(|l| LotRecommendation {
            name: l.name.clone(),
            kind: l.kind,
            capacity: l.capacity,
        })
        .collect();
    if lots.is_empty() {
        lots = mountain
            .parking_lots
            .iter()
            .map(|l| LotRecommendation {
                name: l.name.clone(),
                kind: l.kind,
                capacity: l.capacity,
            })
            .collect();
    }

    ParkingPrediction {
        difficulty,
        confidence,
        recommended_arrival_time: arrive_by.format("%H:%M").to_string(),
        recommended_lots: lots,
        tips: tips(difficulty, inputs, ctx),
        context: ParkingContext {
            powder_score: inputs.powder_score,
            day_of_week: ctx.local_time.weekday().to_string(),
            is_weekend: ctx.is_weekend(),
            is_holiday: ctx.is_holiday,
            hour: ctx.local_time.hour(),
            road_status: inputs.road_status,
        },
    }
}

fn tips(difficulty: ParkingDifficulty, inputs: &ParkingInputs, ctx: &ScoringContext) -> Vec<String> {
    let mut tips = Vec::new();
    match difficulty {
        ParkingDifficulty::Easy => tips.push("Plenty of parking expected; no need to rush.".to_string()),
        ParkingDifficulty::Moderate => tips.push("Main lots should have space before first chair.".to_string()),
        ParkingDifficulty::Challenging => {
            tips.push("Main lots will fill by mid-morning; have an overflow plan.".to_string())
        }
        ParkingDifficulty::Difficult | ParkingDifficulty::Extreme => {
            tips.push("Expect full lots; carpool or take the shuttle if one runs.".to_string());
            tips.push("Paid parking is the safest bet if you can't arrive early.".to_string());
        }
    }
    if inputs.powder_score.is_some_and(|s| s >= 8.0) {
        tips.push("Powder day: the locals will be there early.".to_string());
    }
    if ctx.is_holiday {
        tips.push("Holiday crowds; add extra travel time.".to_string());
    }
    match inputs.road_status {
        RoadStatus::ChainsRequired => tips.push("Carry chains; traction rules are in effect.".to_string()),
        RoadStatus::Closed => tips.push("Access road is closed; check before you leave.".to_string()),
        RoadStatus::Open | RoadStatus::Unknown => {}
    }
    tips
}
