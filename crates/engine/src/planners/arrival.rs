//! Arrival-time advisor backed by the narrative generator.
//!
//! The generator gets a structured context document and a JSON schema to
//! answer in. Its reply is never trusted: every field is validated on its
//! own and replaced with a fixed default when missing or malformed.

use std::sync::Arc;

use chrono::NaiveTime;
use common::{ConditionsSnapshot, MountainConfig, NarrativeGenerator, NarrativePrompt, RoadStatus};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{instrument, warn};

use crate::planners::parking::{Confidence, ParkingPrediction};
use crate::roads;

const DEFAULT_ARRIVAL: &str = "08:00";
const DEFAULT_EARLIEST: &str = "07:30";
const DEFAULT_LATEST: &str = "08:30";
const DEFAULT_REASONING: &str = "Standard guidance: arrive about an hour before lifts open.";
const MAX_REASONING_CHARS: usize = 600;
const MAX_TIPS: usize = 5;
const MAX_TOKENS: u32 = 600;

/// Shape the generator is asked to produce.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArrivalAdvice {
    /// Local time to arrive, "HH:MM" 24-hour.
    pub recommended_arrival_time: String,
    pub arrival_window: ArrivalWindow,
    /// One of "low", "medium", "high".
    pub confidence: String,
    /// One or two sentences explaining the recommendation.
    pub reasoning: String,
    /// Up to five short practical tips.
    pub tips: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ArrivalWindow {
    /// "HH:MM"
    pub earliest: String,
    /// "HH:MM"
    pub latest: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdviceSource {
    /// Every field came from the generator.
    Generated,
    /// Some fields were replaced by defaults.
    Partial,
    /// Generator unavailable or unusable; all defaults.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrivalRecommendation {
    pub recommended_arrival_time: String,
    pub arrival_window: ArrivalWindow,
    pub confidence: Confidence,
    pub reasoning: String,
    pub tips: Vec<String>,
    pub source: AdviceSource,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub defaulted_fields: Vec<String>,
}

impl ArrivalRecommendation {
    pub fn fallback() -> Self {
        Self {
            recommended_arrival_time: DEFAULT_ARRIVAL.to_string(),
            arrival_window: default_window(),
            confidence: Confidence::Low,
            reasoning: DEFAULT_REASONING.to_string(),
            tips: default_tips(),
            source: AdviceSource::Fallback,
            defaulted_fields: Vec::new(),
        }
    }
}

fn default_window() -> ArrivalWindow {
    ArrivalWindow {
        earliest: DEFAULT_EARLIEST.to_string(),
        latest: DEFAULT_LATEST.to_string(),
    }
}

fn default_tips() -> Vec<String> {
    vec![
        "Check road conditions before leaving.".to_string(),
        "Arrive earlier on powder days and weekends.".to_string(),
    ]
}

/// What the advisor knows about the day.
#[derive(Debug, Clone)]
pub struct ArrivalInputs<'a> {
    pub mountain: &'a MountainConfig,
    pub snapshot: Option<&'a ConditionsSnapshot>,
    pub powder_score: Option<f64>,
    pub verdict: Option<&'a str>,
    pub parking: &'a ParkingPrediction,
    pub road_status: RoadStatus,
    pub local_date: chrono::NaiveDate,
}

pub fn build_prompt(inputs: &ArrivalInputs<'_>) -> Result<NarrativePrompt, serde_json::Error> {
    let schema = schemars::schema_for!(ArrivalAdvice);
    let schema_json = serde_json::to_string_pretty(&schema)?;

    let system = format!(
        r#"You advise skiers when to arrive at a ski area.
Use the conditions, forecast, road status, parking outlook and lift schedule provided.
You must output strictly valid JSON conforming to the schema below.
Do NOT output any markdown blocks or conversational text. JUST the JSON object.

JSON Schema:
{schema_json}
"#
    );

    let forecast: Vec<_> = inputs
        .snapshot
        .map(|s| s.forecast_days.iter().take(3).collect())
        .unwrap_or_default();

    let context = json!({
        "task": "recommend_arrival_time",
        "mountain": {
            "id": inputs.mountain.id,
            "name": inputs.mountain.name,
            "baseElevationFt": inputs.mountain.base_elevation_ft,
        },
        "date": inputs.local_date.format("%Y-%m-%d").to_string(),
        "liftsOpen": inputs.mountain.lifts_open,
        "powderScore": inputs.powder_score,
        "verdict": inputs.verdict,
        "conditions": inputs.snapshot.map(|s| json!({
            "snowfall24h": s.snowfall_24h,
            "snowfall48h": s.snowfall_48h,
            "temperature": s.temperature,
            "windSpeed": s.wind_speed,
            "windGust": s.wind_gust,
            "upcomingSnowInches": s.upcoming_snow_inches,
            "activeStorm": s.active_storm,
        })),
        "forecast": forecast,
        "roads": {
            "status": inputs.road_status,
            "summary": roads::describe(inputs.road_status),
        },
        "parking": {
            "difficulty": inputs.parking.difficulty,
            "recommendedArrivalTime": inputs.parking.recommended_arrival_time,
            "isWeekend": inputs.parking.context.is_weekend,
            "isHoliday": inputs.parking.context.is_holiday,
        },
    });

    Ok(NarrativePrompt {
        request_id: uuid::Uuid::new_v4().to_string(),
        system,
        context,
        max_tokens: MAX_TOKENS,
    })
}

/// Slice out the outermost JSON object; generators sometimes wrap it in prose.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn parse_hhmm(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()
}

fn valid_time(value: &serde_json::Value) -> Option<String> {
    value
        .as_str()
        .and_then(parse_hhmm)
        .map(|t| t.format("%H:%M").to_string())
}

/// Validate a generator reply field by field.
pub fn validate_advice(raw: &serde_json::Value) -> ArrivalRecommendation {
    let mut defaulted = Vec::new();

    let recommended_arrival_time = valid_time(&raw["recommendedArrivalTime"]).unwrap_or_else(|| {
        defaulted.push("recommendedArrivalTime".to_string());
        DEFAULT_ARRIVAL.to_string()
    });

    let window = &raw["arrivalWindow"];
    let arrival_window = match (
        window["earliest"].as_str().and_then(parse_hhmm),
        window["latest"].as_str().and_then(parse_hhmm),
    ) {
        (Some(earliest), Some(latest)) if earliest <= latest => ArrivalWindow {
            earliest: earliest.format("%H:%M").to_string(),
            latest: latest.format("%H:%M").to_string(),
        },
        _ => {
            defaulted.push("arrivalWindow".to_string());
            default_window()
        }
    };

    let confidence = raw["confidence"]
        .as_str()
        .and_then(Confidence::parse)
        .unwrap_or_else(|| {
            defaulted.push("confidence".to_string());
            Confidence::Low
        });

    let reasoning = raw["reasoning"]
        .as_str()
        .map(str::trim)
        .filter(|r| !r.is_empty() && r.chars().count() <= MAX_REASONING_CHARS)
        .map(str::to_string)
        .unwrap_or_else(|| {
            defaulted.push("reasoning".to_string());
            DEFAULT_REASONING.to_string()
        });

    let tips: Option<Vec<String>> = raw["tips"].as_array().and_then(|items| {
        let tips: Vec<String> = items
            .iter()
            .filter_map(|t| t.as_str())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .take(MAX_TIPS)
            .map(str::to_string)
            .collect();
        (!tips.is_empty()).then_some(tips)
    });
    let tips = tips.unwrap_or_else(|| {
        defaulted.push("tips".to_string());
        default_tips()
    });

    let source = if defaulted.is_empty() {
        AdviceSource::Generated
    } else if defaulted.len() == 5 {
        AdviceSource::Fallback
    } else {
        AdviceSource::Partial
    };

    ArrivalRecommendation {
        recommended_arrival_time,
        arrival_window,
        confidence,
        reasoning,
        tips,
        source,
        defaulted_fields: defaulted,
    }
}

/// Ask the generator for arrival advice. Never fails: any problem with the
/// generator or its reply degrades to defaults.
#[instrument(skip_all, fields(mountain = %inputs.mountain.id))]
pub async fn advise_arrival(
    generator: Option<&Arc<dyn NarrativeGenerator>>,
    inputs: &ArrivalInputs<'_>,
) -> ArrivalRecommendation {
    let Some(generator) = generator else {
        return ArrivalRecommendation::fallback();
    };

    let prompt = match build_prompt(inputs) {
        Ok(p) => p,
        Err(e) => {
            warn!("failed to build arrival prompt: {}", e);
            return ArrivalRecommendation::fallback();
        }
    };

    let text = match generator.generate(&prompt).await {
        Ok(text) => text,
        Err(e) => {
            warn!("arrival advisor unavailable: {}", e);
            return ArrivalRecommendation::fallback();
        }
    };

    let parsed = extract_json_object(&text).and_then(|s| serde_json::from_str::<serde_json::Value>(s).ok());
    match parsed {
        Some(value) if value.is_object() => {
            let advice = validate_advice(&value);
            if !advice.defaulted_fields.is_empty() {
                warn!("arrival advice defaulted fields: {:?}", advice.defaulted_fields);
            }
            advice
        }
        _ => {
            warn!("arrival advisor returned no JSON object");
            ArrivalRecommendation::fallback()
        }
    }
}
