//! Unified error type for the powder engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("NOAA API error: {0}")]
    Noaa(String),

    #[error("SNOTEL API error: {0}")]
    Snotel(String),

    #[error("Open-Meteo API error: {0}")]
    OpenMeteo(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Unknown location: {0}")]
    UnknownLocation(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No conditions data available for {0}")]
    NoData(String),

    #[error("Computation for {key} failed: {message}")]
    ComputeFailed { key: String, message: String },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Errors caused by the caller rather than by upstream data or internal state.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::UnknownLocation(_) | Error::InvalidRequest(_))
    }
}

/// First `max_chars` characters of an upstream response body, for error
/// messages. Cuts on a character boundary.
pub fn body_snippet(body: &str, max_chars: usize) -> String {
    body.chars().take(max_chars).collect()
}
