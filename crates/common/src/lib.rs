//! Shared types, config, and error definitions for the powder engine.

pub mod config;
pub mod error;
pub mod narrative;
pub mod source;
pub mod types;

pub use config::{EngineConfig, MountainConfig};
pub use error::{body_snippet, Error};
pub use narrative::{NarrativeGenerator, NarrativePrompt};
pub use source::SourceConnector;
pub use types::*;

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, Error>;
