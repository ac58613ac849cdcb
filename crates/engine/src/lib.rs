//! Conditions aggregation and scoring engine.
//!
//! Connectors feed the [`aggregator`], which merges their fragments into a
//! snapshot; [`scoring`] turns a snapshot into a powder score; [`planners`]
//! derive parking, arrival and multi-day advice; [`cache`] fronts all of it;
//! [`service::ConditionsService`] ties the pieces together.

pub mod aggregator;
pub mod batch;
pub mod cache;
pub mod calendar;
pub mod planners;
pub mod registry;
pub mod roads;
pub mod scoring;
pub mod service;

pub use aggregator::Aggregator;
pub use cache::{cache_key, Cached, ConditionsCache};
pub use registry::MountainRegistry;
pub use roads::{RoadStatusProvider, UnknownRoads};
pub use scoring::{score, ScoringContext, Verdict};
pub use service::{BatchPayload, CachedPayload, ConditionsService, PowderScorePayload, Product, SnowfallHistory};
