//! Access road status.

use async_trait::async_trait;
use common::{MountainConfig, RoadStatus};

/// Supplies pass/road status for a mountain. Failures are expressed as
/// `RoadStatus::Unknown`; road data never blocks a plan.
#[async_trait]
pub trait RoadStatusProvider: Send + Sync {
    async fn road_status(&self, mountain: &MountainConfig) -> RoadStatus;
}

/// Provider used when no road feed is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnknownRoads;

#[async_trait]
impl RoadStatusProvider for UnknownRoads {
    async fn road_status(&self, _mountain: &MountainConfig) -> RoadStatus {
        RoadStatus::Unknown
    }
}

/// Fixed status for every mountain.
#[derive(Debug, Clone, Copy)]
pub struct StaticRoads(pub RoadStatus);

#[async_trait]
impl RoadStatusProvider for StaticRoads {
    async fn road_status(&self, _mountain: &MountainConfig) -> RoadStatus {
        self.0
    }
}

pub fn describe(status: RoadStatus) -> &'static str {
    match status {
        RoadStatus::Open => "Roads open",
        RoadStatus::ChainsRequired => "Chains or traction tires required",
        RoadStatus::Closed => "Access road closed",
        RoadStatus::Unknown => "Road status unknown",
    }
}
