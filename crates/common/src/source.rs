//! Source connector contract.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::MountainConfig;
use crate::types::{SnapshotFragment, Source};
use crate::Result;

/// One upstream data domain for a mountain.
///
/// Implementations return their typed fragment or an error. They are always
/// driven through the aggregator, which bounds each call by `timeout()` and
/// converts every failure into an unavailable `SourceReport`, so callers of
/// the aggregator never see a connector error.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    fn source(&self) -> Source;

    /// Upper bound for one `fetch` call.
    fn timeout(&self) -> Duration;

    async fn fetch(&self, mountain: &MountainConfig) -> Result<SnapshotFragment>;
}
