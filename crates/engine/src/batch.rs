//! Bounded-concurrency fan-out across locations.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use common::{Error, Result};
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Results keyed by id, plus per-id failures.
#[derive(Debug)]
pub struct BatchOutcome<T> {
    pub results: BTreeMap<String, T>,
    pub errors: BTreeMap<String, String>,
}

/// Parse a comma-separated id list: trimmed, de-duplicated, order kept.
pub fn parse_ids(raw: &str, max_ids: usize) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for id in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(Error::InvalidRequest(format!("invalid location id: {id:?}")));
        }
        if seen.insert(id) {
            ids.push(id.to_string());
        }
    }

    if ids.is_empty() {
        return Err(Error::InvalidRequest("ids must list at least one location".into()));
    }
    if ids.len() > max_ids {
        return Err(Error::InvalidRequest(format!(
            "at most {} ids per batch, got {}",
            max_ids,
            ids.len()
        )));
    }
    Ok(ids)
}

/// Run `task` for every id with at most `concurrency` in flight. Every id
/// settles; failures are collected rather than aborting the batch.
pub async fn run_batch<T, F, Fut>(ids: &[String], concurrency: usize, task: F) -> BatchOutcome<T>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));

    let runs = ids.iter().map(|id| {
        let semaphore = Arc::clone(&semaphore);
        let fut = task(id.clone());
        async move {
            let _permit = semaphore.acquire().await;
            (id.clone(), fut.await)
        }
    });

    let mut outcome = BatchOutcome {
        results: BTreeMap::new(),
        errors: BTreeMap::new(),
    };
    for (id, result) in join_all(runs).await {
        match result {
            Ok(value) => {
                outcome.results.insert(id, value);
            }
            Err(e) => {
                warn!("batch: {} failed: {}", id, e);
                outcome.errors.insert(id, e.to_string());
            }
        }
    }
    debug!(
        "batch settled: {} ok, {} failed",
        outcome.results.len(),
        outcome.errors.len()
    );
    outcome
}
