//! Scripted collaborator doubles.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::record::{Dataset, DatasetKind, Record};
use crate::sources::{
    FetchError, FetchWindow, Fetcher, GateError, GateReport, GateTarget, LoadError, Loader,
    ValidationGate,
};

/// A fetcher that returns pre-seeded batches and records the windows it
/// was asked for.
#[derive(Default)]
pub struct StaticFetcher {
    batches: Mutex<HashMap<DatasetKind, Vec<Record>>>,
    failures: Mutex<HashMap<DatasetKind, FetchError>>,
    windows: Mutex<Vec<(DatasetKind, FetchWindow)>>,
}

impl StaticFetcher {
    /// Creates a fetcher with every batch empty.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the batch returned for one dataset.
    #[must_use]
    pub fn with_batch(self, kind: DatasetKind, records: Vec<Record>) -> Self {
        self.batches.lock().insert(kind, records);
        self
    }

    /// Makes fetches of one dataset fail with the given error.
    #[must_use]
    pub fn with_failure(self, kind: DatasetKind, error: FetchError) -> Self {
        self.failures.lock().insert(kind, error);
        self
    }

    /// The windows requested so far, in call order.
    #[must_use]
    pub fn requested_windows(&self) -> Vec<(DatasetKind, FetchWindow)> {
        self.windows.lock().clone()
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(
        &self,
        dataset: DatasetKind,
        window: FetchWindow,
    ) -> Result<Vec<Record>, FetchError> {
        self.windows.lock().push((dataset, window));
        if let Some(error) = self.failures.lock().get(&dataset) {
            return Err(error.clone());
        }
        Ok(self.batches.lock().get(&dataset).cloned().unwrap_or_default())
    }
}

/// A fetcher that fails transiently a fixed number of times before
/// delegating to an inner fetcher.
pub struct FlakyFetcher {
    inner: Arc<dyn Fetcher>,
    failures_left: Mutex<u32>,
    calls: Mutex<u32>,
}

impl FlakyFetcher {
    /// Wraps `inner`, failing its first `failures` calls.
    pub fn new(inner: Arc<dyn Fetcher>, failures: u32) -> Self {
        Self {
            inner,
            failures_left: Mutex::new(failures),
            calls: Mutex::new(0),
        }
    }

    /// Total fetch calls observed.
    #[must_use]
    pub fn calls(&self) -> u32 {
        *self.calls.lock()
    }
}

#[async_trait]
impl Fetcher for FlakyFetcher {
    async fn fetch(
        &self,
        dataset: DatasetKind,
        window: FetchWindow,
    ) -> Result<Vec<Record>, FetchError> {
        *self.calls.lock() += 1;
        {
            let mut left = self.failures_left.lock();
            if *left > 0 {
                *left -= 1;
                return Err(FetchError::transient(dataset, "injected network fault"));
            }
        }
        self.inner.fetch(dataset, window).await
    }
}

/// A loader that records what it was given instead of loading anywhere.
#[derive(Default)]
pub struct RecordingLoader {
    loads: Mutex<Vec<(DatasetKind, usize)>>,
    failures: Mutex<HashMap<DatasetKind, LoadError>>,
}

impl RecordingLoader {
    /// Creates a loader that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes loads of one dataset fail with the given error.
    #[must_use]
    pub fn with_failure(self, kind: DatasetKind, error: LoadError) -> Self {
        self.failures.lock().insert(kind, error);
        self
    }

    /// The datasets loaded so far, with their record counts.
    #[must_use]
    pub fn loads(&self) -> Vec<(DatasetKind, usize)> {
        self.loads.lock().clone()
    }
}

#[async_trait]
impl Loader for RecordingLoader {
    async fn load(&self, dataset: &Dataset) -> Result<usize, LoadError> {
        if let Some(error) = self.failures.lock().get(&dataset.kind()) {
            return Err(error.clone());
        }
        self.loads.lock().push((dataset.kind(), dataset.len()));
        Ok(dataset.len())
    }
}

/// A gate with a scripted verdict per target.
pub struct ScriptedGate {
    dev: GateReport,
    prod: GateReport,
    calls: Mutex<Vec<GateTarget>>,
}

impl ScriptedGate {
    /// A gate that passes both targets.
    #[must_use]
    pub fn passing() -> Self {
        Self {
            dev: GateReport::pass("scripted pass"),
            prod: GateReport::pass("scripted pass"),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Overrides the verdict for one target.
    #[must_use]
    pub fn with_verdict(mut self, target: GateTarget, report: GateReport) -> Self {
        match target {
            GateTarget::Dev => self.dev = report,
            GateTarget::Prod => self.prod = report,
        }
        self
    }

    /// The targets validated so far, in call order.
    #[must_use]
    pub fn validated(&self) -> Vec<GateTarget> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ValidationGate for ScriptedGate {
    async fn validate(&self, target: GateTarget) -> Result<GateReport, GateError> {
        self.calls.lock().push(target);
        let report = match target {
            GateTarget::Dev => self.dev.clone(),
            GateTarget::Prod => self.prod.clone(),
        };
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::standings_record;

    #[tokio::test]
    async fn test_static_fetcher_replays_batches_and_windows() {
        let fetcher = StaticFetcher::new()
            .with_batch(DatasetKind::Standings, vec![standings_record("arsenal", 74)]);

        let batch = fetcher
            .fetch(DatasetKind::Standings, FetchWindow::Full)
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert!(fetcher
            .fetch(DatasetKind::Matches, FetchWindow::Full)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(fetcher.requested_windows().len(), 2);
    }

    #[tokio::test]
    async fn test_flaky_fetcher_recovers_after_budget() {
        let inner = Arc::new(
            StaticFetcher::new()
                .with_batch(DatasetKind::Matches, vec![standings_record("x", 1)]),
        );
        let flaky = FlakyFetcher::new(inner, 2);

        assert!(flaky
            .fetch(DatasetKind::Matches, FetchWindow::Full)
            .await
            .is_err());
        assert!(flaky
            .fetch(DatasetKind::Matches, FetchWindow::Full)
            .await
            .is_err());
        assert!(flaky
            .fetch(DatasetKind::Matches, FetchWindow::Full)
            .await
            .is_ok());
        assert_eq!(flaky.calls(), 3);
    }

    #[tokio::test]
    async fn test_scripted_gate_records_targets() {
        let gate = ScriptedGate::passing()
            .with_verdict(GateTarget::Prod, GateReport::fail("row count drifted"));

        assert!(gate.validate(GateTarget::Dev).await.unwrap().passed);
        assert!(!gate.validate(GateTarget::Prod).await.unwrap().passed);
        assert_eq!(gate.validated(), [GateTarget::Dev, GateTarget::Prod]);
    }
}
