//! The pipeline controller: orchestrates a run from prepare to promote.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;

use super::retry::with_retry;
use super::{DatasetSummary, RunContext, RunMode, RunReport, RunStatus, Stage};
use crate::cancel::CancelToken;
use crate::checkpoint::{Checkpoint, CheckpointLog, CountDelta};
use crate::config::PipelineConfig;
use crate::errors::{IntegrityIssue, PipelineError};
use crate::lock::RunLock;
use crate::merge::{merge, MergeCounts, MergeOutcome};
use crate::promote::PromotionManager;
use crate::record::{DatasetKind, DatasetSet};
use crate::sources::{FetchWindow, Fetcher, GateTarget, Loader, ValidationGate};
use crate::store::DatasetStore;
use crate::util::parse_marker_date;

/// Record attribute carrying the source scrape timestamp, used to derive
/// the incremental fetch window.
const MARKER_FIELD: &str = "scraped_at";

struct StageFailure {
    stage: Stage,
    error: PipelineError,
}

fn at(stage: Stage) -> impl FnOnce(PipelineError) -> StageFailure {
    move |error| StageFailure { stage, error }
}

fn cancel_reason(ctx: &RunContext) -> String {
    ctx.cancel_token()
        .reason()
        .unwrap_or_else(|| "cancelled".to_string())
}

#[derive(Default)]
struct RunAccumulator {
    before: BTreeMap<DatasetKind, usize>,
    merged: BTreeMap<DatasetKind, usize>,
    counts: BTreeMap<DatasetKind, MergeCounts>,
    loaded: BTreeMap<DatasetKind, usize>,
    issues: Vec<IntegrityIssue>,
    backup_stamp: Option<String>,
}

impl RunAccumulator {
    fn record_before(&mut self, production: &DatasetSet) {
        self.before = production.counts();
    }

    fn record_merge(
        &mut self,
        kind: DatasetKind,
        merged_len: usize,
        counts: MergeCounts,
        issues: Vec<IntegrityIssue>,
    ) {
        self.merged.insert(kind, merged_len);
        self.counts.insert(kind, counts);
        self.issues.extend(issues);
    }

    fn record_loaded(&mut self, kind: DatasetKind, loaded: usize) {
        self.loaded.insert(kind, loaded);
    }

    /// Per-dataset transitions as of the last completed merge. Before
    /// any merge lands, each dataset reads as an unchanged before-count,
    /// so even early-failing runs log reconstructable counts.
    fn deltas(&self) -> BTreeMap<DatasetKind, CountDelta> {
        DatasetKind::all()
            .into_iter()
            .map(|kind| {
                let before = self.before.get(&kind).copied().unwrap_or(0);
                let after = self.merged.get(&kind).copied().unwrap_or(before);
                (kind, CountDelta::new(before, after))
            })
            .collect()
    }

    fn stage_deltas(&self, after: &DatasetSet) -> BTreeMap<DatasetKind, CountDelta> {
        DatasetKind::all()
            .into_iter()
            .map(|kind| {
                let before = self.before.get(&kind).copied().unwrap_or(0);
                (kind, CountDelta::new(before, after.get(kind).len()))
            })
            .collect()
    }

    fn summaries(&self) -> Vec<DatasetSummary> {
        DatasetKind::all()
            .into_iter()
            .filter_map(|kind| {
                let before = self.before.get(&kind).copied()?;
                Some(DatasetSummary {
                    dataset: kind,
                    before,
                    merged: self.merged.get(&kind).copied().unwrap_or(before),
                    counts: self.counts.get(&kind).copied().unwrap_or_default(),
                    loaded: self.loaded.get(&kind).copied(),
                })
            })
            .collect()
    }
}

/// Orchestrates pipeline runs over a store and three collaborators.
///
/// A run walks the stages in order, checkpointing each transition; the
/// first failure stops the run with later stages untouched. All work
/// happens on an isolated working copy, so production only ever changes
/// at the final promote stage.
pub struct PipelineController {
    config: PipelineConfig,
    store: Arc<dyn DatasetStore>,
    fetcher: Arc<dyn Fetcher>,
    loader: Arc<dyn Loader>,
    gate: Arc<dyn ValidationGate>,
    checkpoints: Arc<dyn CheckpointLog>,
    promoter: PromotionManager,
    lock: RunLock,
}

impl PipelineController {
    /// Creates a controller.
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn DatasetStore>,
        fetcher: Arc<dyn Fetcher>,
        loader: Arc<dyn Loader>,
        gate: Arc<dyn ValidationGate>,
        checkpoints: Arc<dyn CheckpointLog>,
    ) -> Self {
        let promoter = PromotionManager::new(Arc::clone(&store));
        let lock = RunLock::new(config.lock_path(), config.lock_stale_after);
        Self {
            config,
            store,
            fetcher,
            loader,
            gate,
            checkpoints,
            promoter,
            lock,
        }
    }

    /// Executes a run in the given mode.
    ///
    /// Returns `Err` only when the run could not start at all (lock
    /// contention); once started, the outcome is always a [`RunReport`],
    /// failures included.
    pub async fn run(&self, mode: RunMode) -> Result<RunReport, PipelineError> {
        self.run_with_token(mode, Arc::new(CancelToken::new())).await
    }

    /// Executes a run observing an externally owned cancel token.
    pub async fn run_with_token(
        &self,
        mode: RunMode,
        cancel: Arc<CancelToken>,
    ) -> Result<RunReport, PipelineError> {
        let ctx = RunContext::new(mode, Arc::clone(&self.checkpoints)).with_cancel_token(cancel);
        let run_id = ctx.run_id();

        // Contention is the one refusal that precedes any work: no
        // checkpoints, no working copy, nothing to clean up.
        let guard = self.lock.acquire(&run_id.to_string())?;
        tracing::info!(run_id = %run_id, %mode, "run started");

        let watchdog = self.config.run_timeout.map(|timeout| {
            let cancel = Arc::clone(ctx.cancel_token());
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                cancel.cancel(format!("run exceeded {}s budget", timeout.as_secs()));
            })
        });

        let mut acc = RunAccumulator::default();
        let result = self.execute(&ctx, &mut acc).await;

        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }
        if let Err(err) = self.store.discard_working(run_id) {
            tracing::warn!(run_id = %run_id, error = %err, "failed to discard working copy");
        }
        if let Err(err) = guard.release() {
            tracing::warn!(run_id = %run_id, error = %err, "failed to release run lock");
        }

        let status = match result {
            Ok(()) => RunStatus::Succeeded,
            Err(failure) => {
                self.record_failure(&ctx, &acc, &failure);
                match failure.error {
                    PipelineError::Cancelled { reason } => RunStatus::Aborted {
                        stage: failure.stage,
                        reason,
                    },
                    error => RunStatus::Failed {
                        stage: failure.stage,
                        cause: error.to_string(),
                    },
                }
            }
        };

        let report = RunReport {
            run_id,
            mode,
            status,
            datasets: acc.summaries(),
            issues: acc.issues,
            backup_stamp: acc.backup_stamp,
            started_at: ctx.started_at(),
            finished_at: Utc::now(),
        };
        tracing::info!(
            run_id = %run_id,
            status = %report.status,
            duration_ms = report.duration_ms(),
            "run finished"
        );
        Ok(report)
    }

    async fn execute(&self, ctx: &RunContext, acc: &mut RunAccumulator) -> Result<(), StageFailure> {
        let working = self.prepare(ctx, acc).await.map_err(at(Stage::Prepare))?;
        let working = self
            .fetch_merge(ctx, acc, working)
            .await
            .map_err(at(Stage::FetchMerge))?;
        self.load(ctx, acc, &working).await.map_err(at(Stage::Load))?;
        self.validate(ctx, acc, GateTarget::Dev)
            .await
            .map_err(at(Stage::ValidateDev))?;
        self.validate(ctx, acc, GateTarget::Prod)
            .await
            .map_err(at(Stage::ValidateProd))?;
        self.promote(ctx, acc, &working)
            .await
            .map_err(at(Stage::Promote))?;
        Ok(())
    }

    async fn prepare(
        &self,
        ctx: &RunContext,
        acc: &mut RunAccumulator,
    ) -> Result<DatasetSet, PipelineError> {
        ctx.ensure_active(Stage::Prepare)?;
        let production = self.store.read_production()?;
        acc.record_before(&production);

        // The working copy is a deep snapshot; nothing scraped later in
        // the run can reach production through shared storage.
        let working = production.clone();
        self.store.write_working(ctx.run_id(), &working)?;
        ctx.checkpoint(
            Checkpoint::passed(ctx.run_id(), Stage::Prepare).with_counts(acc.stage_deltas(&working)),
        )?;
        tracing::info!(
            run_id = %ctx.run_id(),
            records = working.total_records(),
            "working copy prepared"
        );
        Ok(working)
    }

    async fn fetch_merge(
        &self,
        ctx: &RunContext,
        acc: &mut RunAccumulator,
        mut working: DatasetSet,
    ) -> Result<DatasetSet, PipelineError> {
        ctx.ensure_active(Stage::FetchMerge)?;
        let full_refresh = ctx.mode().is_full_refresh();
        let window = if full_refresh {
            FetchWindow::Full
        } else {
            last_marker(&working).map_or(FetchWindow::Full, FetchWindow::Since)
        };
        tracing::info!(run_id = %ctx.run_id(), %window, "fetching datasets");

        let tasks = DatasetKind::all().into_iter().map(|kind| {
            let existing = working.get(kind);
            let fetcher = &self.fetcher;
            let retry = &self.config.retry;
            async move {
                let operation = format!("fetch {kind}");
                let fetch = with_retry(retry, &operation, || async move {
                    fetcher.fetch(kind, window).await.map_err(|err| {
                        let retryable = err.retryable;
                        PipelineError::from_collaborator("fetch_merge", err.to_string(), retryable)
                    })
                });
                let batch = tokio::select! {
                    () = ctx.cancel_token().cancelled() => {
                        return (kind, Err(PipelineError::cancelled(cancel_reason(ctx))));
                    }
                    result = fetch => match result {
                        Ok(batch) => batch,
                        Err(err) => return (kind, Err(err)),
                    },
                };

                let outcome = merge(existing, batch, &kind.key_spec(), full_refresh);
                let checkpoint = Checkpoint::passed(ctx.run_id(), Stage::FetchMerge)
                    .with_dataset(kind, CountDelta::new(existing.len(), outcome.dataset.len()))
                    .with_detail(outcome.counts.to_string());
                if let Err(err) = ctx.checkpoint(checkpoint) {
                    return (kind, Err(err));
                }
                (kind, Ok(outcome))
            }
        });
        let results = join_all(tasks).await;

        let mut cancelled = None;
        let mut failures: Vec<(DatasetKind, PipelineError)> = Vec::new();
        for (kind, result) in results {
            match result {
                Ok(outcome) => {
                    let MergeOutcome {
                        dataset,
                        counts,
                        issues,
                    } = outcome;
                    acc.record_merge(kind, dataset.len(), counts, issues);
                    working.insert(dataset);
                }
                Err(err) if matches!(err, PipelineError::Cancelled { .. }) => {
                    cancelled = Some(err);
                }
                Err(err) => failures.push((kind, err)),
            }
        }
        if let Some(err) = cancelled {
            return Err(err);
        }
        if let Some(err) = collapse_failures(failures) {
            return Err(err);
        }

        self.store.write_working(ctx.run_id(), &working)?;
        ctx.checkpoint(
            Checkpoint::passed(ctx.run_id(), Stage::FetchMerge)
                .with_counts(acc.stage_deltas(&working)),
        )?;
        Ok(working)
    }

    async fn load(
        &self,
        ctx: &RunContext,
        acc: &mut RunAccumulator,
        working: &DatasetSet,
    ) -> Result<(), PipelineError> {
        for kind in DatasetKind::all() {
            ctx.ensure_active(Stage::Load)?;
            let dataset = working.get(kind);
            let operation = format!("load {kind}");
            let loader = &self.loader;
            let load = with_retry(&self.config.retry, &operation, || async move {
                loader.load(dataset).await.map_err(|err| {
                    let retryable = err.retryable;
                    PipelineError::from_collaborator("load", err.to_string(), retryable)
                })
            });
            let loaded = tokio::select! {
                () = ctx.cancel_token().cancelled() => {
                    return Err(PipelineError::cancelled(cancel_reason(ctx)));
                }
                result = load => result?,
            };

            acc.record_loaded(kind, loaded);
            ctx.checkpoint(
                Checkpoint::passed(ctx.run_id(), Stage::Load)
                    .with_dataset(kind, CountDelta::new(dataset.len(), loaded)),
            )?;
            tracing::info!(run_id = %ctx.run_id(), dataset = %kind, loaded, "dataset loaded");
        }
        ctx.checkpoint(Checkpoint::passed(ctx.run_id(), Stage::Load).with_counts(acc.deltas()))?;
        Ok(())
    }

    async fn validate(
        &self,
        ctx: &RunContext,
        acc: &RunAccumulator,
        target: GateTarget,
    ) -> Result<(), PipelineError> {
        let stage = match target {
            GateTarget::Dev => Stage::ValidateDev,
            GateTarget::Prod => Stage::ValidateProd,
        };
        ctx.ensure_active(stage)?;

        let gate = &self.gate;
        let report = tokio::select! {
            () = ctx.cancel_token().cancelled() => {
                return Err(PipelineError::cancelled(cancel_reason(ctx)));
            }
            result = gate.validate(target) => {
                result.map_err(|err| PipelineError::Validation {
                    target: target.to_string(),
                    diagnostic: err.to_string(),
                })?
            }
        };

        if report.passed {
            ctx.checkpoint(
                Checkpoint::passed(ctx.run_id(), stage)
                    .with_counts(acc.deltas())
                    .with_detail(report.diagnostic),
            )?;
            tracing::info!(run_id = %ctx.run_id(), %target, "validation passed");
            Ok(())
        } else {
            Err(PipelineError::Validation {
                target: target.to_string(),
                diagnostic: report.diagnostic,
            })
        }
    }

    async fn promote(
        &self,
        ctx: &RunContext,
        acc: &mut RunAccumulator,
        working: &DatasetSet,
    ) -> Result<(), PipelineError> {
        ctx.ensure_active(Stage::Promote)?;
        // Past this point cancellation is ignored: the backup-then-swap
        // sequence must not be interrupted between its two halves.
        let snapshot = self.promoter.promote(working)?;

        let deltas = DatasetKind::all()
            .into_iter()
            .map(|kind| {
                let before = snapshot.counts.get(&kind).copied().unwrap_or(0);
                (kind, CountDelta::new(before, working.get(kind).len()))
            })
            .collect();
        ctx.checkpoint(
            Checkpoint::passed(ctx.run_id(), Stage::Promote)
                .with_counts(deltas)
                .with_detail(format!("backup {}", snapshot.stamp)),
        )?;
        acc.backup_stamp = Some(snapshot.stamp);
        Ok(())
    }

    fn record_failure(&self, ctx: &RunContext, acc: &RunAccumulator, failure: &StageFailure) {
        let checkpoint =
            Checkpoint::failed(ctx.run_id(), failure.stage, failure.error.to_string())
                .with_counts(acc.deltas());
        if let Err(err) = ctx.checkpoint(checkpoint) {
            tracing::warn!(
                run_id = %ctx.run_id(),
                error = %err,
                "failed to record failure checkpoint"
            );
        }
    }
}

/// Derives the incremental fetch window from the newest scrape marker
/// present in the working copy. A store with no markers fetches full.
fn last_marker(datasets: &DatasetSet) -> Option<chrono::NaiveDate> {
    datasets
        .iter()
        .flat_map(|dataset| dataset.records())
        .filter_map(|record| record.get(MARKER_FIELD))
        .filter_map(|value| value.as_str())
        .filter_map(parse_marker_date)
        .max()
}

fn collapse_failures(mut failures: Vec<(DatasetKind, PipelineError)>) -> Option<PipelineError> {
    match failures.len() {
        0 => None,
        1 => failures.pop().map(|(_, err)| err),
        _ => {
            let joined = failures
                .iter()
                .map(|(kind, err)| format!("{kind}: {err}"))
                .collect::<Vec<_>>()
                .join("; ");
            Some(PipelineError::from_collaborator("fetch_merge", joined, false))
        }
    }
}
