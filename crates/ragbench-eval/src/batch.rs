use crate::backend::SearchBackend;
use crate::cancel::CancellationToken;
use crate::runner::{BenchmarkTestRunner, RunnerSettings};
use crate::scoring;
use ragbench_core::constants::RUN_TYPE_BATCH_COMPARISON;
use ragbench_core::error::EvalError;
use ragbench_core::types::{AlgorithmVersion, RunStatus, TestCase, TestRun};
use ragbench_state::store::RunStore;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Inputs to one sweep. `None` selects everything (all versions, all active
/// test cases).
#[derive(Debug, Clone, Default)]
pub struct BatchRequest {
    pub version_ids: Option<Vec<i64>>,
    pub test_case_ids: Option<Vec<i64>>,
    pub batch_name: Option<String>,
    pub notes: Option<String>,
    /// Recorded on the result and in run notes; has no effect on execution.
    pub force_retest: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub success: bool,
    pub batch_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub test_runs: Vec<TestRun>,
    pub test_run_ids: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<Comparison>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<BatchSummary>,
    pub created_at: String,
    pub force_retest: bool,
}

impl BatchResult {
    fn failure(batch_id: String, batch_name: Option<String>, error: String, force_retest: bool) -> Self {
        Self {
            success: false,
            batch_id,
            batch_name,
            error: Some(error),
            test_runs: Vec::new(),
            test_run_ids: Vec::new(),
            comparison: None,
            summary: None,
            created_at: ragbench_core::time::now_iso8601(),
            force_retest,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Comparison {
    /// Ranked by `overall_score` descending, ties by `version_id` ascending.
    pub versions: Vec<VersionComparison>,
    pub best_version: Option<VersionComparison>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline_version_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionComparison {
    pub version_id: i64,
    pub version_name: String,
    pub version_code: String,
    pub test_run_id: i64,
    pub overall_score: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub ndcg: f64,
    pub avg_response_time: f64,
    pub passed_test_cases: u32,
    pub total_test_cases: u32,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_delta_vs_baseline: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    /// Versions whose run was created and finalized.
    pub versions_tested: usize,
    pub total_test_cases: usize,
    /// Cases actually executed across all runs.
    pub total_executions: usize,
    pub execution_time_seconds: f64,
    pub failed_versions: Vec<FailedVersion>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedVersion {
    pub version_id: i64,
    pub version_name: String,
    pub error: String,
}

/// Sweeps one or more versions over the same case set and ranks the outcome.
pub struct BatchVersionTester<'a> {
    store: &'a dyn RunStore,
    backend: Arc<dyn SearchBackend>,
    settings: RunnerSettings,
    cancel: CancellationToken,
}

impl<'a> BatchVersionTester<'a> {
    pub fn new(
        store: &'a dyn RunStore,
        backend: Arc<dyn SearchBackend>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            store,
            backend,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Never returns an error: resolution problems produce `success: false`,
    /// per-version problems are listed in `summary.failed_versions`.
    pub fn run_batch_test(&self, request: &BatchRequest) -> BatchResult {
        let batch_id = ragbench_core::time::batch_stamp();
        let batch_name = request
            .batch_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Batch Test {batch_id}"));

        if request.force_retest {
            info!(batch_id = %batch_id, "force_retest requested; recorded only");
        }

        let resolved = self
            .resolve_versions(request.version_ids.as_deref())
            .and_then(|versions| {
                self.resolve_test_cases(request.test_case_ids.as_deref())
                    .map(|cases| (versions, cases))
            });
        let (versions, test_cases) = match resolved {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!(batch_id = %batch_id, error = %err, "batch rejected before any run");
                return BatchResult::failure(
                    batch_id,
                    Some(batch_name),
                    err.to_string(),
                    request.force_retest,
                );
            }
        };
        if versions.is_empty() {
            return BatchResult::failure(
                batch_id,
                Some(batch_name),
                "no algorithm versions to test".to_string(),
                request.force_retest,
            );
        }
        if test_cases.is_empty() {
            return BatchResult::failure(
                batch_id,
                Some(batch_name),
                "no test cases to run".to_string(),
                request.force_retest,
            );
        }

        info!(
            batch_id = %batch_id,
            batch_name = %batch_name,
            versions = versions.len(),
            test_cases = test_cases.len(),
            "batch started"
        );
        let started = Instant::now();
        let notes = batch_notes(&batch_id, request.notes.as_deref(), request.force_retest);

        let mut test_runs = Vec::with_capacity(versions.len());
        let mut tested_versions = Vec::with_capacity(versions.len());
        let mut failed_versions = Vec::new();
        let mut cancelled = false;

        for version in &versions {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let run_name = format!("{batch_name} - {}", version.version_name);
            match self.run_version(version, &test_cases, &run_name, &notes) {
                Ok((run, run_cancelled)) => {
                    test_runs.push(run);
                    tested_versions.push(version.clone());
                    // A run stopped by an operator ends only that version.
                    if run_cancelled && self.cancel.is_cancelled() {
                        cancelled = true;
                        break;
                    }
                }
                Err(err) => {
                    warn!(
                        batch_id = %batch_id,
                        version_id = version.id,
                        version_name = %version.version_name,
                        error = %err,
                        "version skipped"
                    );
                    failed_versions.push(FailedVersion {
                        version_id: version.id,
                        version_name: version.version_name.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        let baseline_id = match self.store.get_baseline_version() {
            Ok(baseline) => baseline.map(|v| v.id),
            Err(err) => {
                warn!(error = %err, "failed to load baseline version; omitting deltas");
                None
            }
        };
        let comparison = build_comparison(&tested_versions, &test_runs, baseline_id);
        let summary = BatchSummary {
            versions_tested: test_runs.len(),
            total_test_cases: test_cases.len(),
            total_executions: test_runs
                .iter()
                .map(|run| run.progress.completed_test_cases as usize)
                .sum(),
            execution_time_seconds: started.elapsed().as_secs_f64(),
            failed_versions,
            cancelled,
        };

        info!(
            batch_id = %batch_id,
            versions_tested = summary.versions_tested,
            failed = summary.failed_versions.len(),
            cancelled,
            best_version = comparison.best_version.as_ref().map(|v| v.version_id),
            execution_time_seconds = summary.execution_time_seconds,
            "batch finished"
        );

        BatchResult {
            success: true,
            batch_id,
            batch_name: Some(batch_name),
            error: None,
            test_run_ids: test_runs.iter().map(|run| run.id).collect(),
            test_runs,
            comparison: Some(comparison),
            summary: Some(summary),
            created_at: ragbench_core::time::now_iso8601(),
            force_retest: request.force_retest,
        }
    }

    fn run_version(
        &self,
        version: &AlgorithmVersion,
        test_cases: &[TestCase],
        run_name: &str,
        notes: &str,
    ) -> Result<(TestRun, bool), EvalError> {
        let runner = BenchmarkTestRunner::new(
            self.store,
            Arc::clone(&self.backend),
            version.id,
            self.settings.clone(),
        )?
        .with_cancellation(self.cancel.clone());
        let outcome =
            runner.run_batch_tests(test_cases, run_name, RUN_TYPE_BATCH_COMPARISON, Some(notes))?;
        Ok((outcome.run, outcome.cancelled))
    }

    fn resolve_versions(&self, ids: Option<&[i64]>) -> Result<Vec<AlgorithmVersion>, EvalError> {
        let all = self.store.list_versions()?;
        let Some(ids) = ids else {
            return Ok(all);
        };
        let mut seen = BTreeSet::new();
        let mut selected = Vec::new();
        let mut missing = Vec::new();
        for &id in ids {
            if !seen.insert(id) {
                continue;
            }
            match all.iter().find(|v| v.id == id) {
                Some(version) => selected.push(version.clone()),
                None => missing.push(id),
            }
        }
        if !missing.is_empty() {
            return Err(EvalError::Unresolved {
                kind: "algorithm version",
                ids: missing,
            });
        }
        Ok(selected)
    }

    fn resolve_test_cases(&self, ids: Option<&[i64]>) -> Result<Vec<TestCase>, EvalError> {
        let Some(ids) = ids else {
            return Ok(self.store.list_active_test_cases()?);
        };
        let mut seen = BTreeSet::new();
        let unique: Vec<i64> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();
        let cases = self.store.get_test_cases(&unique)?;
        let found: BTreeSet<i64> = cases.iter().map(|case| case.id).collect();
        let missing: Vec<i64> = unique.into_iter().filter(|id| !found.contains(id)).collect();
        if !missing.is_empty() {
            return Err(EvalError::Unresolved {
                kind: "test case",
                ids: missing,
            });
        }
        Ok(cases)
    }
}

fn batch_notes(batch_id: &str, notes: Option<&str>, force_retest: bool) -> String {
    let mut out = format!("[batch {batch_id}]");
    if force_retest {
        out.push_str(" [force_retest]");
    }
    if let Some(notes) = notes.map(str::trim).filter(|n| !n.is_empty()) {
        out.push(' ');
        out.push_str(notes);
    }
    out
}

/// Rank finished runs. `versions[i]` produced `runs[i]`.
pub fn build_comparison(
    versions: &[AlgorithmVersion],
    runs: &[TestRun],
    baseline_version_id: Option<i64>,
) -> Comparison {
    let baseline_score = baseline_version_id.and_then(|baseline| {
        runs.iter()
            .find(|run| run.version_id == baseline)
            .map(|run| run.aggregates.overall_score)
    });

    let mut entries: Vec<VersionComparison> = versions
        .iter()
        .zip(runs)
        .map(|(version, run)| VersionComparison {
            version_id: version.id,
            version_name: version.version_name.clone(),
            version_code: version.version_code.clone(),
            test_run_id: run.id,
            overall_score: run.aggregates.overall_score,
            precision: run.aggregates.avg_precision,
            recall: run.aggregates.avg_recall,
            f1_score: run.aggregates.avg_f1_score,
            ndcg: run.aggregates.avg_ndcg,
            avg_response_time: run.aggregates.avg_response_time,
            passed_test_cases: run.progress.passed_test_cases,
            total_test_cases: run.total_test_cases,
            status: run.status,
            overall_delta_vs_baseline: baseline_score
                .map(|base| scoring::round2(run.aggregates.overall_score - base)),
        })
        .collect();
    entries.sort_by(|left, right| {
        right
            .overall_score
            .partial_cmp(&left.overall_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| left.version_id.cmp(&right.version_id))
    });

    Comparison {
        best_version: entries.first().cloned(),
        baseline_version_id: baseline_score.and(baseline_version_id),
        versions: entries,
    }
}
