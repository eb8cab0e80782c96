use crate::backend::{SearchBackend, SearchClient};
use crate::cancel::CancellationToken;
use crate::scoring;
use crate::strategy::Strategy;
use ragbench_core::config::Config;
use ragbench_core::constants::{DEFAULT_SEARCH_LIMIT, DEFAULT_SEARCH_TIMEOUT_MS, DEFAULT_TOP_K};
use ragbench_core::error::EvalError;
use ragbench_core::types::{
    AlgorithmVersion, NewTestRun, RunAggregates, RunProgress, RunStatus, TestCase, TestResult,
    TestRun, UnknownStrategyPolicy,
};
use ragbench_state::runs::RunCompletion;
use ragbench_state::store::RunStore;
use rayon::prelude::*;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const CANCELLED_MESSAGE: &str = "cancelled";

/// Knobs shared by every runner in a sweep.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub top_k: usize,
    pub search_limit: usize,
    pub search_timeout: Duration,
    pub workers: usize,
    pub unknown_strategy: UnknownStrategyPolicy,
    /// Log per-case outcomes at info instead of debug.
    pub verbose: bool,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            search_limit: DEFAULT_SEARCH_LIMIT,
            search_timeout: Duration::from_millis(DEFAULT_SEARCH_TIMEOUT_MS),
            workers: 1,
            unknown_strategy: UnknownStrategyPolicy::default(),
            verbose: false,
        }
    }
}

impl RunnerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            top_k: config.runner.top_k,
            search_limit: config.search.limit,
            search_timeout: Duration::from_millis(config.search.timeout_ms),
            workers: config.runner.workers,
            unknown_strategy: config.runner.unknown_strategy_typed(),
            verbose: false,
        }
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// Final state of a batch run plus the in-memory per-case results.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run: TestRun,
    pub results: Vec<TestResult>,
    /// Set when the token tripped or the stored run was stopped mid-batch.
    pub cancelled: bool,
}

/// Scores one case against the resolved strategy. Holds no store handle, so it
/// can be shared across worker threads.
#[derive(Clone)]
struct CaseExecutor {
    client: SearchClient,
    strategy: Strategy,
    top_k: usize,
}

impl CaseExecutor {
    /// Never fails: collaborator errors become a zero-metric failing result.
    fn execute(&self, case: &TestCase) -> TestResult {
        let expected = case.expected_set();
        let started = Instant::now();
        let outcome = self.strategy.execute(&case.question, &self.client);
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(hits) => {
                let returned_ids: Vec<i64> = hits.iter().map(|hit| hit.id).collect();
                let metrics = scoring::calculate_all_metrics(
                    &returned_ids,
                    &expected,
                    elapsed_ms,
                    Some(self.top_k),
                );
                TestResult {
                    id: None,
                    test_run_id: None,
                    test_case_id: case.id,
                    returned_document_ids: returned_ids,
                    returned_document_scores: hits.iter().map(|hit| hit.score).collect(),
                    precision_score: metrics.precision,
                    recall_score: metrics.recall,
                    f1_score: metrics.f1_score,
                    ndcg_score: metrics.ndcg,
                    speed_score: metrics.speed_score,
                    overall_score: metrics.overall_score,
                    response_time: metrics.response_time_ms,
                    true_positives: metrics.true_positives,
                    false_positives: metrics.false_positives,
                    false_negatives: metrics.false_negatives,
                    is_passed: metrics.true_positives >= case.min_required_matches,
                    error_message: None,
                    created_at: ragbench_core::time::now_iso8601(),
                }
            }
            Err(err) => {
                warn!(
                    test_case_id = case.id,
                    strategy = self.strategy.key(),
                    error = %err,
                    "test case failed; recording zero-metric result"
                );
                failed_result(case, elapsed_ms, err.to_string())
            }
        }
    }
}

fn failed_result(case: &TestCase, elapsed_ms: f64, error_message: String) -> TestResult {
    TestResult {
        id: None,
        test_run_id: None,
        test_case_id: case.id,
        returned_document_ids: Vec::new(),
        returned_document_scores: Vec::new(),
        precision_score: 0.0,
        recall_score: 0.0,
        f1_score: 0.0,
        ndcg_score: 0.0,
        speed_score: 0.0,
        overall_score: 0.0,
        response_time: if elapsed_ms.is_finite() { elapsed_ms.max(0.0) } else { 0.0 },
        true_positives: 0,
        false_positives: 0,
        false_negatives: case.expected_set().len() as u32,
        is_passed: false,
        error_message: Some(error_message),
        created_at: ragbench_core::time::now_iso8601(),
    }
}

/// Arithmetic means of the per-case metrics. The run's overall score is
/// recomputed from the averaged components rather than averaged itself.
pub fn aggregate_results(results: &[TestResult]) -> RunAggregates {
    if results.is_empty() {
        return RunAggregates::default();
    }
    let n = results.len() as f64;
    let mean = |f: fn(&TestResult) -> f64| results.iter().map(f).sum::<f64>() / n;

    let avg_precision = mean(|r| r.precision_score);
    let avg_recall = mean(|r| r.recall_score);
    let avg_f1_score = mean(|r| r.f1_score);
    let avg_ndcg = mean(|r| r.ndcg_score);
    let avg_speed_score = mean(|r| r.speed_score);
    let avg_response_time = mean(|r| r.response_time);

    RunAggregates {
        overall_score: scoring::overall_score(
            avg_precision,
            avg_recall,
            avg_f1_score,
            avg_ndcg,
            avg_speed_score,
        ),
        avg_precision,
        avg_recall,
        avg_f1_score,
        avg_ndcg,
        avg_speed_score,
        avg_response_time,
    }
}

/// Executes test cases for one algorithm version.
pub struct BenchmarkTestRunner<'a> {
    store: &'a dyn RunStore,
    version: AlgorithmVersion,
    executor: CaseExecutor,
    settings: RunnerSettings,
    cancel: CancellationToken,
}

impl<'a> BenchmarkTestRunner<'a> {
    /// Load the version and resolve its strategy. Fails when the version is
    /// unknown or its strategy is rejected under `fail_closed`.
    pub fn new(
        store: &'a dyn RunStore,
        backend: Arc<dyn SearchBackend>,
        version_id: i64,
        settings: RunnerSettings,
    ) -> Result<Self, EvalError> {
        let version = store.get_version(version_id)?;
        let strategy = Strategy::resolve(&version, settings.unknown_strategy)?;
        let client = SearchClient::new(backend, settings.search_limit, settings.search_timeout);
        debug!(
            version_id,
            version_code = %version.version_code,
            strategy = strategy.key(),
            "runner ready"
        );
        Ok(Self {
            store,
            version,
            executor: CaseExecutor {
                client,
                strategy,
                top_k: settings.top_k.max(1),
            },
            settings,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn version(&self) -> &AlgorithmVersion {
        &self.version
    }

    pub fn strategy(&self) -> Strategy {
        self.executor.strategy
    }

    /// Run one case. When `save_to_db` is set and a run id is given, the result
    /// is persisted under that run; a persistence failure is logged and the
    /// unsaved result is still returned.
    pub fn run_single_test(
        &self,
        test_case: &TestCase,
        save_to_db: bool,
        test_run_id: Option<i64>,
    ) -> TestResult {
        let mut result = self.executor.execute(test_case);
        if save_to_db {
            match test_run_id {
                Some(run_id) => self.persist_result(run_id, &mut result),
                None => debug!(
                    test_case_id = test_case.id,
                    "save requested without a test run; result not persisted"
                ),
            }
        }
        self.log_case(&result);
        result
    }

    /// Run `test_cases` in input order under a new `running` TestRun, updating
    /// counters after every case and finalizing once at the end. The batch ends
    /// early when the token trips or the stored run stops being `running`; a
    /// case whose counters could not be recorded is not persisted.
    pub fn run_batch_tests(
        &self,
        test_cases: &[TestCase],
        run_name: &str,
        run_type: &str,
        notes: Option<&str>,
    ) -> Result<RunOutcome, EvalError> {
        let started = Instant::now();
        let run = self.store.create_run(&NewTestRun {
            version_id: self.version.id,
            run_name: run_name.to_string(),
            run_type: run_type.to_string(),
            notes: notes.map(str::to_string),
            total_test_cases: test_cases.len() as u32,
            started_at: ragbench_core::time::now_iso8601(),
        })?;
        info!(
            run_id = run.id,
            version_code = %self.version.version_code,
            strategy = self.executor.strategy.key(),
            total = test_cases.len(),
            workers = self.settings.workers,
            "test run started"
        );

        let pool = self.worker_pool();
        let chunk_size = pool
            .as_ref()
            .map(|_| self.settings.workers.max(1))
            .unwrap_or(1);

        let mut progress = RunProgress::default();
        let mut results = Vec::with_capacity(test_cases.len());
        let mut cancelled = false;

        for chunk in test_cases.chunks(chunk_size) {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let executor = &self.executor;
            let cancel = &self.cancel;
            let prepared: Vec<Option<TestResult>> = match pool.as_ref() {
                Some(pool) => pool.install(|| {
                    chunk
                        .par_iter()
                        .map(|case| (!cancel.is_cancelled()).then(|| executor.execute(case)))
                        .collect()
                }),
                None => chunk.iter().map(|case| Some(executor.execute(case))).collect(),
            };

            for outcome in prepared {
                let Some(mut result) = outcome else {
                    cancelled = true;
                    continue;
                };
                let mut next = progress;
                next.record(result.is_passed);
                match self.store.update_run_progress(run.id, &next) {
                    Ok(true) => {}
                    Ok(false) => {
                        info!(
                            run_id = run.id,
                            completed = progress.completed_test_cases,
                            "run left running outside this runner; stopping"
                        );
                        cancelled = true;
                        break;
                    }
                    Err(err) => {
                        warn!(run_id = run.id, error = %err, "failed to persist run progress")
                    }
                }
                progress = next;
                self.persist_result(run.id, &mut result);
                self.log_case(&result);
                results.push(result);
            }
            if cancelled {
                break;
            }
        }

        let aggregates = aggregate_results(&results);
        let (status, error_message) = if cancelled {
            (RunStatus::Stopped, Some(CANCELLED_MESSAGE.to_string()))
        } else {
            (RunStatus::Completed, None)
        };
        let completion = RunCompletion {
            status,
            progress,
            aggregates,
            completed_at: ragbench_core::time::now_iso8601(),
            duration_seconds: started.elapsed().as_secs_f64(),
            error_message,
        };

        let final_run = match self.store.finalize_run(run.id, &completion) {
            Ok(stored) => stored,
            Err(err) => {
                warn!(run_id = run.id, error = %err, "failed to finalize run; returning in-memory state");
                TestRun {
                    status: completion.status,
                    progress: completion.progress,
                    aggregates: completion.aggregates,
                    completed_at: Some(completion.completed_at.clone()),
                    duration_seconds: Some(completion.duration_seconds),
                    error_message: completion.error_message.clone(),
                    ..run
                }
            }
        };

        info!(
            run_id = final_run.id,
            status = %final_run.status,
            completed = final_run.progress.completed_test_cases,
            passed = final_run.progress.passed_test_cases,
            failed = final_run.progress.failed_test_cases,
            overall_score = final_run.aggregates.overall_score,
            duration_seconds = completion.duration_seconds,
            "test run finished"
        );

        Ok(RunOutcome {
            run: final_run,
            results,
            cancelled,
        })
    }

    fn worker_pool(&self) -> Option<rayon::ThreadPool> {
        if self.settings.workers <= 1 {
            return None;
        }
        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.settings.workers)
            .thread_name(|idx| format!("ragbench-case-{idx}"))
            .build()
        {
            Ok(pool) => Some(pool),
            Err(err) => {
                warn!(error = %err, "failed to build worker pool; running sequentially");
                None
            }
        }
    }

    fn persist_result(&self, run_id: i64, result: &mut TestResult) {
        match self.store.insert_result(run_id, result) {
            Ok(id) => {
                result.id = Some(id);
                result.test_run_id = Some(run_id);
            }
            Err(err) => warn!(
                run_id,
                test_case_id = result.test_case_id,
                error = %err,
                "failed to persist test result"
            ),
        }
    }

    fn log_case(&self, result: &TestResult) {
        if self.settings.verbose {
            info!(
                version_code = %self.version.version_code,
                test_case_id = result.test_case_id,
                passed = result.is_passed,
                precision = result.precision_score,
                recall = result.recall_score,
                response_time_ms = result.response_time,
                "test case scored"
            );
        } else {
            debug!(
                version_code = %self.version.version_code,
                test_case_id = result.test_case_id,
                passed = result.is_passed,
                precision = result.precision_score,
                recall = result.recall_score,
                response_time_ms = result.response_time,
                "test case scored"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(precision: f64, recall: f64, f1: f64, ndcg: f64, speed: f64, ms: f64) -> TestResult {
        TestResult {
            id: None,
            test_run_id: None,
            test_case_id: 1,
            returned_document_ids: Vec::new(),
            returned_document_scores: Vec::new(),
            precision_score: precision,
            recall_score: recall,
            f1_score: f1,
            ndcg_score: ndcg,
            speed_score: speed,
            overall_score: scoring::overall_score(precision, recall, f1, ndcg, speed),
            response_time: ms,
            true_positives: 0,
            false_positives: 0,
            false_negatives: 0,
            is_passed: false,
            error_message: None,
            created_at: String::new(),
        }
    }

    #[test]
    fn aggregate_of_nothing_is_zero() {
        assert_eq!(aggregate_results(&[]), RunAggregates::default());
    }

    #[test]
    fn aggregate_recomputes_overall_from_means() {
        let results = [
            result(1.0, 1.0, 1.0, 1.0, 100.0, 10.0),
            result(0.0, 0.0, 0.0, 0.0, 50.0, 30.0),
        ];
        let agg = aggregate_results(&results);
        assert_eq!(agg.avg_precision, 0.5);
        assert_eq!(agg.avg_speed_score, 75.0);
        assert_eq!(agg.avg_response_time, 20.0);
        assert_eq!(
            agg.overall_score,
            scoring::overall_score(0.5, 0.5, 0.5, 0.5, 75.0)
        );
    }

    #[test]
    fn failed_result_counts_every_expected_id_as_missed() {
        let case = TestCase {
            id: 3,
            question: "q".into(),
            expected_document_ids: vec![1, 2, 2, 3],
            min_required_matches: 0,
            category: String::new(),
            difficulty_level: String::new(),
            question_type: String::new(),
            knowledge_source: String::new(),
            is_active: true,
            created_at: String::new(),
        };
        let failed = failed_result(&case, f64::NAN, "boom".into());
        assert_eq!(failed.false_negatives, 3);
        assert!(!failed.is_passed);
        assert_eq!(failed.response_time, 0.0);
        assert_eq!(failed.error_message.as_deref(), Some("boom"));
    }
}
