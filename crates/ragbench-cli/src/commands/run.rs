use anyhow::{Context, Result, bail};
use ragbench_core::config::Config;
use ragbench_eval::backend::backend_from_config;
use ragbench_eval::batch::{BatchRequest, BatchResult, BatchVersionTester};
use ragbench_eval::runner::{BenchmarkTestRunner, RunnerSettings};
use ragbench_state::store::RunStore;

pub struct BatchArgs {
    pub versions: Option<Vec<i64>>,
    pub cases: Option<Vec<i64>>,
    pub name: Option<String>,
    pub notes: Option<String>,
    pub force_retest: bool,
    pub workers: Option<usize>,
    pub json: bool,
    pub verbose: bool,
}

pub fn run_batch(config: &Config, args: BatchArgs) -> Result<()> {
    let store = super::open_store(config)?;
    let backend = backend_from_config(&config.search).context("Failed to set up search backend")?;
    let mut settings = RunnerSettings::from_config(config).with_verbose(args.verbose);
    if let Some(workers) = args.workers {
        settings.workers = workers.max(1);
    }

    let tester = BatchVersionTester::new(&store, backend, settings);
    let result = tester.run_batch_test(&BatchRequest {
        version_ids: args.versions,
        test_case_ids: args.cases,
        batch_name: args.name,
        notes: args.notes,
        force_retest: args.force_retest,
    });

    if args.json {
        super::print_json(&result)?;
    } else {
        print_summary(&result);
    }
    if !result.success {
        bail!(
            "batch {} failed: {}",
            result.batch_id,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn print_summary(result: &BatchResult) {
    println!(
        "Batch {} ({})",
        result.batch_name.as_deref().unwrap_or("-"),
        result.batch_id
    );
    if let Some(error) = &result.error {
        println!("  Error: {error}");
        return;
    }
    if let Some(comparison) = &result.comparison {
        println!();
        println!(
            "  {:<4} {:<24} {:>8} {:>9} {:>7} {:>7} {:>9} {:>8}",
            "rank", "version", "overall", "precision", "recall", "f1", "passed", "delta"
        );
        for (rank, entry) in comparison.versions.iter().enumerate() {
            let delta = entry
                .overall_delta_vs_baseline
                .map(|d| format!("{d:+.2}"))
                .unwrap_or_else(|| "-".into());
            println!(
                "  {:<4} {:<24} {:>8.2} {:>9.3} {:>7.3} {:>7.3} {:>9} {:>8}",
                rank + 1,
                entry.version_code,
                entry.overall_score,
                entry.precision,
                entry.recall,
                entry.f1_score,
                format!("{}/{}", entry.passed_test_cases, entry.total_test_cases),
                delta
            );
        }
    }
    if let Some(summary) = &result.summary {
        println!();
        println!("  Versions tested:  {}", summary.versions_tested);
        println!("  Test cases:       {}", summary.total_test_cases);
        println!("  Executions:       {}", summary.total_executions);
        println!("  Elapsed:          {:.2}s", summary.execution_time_seconds);
        for failed in &summary.failed_versions {
            println!(
                "  Skipped:          {} ({}): {}",
                failed.version_name, failed.version_id, failed.error
            );
        }
        if summary.cancelled {
            println!("  Cancelled before all versions finished");
        }
    }
}

pub fn run_single(
    config: &Config,
    version_id: i64,
    test_case_id: i64,
    save_to_run: Option<i64>,
    verbose: bool,
) -> Result<()> {
    let store = super::open_store(config)?;
    let backend = backend_from_config(&config.search).context("Failed to set up search backend")?;
    let settings = RunnerSettings::from_config(config).with_verbose(verbose);

    let cases = store.get_test_cases(&[test_case_id])?;
    let Some(case) = cases.first() else {
        bail!("test case not found: {test_case_id}");
    };
    let runner = BenchmarkTestRunner::new(&store, backend, version_id, settings)?;
    let result = runner.run_single_test(case, save_to_run.is_some(), save_to_run);
    super::print_json(&result)
}
