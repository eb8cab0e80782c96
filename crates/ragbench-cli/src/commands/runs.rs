use anyhow::{Result, bail};
use ragbench_core::config::Config;
use ragbench_state::{results, runs};
use serde_json::json;

pub fn list(config: &Config, version_id: Option<i64>, limit: usize) -> Result<()> {
    let store = super::open_store(config)?;
    super::print_json(&runs::list_runs(store.conn(), version_id, limit.max(1))?)
}

pub fn show(config: &Config, id: i64, with_results: bool) -> Result<()> {
    let store = super::open_store(config)?;
    let Some(run) = runs::get_run(store.conn(), id)? else {
        bail!("test run not found: {id}");
    };
    if with_results {
        let results = results::list_results_for_run(store.conn(), id)?;
        super::print_json(&json!({ "run": run, "results": results }))
    } else {
        super::print_json(&run)
    }
}

pub fn stop(config: &Config, id: i64, reason: &str) -> Result<()> {
    let store = super::open_store(config)?;
    if runs::stop_run(store.conn(), id, reason)? {
        println!("Run {id} stopped");
    } else {
        println!("Run {id} was not running; left unchanged");
    }
    Ok(())
}

pub fn delete(config: &Config, id: i64) -> Result<()> {
    let store = super::open_store(config)?;
    runs::delete_run(store.conn(), id)?;
    println!("Run {id} deleted");
    Ok(())
}

pub fn reconcile(config: &Config, older_than_secs: Option<u64>) -> Result<()> {
    let secs = older_than_secs.unwrap_or(config.runner.stale_run_after_secs);
    let store = super::open_store(config)?;
    let cutoff = ragbench_core::time::iso8601_seconds_ago(secs);
    let stopped = runs::mark_stale_runs_stopped(store.conn(), &cutoff)?;
    if stopped.is_empty() {
        println!("No stale runs");
    } else {
        println!("Marked {} stale run(s) stopped: {:?}", stopped.len(), stopped);
    }
    Ok(())
}
