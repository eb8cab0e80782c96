use anyhow::{Context, Result};
use ragbench_core::config::Config;
use ragbench_core::constants;
use ragbench_state::{schema, test_cases, versions};
use std::path::Path;
use tracing::info;

pub fn run(config: &Config) -> Result<()> {
    let data_dir = Path::new(&config.storage.data_dir);
    std::fs::create_dir_all(data_dir).context("Failed to create data directory")?;

    let store = super::open_store(config)?;
    schema::ensure_current(store.conn())?;

    let version_count = versions::list_versions(store.conn())?.len();
    let case_count = test_cases::list_test_cases(store.conn())?.len();
    let db_path = config.db_path();

    println!("Benchmark store ready");
    println!("  Database:       {}", db_path.display());
    println!("  Schema version: {}", constants::SCHEMA_VERSION);
    println!("  Versions:       {version_count}");
    println!("  Test cases:     {case_count}");
    if case_count == 0 {
        println!();
        println!("Next step: add test cases with `ragbench cases import <file.json>`.");
    }

    info!(db_path = %db_path.display(), version_count, case_count, "benchmark store initialized");
    Ok(())
}
