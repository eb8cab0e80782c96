pub mod cases;
pub mod init;
pub mod run;
pub mod runs;
pub mod version;

use anyhow::{Context, Result};
use ragbench_core::config::Config;
use ragbench_state::store::SqliteStore;

/// Open the configured database, creating and migrating the schema if needed.
pub fn open_store(config: &Config) -> Result<SqliteStore> {
    let db_path = config.db_path();
    SqliteStore::open_with_config(&config.storage)
        .with_context(|| format!("Failed to open benchmark database {}", db_path.display()))
}

pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_config(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = dir.to_string_lossy().to_string();
    config.storage.db_file = "bench.db".into();
    config
}
