/// Default number of ranked ids considered by NDCG.
pub const DEFAULT_TOP_K: usize = 10;

/// Default `limit` passed to every search collaborator call.
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Default per-call search timeout.
pub const DEFAULT_SEARCH_TIMEOUT_MS: u64 = 10_000;

/// Runs left `running` longer than this are reconciled to `stopped`.
pub const DEFAULT_STALE_RUN_AFTER_SECS: u64 = 3_600;

/// Current schema version for SQLite tables.
pub const SCHEMA_VERSION: u32 = 2;

/// Default data directory name under home.
pub const DEFAULT_DATA_DIR: &str = ".ragbench";

/// Project config file name.
pub const PROJECT_CONFIG_FILE: &str = ".ragbench/config.toml";

/// SQLite database file name.
pub const STATE_DB_FILE: &str = "bench.db";

/// Run type tag used by multi-version sweeps.
pub const RUN_TYPE_BATCH_COMPARISON: &str = "batch_comparison";

/// Run type tag used by operator-triggered single-version runs.
pub const RUN_TYPE_MANUAL: &str = "manual";

/// Default thresholds and weights for the search strategies.
pub const DEFAULT_SECTION_THRESHOLD: f64 = 0.75;
pub const DEFAULT_DOCUMENT_THRESHOLD: f64 = 0.65;
pub const DEFAULT_SECTION_WEIGHT: f64 = 0.7;
pub const DEFAULT_DOCUMENT_WEIGHT: f64 = 0.3;
pub const AUTO_THRESHOLD: f64 = 0.7;
