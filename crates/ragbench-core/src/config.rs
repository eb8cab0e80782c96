use crate::constants;
use crate::error::ConfigError;
use crate::types::UnknownStrategyPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_db_file")]
    pub db_file: String,
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u32,
    #[serde(default = "default_cache_size")]
    pub cache_size: i32,
}

/// Where candidate ids come from. Exactly one of `endpoint` / `fixture_path`
/// is normally set; `endpoint` wins when both are.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub fixture_path: Option<String>,
    #[serde(default = "default_search_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_search_limit")]
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_unknown_strategy")]
    pub unknown_strategy: String,
    #[serde(default = "default_stale_run_after_secs")]
    pub stale_run_after_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_data_dir() -> String {
    format!("~/{}", constants::DEFAULT_DATA_DIR)
}
fn default_db_file() -> String {
    constants::STATE_DB_FILE.into()
}
fn default_busy_timeout() -> u32 {
    5000
}
fn default_cache_size() -> i32 {
    -64000
}
fn default_search_timeout_ms() -> u64 {
    constants::DEFAULT_SEARCH_TIMEOUT_MS
}
fn default_search_limit() -> usize {
    constants::DEFAULT_SEARCH_LIMIT
}
fn default_top_k() -> usize {
    constants::DEFAULT_TOP_K
}
fn default_workers() -> usize {
    1
}
fn default_unknown_strategy() -> String {
    UnknownStrategyPolicy::default().as_str().into()
}
fn default_stale_run_after_secs() -> u64 {
    constants::DEFAULT_STALE_RUN_AFTER_SECS
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            db_file: default_db_file(),
            busy_timeout_ms: default_busy_timeout(),
            cache_size: default_cache_size(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            fixture_path: None,
            timeout_ms: default_search_timeout_ms(),
            limit: default_search_limit(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            workers: default_workers(),
            unknown_strategy: default_unknown_strategy(),
            stale_run_after_secs: default_stale_run_after_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl RunnerConfig {
    pub fn unknown_strategy_typed(&self) -> UnknownStrategyPolicy {
        UnknownStrategyPolicy::parse(&self.unknown_strategy).unwrap_or_default()
    }
}

impl Config {
    /// Load configuration with layered precedence:
    /// 1. Environment variables `RAGBENCH_<SECTION>_<KEY>` (highest priority)
    /// 2. Explicit config file (from `--config`)
    /// 3. Project config: `<project_root>/.ragbench/config.toml`
    /// 4. Global config: `~/.ragbench/config.toml`
    /// 5. Built-in defaults
    ///
    /// Only fields explicitly set in a higher-priority file override lower layers.
    pub fn load(project_root: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_file(project_root, None)
    }

    pub fn load_with_file(
        project_root: Option<&Path>,
        config_file: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let mut merged = toml::Value::Table(toml::map::Map::new());

        if let Some(home) = dirs::home_dir() {
            let global_path = home.join(constants::DEFAULT_DATA_DIR).join("config.toml");
            if global_path.exists() {
                let raw = load_toml_value(&global_path)?;
                merge_toml_values(&mut merged, &raw);
            }
        }

        if let Some(root) = project_root {
            let project_path = root.join(constants::PROJECT_CONFIG_FILE);
            if project_path.exists() {
                let raw = load_toml_value(&project_path)?;
                merge_toml_values(&mut merged, &raw);
            }
        }

        if let Some(cf) = config_file {
            if !cf.exists() {
                return Err(ConfigError::NotFound {
                    path: cf.display().to_string(),
                });
            }
            let raw = load_toml_value(cf)?;
            merge_toml_values(&mut merged, &raw);
        }

        let config_str =
            toml::to_string(&merged).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        let mut config: Config =
            toml::from_str(&config_str).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        apply_env_overrides(&mut config, |key| std::env::var(key).ok());
        config.normalize();
        Ok(config)
    }

    /// Clamp out-of-range values back to something the runner can use.
    pub fn normalize(&mut self) {
        self.storage.data_dir = expand_tilde(&self.storage.data_dir);
        if self.storage.db_file.trim().is_empty() {
            self.storage.db_file = default_db_file();
        }
        self.search.endpoint = non_empty(self.search.endpoint.take());
        self.search.fixture_path = non_empty(self.search.fixture_path.take()).map(|p| expand_tilde(&p));
        self.search.timeout_ms = clamp_min_u64_with_warning(
            self.search.timeout_ms,
            1,
            default_search_timeout_ms(),
            "search.timeout_ms",
        );
        self.search.limit = clamp_min_usize_with_warning(
            self.search.limit,
            1,
            default_search_limit(),
            "search.limit",
        );
        self.runner.top_k =
            clamp_min_usize_with_warning(self.runner.top_k, 1, default_top_k(), "runner.top_k");
        self.runner.workers = clamp_min_usize_with_warning(
            self.runner.workers,
            1,
            default_workers(),
            "runner.workers",
        );
        self.runner.unknown_strategy = normalize_unknown_strategy(&self.runner.unknown_strategy);
        self.runner.stale_run_after_secs = clamp_min_u64_with_warning(
            self.runner.stale_run_after_secs,
            1,
            default_stale_run_after_secs(),
            "runner.stale_run_after_secs",
        );
        if self.logging.level.trim().is_empty() {
            self.logging.level = default_log_level();
        }
    }

    /// Full path of the SQLite database file.
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.storage.data_dir).join(&self.storage.db_file)
    }
}

/// Load a TOML file as a raw `toml::Value` (preserving only explicitly-set fields).
fn load_toml_value(path: &Path) -> Result<toml::Value, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    content
        .parse::<toml::Value>()
        .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))
}

/// Deep-merge `overlay` into `base`. Only keys present in `overlay` are written.
fn merge_toml_values(base: &mut toml::Value, overlay: &toml::Value) {
    if let (toml::Value::Table(base_map), toml::Value::Table(overlay_map)) = (base, overlay) {
        for (key, overlay_val) in overlay_map {
            if let Some(base_val) = base_map.get_mut(key) {
                if base_val.is_table() && overlay_val.is_table() {
                    merge_toml_values(base_val, overlay_val);
                } else {
                    *base_val = overlay_val.clone();
                }
            } else {
                base_map.insert(key.clone(), overlay_val.clone());
            }
        }
    }
}

/// Convention: `RAGBENCH_<SECTION>_<KEY>` in UPPER_SNAKE_CASE.
/// Unparseable numeric values are ignored with a warning.
fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("RAGBENCH_STORAGE_DATA_DIR") {
        config.storage.data_dir = v;
    }
    if let Some(v) = lookup("RAGBENCH_STORAGE_DB_FILE") {
        config.storage.db_file = v;
    }
    if let Some(n) = parse_env_number(&lookup, "RAGBENCH_STORAGE_BUSY_TIMEOUT_MS") {
        config.storage.busy_timeout_ms = n;
    }
    if let Some(n) = parse_env_number(&lookup, "RAGBENCH_STORAGE_CACHE_SIZE") {
        config.storage.cache_size = n;
    }
    if let Some(v) = lookup("RAGBENCH_SEARCH_ENDPOINT") {
        config.search.endpoint = Some(v);
    }
    if let Some(v) = lookup("RAGBENCH_SEARCH_FIXTURE_PATH") {
        config.search.fixture_path = Some(v);
    }
    if let Some(n) = parse_env_number(&lookup, "RAGBENCH_SEARCH_TIMEOUT_MS") {
        config.search.timeout_ms = n;
    }
    if let Some(n) = parse_env_number(&lookup, "RAGBENCH_SEARCH_LIMIT") {
        config.search.limit = n;
    }
    if let Some(n) = parse_env_number(&lookup, "RAGBENCH_RUNNER_TOP_K") {
        config.runner.top_k = n;
    }
    if let Some(n) = parse_env_number(&lookup, "RAGBENCH_RUNNER_WORKERS") {
        config.runner.workers = n;
    }
    if let Some(v) = lookup("RAGBENCH_RUNNER_UNKNOWN_STRATEGY") {
        config.runner.unknown_strategy = v;
    }
    if let Some(n) = parse_env_number(&lookup, "RAGBENCH_RUNNER_STALE_RUN_AFTER_SECS") {
        config.runner.stale_run_after_secs = n;
    }
    if let Some(v) = lookup("RAGBENCH_LOGGING_LEVEL") {
        config.logging.level = v;
    }
}

fn parse_env_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring non-numeric environment override");
            None
        }
    }
}

fn normalize_unknown_strategy(raw: &str) -> String {
    match UnknownStrategyPolicy::parse(raw) {
        Some(policy) => policy.as_str().to_string(),
        None => {
            tracing::warn!(
                field = "runner.unknown_strategy",
                value = raw,
                "unrecognized policy; falling back to fail_closed"
            );
            default_unknown_strategy()
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn clamp_min_usize_with_warning(value: usize, min: usize, fallback: usize, field: &str) -> usize {
    if value < min {
        tracing::warn!(
            field,
            value,
            min,
            fallback,
            "config value below minimum; falling back to default"
        );
        fallback
    } else {
        value
    }
}

fn clamp_min_u64_with_warning(value: u64, min: u64, fallback: u64, field: &str) -> u64 {
    if value < min {
        tracing::warn!(
            field,
            value,
            min,
            fallback,
            "config value below minimum; falling back to default"
        );
        fallback
    } else {
        value
    }
}

fn expand_tilde(path: &str) -> String {
    if path.starts_with('~')
        && let Some(home) = dirs::home_dir()
    {
        return path.replacen('~', &home.to_string_lossy(), 1);
    }
    path.to_string()
}
