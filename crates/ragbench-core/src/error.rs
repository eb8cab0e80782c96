use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    NotFound { path: String },

    #[error("failed to parse config: {0}")]
    ParseError(String),

    #[error("invalid config value: {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum StateError {
    #[error("sqlite error: {0}")]
    Sqlite(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("algorithm version not found: {version_id}")]
    VersionNotFound { version_id: i64 },

    #[error("test case not found: {test_case_id}")]
    TestCaseNotFound { test_case_id: i64 },

    #[error("test run not found: {run_id}")]
    RunNotFound { run_id: i64 },

    #[error("algorithm version {version_id} is referenced by {run_count} test run(s) and is read-only")]
    VersionInUse { version_id: i64, run_count: i64 },

    #[error("version code already exists: {version_code}")]
    DuplicateVersionCode { version_code: String },

    #[error("schema migration required: current={current}, required={required}")]
    SchemaMigrationRequired { current: u32, required: u32 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StateError {
    /// Convenience constructor for SQLite errors, for use with `.map_err(StateError::sqlite)`.
    pub fn sqlite<E: std::fmt::Display>(e: E) -> Self {
        Self::Sqlite(e.to_string())
    }

    /// Convenience constructor for JSON column encode/decode failures.
    pub fn serialization<E: std::fmt::Display>(e: E) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum EvalError {
    #[error("search backend error: {0}")]
    Backend(String),

    #[error("search timed out after {timeout_ms}ms (mode={mode})")]
    Timeout { mode: String, timeout_ms: u64 },

    #[error("unknown strategy '{strategy}' for version {version_code}")]
    UnknownStrategy {
        strategy: String,
        version_code: String,
    },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("unresolved {kind} ids: {ids:?}")]
    Unresolved { kind: &'static str, ids: Vec<i64> },

    #[error(transparent)]
    State(#[from] StateError),
}

impl EvalError {
    /// Convenience constructor for collaborator failures.
    pub fn backend<E: std::fmt::Display>(e: E) -> Self {
        Self::Backend(e.to_string())
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }

    pub fn timeout(mode: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            mode: mode.into(),
            timeout_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_mode_and_budget() {
        let err = EvalError::timeout("section", 250);
        assert_eq!(err.to_string(), "search timed out after 250ms (mode=section)");
    }

    #[test]
    fn state_errors_convert_into_eval_errors() {
        let err: EvalError = StateError::VersionNotFound { version_id: 7 }.into();
        assert!(matches!(
            err,
            EvalError::State(StateError::VersionNotFound { version_id: 7 })
        ));
        assert_eq!(err.to_string(), "algorithm version not found: 7");
    }
}
