use crate::fixture_backend::FixtureSearchBackend;
use crate::http_backend::HttpSearchBackend;
use ragbench_core::config::SearchConfig;
use ragbench_core::error::EvalError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;
use tracing::debug;

/// Index granularity a search call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Section,
    Document,
    Auto,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Section => "section",
            Self::Document => "document",
            Self::Auto => "auto",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "section" => Some(Self::Section),
            "document" => Some(Self::Document),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub mode: SearchMode,
    pub threshold: f64,
    pub limit: usize,
}

/// Canonical hit shape. Adapters normalize whatever the collaborator returns
/// into this before the runner sees it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: i64,
    pub score: f64,
}

impl SearchHit {
    pub fn new(id: i64, score: f64) -> Self {
        Self { id, score }
    }
}

/// The search collaborator: ranked document ids with scores for a query.
///
/// Each call runs on its own helper thread under the runner's deadline. A call
/// that overruns is reported as a timeout but keeps its thread until `search`
/// returns, so implementations should bound their own I/O the way
/// `HttpSearchBackend` does with its client timeout.
pub trait SearchBackend: Send + Sync {
    fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, EvalError>;
}

/// Issues backend calls with a fixed result limit and a per-call deadline.
#[derive(Clone)]
pub struct SearchClient {
    backend: Arc<dyn SearchBackend>,
    limit: usize,
    timeout: Duration,
}

impl SearchClient {
    pub fn new(backend: Arc<dyn SearchBackend>, limit: usize, timeout: Duration) -> Self {
        Self {
            backend,
            limit: limit.max(1),
            timeout,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run one search on a helper thread and wait at most `timeout` for it.
    /// A call that overruns is reported as `EvalError::Timeout`; its thread is
    /// left to finish on its own and the late answer is discarded.
    pub fn search(
        &self,
        query: &str,
        mode: SearchMode,
        threshold: f64,
    ) -> Result<Vec<SearchHit>, EvalError> {
        let request = SearchRequest {
            query: query.to_string(),
            mode,
            threshold,
            limit: self.limit,
        };
        let backend = Arc::clone(&self.backend);
        let (tx, rx) = mpsc::channel();
        std::thread::Builder::new()
            .name(format!("ragbench-search-{}", mode.as_str()))
            .spawn(move || {
                let _ = tx.send(backend.search(&request));
            })
            .map_err(EvalError::backend)?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                let timeout_ms = self.timeout.as_millis() as u64;
                debug!(mode = mode.as_str(), timeout_ms, "search call exceeded deadline");
                Err(EvalError::timeout(mode.as_str(), timeout_ms))
            }
            Err(RecvTimeoutError::Disconnected) => Err(EvalError::backend(
                "search worker exited without a response",
            )),
        }
    }
}

/// Build the configured collaborator: an HTTP endpoint when set, else a fixture file.
pub fn backend_from_config(search: &SearchConfig) -> Result<Arc<dyn SearchBackend>, EvalError> {
    if let Some(endpoint) = search.endpoint.as_deref() {
        let backend = HttpSearchBackend::new(endpoint, Duration::from_millis(search.timeout_ms))?;
        return Ok(Arc::new(backend));
    }
    if let Some(path) = search.fixture_path.as_deref() {
        return Ok(Arc::new(FixtureSearchBackend::load_from_path(Path::new(path))?));
    }
    Err(EvalError::configuration(
        "no search backend configured: set search.endpoint or search.fixture_path",
    ))
}
