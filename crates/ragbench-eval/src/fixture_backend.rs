use crate::backend::{SearchBackend, SearchHit, SearchMode, SearchRequest};
use ragbench_core::error::EvalError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// On-disk shape of a canned-response file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFixture {
    #[serde(default)]
    pub responses: Vec<FixtureResponse>,
    /// Fallback hits per mode for queries without an explicit entry.
    #[serde(default)]
    pub defaults: HashMap<SearchMode, Vec<SearchHit>>,
    /// Artificial latency added to every call.
    #[serde(default)]
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureResponse {
    pub mode: SearchMode,
    pub query: String,
    #[serde(default)]
    pub hits: Vec<SearchHit>,
    /// When set, the call fails with this message instead of returning hits.
    #[serde(default)]
    pub error: Option<String>,
}

/// Offline collaborator answering from canned `(mode, query)` responses.
#[derive(Debug, Clone, Default)]
pub struct FixtureSearchBackend {
    responses: HashMap<(SearchMode, String), Result<Vec<SearchHit>, String>>,
    defaults: HashMap<SearchMode, Vec<SearchHit>>,
    delay: Duration,
}

impl FixtureSearchBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_from_path(path: &Path) -> Result<Self, EvalError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EvalError::configuration(format!("failed to read fixture {}: {e}", path.display()))
        })?;
        let fixture: SearchFixture = serde_json::from_str(&raw).map_err(|e| {
            EvalError::configuration(format!("failed to parse fixture {}: {e}", path.display()))
        })?;
        let backend = Self::from_fixture(fixture);
        info!(
            path = %path.display(),
            responses = backend.responses.len(),
            "search fixture loaded"
        );
        Ok(backend)
    }

    pub fn from_fixture(fixture: SearchFixture) -> Self {
        let mut backend = Self {
            defaults: fixture.defaults,
            delay: Duration::from_millis(fixture.delay_ms),
            ..Self::default()
        };
        for response in fixture.responses {
            let outcome = match response.error {
                Some(message) => Err(message),
                None => Ok(response.hits),
            };
            backend.responses.insert(fixture_key(response.mode, &response.query), outcome);
        }
        backend
    }

    pub fn with_response(mut self, mode: SearchMode, query: &str, hits: Vec<SearchHit>) -> Self {
        self.responses.insert(fixture_key(mode, query), Ok(hits));
        self
    }

    pub fn with_error(mut self, mode: SearchMode, query: &str, message: &str) -> Self {
        self.responses
            .insert(fixture_key(mode, query), Err(message.to_string()));
        self
    }

    pub fn with_default(mut self, mode: SearchMode, hits: Vec<SearchHit>) -> Self {
        self.defaults.insert(mode, hits);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

fn fixture_key(mode: SearchMode, query: &str) -> (SearchMode, String) {
    (mode, query.trim().to_string())
}

impl SearchBackend for FixtureSearchBackend {
    fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, EvalError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let hits = match self.responses.get(&fixture_key(request.mode, &request.query)) {
            Some(Ok(hits)) => hits.clone(),
            Some(Err(message)) => return Err(EvalError::backend(message)),
            None => self.defaults.get(&request.mode).cloned().unwrap_or_default(),
        };
        Ok(hits.into_iter().take(request.limit).collect())
    }
}
