use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Free-form version configuration. Recognized keys are read by the strategy layer.
pub type VersionParameters = serde_json::Map<String, serde_json::Value>;

/// A fixed evaluation question with its ground-truth document ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: i64,
    pub question: String,
    pub expected_document_ids: Vec<i64>,
    pub min_required_matches: u32,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub difficulty_level: String,
    #[serde(default)]
    pub question_type: String,
    #[serde(default)]
    pub knowledge_source: String,
    pub is_active: bool,
    #[serde(default)]
    pub created_at: String,
}

impl TestCase {
    /// Ground truth as a set; order and duplicates carry no meaning.
    pub fn expected_set(&self) -> BTreeSet<i64> {
        self.expected_document_ids.iter().copied().collect()
    }
}

/// A named configuration of the retrieval pipeline under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmVersion {
    pub id: i64,
    pub version_name: String,
    pub version_code: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: VersionParameters,
    pub is_baseline: bool,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Stopped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the runner does with a `strategy` key it does not recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownStrategyPolicy {
    #[default]
    FailClosed,
    FailOpen,
}

impl UnknownStrategyPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FailClosed => "fail_closed",
            Self::FailOpen => "fail_open",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fail_closed" | "closed" | "strict" => Some(Self::FailClosed),
            "fail_open" | "open" | "degrade" => Some(Self::FailOpen),
            _ => None,
        }
    }
}

/// Progress counters advanced after every case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProgress {
    pub completed_test_cases: u32,
    pub passed_test_cases: u32,
    pub failed_test_cases: u32,
}

impl RunProgress {
    pub fn record(&mut self, passed: bool) {
        self.completed_test_cases += 1;
        if passed {
            self.passed_test_cases += 1;
        } else {
            self.failed_test_cases += 1;
        }
    }
}

/// Run-level metric means, written once when a run is finalized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunAggregates {
    pub overall_score: f64,
    pub avg_precision: f64,
    pub avg_recall: f64,
    pub avg_f1_score: f64,
    pub avg_ndcg: f64,
    pub avg_speed_score: f64,
    pub avg_response_time: f64,
}

/// Fields supplied when a run is opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTestRun {
    pub version_id: i64,
    pub run_name: String,
    pub run_type: String,
    pub notes: Option<String>,
    pub total_test_cases: u32,
    pub started_at: String,
}

/// One execution of a batch of test cases against one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRun {
    pub id: i64,
    pub version_id: i64,
    pub run_name: String,
    pub run_type: String,
    pub status: RunStatus,
    pub notes: Option<String>,
    pub total_test_cases: u32,
    #[serde(flatten)]
    pub progress: RunProgress,
    #[serde(flatten)]
    pub aggregates: RunAggregates,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub duration_seconds: Option<f64>,
    pub error_message: Option<String>,
}

/// One test case's outcome, optionally attached to a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub id: Option<i64>,
    pub test_run_id: Option<i64>,
    pub test_case_id: i64,
    pub returned_document_ids: Vec<i64>,
    pub returned_document_scores: Vec<f64>,
    pub precision_score: f64,
    pub recall_score: f64,
    pub f1_score: f64,
    pub ndcg_score: f64,
    pub speed_score: f64,
    pub overall_score: f64,
    pub response_time: f64,
    pub true_positives: u32,
    pub false_positives: u32,
    pub false_negatives: u32,
    pub is_passed: bool,
    pub error_message: Option<String>,
    pub created_at: String,
}
