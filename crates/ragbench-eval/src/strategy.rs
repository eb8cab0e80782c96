use crate::backend::{SearchClient, SearchHit, SearchMode};
use ragbench_core::constants::{
    AUTO_THRESHOLD, DEFAULT_DOCUMENT_THRESHOLD, DEFAULT_DOCUMENT_WEIGHT, DEFAULT_SECTION_THRESHOLD,
    DEFAULT_SECTION_WEIGHT,
};
use ragbench_core::error::EvalError;
use ragbench_core::types::{AlgorithmVersion, UnknownStrategyPolicy, VersionParameters};
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::warn;

/// How a version turns a question into one ranked candidate list.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Strategy {
    SectionOnly {
        threshold: f64,
    },
    DocumentOnly {
        threshold: f64,
    },
    HybridWeighted {
        section_threshold: f64,
        document_threshold: f64,
        section_weight: f64,
        document_weight: f64,
    },
    Auto,
}

impl Strategy {
    pub fn key(&self) -> &'static str {
        match self {
            Self::SectionOnly { .. } => "section_only",
            Self::DocumentOnly { .. } => "document_only",
            Self::HybridWeighted { .. } => "hybrid_weighted",
            Self::Auto => "auto",
        }
    }

    /// Resolve the strategy named by `parameters.strategy`. A missing key means
    /// `auto`; an unrecognized key is handled per `policy`.
    pub fn resolve(
        version: &AlgorithmVersion,
        policy: UnknownStrategyPolicy,
    ) -> Result<Self, EvalError> {
        let params = &version.parameters;
        let key = match params.get("strategy") {
            None | Some(Value::Null) => return Ok(Self::Auto),
            Some(Value::String(key)) => key.trim().to_ascii_lowercase(),
            Some(other) => other.to_string(),
        };

        let knobs = Knobs {
            params,
            version_code: &version.version_code,
        };
        match key.as_str() {
            "section_only" => Ok(Self::SectionOnly {
                threshold: knobs.threshold("section_threshold", DEFAULT_SECTION_THRESHOLD),
            }),
            "document_only" => Ok(Self::DocumentOnly {
                threshold: knobs.threshold("document_threshold", DEFAULT_DOCUMENT_THRESHOLD),
            }),
            "hybrid_weighted" => Ok(Self::HybridWeighted {
                section_threshold: knobs.threshold("section_threshold", DEFAULT_SECTION_THRESHOLD),
                document_threshold: knobs
                    .threshold("document_threshold", DEFAULT_DOCUMENT_THRESHOLD),
                section_weight: knobs.weight("section_weight", DEFAULT_SECTION_WEIGHT),
                document_weight: knobs.weight("document_weight", DEFAULT_DOCUMENT_WEIGHT),
            }),
            "auto" => Ok(Self::Auto),
            _ => match policy {
                UnknownStrategyPolicy::FailClosed => Err(EvalError::UnknownStrategy {
                    strategy: key,
                    version_code: version.version_code.clone(),
                }),
                UnknownStrategyPolicy::FailOpen => {
                    warn!(
                        version_code = %version.version_code,
                        strategy = %key,
                        "unknown strategy; degrading to auto"
                    );
                    Ok(Self::Auto)
                }
            },
        }
    }

    /// Run the strategy for one question. Empty answers are `Ok(vec![])`.
    pub fn execute(&self, query: &str, client: &SearchClient) -> Result<Vec<SearchHit>, EvalError> {
        match *self {
            Self::SectionOnly { threshold } => client.search(query, SearchMode::Section, threshold),
            Self::DocumentOnly { threshold } => {
                client.search(query, SearchMode::Document, threshold)
            }
            Self::HybridWeighted {
                section_threshold,
                document_threshold,
                section_weight,
                document_weight,
            } => {
                let section = client.search(query, SearchMode::Section, section_threshold)?;
                let document = client.search(query, SearchMode::Document, document_threshold)?;
                Ok(merge_weighted(
                    &section,
                    section_weight,
                    &document,
                    document_weight,
                ))
            }
            Self::Auto => client.search(query, SearchMode::Auto, AUTO_THRESHOLD),
        }
    }
}

/// Combine two ranked lists by `weight * score` per id. An id missing from one
/// list keeps only its weighted contribution from the other. Sorted by combined
/// score descending, then id ascending.
pub fn merge_weighted(
    section: &[SearchHit],
    section_weight: f64,
    document: &[SearchHit],
    document_weight: f64,
) -> Vec<SearchHit> {
    let mut combined: HashMap<i64, f64> = HashMap::new();
    for (hits, weight) in [(section, section_weight), (document, document_weight)] {
        let mut seen = std::collections::HashSet::new();
        for hit in hits {
            if seen.insert(hit.id) {
                *combined.entry(hit.id).or_insert(0.0) += weight * hit.score;
            }
        }
    }

    let mut merged: Vec<SearchHit> = combined
        .into_iter()
        .map(|(id, score)| SearchHit { id, score })
        .collect();
    merged.sort_by(|left, right| {
        right
            .score
            .partial_cmp(&left.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| left.id.cmp(&right.id))
    });
    merged
}

struct Knobs<'a> {
    params: &'a VersionParameters,
    version_code: &'a str,
}

impl Knobs<'_> {
    fn number(&self, key: &str, default: f64) -> f64 {
        let Some(raw) = self.params.get(key) else {
            return default;
        };
        let parsed = match raw {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        match parsed.filter(|v| v.is_finite()) {
            Some(v) => v,
            None => {
                warn!(
                    version_code = self.version_code,
                    key,
                    value = %raw,
                    default,
                    "non-numeric strategy parameter; using default"
                );
                default
            }
        }
    }

    fn threshold(&self, key: &str, default: f64) -> f64 {
        let value = self.number(key, default);
        let clamped = value.clamp(0.0, 1.0);
        if (clamped - value).abs() > f64::EPSILON {
            warn!(
                version_code = self.version_code,
                key,
                value,
                clamped,
                "threshold out of range; clamped to [0.0, 1.0]"
            );
        }
        clamped
    }

    fn weight(&self, key: &str, default: f64) -> f64 {
        let value = self.number(key, default);
        if value < 0.0 {
            warn!(
                version_code = self.version_code,
                key,
                value,
                default,
                "negative weight; using default"
            );
            return default;
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SearchBackend, SearchRequest};
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn version(params: Value) -> AlgorithmVersion {
        let parameters = match params {
            Value::Object(map) => map,
            _ => VersionParameters::new(),
        };
        AlgorithmVersion {
            id: 1,
            version_name: "v".into(),
            version_code: "v".into(),
            description: None,
            parameters,
            is_baseline: false,
            created_by: None,
            created_at: String::new(),
        }
    }

    struct Scripted {
        calls: Mutex<Vec<(SearchMode, f64)>>,
    }

    impl SearchBackend for Scripted {
        fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, EvalError> {
            self.calls
                .lock()
                .unwrap()
                .push((request.mode, request.threshold));
            Ok(match request.mode {
                SearchMode::Section => vec![SearchHit::new(10, 0.9)],
                SearchMode::Document => vec![SearchHit::new(10, 0.5), SearchHit::new(11, 0.8)],
                SearchMode::Auto => Vec::new(),
            })
        }
    }

    fn client(backend: Arc<Scripted>) -> SearchClient {
        SearchClient::new(backend, 10, Duration::from_secs(5))
    }

    #[test]
    fn resolves_known_keys_with_defaults() {
        assert_eq!(
            Strategy::resolve(&version(json!({"strategy": "section_only"})), Default::default())
                .unwrap(),
            Strategy::SectionOnly { threshold: 0.75 }
        );
        assert_eq!(
            Strategy::resolve(
                &version(json!({"strategy": "document_only", "document_threshold": 0.5})),
                Default::default()
            )
            .unwrap(),
            Strategy::DocumentOnly { threshold: 0.5 }
        );
        assert_eq!(
            Strategy::resolve(&version(json!({"strategy": "hybrid_weighted"})), Default::default())
                .unwrap(),
            Strategy::HybridWeighted {
                section_threshold: 0.75,
                document_threshold: 0.65,
                section_weight: 0.7,
                document_weight: 0.3,
            }
        );
    }

    #[test]
    fn missing_strategy_is_auto() {
        assert_eq!(
            Strategy::resolve(&version(json!({})), UnknownStrategyPolicy::FailClosed).unwrap(),
            Strategy::Auto
        );
    }

    #[test]
    fn unknown_strategy_follows_policy() {
        let v = version(json!({"strategy": "quantum"}));
        let err = Strategy::resolve(&v, UnknownStrategyPolicy::FailClosed).unwrap_err();
        assert!(matches!(err, EvalError::UnknownStrategy { ref strategy, .. } if strategy == "quantum"));
        assert_eq!(
            Strategy::resolve(&v, UnknownStrategyPolicy::FailOpen).unwrap(),
            Strategy::Auto
        );
    }

    #[test]
    fn bad_knobs_fall_back_or_clamp() {
        let v = version(json!({
            "strategy": "hybrid_weighted",
            "section_threshold": 1.7,
            "document_threshold": "0.4",
            "section_weight": -1.0,
            "document_weight": "heavy"
        }));
        assert_eq!(
            Strategy::resolve(&v, Default::default()).unwrap(),
            Strategy::HybridWeighted {
                section_threshold: 1.0,
                document_threshold: 0.4,
                section_weight: 0.7,
                document_weight: 0.3,
            }
        );
    }

    #[test]
    fn hybrid_merges_weighted_scores() {
        let backend = Arc::new(Scripted {
            calls: Mutex::new(Vec::new()),
        });
        let strategy = Strategy::resolve(
            &version(json!({"strategy": "hybrid_weighted"})),
            Default::default(),
        )
        .unwrap();
        let hits = strategy.execute("q", &client(backend.clone())).unwrap();

        assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), vec![10, 11]);
        assert!((hits[0].score - 0.78).abs() < 1e-9);
        assert!((hits[1].score - 0.24).abs() < 1e-9);

        let calls = backend.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![(SearchMode::Section, 0.75), (SearchMode::Document, 0.65)]
        );
    }

    #[test]
    fn merge_breaks_ties_by_id() {
        let merged = merge_weighted(
            &[SearchHit::new(5, 0.5)],
            1.0,
            &[SearchHit::new(2, 0.5)],
            1.0,
        );
        assert_eq!(merged.iter().map(|h| h.id).collect::<Vec<_>>(), vec![2, 5]);
    }

    #[test]
    fn auto_uses_auto_mode_and_returns_empty_list() {
        let backend = Arc::new(Scripted {
            calls: Mutex::new(Vec::new()),
        });
        let hits = Strategy::Auto.execute("q", &client(backend.clone())).unwrap();
        assert!(hits.is_empty());
        assert_eq!(*backend.calls.lock().unwrap(), vec![(SearchMode::Auto, 0.7)]);
    }
}
