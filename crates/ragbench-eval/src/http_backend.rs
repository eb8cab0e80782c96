use crate::backend::{SearchBackend, SearchHit, SearchRequest};
use ragbench_core::error::EvalError;
use reqwest::blocking::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Search collaborator reached over HTTP. Requests are POSTed as
/// `{query, mode, threshold, limit}`.
pub struct HttpSearchBackend {
    endpoint: String,
    client: Client,
}

impl HttpSearchBackend {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, EvalError> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(EvalError::configuration("search endpoint is empty"));
        }
        let client = Client::builder()
            .timeout(timeout.max(Duration::from_millis(1)))
            .build()
            .map_err(EvalError::backend)?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl SearchBackend for HttpSearchBackend {
    fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, EvalError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .map_err(EvalError::backend)?;

        if !response.status().is_success() {
            return Err(EvalError::backend(format!(
                "search_http_{}",
                response.status().as_u16()
            )));
        }

        let body: Value = response.json().map_err(EvalError::backend)?;
        parse_search_response(body)
    }
}

/// Accepts a top-level array or `{ "results": [...] }`.
pub fn parse_search_response(body: Value) -> Result<Vec<SearchHit>, EvalError> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("results") {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                return Err(EvalError::backend(format!(
                    "unexpected `results` payload: {}",
                    json_kind(&other)
                )));
            }
        },
        Value::Null => Vec::new(),
        other => {
            return Err(EvalError::backend(format!(
                "unexpected search payload: {}",
                json_kind(&other)
            )));
        }
    };

    let total = items.len();
    let hits: Vec<SearchHit> = items
        .iter()
        .enumerate()
        .filter_map(|(position, item)| {
            let hit = hit_from_item(item);
            if hit.is_none() {
                debug!(position, "dropping search item without a usable document id");
            }
            hit
        })
        .collect();
    if hits.len() < total {
        debug!(kept = hits.len(), total, "search response contained unusable items");
    }
    Ok(hits)
}

fn hit_from_item(item: &Value) -> Option<SearchHit> {
    let id = item
        .get("metadata")
        .and_then(|metadata| metadata.get("id"))
        .and_then(id_from_value)
        .or_else(|| item.get("id").and_then(id_from_value))
        .or_else(|| item.get("document_id").and_then(id_from_value))?;
    let score = item
        .get("score")
        .and_then(Value::as_f64)
        .or_else(|| item.get("similarity").and_then(Value::as_f64))
        .filter(|score| score.is_finite())
        .unwrap_or(0.0);
    Some(SearchHit { id, score })
}

fn id_from_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_top_level_array() {
        let hits = parse_search_response(json!([
            {"id": 3, "score": 0.9},
            {"id": 4, "score": 0.4}
        ]))
        .unwrap();
        assert_eq!(hits, vec![SearchHit::new(3, 0.9), SearchHit::new(4, 0.4)]);
    }

    #[test]
    fn prefers_metadata_id_and_accepts_numeric_strings() {
        let hits = parse_search_response(json!({
            "results": [
                {"metadata": {"id": "12"}, "id": 99, "similarity": 0.8},
                {"document_id": "7", "score": 0.5},
                {"id": 8}
            ]
        }))
        .unwrap();
        assert_eq!(
            hits,
            vec![
                SearchHit::new(12, 0.8),
                SearchHit::new(7, 0.5),
                SearchHit::new(8, 0.0)
            ]
        );
    }

    #[test]
    fn drops_items_without_usable_ids() {
        let hits = parse_search_response(json!([
            {"id": "abc", "score": 0.9},
            {"title": "no id"},
            {"metadata": {"source": "x"}, "document_id": 5, "score": 0.3}
        ]))
        .unwrap();
        assert_eq!(hits, vec![SearchHit::new(5, 0.3)]);
    }

    #[test]
    fn empty_and_null_payloads_are_empty_lists() {
        assert!(parse_search_response(json!([])).unwrap().is_empty());
        assert!(parse_search_response(json!({"results": null})).unwrap().is_empty());
        assert!(parse_search_response(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn unexpected_shapes_are_backend_errors() {
        assert!(matches!(
            parse_search_response(json!("nope")),
            Err(EvalError::Backend(_))
        ));
        assert!(matches!(
            parse_search_response(json!({"results": 3})),
            Err(EvalError::Backend(_))
        ));
    }

    #[test]
    fn blank_endpoint_is_configuration_error() {
        assert!(matches!(
            HttpSearchBackend::new("  ", Duration::from_secs(1)),
            Err(EvalError::Configuration(_))
        ));
    }
}
