use crate::db::{json_column, to_json_text};
use ragbench_core::error::StateError;
use ragbench_core::types::TestCase;
use rusqlite::{Connection, params, params_from_iter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fields needed to register a test case.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTestCase {
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
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

const SELECT_COLUMNS: &str = "SELECT id, question, expected_document_ids, min_required_matches, category, difficulty_level, question_type, knowledge_source, is_active, created_at FROM test_cases";

/// Insert a test case. Expected ids are stored sorted and de-duplicated.
pub fn insert_test_case(conn: &Connection, case: &NewTestCase) -> Result<TestCase, StateError> {
    let mut expected = case.expected_document_ids.clone();
    expected.sort_unstable();
    expected.dedup();
    let created_at = ragbench_core::time::now_iso8601();

    conn.execute(
        "INSERT INTO test_cases (question, expected_document_ids, min_required_matches, category, difficulty_level, question_type, knowledge_source, is_active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            case.question,
            to_json_text(&expected)?,
            case.min_required_matches,
            case.category,
            case.difficulty_level,
            case.question_type,
            case.knowledge_source,
            case.is_active,
            created_at,
        ],
    )
    .map_err(StateError::sqlite)?;

    let id = conn.last_insert_rowid();
    get_test_case(conn, id)?.ok_or(StateError::TestCaseNotFound { test_case_id: id })
}

pub fn get_test_case(conn: &Connection, id: i64) -> Result<Option<TestCase>, StateError> {
    let mut stmt = conn
        .prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
        .map_err(StateError::sqlite)?;

    match stmt.query_row(params![id], row_to_test_case) {
        Ok(case) => Ok(Some(case)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(StateError::sqlite(e)),
    }
}

/// Snapshot of the active cases, ordered by id.
pub fn list_active_test_cases(conn: &Connection) -> Result<Vec<TestCase>, StateError> {
    let mut stmt = conn
        .prepare(&format!("{SELECT_COLUMNS} WHERE is_active = 1 ORDER BY id"))
        .map_err(StateError::sqlite)?;
    let cases = stmt
        .query_map([], row_to_test_case)
        .map_err(StateError::sqlite)?;
    cases
        .collect::<Result<Vec<_>, _>>()
        .map_err(StateError::sqlite)
}

pub fn list_test_cases(conn: &Connection) -> Result<Vec<TestCase>, StateError> {
    let mut stmt = conn
        .prepare(&format!("{SELECT_COLUMNS} ORDER BY id"))
        .map_err(StateError::sqlite)?;
    let cases = stmt
        .query_map([], row_to_test_case)
        .map_err(StateError::sqlite)?;
    cases
        .collect::<Result<Vec<_>, _>>()
        .map_err(StateError::sqlite)
}

/// Fetch the given ids regardless of `is_active`, in request order.
/// Missing ids are simply absent from the result.
pub fn get_test_cases_by_ids(conn: &Connection, ids: &[i64]) -> Result<Vec<TestCase>, StateError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; ids.len()].join(", ");
    let mut stmt = conn
        .prepare(&format!("{SELECT_COLUMNS} WHERE id IN ({placeholders})"))
        .map_err(StateError::sqlite)?;
    let rows = stmt
        .query_map(params_from_iter(ids.iter()), row_to_test_case)
        .map_err(StateError::sqlite)?;

    let mut by_id = HashMap::with_capacity(ids.len());
    for row in rows {
        let case = row.map_err(StateError::sqlite)?;
        by_id.insert(case.id, case);
    }

    let mut ordered = Vec::with_capacity(by_id.len());
    for id in ids {
        if let Some(case) = by_id.remove(id) {
            ordered.push(case);
        }
    }
    Ok(ordered)
}

pub fn set_active(conn: &Connection, id: i64, is_active: bool) -> Result<(), StateError> {
    let changed = conn
        .execute(
            "UPDATE test_cases SET is_active = ?1 WHERE id = ?2",
            params![is_active, id],
        )
        .map_err(StateError::sqlite)?;
    if changed == 0 {
        return Err(StateError::TestCaseNotFound { test_case_id: id });
    }
    Ok(())
}

fn row_to_test_case(row: &rusqlite::Row) -> rusqlite::Result<TestCase> {
    Ok(TestCase {
        id: row.get(0)?,
        question: row.get(1)?,
        expected_document_ids: json_column(row, 2)?,
        min_required_matches: row.get(3)?,
        category: row.get(4)?,
        difficulty_level: row.get(5)?,
        question_type: row.get(6)?,
        knowledge_source: row.get(7)?,
        is_active: row.get(8)?,
        created_at: row.get(9)?,
    })
}
