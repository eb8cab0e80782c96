use crate::db::{json_column, to_json_text};
use ragbench_core::error::StateError;
use ragbench_core::types::TestResult;
use rusqlite::{Connection, params};

/// Append one case outcome to a run. Result rows are never updated.
pub fn insert_result(conn: &Connection, run_id: i64, result: &TestResult) -> Result<i64, StateError> {
    conn.execute(
        "INSERT INTO test_results (test_run_id, test_case_id, returned_document_ids, returned_document_scores,
             precision_score, recall_score, f1_score, ndcg_score, speed_score, overall_score, response_time,
             true_positives, false_positives, false_negatives, is_passed, error_message, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            run_id,
            result.test_case_id,
            to_json_text(&result.returned_document_ids)?,
            to_json_text(&result.returned_document_scores)?,
            result.precision_score,
            result.recall_score,
            result.f1_score,
            result.ndcg_score,
            result.speed_score,
            result.overall_score,
            result.response_time,
            result.true_positives,
            result.false_positives,
            result.false_negatives,
            result.is_passed,
            result.error_message,
            result.created_at,
        ],
    )
    .map_err(StateError::sqlite)?;
    Ok(conn.last_insert_rowid())
}

/// Results of a run in insertion order.
pub fn list_results_for_run(conn: &Connection, run_id: i64) -> Result<Vec<TestResult>, StateError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, test_run_id, test_case_id, returned_document_ids, returned_document_scores,
                 precision_score, recall_score, f1_score, ndcg_score, speed_score, overall_score, response_time,
                 true_positives, false_positives, false_negatives, is_passed, error_message, created_at
             FROM test_results WHERE test_run_id = ?1 ORDER BY id",
        )
        .map_err(StateError::sqlite)?;
    let results = stmt
        .query_map(params![run_id], row_to_result)
        .map_err(StateError::sqlite)?;
    results
        .collect::<Result<Vec<_>, _>>()
        .map_err(StateError::sqlite)
}

pub fn count_results_for_run(conn: &Connection, run_id: i64) -> Result<i64, StateError> {
    conn.query_row(
        "SELECT COUNT(*) FROM test_results WHERE test_run_id = ?1",
        params![run_id],
        |row| row.get(0),
    )
    .map_err(StateError::sqlite)
}

fn row_to_result(row: &rusqlite::Row) -> rusqlite::Result<TestResult> {
    Ok(TestResult {
        id: row.get(0)?,
        test_run_id: row.get(1)?,
        test_case_id: row.get(2)?,
        returned_document_ids: json_column(row, 3)?,
        returned_document_scores: json_column(row, 4)?,
        precision_score: row.get(5)?,
        recall_score: row.get(6)?,
        f1_score: row.get(7)?,
        ndcg_score: row.get(8)?,
        speed_score: row.get(9)?,
        overall_score: row.get(10)?,
        response_time: row.get(11)?,
        true_positives: row.get(12)?,
        false_positives: row.get(13)?,
        false_negatives: row.get(14)?,
        is_passed: row.get(15)?,
        error_message: row.get(16)?,
        created_at: row.get(17)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runs;
    use crate::test_cases::{self, NewTestCase};
    use crate::versions::{self, NewVersion};
    use crate::{db, schema};
    use ragbench_core::types::NewTestRun;
    use tempfile::{TempDir, tempdir};

    fn setup() -> (TempDir, Connection, i64, i64) {
        let dir = tempdir().unwrap();
        let mut conn = db::open_connection(&dir.path().join("bench.db")).unwrap();
        schema::create_tables(&conn).unwrap();
        let version = versions::create_version(
            &mut conn,
            &NewVersion {
                version_name: "Base".into(),
                version_code: "base".into(),
                ..Default::default()
            },
        )
        .unwrap();
        let case = test_cases::insert_test_case(
            &conn,
            &NewTestCase {
                question: "what is the refund window?".into(),
                expected_document_ids: vec![1, 2, 3],
                min_required_matches: 2,
                is_active: true,
                ..Default::default()
            },
        )
        .unwrap();
        let run = runs::create_run(
            &conn,
            &NewTestRun {
                version_id: version.id,
                run_name: "r".into(),
                run_type: "manual".into(),
                notes: None,
                total_test_cases: 1,
                started_at: "2026-01-01T00:00:00Z".into(),
            },
        )
        .unwrap();
        (dir, conn, run.id, case.id)
    }

    fn sample_result(test_case_id: i64) -> TestResult {
        TestResult {
            id: None,
            test_run_id: None,
            test_case_id,
            returned_document_ids: vec![1, 2, 4, 5],
            returned_document_scores: vec![0.9, 0.8, 0.7, 0.6],
            precision_score: 0.5,
            recall_score: 2.0 / 3.0,
            f1_score: 4.0 / 7.0,
            ndcg_score: 0.7654,
            speed_score: 100.0,
            overall_score: 62.1,
            response_time: 12.5,
            true_positives: 2,
            false_positives: 2,
            false_negatives: 1,
            is_passed: true,
            error_message: None,
            created_at: "2026-01-01T00:00:01Z".into(),
        }
    }

    #[test]
    fn insert_and_list_preserve_ranked_ids() {
        let (_dir, conn, run_id, case_id) = setup();
        let id = insert_result(&conn, run_id, &sample_result(case_id)).unwrap();

        let stored = list_results_for_run(&conn, run_id).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, Some(id));
        assert_eq!(stored[0].test_run_id, Some(run_id));
        assert_eq!(stored[0].returned_document_ids, vec![1, 2, 4, 5]);
        assert_eq!(stored[0].returned_document_scores, vec![0.9, 0.8, 0.7, 0.6]);
        assert!(stored[0].is_passed);
    }

    #[test]
    fn results_cascade_with_their_run() {
        let (_dir, conn, run_id, case_id) = setup();
        insert_result(&conn, run_id, &sample_result(case_id)).unwrap();
        insert_result(&conn, run_id, &sample_result(case_id)).unwrap();
        assert_eq!(count_results_for_run(&conn, run_id).unwrap(), 2);

        runs::delete_run(&conn, run_id).unwrap();
        assert_eq!(count_results_for_run(&conn, run_id).unwrap(), 0);
    }

    #[test]
    fn insert_for_unknown_run_fails() {
        let (_dir, conn, _run_id, case_id) = setup();
        assert!(insert_result(&conn, 999, &sample_result(case_id)).is_err());
    }
}
