use ragbench_core::error::StateError;
use ragbench_core::types::{NewTestRun, RunAggregates, RunProgress, RunStatus, TestRun};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Terminal state written once when a run ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCompletion {
    pub status: RunStatus,
    pub progress: RunProgress,
    pub aggregates: RunAggregates,
    pub completed_at: String,
    pub duration_seconds: f64,
    pub error_message: Option<String>,
}

const SELECT_COLUMNS: &str = "SELECT id, version_id, run_name, run_type, status, notes, total_test_cases, completed_test_cases, passed_test_cases, failed_test_cases, overall_score, avg_precision, avg_recall, avg_f1_score, avg_ndcg, avg_speed_score, avg_response_time, started_at, completed_at, duration_seconds, error_message FROM test_runs";

/// Open a run in `running` state with zeroed counters.
pub fn create_run(conn: &Connection, run: &NewTestRun) -> Result<TestRun, StateError> {
    conn.execute(
        "INSERT INTO test_runs (version_id, run_name, run_type, status, notes, total_test_cases, started_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            run.version_id,
            run.run_name,
            run.run_type,
            RunStatus::Running.as_str(),
            run.notes,
            run.total_test_cases,
            run.started_at,
        ],
    )
    .map_err(StateError::sqlite)?;

    let id = conn.last_insert_rowid();
    get_run(conn, id)?.ok_or(StateError::RunNotFound { run_id: id })
}

pub fn get_run(conn: &Connection, id: i64) -> Result<Option<TestRun>, StateError> {
    conn.query_row(
        &format!("{SELECT_COLUMNS} WHERE id = ?1"),
        params![id],
        row_to_run,
    )
    .optional()
    .map_err(StateError::sqlite)
}

/// Most recent runs first, optionally narrowed to one version.
pub fn list_runs(
    conn: &Connection,
    version_id: Option<i64>,
    limit: usize,
) -> Result<Vec<TestRun>, StateError> {
    let mut stmt = conn
        .prepare(&format!(
            "{SELECT_COLUMNS} WHERE (?1 IS NULL OR version_id = ?1) ORDER BY started_at DESC, id DESC LIMIT ?2"
        ))
        .map_err(StateError::sqlite)?;
    let runs = stmt
        .query_map(params![version_id, limit], row_to_run)
        .map_err(StateError::sqlite)?;
    runs.collect::<Result<Vec<_>, _>>()
        .map_err(StateError::sqlite)
}

/// Persist counters for a run that is still `running`. Returns false when the
/// run is missing or already left `running`, so the caller can stop feeding it.
pub fn update_progress(
    conn: &Connection,
    id: i64,
    progress: &RunProgress,
) -> Result<bool, StateError> {
    let changed = conn
        .execute(
            "UPDATE test_runs SET completed_test_cases = ?1, passed_test_cases = ?2, failed_test_cases = ?3
             WHERE id = ?4 AND status = 'running'",
            params![
                progress.completed_test_cases,
                progress.passed_test_cases,
                progress.failed_test_cases,
                id,
            ],
        )
        .map_err(StateError::sqlite)?;
    if changed == 0 {
        warn!(run_id = id, "progress update ignored: run missing or no longer running");
    }
    Ok(changed > 0)
}

/// Move a running run to its terminal state. A run an operator already
/// stopped keeps its status, stop time and reason but takes the counters and
/// aggregates of the cases that did finish. A completed run is returned
/// unchanged.
pub fn finalize_run(
    conn: &Connection,
    id: i64,
    completion: &RunCompletion,
) -> Result<TestRun, StateError> {
    let changed = conn
        .execute(
            "UPDATE test_runs SET status = ?1, completed_test_cases = ?2, passed_test_cases = ?3, failed_test_cases = ?4,
                 overall_score = ?5, avg_precision = ?6, avg_recall = ?7, avg_f1_score = ?8, avg_ndcg = ?9,
                 avg_speed_score = ?10, avg_response_time = ?11, completed_at = ?12, duration_seconds = ?13,
                 error_message = ?14
             WHERE id = ?15 AND status = 'running'",
            params![
                completion.status.as_str(),
                completion.progress.completed_test_cases,
                completion.progress.passed_test_cases,
                completion.progress.failed_test_cases,
                completion.aggregates.overall_score,
                completion.aggregates.avg_precision,
                completion.aggregates.avg_recall,
                completion.aggregates.avg_f1_score,
                completion.aggregates.avg_ndcg,
                completion.aggregates.avg_speed_score,
                completion.aggregates.avg_response_time,
                completion.completed_at,
                completion.duration_seconds,
                completion.error_message,
                id,
            ],
        )
        .map_err(StateError::sqlite)?;

    if changed == 0 {
        let settled = conn
            .execute(
                "UPDATE test_runs SET completed_test_cases = ?1, passed_test_cases = ?2, failed_test_cases = ?3,
                     overall_score = ?4, avg_precision = ?5, avg_recall = ?6, avg_f1_score = ?7, avg_ndcg = ?8,
                     avg_speed_score = ?9, avg_response_time = ?10
                 WHERE id = ?11 AND status = 'stopped'",
                params![
                    completion.progress.completed_test_cases,
                    completion.progress.passed_test_cases,
                    completion.progress.failed_test_cases,
                    completion.aggregates.overall_score,
                    completion.aggregates.avg_precision,
                    completion.aggregates.avg_recall,
                    completion.aggregates.avg_f1_score,
                    completion.aggregates.avg_ndcg,
                    completion.aggregates.avg_speed_score,
                    completion.aggregates.avg_response_time,
                    id,
                ],
            )
            .map_err(StateError::sqlite)?;
        if settled > 0 {
            info!(run_id = id, "run stopped externally; recorded partial aggregates");
        }
    }

    let run = get_run(conn, id)?.ok_or(StateError::RunNotFound { run_id: id })?;
    if changed == 0 {
        warn!(run_id = id, status = %run.status, "run already left running; kept its status");
    } else {
        info!(
            run_id = id,
            status = %run.status,
            overall_score = run.aggregates.overall_score,
            "test run finalized"
        );
    }
    Ok(run)
}

/// Force a running run to `stopped`. Returns false when it was not running.
pub fn stop_run(conn: &Connection, id: i64, reason: &str) -> Result<bool, StateError> {
    if get_run(conn, id)?.is_none() {
        return Err(StateError::RunNotFound { run_id: id });
    }
    let now = ragbench_core::time::now_iso8601();
    let changed = conn
        .execute(
            "UPDATE test_runs SET status = 'stopped', completed_at = ?1,
                 duration_seconds = CAST(strftime('%s', ?1) AS REAL) - CAST(strftime('%s', started_at) AS REAL),
                 error_message = ?2
             WHERE id = ?3 AND status = 'running'",
            params![now, reason, id],
        )
        .map_err(StateError::sqlite)?;
    Ok(changed > 0)
}

/// Mark runs still `running` that started before `cutoff` as `stopped`.
/// Returns the ids that were reconciled.
pub fn mark_stale_runs_stopped(conn: &Connection, cutoff: &str) -> Result<Vec<i64>, StateError> {
    let mut stmt = conn
        .prepare("SELECT id FROM test_runs WHERE status = 'running' AND started_at < ?1 ORDER BY id")
        .map_err(StateError::sqlite)?;
    let ids = stmt
        .query_map(params![cutoff], |row| row.get::<_, i64>(0))
        .map_err(StateError::sqlite)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(StateError::sqlite)?;

    let reason = format!("interrupted: still running at reconciliation (started before {cutoff})");
    let mut stopped = Vec::with_capacity(ids.len());
    for id in ids {
        if stop_run(conn, id, &reason)? {
            stopped.push(id);
        }
    }
    if !stopped.is_empty() {
        info!(count = stopped.len(), %cutoff, "stale runs reconciled to stopped");
    }
    Ok(stopped)
}

/// Delete a run; its result rows cascade with it.
pub fn delete_run(conn: &Connection, id: i64) -> Result<(), StateError> {
    let changed = conn
        .execute("DELETE FROM test_runs WHERE id = ?1", params![id])
        .map_err(StateError::sqlite)?;
    if changed == 0 {
        return Err(StateError::RunNotFound { run_id: id });
    }
    Ok(())
}

fn row_to_run(row: &rusqlite::Row) -> rusqlite::Result<TestRun> {
    let raw_status: String = row.get(4)?;
    let status = RunStatus::parse(&raw_status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown run status '{raw_status}'").into(),
        )
    })?;
    Ok(TestRun {
        id: row.get(0)?,
        version_id: row.get(1)?,
        run_name: row.get(2)?,
        run_type: row.get(3)?,
        status,
        notes: row.get(5)?,
        total_test_cases: row.get(6)?,
        progress: RunProgress {
            completed_test_cases: row.get(7)?,
            passed_test_cases: row.get(8)?,
            failed_test_cases: row.get(9)?,
        },
        aggregates: RunAggregates {
            overall_score: row.get(10)?,
            avg_precision: row.get(11)?,
            avg_recall: row.get(12)?,
            avg_f1_score: row.get(13)?,
            avg_ndcg: row.get(14)?,
            avg_speed_score: row.get(15)?,
            avg_response_time: row.get(16)?,
        },
        started_at: row.get(17)?,
        completed_at: row.get(18)?,
        duration_seconds: row.get(19)?,
        error_message: row.get(20)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::versions::{self, NewVersion};
    use crate::{db, schema};
    use ragbench_core::constants::RUN_TYPE_MANUAL;
    use tempfile::{TempDir, tempdir};

    fn setup_test_db() -> (TempDir, Connection, i64) {
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
        (dir, conn, version.id)
    }

    fn new_run(version_id: i64, started_at: &str) -> NewTestRun {
        NewTestRun {
            version_id,
            run_name: "nightly".into(),
            run_type: RUN_TYPE_MANUAL.into(),
            notes: Some("note".into()),
            total_test_cases: 3,
            started_at: started_at.into(),
        }
    }

    fn completion(status: RunStatus) -> RunCompletion {
        RunCompletion {
            status,
            progress: RunProgress {
                completed_test_cases: 3,
                passed_test_cases: 2,
                failed_test_cases: 1,
            },
            aggregates: RunAggregates {
                overall_score: 61.5,
                avg_precision: 0.5,
                ..Default::default()
            },
            completed_at: "2026-01-01T00:00:03Z".into(),
            duration_seconds: 3.0,
            error_message: None,
        }
    }

    #[test]
    fn create_run_starts_running_with_zero_counters() {
        let (_dir, conn, version_id) = setup_test_db();
        let run = create_run(&conn, &new_run(version_id, "2026-01-01T00:00:00Z")).unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.total_test_cases, 3);
        assert_eq!(run.progress, RunProgress::default());
        assert!(run.completed_at.is_none());
    }

    #[test]
    fn create_run_for_unknown_version_fails() {
        let (_dir, conn, _) = setup_test_db();
        assert!(create_run(&conn, &new_run(999, "2026-01-01T00:00:00Z")).is_err());
    }

    #[test]
    fn progress_then_finalize_is_applied_once() {
        let (_dir, conn, version_id) = setup_test_db();
        let run = create_run(&conn, &new_run(version_id, "2026-01-01T00:00:00Z")).unwrap();

        let mut progress = RunProgress::default();
        progress.record(true);
        assert!(update_progress(&conn, run.id, &progress).unwrap());
        assert_eq!(
            get_run(&conn, run.id).unwrap().unwrap().progress.completed_test_cases,
            1
        );

        let done = finalize_run(&conn, run.id, &completion(RunStatus::Completed)).unwrap();
        assert_eq!(done.status, RunStatus::Completed);
        assert_eq!(done.progress.completed_test_cases, 3);
        assert_eq!(done.aggregates.overall_score, 61.5);

        let again = finalize_run(&conn, run.id, &completion(RunStatus::Stopped)).unwrap();
        assert_eq!(again.status, RunStatus::Completed);

        assert!(!update_progress(&conn, run.id, &RunProgress::default()).unwrap());
        assert_eq!(
            get_run(&conn, run.id).unwrap().unwrap().progress.completed_test_cases,
            3
        );
    }

    #[test]
    fn finalize_after_operator_stop_keeps_reason_and_records_counters() {
        let (_dir, conn, version_id) = setup_test_db();
        let run = create_run(&conn, &new_run(version_id, "2026-01-01T00:00:00Z")).unwrap();
        assert!(stop_run(&conn, run.id, "operator").unwrap());

        let settled = finalize_run(&conn, run.id, &completion(RunStatus::Completed)).unwrap();
        assert_eq!(settled.status, RunStatus::Stopped);
        assert_eq!(settled.error_message.as_deref(), Some("operator"));
        assert_eq!(settled.progress.completed_test_cases, 3);
        assert_eq!(settled.aggregates.overall_score, 61.5);
        assert_ne!(settled.completed_at.as_deref(), Some("2026-01-01T00:00:03Z"));
    }

    #[test]
    fn stop_run_only_affects_running_runs() {
        let (_dir, conn, version_id) = setup_test_db();
        let run = create_run(&conn, &new_run(version_id, "2026-01-01T00:00:00Z")).unwrap();
        assert!(stop_run(&conn, run.id, "operator").unwrap());
        let stopped = get_run(&conn, run.id).unwrap().unwrap();
        assert_eq!(stopped.status, RunStatus::Stopped);
        assert_eq!(stopped.error_message.as_deref(), Some("operator"));
        assert!(stopped.completed_at.is_some());
        assert!(!stop_run(&conn, run.id, "again").unwrap());

        assert!(matches!(
            stop_run(&conn, 4242, "x").unwrap_err(),
            StateError::RunNotFound { run_id: 4242 }
        ));
    }

    #[test]
    fn reconciliation_only_touches_old_running_runs() {
        let (_dir, conn, version_id) = setup_test_db();
        let old = create_run(&conn, &new_run(version_id, "2026-01-01T00:00:00Z")).unwrap();
        let fresh = create_run(&conn, &new_run(version_id, "2026-01-01T02:00:00Z")).unwrap();
        let old_done = create_run(&conn, &new_run(version_id, "2026-01-01T00:00:00Z")).unwrap();
        finalize_run(&conn, old_done.id, &completion(RunStatus::Completed)).unwrap();

        let stopped = mark_stale_runs_stopped(&conn, "2026-01-01T01:00:00Z").unwrap();
        assert_eq!(stopped, vec![old.id]);

        let old = get_run(&conn, old.id).unwrap().unwrap();
        assert_eq!(old.status, RunStatus::Stopped);
        assert!(old.error_message.unwrap().starts_with("interrupted"));
        assert_eq!(
            get_run(&conn, fresh.id).unwrap().unwrap().status,
            RunStatus::Running
        );
        assert_eq!(
            get_run(&conn, old_done.id).unwrap().unwrap().status,
            RunStatus::Completed
        );
    }

    #[test]
    fn list_runs_filters_by_version_newest_first() {
        let (_dir, mut conn, version_id) = setup_test_db();
        let other = versions::create_version(
            &mut conn,
            &NewVersion {
                version_name: "Other".into(),
                version_code: "other".into(),
                ..Default::default()
            },
        )
        .unwrap();
        let first = create_run(&conn, &new_run(version_id, "2026-01-01T00:00:00Z")).unwrap();
        let second = create_run(&conn, &new_run(version_id, "2026-01-02T00:00:00Z")).unwrap();
        create_run(&conn, &new_run(other.id, "2026-01-03T00:00:00Z")).unwrap();

        let ids: Vec<i64> = list_runs(&conn, Some(version_id), 10)
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![second.id, first.id]);
        assert_eq!(list_runs(&conn, None, 10).unwrap().len(), 3);
        assert_eq!(list_runs(&conn, None, 1).unwrap().len(), 1);
    }
}
