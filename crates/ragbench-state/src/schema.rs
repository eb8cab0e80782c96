use ragbench_core::constants::SCHEMA_VERSION;
use ragbench_core::error::StateError;
use rusqlite::Connection;
use tracing::info;

/// Create all tables and run any pending migrations.
pub fn create_tables(conn: &Connection) -> Result<(), StateError> {
    conn.execute_batch(SCHEMA_SQL).map_err(StateError::sqlite)?;
    migrate(conn)?;
    info!("SQLite schema created (version {})", SCHEMA_VERSION);
    Ok(())
}

/// Applied schema version, 0 for a database that was never initialized.
pub fn current_version(conn: &Connection) -> Result<u32, StateError> {
    let has_table: bool = conn
        .query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations'",
            [],
            |row| row.get(0),
        )
        .map_err(StateError::sqlite)?;
    if !has_table {
        return Ok(0);
    }
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
    .map_err(StateError::sqlite)
}

/// Fail with `SchemaMigrationRequired` unless the database is fully migrated.
pub fn ensure_current(conn: &Connection) -> Result<(), StateError> {
    let current = current_version(conn)?;
    if current < SCHEMA_VERSION {
        return Err(StateError::SchemaMigrationRequired {
            current,
            required: SCHEMA_VERSION,
        });
    }
    Ok(())
}

/// Run incremental migrations up to `SCHEMA_VERSION`.
pub fn migrate(conn: &Connection) -> Result<(), StateError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(StateError::sqlite)?;

    let current = current_version(conn)?;

    type MigrationFn = fn(&Connection) -> Result<(), StateError>;

    // Index 0 = V1. V1 is the baseline schema from SCHEMA_SQL.
    let migrations: &[MigrationFn] = &[
        |_conn| Ok(()),
        // V2: at most one baseline version, enforced by the database.
        |conn| {
            conn.execute_batch(
                "UPDATE algorithm_versions SET is_baseline = 0
                     WHERE is_baseline = 1
                       AND id <> (SELECT MAX(id) FROM algorithm_versions WHERE is_baseline = 1);
                 CREATE UNIQUE INDEX IF NOT EXISTS idx_algorithm_versions_single_baseline
                     ON algorithm_versions(is_baseline) WHERE is_baseline = 1;",
            )
            .map_err(StateError::sqlite)?;
            Ok(())
        },
    ];

    for version in (current + 1)..=SCHEMA_VERSION {
        let idx = (version - 1) as usize;
        if idx < migrations.len() {
            migrations[idx](conn)?;
        }
        conn.execute(
            "INSERT INTO schema_migrations (version) VALUES (?1)",
            [version],
        )
        .map_err(StateError::sqlite)?;
        info!(version, "Applied schema migration");
    }

    Ok(())
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS test_cases (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    question TEXT NOT NULL,
    expected_document_ids TEXT NOT NULL DEFAULT '[]',
    min_required_matches INTEGER NOT NULL DEFAULT 1,
    category TEXT NOT NULL DEFAULT '',
    difficulty_level TEXT NOT NULL DEFAULT '',
    question_type TEXT NOT NULL DEFAULT '',
    knowledge_source TEXT NOT NULL DEFAULT '',
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_test_cases_active ON test_cases(is_active, id);

CREATE TABLE IF NOT EXISTS algorithm_versions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    version_name TEXT NOT NULL,
    version_code TEXT NOT NULL UNIQUE,
    description TEXT,
    parameters TEXT NOT NULL DEFAULT '{}',
    is_baseline INTEGER NOT NULL DEFAULT 0,
    created_by TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS test_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    version_id INTEGER NOT NULL REFERENCES algorithm_versions(id),
    run_name TEXT NOT NULL,
    run_type TEXT NOT NULL DEFAULT 'manual',
    status TEXT NOT NULL DEFAULT 'running',
    notes TEXT,
    total_test_cases INTEGER NOT NULL DEFAULT 0,
    completed_test_cases INTEGER NOT NULL DEFAULT 0,
    passed_test_cases INTEGER NOT NULL DEFAULT 0,
    failed_test_cases INTEGER NOT NULL DEFAULT 0,
    overall_score REAL NOT NULL DEFAULT 0,
    avg_precision REAL NOT NULL DEFAULT 0,
    avg_recall REAL NOT NULL DEFAULT 0,
    avg_f1_score REAL NOT NULL DEFAULT 0,
    avg_ndcg REAL NOT NULL DEFAULT 0,
    avg_speed_score REAL NOT NULL DEFAULT 0,
    avg_response_time REAL NOT NULL DEFAULT 0,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    duration_seconds REAL,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_test_runs_status_started ON test_runs(status, started_at);
CREATE INDEX IF NOT EXISTS idx_test_runs_version ON test_runs(version_id, started_at DESC);

CREATE TABLE IF NOT EXISTS test_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    test_run_id INTEGER NOT NULL REFERENCES test_runs(id) ON DELETE CASCADE,
    test_case_id INTEGER NOT NULL REFERENCES test_cases(id),
    returned_document_ids TEXT NOT NULL DEFAULT '[]',
    returned_document_scores TEXT NOT NULL DEFAULT '[]',
    precision_score REAL NOT NULL DEFAULT 0,
    recall_score REAL NOT NULL DEFAULT 0,
    f1_score REAL NOT NULL DEFAULT 0,
    ndcg_score REAL NOT NULL DEFAULT 0,
    speed_score REAL NOT NULL DEFAULT 0,
    overall_score REAL NOT NULL DEFAULT 0,
    response_time REAL NOT NULL DEFAULT 0,
    true_positives INTEGER NOT NULL DEFAULT 0,
    false_positives INTEGER NOT NULL DEFAULT 0,
    false_negatives INTEGER NOT NULL DEFAULT 0,
    is_passed INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_test_results_run ON test_results(test_run_id, id);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use tempfile::tempdir;

    #[test]
    fn create_tables_builds_every_table() {
        let dir = tempdir().unwrap();
        let conn = db::open_connection(&dir.path().join("bench.db")).unwrap();
        create_tables(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        for table in ["test_cases", "algorithm_versions", "test_runs", "test_results"] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }

    #[test]
    fn create_tables_is_idempotent() {
        let dir = tempdir().unwrap();
        let conn = db::open_connection(&dir.path().join("bench.db")).unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn ensure_current_rejects_uninitialized_database() {
        let dir = tempdir().unwrap();
        let conn = db::open_connection(&dir.path().join("bench.db")).unwrap();
        let err = ensure_current(&conn).unwrap_err();
        assert!(matches!(
            err,
            StateError::SchemaMigrationRequired { current: 0, .. }
        ));

        create_tables(&conn).unwrap();
        ensure_current(&conn).unwrap();
    }

    #[test]
    fn baseline_index_rejects_second_baseline() {
        let dir = tempdir().unwrap();
        let conn = db::open_connection(&dir.path().join("bench.db")).unwrap();
        create_tables(&conn).unwrap();

        conn.execute(
            "INSERT INTO algorithm_versions (version_name, version_code, is_baseline, created_at)
             VALUES ('a', 'a', 1, '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        let second = conn.execute(
            "INSERT INTO algorithm_versions (version_name, version_code, is_baseline, created_at)
             VALUES ('b', 'b', 1, '2026-01-01T00:00:00Z')",
            [],
        );
        assert!(second.is_err());
    }
}
