use crate::db::{json_column, to_json_text};
use ragbench_core::error::StateError;
use ragbench_core::types::{AlgorithmVersion, VersionParameters};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewVersion {
    pub version_name: String,
    pub version_code: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: VersionParameters,
    #[serde(default)]
    pub is_baseline: bool,
    #[serde(default)]
    pub created_by: Option<String>,
}

const SELECT_COLUMNS: &str = "SELECT id, version_name, version_code, description, parameters, is_baseline, created_by, created_at FROM algorithm_versions";

/// Create a version. When it is flagged as baseline, every other version
/// loses the flag in the same transaction.
pub fn create_version(
    conn: &mut Connection,
    version: &NewVersion,
) -> Result<AlgorithmVersion, StateError> {
    let parameters = to_json_text(&version.parameters)?;
    let tx = conn.transaction().map_err(StateError::sqlite)?;

    if version.is_baseline {
        tx.execute(
            "UPDATE algorithm_versions SET is_baseline = 0 WHERE is_baseline = 1",
            [],
        )
        .map_err(StateError::sqlite)?;
    }

    let inserted = tx.execute(
        "INSERT INTO algorithm_versions (version_name, version_code, description, parameters, is_baseline, created_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            version.version_name,
            version.version_code,
            version.description,
            parameters,
            version.is_baseline,
            version.created_by,
            ragbench_core::time::now_iso8601(),
        ],
    );
    match inserted {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == ErrorCode::ConstraintViolation =>
        {
            return Err(StateError::DuplicateVersionCode {
                version_code: version.version_code.clone(),
            });
        }
        Err(e) => return Err(StateError::sqlite(e)),
    }
    let id = tx.last_insert_rowid();
    tx.commit().map_err(StateError::sqlite)?;

    info!(
        version_id = id,
        version_code = %version.version_code,
        is_baseline = version.is_baseline,
        "algorithm version created"
    );
    get_version(conn, id)?.ok_or(StateError::VersionNotFound { version_id: id })
}

pub fn get_version(conn: &Connection, id: i64) -> Result<Option<AlgorithmVersion>, StateError> {
    conn.query_row(
        &format!("{SELECT_COLUMNS} WHERE id = ?1"),
        params![id],
        row_to_version,
    )
    .optional()
    .map_err(StateError::sqlite)
}

pub fn get_version_by_code(
    conn: &Connection,
    version_code: &str,
) -> Result<Option<AlgorithmVersion>, StateError> {
    conn.query_row(
        &format!("{SELECT_COLUMNS} WHERE version_code = ?1"),
        params![version_code],
        row_to_version,
    )
    .optional()
    .map_err(StateError::sqlite)
}

pub fn list_versions(conn: &Connection) -> Result<Vec<AlgorithmVersion>, StateError> {
    let mut stmt = conn
        .prepare(&format!("{SELECT_COLUMNS} ORDER BY id"))
        .map_err(StateError::sqlite)?;
    let versions = stmt
        .query_map([], row_to_version)
        .map_err(StateError::sqlite)?;
    versions
        .collect::<Result<Vec<_>, _>>()
        .map_err(StateError::sqlite)
}

pub fn get_baseline(conn: &Connection) -> Result<Option<AlgorithmVersion>, StateError> {
    conn.query_row(
        &format!("{SELECT_COLUMNS} WHERE is_baseline = 1 LIMIT 1"),
        [],
        row_to_version,
    )
    .optional()
    .map_err(StateError::sqlite)
}

/// Make `id` the only baseline. Clear-all and set-one commit together.
pub fn set_baseline(conn: &mut Connection, id: i64) -> Result<(), StateError> {
    let tx = conn.transaction().map_err(StateError::sqlite)?;

    let exists: bool = tx
        .query_row(
            "SELECT COUNT(*) > 0 FROM algorithm_versions WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .map_err(StateError::sqlite)?;
    if !exists {
        return Err(StateError::VersionNotFound { version_id: id });
    }

    tx.execute(
        "UPDATE algorithm_versions SET is_baseline = 0 WHERE is_baseline = 1 AND id <> ?1",
        params![id],
    )
    .map_err(StateError::sqlite)?;
    tx.execute(
        "UPDATE algorithm_versions SET is_baseline = 1 WHERE id = ?1",
        params![id],
    )
    .map_err(StateError::sqlite)?;
    tx.commit().map_err(StateError::sqlite)?;

    info!(version_id = id, "baseline version set");
    Ok(())
}

pub fn count_runs_for_version(conn: &Connection, id: i64) -> Result<i64, StateError> {
    conn.query_row(
        "SELECT COUNT(*) FROM test_runs WHERE version_id = ?1",
        params![id],
        |row| row.get(0),
    )
    .map_err(StateError::sqlite)
}

/// Replace a version's parameters. Versions already referenced by a run are
/// read-only so stored results stay attributable to the configuration that
/// produced them.
pub fn update_parameters(
    conn: &Connection,
    id: i64,
    parameters: &VersionParameters,
) -> Result<(), StateError> {
    if get_version(conn, id)?.is_none() {
        return Err(StateError::VersionNotFound { version_id: id });
    }
    let run_count = count_runs_for_version(conn, id)?;
    if run_count > 0 {
        return Err(StateError::VersionInUse {
            version_id: id,
            run_count,
        });
    }
    conn.execute(
        "UPDATE algorithm_versions SET parameters = ?1 WHERE id = ?2",
        params![to_json_text(parameters)?, id],
    )
    .map_err(StateError::sqlite)?;
    Ok(())
}

fn row_to_version(row: &rusqlite::Row) -> rusqlite::Result<AlgorithmVersion> {
    Ok(AlgorithmVersion {
        id: row.get(0)?,
        version_name: row.get(1)?,
        version_code: row.get(2)?,
        description: row.get(3)?,
        parameters: json_column(row, 4)?,
        is_baseline: row.get(5)?,
        created_by: row.get(6)?,
        created_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, schema};
    use serde_json::json;
    use tempfile::{TempDir, tempdir};

    fn setup_test_db() -> (TempDir, Connection) {
        let dir = tempdir().unwrap();
        let conn = db::open_connection(&dir.path().join("bench.db")).unwrap();
        schema::create_tables(&conn).unwrap();
        (dir, conn)
    }

    fn new_version(code: &str, baseline: bool) -> NewVersion {
        let mut parameters = VersionParameters::new();
        parameters.insert("strategy".into(), json!("hybrid_weighted"));
        parameters.insert("section_weight".into(), json!(0.6));
        NewVersion {
            version_name: format!("Version {code}"),
            version_code: code.to_string(),
            parameters,
            is_baseline: baseline,
            created_by: Some("tester".into()),
            ..Default::default()
        }
    }

    fn baseline_ids(conn: &Connection) -> Vec<i64> {
        list_versions(conn)
            .unwrap()
            .into_iter()
            .filter(|v| v.is_baseline)
            .map(|v| v.id)
            .collect()
    }

    #[test]
    fn create_round_trips_parameters() {
        let (_dir, mut conn) = setup_test_db();
        let created = create_version(&mut conn, &new_version("v1", false)).unwrap();
        assert_eq!(created.parameters["strategy"], "hybrid_weighted");
        assert_eq!(created.parameters["section_weight"], 0.6);

        let by_code = get_version_by_code(&conn, "v1").unwrap().unwrap();
        assert_eq!(by_code, created);
    }

    #[test]
    fn duplicate_code_is_rejected() {
        let (_dir, mut conn) = setup_test_db();
        create_version(&mut conn, &new_version("v1", false)).unwrap();
        let err = create_version(&mut conn, &new_version("v1", false)).unwrap_err();
        assert!(matches!(err, StateError::DuplicateVersionCode { .. }));
    }

    #[test]
    fn creating_a_baseline_clears_the_previous_one() {
        let (_dir, mut conn) = setup_test_db();
        create_version(&mut conn, &new_version("v1", true)).unwrap();
        let v2 = create_version(&mut conn, &new_version("v2", true)).unwrap();
        assert_eq!(baseline_ids(&conn), vec![v2.id]);
    }

    #[test]
    fn set_baseline_leaves_exactly_one() {
        let (_dir, mut conn) = setup_test_db();
        let v1 = create_version(&mut conn, &new_version("v1", true)).unwrap();
        let v2 = create_version(&mut conn, &new_version("v2", false)).unwrap();
        create_version(&mut conn, &new_version("v3", false)).unwrap();

        set_baseline(&mut conn, v2.id).unwrap();
        assert_eq!(baseline_ids(&conn), vec![v2.id]);
        assert_eq!(get_baseline(&conn).unwrap().unwrap().id, v2.id);

        set_baseline(&mut conn, v1.id).unwrap();
        set_baseline(&mut conn, v1.id).unwrap();
        assert_eq!(baseline_ids(&conn), vec![v1.id]);
    }

    #[test]
    fn set_baseline_on_missing_version_changes_nothing() {
        let (_dir, mut conn) = setup_test_db();
        let v1 = create_version(&mut conn, &new_version("v1", true)).unwrap();
        let err = set_baseline(&mut conn, 999).unwrap_err();
        assert!(matches!(err, StateError::VersionNotFound { version_id: 999 }));
        assert_eq!(baseline_ids(&conn), vec![v1.id]);
    }

    #[test]
    fn update_parameters_rejects_versions_with_runs() {
        let (_dir, mut conn) = setup_test_db();
        let v1 = create_version(&mut conn, &new_version("v1", false)).unwrap();

        let mut parameters = VersionParameters::new();
        parameters.insert("strategy".into(), json!("section_only"));
        update_parameters(&conn, v1.id, &parameters).unwrap();
        assert_eq!(
            get_version(&conn, v1.id).unwrap().unwrap().parameters["strategy"],
            "section_only"
        );

        conn.execute(
            "INSERT INTO test_runs (version_id, run_name, started_at) VALUES (?1, 'r', '2026-01-01T00:00:00Z')",
            params![v1.id],
        )
        .unwrap();
        let err = update_parameters(&conn, v1.id, &parameters).unwrap_err();
        assert!(matches!(
            err,
            StateError::VersionInUse { run_count: 1, .. }
        ));
    }
}
