use crate::runs::{self, RunCompletion};
use crate::{db, results, schema, test_cases, versions};
use ragbench_core::config::StorageConfig;
use ragbench_core::error::StateError;
use ragbench_core::types::{
    AlgorithmVersion, NewTestRun, RunProgress, TestCase, TestResult, TestRun,
};
use rusqlite::Connection;
use std::path::Path;

/// Persistence operations the evaluation engine depends on.
pub trait RunStore {
    fn get_version(&self, version_id: i64) -> Result<AlgorithmVersion, StateError>;
    fn list_versions(&self) -> Result<Vec<AlgorithmVersion>, StateError>;
    fn get_baseline_version(&self) -> Result<Option<AlgorithmVersion>, StateError>;
    fn list_active_test_cases(&self) -> Result<Vec<TestCase>, StateError>;
    /// Cases for the given ids in request order; unknown ids are skipped.
    fn get_test_cases(&self, ids: &[i64]) -> Result<Vec<TestCase>, StateError>;
    fn create_run(&self, run: &NewTestRun) -> Result<TestRun, StateError>;
    /// False once the run is no longer `running`, e.g. stopped by an operator.
    fn update_run_progress(&self, run_id: i64, progress: &RunProgress) -> Result<bool, StateError>;
    fn finalize_run(&self, run_id: i64, completion: &RunCompletion) -> Result<TestRun, StateError>;
    fn insert_result(&self, run_id: i64, result: &TestResult) -> Result<i64, StateError>;
}

/// `RunStore` backed by a single SQLite connection.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Wrap an already-open connection, creating tables if needed.
    pub fn new(conn: Connection) -> Result<Self, StateError> {
        schema::create_tables(&conn)?;
        Ok(Self { conn })
    }

    pub fn open(db_path: &Path) -> Result<Self, StateError> {
        Self::new(db::open_connection(db_path)?)
    }

    pub fn open_with_config(storage: &StorageConfig) -> Result<Self, StateError> {
        Self::new(db::open_from_storage_config(storage)?)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Mutable access for transactional operations such as `versions::set_baseline`.
    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

impl RunStore for SqliteStore {
    fn get_version(&self, version_id: i64) -> Result<AlgorithmVersion, StateError> {
        versions::get_version(&self.conn, version_id)?
            .ok_or(StateError::VersionNotFound { version_id })
    }

    fn list_versions(&self) -> Result<Vec<AlgorithmVersion>, StateError> {
        versions::list_versions(&self.conn)
    }

    fn get_baseline_version(&self) -> Result<Option<AlgorithmVersion>, StateError> {
        versions::get_baseline(&self.conn)
    }

    fn list_active_test_cases(&self) -> Result<Vec<TestCase>, StateError> {
        test_cases::list_active_test_cases(&self.conn)
    }

    fn get_test_cases(&self, ids: &[i64]) -> Result<Vec<TestCase>, StateError> {
        test_cases::get_test_cases_by_ids(&self.conn, ids)
    }

    fn create_run(&self, run: &NewTestRun) -> Result<TestRun, StateError> {
        runs::create_run(&self.conn, run)
    }

    fn update_run_progress(&self, run_id: i64, progress: &RunProgress) -> Result<bool, StateError> {
        runs::update_progress(&self.conn, run_id, progress)
    }

    fn finalize_run(&self, run_id: i64, completion: &RunCompletion) -> Result<TestRun, StateError> {
        runs::finalize_run(&self.conn, run_id, completion)
    }

    fn insert_result(&self, run_id: i64, result: &TestResult) -> Result<i64, StateError> {
        results::insert_result(&self.conn, run_id, result)
    }
}
