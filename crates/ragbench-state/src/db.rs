use ragbench_core::config::StorageConfig;
use ragbench_core::error::StateError;
use rusqlite::Connection;
use std::path::Path;
use tracing::info;

/// Open a SQLite connection with default pragmas.
pub fn open_connection(db_path: &Path) -> Result<Connection, StateError> {
    open_connection_with_config(db_path, 5000, -64000)
}

/// Open the database described by the storage section of the config.
pub fn open_from_storage_config(storage: &StorageConfig) -> Result<Connection, StateError> {
    let db_path = Path::new(&storage.data_dir).join(&storage.db_file);
    open_connection_with_config(&db_path, storage.busy_timeout_ms, storage.cache_size)
}

/// Open a SQLite connection with configurable pragmas.
pub fn open_connection_with_config(
    db_path: &Path,
    busy_timeout_ms: u32,
    cache_size: i32,
) -> Result<Connection, StateError> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(StateError::Io)?;
    }

    let conn = Connection::open(db_path).map_err(StateError::sqlite)?;

    apply_pragmas(&conn, busy_timeout_ms, cache_size)?;

    info!(?db_path, "SQLite connection opened");
    Ok(conn)
}

/// Foreign keys must be on for result rows to cascade with their run.
fn apply_pragmas(
    conn: &Connection,
    busy_timeout_ms: u32,
    cache_size: i32,
) -> Result<(), StateError> {
    conn.execute_batch(&format!(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = {};
         PRAGMA cache_size = {};",
        busy_timeout_ms, cache_size
    ))
    .map_err(StateError::sqlite)?;
    Ok(())
}

/// Decode a JSON text column inside a row mapper.
pub(crate) fn json_column<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn to_json_text<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, StateError> {
    serde_json::to_string(value).map_err(StateError::serialization)
}
