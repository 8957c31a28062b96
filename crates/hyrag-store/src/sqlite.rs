//! SQLite connection handling shared by the index implementations.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info, warn};

use hyrag_core::{RagError, Result};

use crate::schema::SCHEMA_VERSION;

/// A single SQLite connection guarded by a blocking mutex.
///
/// Index files are opened read-mostly once per process and shared across
/// concurrent queries.
pub(crate) struct SqliteDb {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteDb {
    /// Open an existing, fully published index file.
    pub(crate) fn open_existing(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(RagError::database(format!("Index not found at {:?}", path)));
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| RagError::database(format!("Failed to open index: {}", e)))?;

        configure_connection(&conn)?;

        debug!("Index opened at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Execute a blocking operation on the connection.
    pub(crate) fn with_conn<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let conn = self.conn.lock().map_err(|e| RagError::database(e.to_string()))?;
        f(&conn)
    }
}

/// Configure SQLite connection for read-heavy index access.
///
/// Rollback journal rather than WAL: index files are published by rename
/// and must not depend on sidecar files.
fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = DELETE;
        PRAGMA synchronous = NORMAL;
        PRAGMA cache_size = -64000;
        PRAGMA busy_timeout = 30000;
        PRAGMA temp_store = MEMORY;
        PRAGMA mmap_size = 268435456;
        PRAGMA foreign_keys = ON;
        "#,
    )
    .map_err(|e| RagError::database(format!("Failed to configure connection: {}", e)))?;

    Ok(())
}

/// Build an index file next to `path` and atomically move it into place.
///
/// A crash mid-build leaves only the `.building` sibling, which the next
/// build discards.
pub(crate) fn build_atomically<F>(path: &Path, schema: &str, populate: F) -> Result<()>
where
    F: FnOnce(&mut Connection) -> Result<()>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let staging = staging_path(path);
    if staging.exists() {
        warn!("Removing stale partial build at {:?}", staging);
        std::fs::remove_file(&staging)?;
    }

    let mut conn = Connection::open(&staging)
        .map_err(|e| RagError::database(format!("Failed to create index: {}", e)))?;
    configure_connection(&conn)?;

    conn.execute_batch(schema)
        .map_err(|e| RagError::database(format!("Failed to initialize schema: {}", e)))?;
    write_meta(&conn, "schema_version", &SCHEMA_VERSION.to_string())?;

    populate(&mut conn)?;

    conn.close()
        .map_err(|(_, e)| RagError::database(format!("Failed to close index: {}", e)))?;

    std::fs::rename(&staging, path)?;
    info!("Index published at {:?}", path);

    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".building");
    path.with_file_name(name)
}

/// Read an index metadata value.
pub(crate) fn read_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row("SELECT value FROM index_meta WHERE key = ?1", params![key], |row| row.get(0))
        .optional()
        .map_err(|e| RagError::database(e.to_string()))
}

/// Read a required index metadata value.
pub(crate) fn require_meta(conn: &Connection, key: &str) -> Result<String> {
    read_meta(conn, key)?
        .ok_or_else(|| RagError::database(format!("Index metadata missing key '{}'", key)))
}

/// Insert or replace an index metadata value.
pub(crate) fn write_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO index_meta (key, value) VALUES (?1, ?2)",
        params![key, value],
    )
    .map_err(|e| RagError::database(e.to_string()))?;
    Ok(())
}

/// Parse a numeric metadata value.
pub(crate) fn parse_meta<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| RagError::database(format!("Invalid index metadata {}={:?}", key, value)))
}

/// Convert f32 vector to bytes (little-endian).
pub(crate) fn vec_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Convert little-endian bytes back to an f32 vector.
pub(crate) fn bytes_to_vec(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(RagError::database(format!(
            "Embedding blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
