use deadpool_sqlite::{Config, Pool, PoolConfig, Runtime};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// Per-connection PRAGMAs. Cheap enough to apply on every checkout, which
/// keeps them in force for connections the pool opens lazily.
pub fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(Duration::from_millis(5000))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "cache_size", -16384)?;
    Ok(())
}

/// One-time database setup: WAL mode (persisted in the file) and migrations.
pub fn init_database(conn: &Connection) -> rusqlite::Result<()> {
    let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        tracing::warn!(journal_mode = %mode, "database did not switch to WAL mode");
    }
    apply_pragmas(conn)?;
    crate::storage::migrations::run_migrations(conn)
}

/// Create a deadpool-sqlite pool for one database file.
///
/// Nothing is opened here; the first checkout creates the file.
pub fn create_pool(
    path: &Path,
    pool_size: usize,
) -> Result<Pool, deadpool_sqlite::CreatePoolError> {
    let mut cfg = Config::new(path);
    cfg.pool = Some(PoolConfig::new(pool_size));
    cfg.create_pool(Runtime::Tokio1)
}

/// Restrict a database file to the service user (Unix only).
pub fn restrict_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if path.exists() {
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            {
                tracing::warn!(error = %e, path = %path.display(), "failed to set database file permissions");
            }
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}
