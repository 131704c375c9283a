//! Per-game connection pools.
//!
//! Every game ("tenant") owns one SQLite file under the configured data
//! directory. The registry hands out one shared [`TenantPool`] per game for
//! the lifetime of the process; pools are never evicted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use deadpool_sqlite::Pool;
use moka::sync::Cache;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{Connection, InterruptHandle};
use tokio::sync::OnceCell;

use crate::config::DatabaseConfig;
use crate::error::{AppError, AppResult};
use crate::storage::sqlite;

static TENANT_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("tenant key regex"));

/// Tenant keys double as file names, so only a file-safe alphabet is allowed.
pub fn is_valid_tenant_key(key: &str) -> bool {
    TENANT_KEY_RE.is_match(key)
}

pub struct TenantRegistry {
    data_dir: PathBuf,
    default_game: String,
    pool_size: usize,
    query_timeout: Duration,
    pools: Cache<String, Arc<TenantPool>>,
}

impl TenantRegistry {
    pub fn new(config: &DatabaseConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            default_game: config.default_game.clone(),
            pool_size: config.pool_size,
            query_timeout: Duration::from_secs(config.query_timeout_secs),
            // No max_capacity: pools stay open until shutdown.
            pools: Cache::builder().build(),
        }
    }

    pub fn default_game(&self) -> &str {
        &self.default_game
    }

    /// Resolve a game name to its pool, creating the pool on first use.
    ///
    /// `None` and the empty string select the default game. Concurrent first
    /// calls for the same key build exactly one pool. Only the ingest path
    /// calls this; reads go through [`TenantRegistry::lookup`].
    pub fn resolve(&self, game_name: Option<&str>) -> AppResult<Arc<TenantPool>> {
        let key = self.key_for(game_name)?;
        self.get_or_open(key)
    }

    /// Resolve a game name for a read. Unlike [`TenantRegistry::resolve`]
    /// this never creates a database: a game with no pool and no file on
    /// disk is a 404. The default game is always available.
    pub fn lookup(&self, game_name: Option<&str>) -> AppResult<Arc<TenantPool>> {
        let key = self.key_for(game_name)?;
        if key != self.default_game {
            if let Some(pool) = self.pools.get(key) {
                return Ok(pool);
            }
            if !self.db_path(key).exists() {
                return Err(AppError::NotFound(format!("unknown game: {key}")));
            }
        }
        self.get_or_open(key)
    }

    fn key_for<'a>(&'a self, game_name: Option<&'a str>) -> AppResult<&'a str> {
        let key = match game_name.map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => self.default_game.as_str(),
        };

        if !is_valid_tenant_key(key) {
            return Err(AppError::Validation(
                "gameName must be 1-64 characters of letters, digits, '-' or '_'".to_string(),
            ));
        }
        Ok(key)
    }

    fn get_or_open(&self, key: &str) -> AppResult<Arc<TenantPool>> {
        self.pools
            .try_get_with(key.to_string(), || self.open(key))
            .map_err(|e| AppError::Internal(format!("failed to create pool for {key}: {e}")))
    }

    fn db_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{key}.db"))
    }

    /// Number of pools opened so far.
    pub fn len(&self) -> u64 {
        self.pools.run_pending_tasks();
        self.pools.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn open(&self, key: &str) -> Result<Arc<TenantPool>, String> {
        let path = self.db_path(key);
        let pool = sqlite::create_pool(&path, self.pool_size).map_err(|e| e.to_string())?;
        tracing::info!(
            game = key,
            path = %path.display(),
            pool_size = self.pool_size,
            "opened tenant pool"
        );
        Ok(Arc::new(TenantPool {
            name: key.to_string(),
            path,
            pool,
            schema: OnceCell::new(),
            query_timeout: self.query_timeout,
        }))
    }
}

/// Connection pool for a single game database.
pub struct TenantPool {
    name: String,
    path: PathBuf,
    pool: Pool,
    schema: OnceCell<()>,
    query_timeout: Duration,
}

impl TenantPool {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `f` on a pooled connection in the blocking thread pool.
    ///
    /// The schema is migrated before the first query. The call is bounded by
    /// the query timeout, and if the returned future is dropped before `f`
    /// completes the running statement is interrupted.
    pub async fn run<F, T>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        match tokio::time::timeout(self.query_timeout, self.run_inner(f)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(format!(
                "{} exceeded {}s",
                self.name,
                self.query_timeout.as_secs()
            ))),
        }
    }

    async fn run_inner<F, T>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.schema.get_or_try_init(|| self.init_schema()).await?;

        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::Internal(format!("connection checkout for {}: {e}", self.name)))?;

        let handle = conn.interact(|conn| conn.get_interrupt_handle()).await?;
        let guard = InterruptOnDrop(Some(handle));

        let result = conn
            .interact(move |conn| {
                sqlite::apply_pragmas(conn)?;
                f(conn)
            })
            .await?;
        guard.disarm();

        Ok(result?)
    }

    async fn init_schema(&self) -> AppResult<()> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::Internal(format!("connection checkout for {}: {e}", self.name)))?;
        conn.interact(|conn| sqlite::init_database(conn)).await??;
        sqlite::restrict_permissions(&self.path);
        tracing::debug!(game = %self.name, "tenant schema ready");
        Ok(())
    }
}

/// Interrupts the connection's running statement unless disarmed.
struct InterruptOnDrop(Option<InterruptHandle>);

impl InterruptOnDrop {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            tracing::debug!("interrupting abandoned query");
            handle.interrupt();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_in(dir: &std::path::Path) -> TenantRegistry {
        TenantRegistry::new(&DatabaseConfig {
            data_dir: dir.to_path_buf(),
            default_game: "default_game".to_string(),
            pool_size: 2,
            query_timeout_secs: 5,
        })
    }

    #[test]
    fn test_tenant_key_validation() {
        assert!(is_valid_tenant_key("space-shooter_2"));
        assert!(!is_valid_tenant_key(""));
        assert!(!is_valid_tenant_key("../secrets"));
        assert!(!is_valid_tenant_key("a b"));
        assert!(!is_valid_tenant_key(&"x".repeat(65)));
    }

    #[test]
    fn test_same_key_returns_same_pool() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_in(dir.path());

        let a = registry.resolve(Some("puzzle")).unwrap();
        let b = registry.resolve(Some("puzzle")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_different_keys_get_distinct_pools() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_in(dir.path());

        let a = registry.resolve(Some("puzzle")).unwrap();
        let b = registry.resolve(Some("racing")).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.name(), "puzzle");
        assert_eq!(b.name(), "racing");
    }

    #[test]
    fn test_missing_or_empty_key_uses_default() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_in(dir.path());

        let none = registry.resolve(None).unwrap();
        let empty = registry.resolve(Some("")).unwrap();
        let named = registry.resolve(Some("default_game")).unwrap();
        assert!(Arc::ptr_eq(&none, &empty));
        assert!(Arc::ptr_eq(&none, &named));
        assert_eq!(none.name(), "default_game");
    }

    #[test]
    fn test_invalid_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_in(dir.path());

        let err = registry.resolve(Some("../../etc/passwd")).err().unwrap();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(registry.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_resolve_builds_one_pool() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(registry_in(dir.path()));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.resolve(Some("arena")).unwrap()
            }));
        }

        let mut pools = Vec::new();
        for handle in handles {
            pools.push(handle.await.unwrap());
        }
        for pool in &pools[1..] {
            assert!(Arc::ptr_eq(&pools[0], pool));
        }
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_pool_creation_is_lazy_and_first_query_migrates() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_in(dir.path());

        let pool = registry.resolve(Some("lazy")).unwrap();
        assert!(!dir.path().join("lazy.db").exists());

        let tables: i64 = pool
            .run(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'players'",
                    [],
                    |row| row.get(0),
                )
            })
            .await
            .unwrap();
        assert_eq!(tables, 1);
        assert!(dir.path().join("lazy.db").exists());
    }

    #[tokio::test]
    async fn test_lookup_of_unknown_game_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_in(dir.path());

        for name in ["ghost", "ghost_2", "ghost-3"] {
            let err = registry.lookup(Some(name)).err().unwrap();
            assert!(matches!(err, AppError::NotFound(_)));
        }
        assert!(registry.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let err = registry.lookup(Some("../escape")).err().unwrap();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_lookup_finds_games_created_by_ingest() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_in(dir.path());

        let written = registry.resolve(Some("arcade")).unwrap();
        let looked_up = registry.lookup(Some("arcade")).unwrap();
        assert!(Arc::ptr_eq(&written, &looked_up));
        written
            .run(|conn| conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)))
            .await
            .unwrap();

        // A fresh registry (process restart) finds the game by its file.
        let restarted = registry_in(dir.path());
        let pool = restarted.lookup(Some("arcade")).unwrap();
        assert_eq!(pool.name(), "arcade");
    }

    #[test]
    fn test_lookup_always_allows_default_game() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_in(dir.path());

        let pool = registry.lookup(None).unwrap();
        assert_eq!(pool.name(), "default_game");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_query_times_out_and_connection_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TenantRegistry::new(&DatabaseConfig {
            data_dir: dir.path().to_path_buf(),
            default_game: "default_game".to_string(),
            pool_size: 1,
            query_timeout_secs: 1,
        });
        let pool = registry.resolve(Some("slow")).unwrap();

        let err = pool
            .run(|conn| {
                conn.query_row(
                    "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c)
                     SELECT COUNT(*) FROM c",
                    [],
                    |row| row.get::<_, i64>(0),
                )
            })
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AppError::Timeout(_)));

        // The interrupted statement releases the only connection.
        let one: i64 = pool
            .run(|conn| conn.query_row("SELECT 1", [], |row| row.get(0)))
            .await
            .unwrap();
        assert_eq!(one, 1);
    }
}
