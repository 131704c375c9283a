use rusqlite::{params, Connection, TransactionBehavior};

use crate::error::AppResult;
use crate::storage::registry::TenantPool;

/// A validated playtime session.
#[derive(Debug, Clone)]
pub struct NewPlaytime {
    pub name: String,
    pub test_type: String,
    pub start_time: i64,
    pub total_playtime: f64,
}

/// A validated item purchase.
#[derive(Debug, Clone)]
pub struct NewPurchase {
    pub name: String,
    pub test_type: String,
    pub start_time: i64,
    pub item_purchase: i64,
}

/// Look up the player for `(name, test_type)`, creating it with
/// `created_at = start_time` if it does not exist yet.
///
/// Must run inside a write transaction so the insert and the lookup see the
/// same snapshot; the unique constraint makes concurrent callers converge on
/// one row.
pub fn get_or_create_player(
    conn: &Connection,
    name: &str,
    test_type: &str,
    start_time: i64,
) -> rusqlite::Result<i64> {
    conn.prepare_cached(
        "INSERT INTO players (name, test_type, created_at) VALUES (?1, ?2, ?3)
         ON CONFLICT (name, test_type) DO NOTHING",
    )?
    .execute(params![name, test_type, start_time])?;

    conn.prepare_cached("SELECT id FROM players WHERE name = ?1 AND test_type = ?2")?
        .query_row(params![name, test_type], |row| row.get(0))
}

pub fn insert_playtime(conn: &Connection, player_id: i64, event: &NewPlaytime) -> rusqlite::Result<()> {
    conn.prepare_cached(
        "INSERT INTO playtimes (player_id, total_playtime, start_time, test_type)
         VALUES (?1, ?2, ?3, ?4)",
    )?
    .execute(params![
        player_id,
        event.total_playtime,
        event.start_time,
        event.test_type
    ])?;
    Ok(())
}

pub fn insert_purchase(conn: &Connection, player_id: i64, event: &NewPurchase) -> rusqlite::Result<()> {
    conn.prepare_cached(
        "INSERT INTO player_items (player_id, start_time, test_type, item_purchase)
         VALUES (?1, ?2, ?3, ?4)",
    )?
    .execute(params![
        player_id,
        event.start_time,
        event.test_type,
        event.item_purchase
    ])?;
    Ok(())
}

/// Record a playtime event and return the owning player's id.
pub async fn record_playtime(pool: &TenantPool, event: NewPlaytime) -> AppResult<i64> {
    pool.run(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let player_id = get_or_create_player(&tx, &event.name, &event.test_type, event.start_time)?;
        insert_playtime(&tx, player_id, &event)?;
        tx.commit()?;
        Ok(player_id)
    })
    .await
}

/// Record a purchase event and return the owning player's id.
pub async fn record_purchase(pool: &TenantPool, event: NewPurchase) -> AppResult<i64> {
    pool.run(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let player_id = get_or_create_player(&tx, &event.name, &event.test_type, event.start_time)?;
        insert_purchase(&tx, player_id, &event)?;
        tx.commit()?;
        Ok(player_id)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::storage::registry::TenantRegistry;
    use std::sync::Arc;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::storage::migrations::run_migrations(&conn).unwrap();
        conn
    }

    fn registry_in(dir: &std::path::Path) -> TenantRegistry {
        TenantRegistry::new(&DatabaseConfig {
            data_dir: dir.to_path_buf(),
            default_game: "writer_test".to_string(),
            pool_size: 4,
            query_timeout_secs: 10,
        })
    }

    fn playtime(name: &str, test_type: &str, start_time: i64) -> NewPlaytime {
        NewPlaytime {
            name: name.to_string(),
            test_type: test_type.to_string(),
            start_time,
            total_playtime: 60.0,
        }
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let conn = test_conn();
        let first = get_or_create_player(&conn, "alice", "A", 1_000).unwrap();
        let second = get_or_create_player(&conn, "alice", "A", 2_000).unwrap();
        assert_eq!(first, second);

        let created_at: i64 = conn
            .query_row("SELECT created_at FROM players WHERE id = ?1", [first], |row| row.get(0))
            .unwrap();
        assert_eq!(created_at, 1_000, "first event wins");
    }

    #[test]
    fn test_identity_includes_test_type() {
        let conn = test_conn();
        let a = get_or_create_player(&conn, "alice", "A", 1_000).unwrap();
        let b = get_or_create_player(&conn, "alice", "B", 1_000).unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_record_events_share_player() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_in(dir.path());
        let pool = registry.resolve(None).unwrap();

        let from_playtime = record_playtime(&pool, playtime("bob", "A", 86_400)).await.unwrap();
        let from_purchase = record_purchase(
            &pool,
            NewPurchase {
                name: "bob".to_string(),
                test_type: "A".to_string(),
                start_time: 90_000,
                item_purchase: 3,
            },
        )
        .await
        .unwrap();
        assert_eq!(from_playtime, from_purchase);

        let (players, playtimes, items): (i64, i64, i64) = pool
            .run(|conn| {
                conn.query_row(
                    "SELECT (SELECT COUNT(*) FROM players),
                            (SELECT COUNT(*) FROM playtimes),
                            (SELECT COUNT(*) FROM player_items)",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
            })
            .await
            .unwrap();
        assert_eq!((players, playtimes, items), (1, 1, 1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_events_create_one_player() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_in(dir.path());
        let pool = registry.resolve(None).unwrap();

        let mut handles = Vec::new();
        for i in 0..24 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                record_playtime(&pool, playtime("carol", "B", 1_000 + i)).await.unwrap()
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        assert!(ids.iter().all(|id| *id == ids[0]));

        let players: i64 = pool
            .run(|conn| conn.query_row("SELECT COUNT(*) FROM players", [], |row| row.get(0)))
            .await
            .unwrap();
        assert_eq!(players, 1);
    }
}
