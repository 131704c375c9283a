use std::collections::HashSet;
use std::time::Instant;

use rusqlite::params;
use rusqlite::types::FromSql;

use crate::analytics::queries::{self, Metric};
use crate::analytics::types::{RetentionRow, SeriesRow};
use crate::config::{CohortBasis, TestTypeSource};
use crate::error::{AppError, AppResult};
use crate::storage::registry::TenantPool;
use crate::types::DateRange;

/// Drop blank entries and duplicates, keeping the first occurrence.
pub fn normalize_labels(labels: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    labels
        .into_iter()
        .filter(|label| !label.trim().is_empty())
        .filter(|label| seen.insert(label.clone()))
        .collect()
}

/// The labels a query should cover: the caller's, or every label in the game.
pub async fn resolve_test_types(
    pool: &TenantPool,
    requested: Option<Vec<String>>,
    source: TestTypeSource,
) -> AppResult<Vec<String>> {
    let requested = normalize_labels(requested.unwrap_or_default());
    if !requested.is_empty() {
        return Ok(requested);
    }
    discover_test_types(pool, source).await
}

/// Distinct labels present in the game's data, sorted ascending.
pub async fn discover_test_types(
    pool: &TenantPool,
    source: TestTypeSource,
) -> AppResult<Vec<String>> {
    let sql = queries::test_types_sql(source);
    pool.run(move |conn| {
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect()
    })
    .await
}

fn labels_json(labels: &[String]) -> AppResult<String> {
    serde_json::to_string(labels).map_err(|e| AppError::Internal(format!("serialize labels: {e}")))
}

/// Run one bucketed metric template. An empty label set short-circuits to an
/// empty series.
pub async fn run_metric<V>(
    pool: &TenantPool,
    metric: Metric,
    range: &DateRange,
    labels: &[String],
) -> AppResult<Vec<SeriesRow<V>>>
where
    V: FromSql + Send + 'static,
{
    if labels.is_empty() {
        return Ok(Vec::new());
    }

    let (from, to) = metric.bounds(range);
    let labels = labels_json(labels)?;
    let started = Instant::now();

    let rows = pool
        .run(move |conn| {
            let mut stmt = conn.prepare_cached(metric.sql())?;
            let rows = stmt.query_map(params![from, to, labels], |row| {
                Ok(SeriesRow {
                    bucket: row.get(0)?,
                    label: row.get(1)?,
                    value: row.get(2)?,
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
        .await?;

    tracing::debug!(
        game = pool.name(),
        metric = metric.name(),
        rows = rows.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "metric query"
    );
    Ok(rows)
}

/// N-day retention for every day of `range` and every label.
pub async fn run_retention(
    pool: &TenantPool,
    range: &DateRange,
    labels: &[String],
    days: i64,
    basis: CohortBasis,
) -> AppResult<Vec<RetentionRow>> {
    if labels.is_empty() {
        return Ok(Vec::new());
    }

    let (first_day, last_day) = (range.first_day(), range.last_day());
    let labels = labels_json(labels)?;
    let sql = queries::retention_sql(basis);
    let started = Instant::now();

    let rows = pool
        .run(move |conn| {
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(params![first_day, last_day, labels, days], |row| {
                Ok(RetentionRow {
                    day: row.get(0)?,
                    label: row.get(1)?,
                    new_players: row.get(2)?,
                    returning_players: row.get(3)?,
                    retention_rate: row.get(4)?,
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
        .await?;

    tracing::debug!(
        game = pool.name(),
        days,
        cohort_basis = ?basis,
        rows = rows.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "retention query"
    );
    Ok(rows)
}
