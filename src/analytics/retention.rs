//! N-day retention endpoints.
//!
//! `/retention` takes the window from `retentionType`; the fixed routes
//! (`/retention/7-day`, `/7-day-retention`, ...) bake it into the handler.
//! Every route accepts both a query string (GET) and a JSON body (POST).

use crate::analytics::series;
use crate::analytics::types::*;
use crate::analytics::AnalyticsState;
use crate::error::{AppError, AppResult, LoggedJson};
use crate::types::{to_date, DateRange};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use std::sync::Arc;

pub const MAX_RETENTION_DAYS: i64 = 365;

/// Parse a `retentionType` such as `"7"`, `"7-day"`, `"7d"` or `"weekly"`.
pub fn parse_retention_days(raw: &str) -> AppResult<i64> {
    let normalized = raw.trim().to_ascii_lowercase();
    let days = match normalized.as_str() {
        "daily" | "day" => 1,
        "weekly" | "week" => 7,
        "monthly" | "month" => 30,
        other => {
            let digits = other
                .trim_end_matches("-retention")
                .trim_end_matches("days")
                .trim_end_matches("day")
                .trim_end_matches('d')
                .trim_end_matches(['-', ' ', '_']);
            digits.parse::<i64>().map_err(|_| {
                AppError::Validation(format!("unsupported retentionType: {raw}"))
            })?
        }
    };
    check_days(days)
}

fn check_days(days: i64) -> AppResult<i64> {
    if (1..=MAX_RETENTION_DAYS).contains(&days) {
        Ok(days)
    } else {
        Err(AppError::Validation(format!(
            "retentionType must be between 1 and {MAX_RETENTION_DAYS} days"
        )))
    }
}

fn retention_days(raw: Option<RawRetentionType>) -> AppResult<i64> {
    match raw {
        Some(RawRetentionType::Days(days)) => check_days(days),
        Some(RawRetentionType::Text(text)) => parse_retention_days(&text),
        None => Err(AppError::Validation("retentionType is required".to_string())),
    }
}

/// Split a comma-separated `testType` query value.
fn split_labels(raw: Option<String>) -> Option<Vec<String>> {
    raw.map(|s| s.split(',').map(|part| part.trim().to_string()).collect())
}

/// Group retention rows by label. Every requested label gets an entry, even
/// when the query produced no rows for it.
pub fn shape_retention(labels: &[String], rows: Vec<RetentionRow>) -> AppResult<RetentionResponse> {
    let mut out: RetentionResponse = labels
        .iter()
        .map(|label| (label.clone(), Vec::new()))
        .collect();
    for row in rows {
        out.entry(row.label).or_default().push(RetentionPoint {
            date: to_date(row.day)?,
            new_players: row.new_players,
            returning_players: row.returning_players,
            retention_rate: row.retention_rate,
        });
    }
    Ok(out)
}

async fn compute(
    state: &AnalyticsState,
    start_date: Option<String>,
    end_date: Option<String>,
    test_type: Option<Vec<String>>,
    game_name: Option<String>,
    days: i64,
) -> AppResult<Json<RetentionResponse>> {
    let range = DateRange::parse(
        start_date.as_deref(),
        end_date.as_deref(),
        state.config.max_range_days,
    )?;
    let labels = series::normalize_labels(test_type.unwrap_or_default());
    if labels.is_empty() {
        return Err(AppError::Validation("testType is required".to_string()));
    }

    let pool = state.registry.lookup(game_name.as_deref())?;
    let rows =
        series::run_retention(&pool, &range, &labels, days, state.config.cohort_basis).await?;
    Ok(Json(shape_retention(&labels, rows)?))
}

/// GET /retention
pub async fn retention_get(
    State(state): State<Arc<AnalyticsState>>,
    params: Result<Query<RetentionParams>, QueryRejection>,
) -> AppResult<Json<RetentionResponse>> {
    let Query(params) = params?;
    let days = retention_days(params.retention_type.map(RawRetentionType::Text))?;
    compute(
        &state,
        params.start_date,
        params.end_date,
        split_labels(params.test_type),
        params.game_name,
        days,
    )
    .await
}

/// POST /retention
pub async fn retention_post(
    State(state): State<Arc<AnalyticsState>>,
    LoggedJson(body): LoggedJson<RetentionBody>,
) -> AppResult<Json<RetentionResponse>> {
    let days = retention_days(body.retention_type)?;
    compute(
        &state,
        body.start_date,
        body.end_date,
        body.test_type,
        body.game_name,
        days,
    )
    .await
}

/// GET handler for a fixed window; any `retentionType` is ignored.
pub async fn fixed_retention_get<const DAYS: i64>(
    State(state): State<Arc<AnalyticsState>>,
    params: Result<Query<RetentionParams>, QueryRejection>,
) -> AppResult<Json<RetentionResponse>> {
    let Query(params) = params?;
    compute(
        &state,
        params.start_date,
        params.end_date,
        split_labels(params.test_type),
        params.game_name,
        DAYS,
    )
    .await
}

/// POST handler for a fixed window; any `retentionType` is ignored.
pub async fn fixed_retention_post<const DAYS: i64>(
    State(state): State<Arc<AnalyticsState>>,
    LoggedJson(body): LoggedJson<RetentionBody>,
) -> AppResult<Json<RetentionResponse>> {
    compute(
        &state,
        body.start_date,
        body.end_date,
        body.test_type,
        body.game_name,
        DAYS,
    )
    .await
}
