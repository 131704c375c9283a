use crate::analytics::queries::Metric;
use crate::analytics::series;
use crate::analytics::types::*;
use crate::analytics::AnalyticsState;
use crate::error::{AppResult, LoggedJson};
use crate::types::{to_utc, DateRange, GameQuery};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use rusqlite::types::FromSql;
use std::sync::Arc;

/// Validate the request, pick the tenant and labels, then run `metric`.
async fn metric_series<V>(
    state: &AnalyticsState,
    req: MetricRequest,
    metric: Metric,
) -> AppResult<Vec<SeriesRow<V>>>
where
    V: FromSql + Send + 'static,
{
    let range = DateRange::parse(
        req.start_date.as_deref(),
        req.end_date.as_deref(),
        state.config.max_range_days,
    )?;
    let pool = state.registry.lookup(req.game_name.as_deref())?;
    let labels =
        series::resolve_test_types(&pool, req.test_type, state.config.test_type_source).await?;
    series::run_metric(&pool, metric, &range, &labels).await
}

/// Generates a `POST` handler that runs one metric and shapes each row into
/// `{date, testType, <field>}`.
macro_rules! metric_endpoint {
    ($(#[$doc:meta])* $name:ident, $metric:expr, $value:ty, $point:ident { $field:ident }) => {
        $(#[$doc])*
        pub async fn $name(
            State(state): State<Arc<AnalyticsState>>,
            LoggedJson(req): LoggedJson<MetricRequest>,
        ) -> AppResult<Json<Vec<$point>>> {
            let rows = metric_series::<$value>(&state, req, $metric).await?;
            let points = rows
                .into_iter()
                .map(|row| {
                    Ok($point {
                        date: to_utc(row.bucket)?,
                        test_type: row.label,
                        $field: row.value,
                    })
                })
                .collect::<AppResult<Vec<_>>>()?;
            Ok(Json(points))
        }
    };
}

metric_endpoint!(
    /// POST /concurrent-users
    concurrent_users,
    Metric::ConcurrentUsers,
    i64,
    UniqueUsersPoint { unique_users }
);

metric_endpoint!(
    /// POST /concurrent-users-hourly
    concurrent_users_hourly,
    Metric::ConcurrentUsersHourly,
    i64,
    UniqueUsersPoint { unique_users }
);

metric_endpoint!(
    /// POST /average-play-hours
    average_play_hours,
    Metric::AvgPlayHours,
    f64,
    AvgHoursPoint { avg_hours }
);

metric_endpoint!(
    /// POST /average-play-hours-hourly
    average_play_hours_hourly,
    Metric::AvgPlayHoursHourly,
    f64,
    AvgHoursPoint { avg_hours }
);

metric_endpoint!(
    /// POST /total-purchases
    total_purchases,
    Metric::TotalPurchases,
    i64,
    TotalPurchasesPoint { total_purchases }
);

metric_endpoint!(
    /// POST /average-revenue
    average_revenue,
    Metric::AvgRevenue,
    f64,
    AvgRevenuePoint { avg_revenue }
);

metric_endpoint!(
    /// POST /average-revenue-per-player
    average_revenue_per_player,
    Metric::AvgRevenuePerPlayer,
    f64,
    AvgRevenuePerPlayerPoint { avg_revenue_per_player }
);

/// GET /test-types
pub async fn test_types(
    State(state): State<Arc<AnalyticsState>>,
    params: Result<Query<GameQuery>, QueryRejection>,
) -> AppResult<Json<Vec<String>>> {
    let Query(params) = params?;
    let pool = state.registry.lookup(params.game_name.as_deref())?;
    let labels = series::discover_test_types(&pool, state.config.test_type_source).await?;
    Ok(Json(labels))
}
