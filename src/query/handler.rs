use crate::error::AppResult;
use crate::storage::registry::TenantRegistry;
use crate::types::{
    to_utc, GameQuery, HealthResponse, PlayerRecord, PlaytimeRecord, RawDataResponse,
};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use rusqlite::params;
use std::sync::Arc;

/// Rows per table returned by `GET /check-raw-data`.
const RAW_DATA_LIMIT: i64 = 10;

pub struct QueryState {
    pub registry: Arc<TenantRegistry>,
}

/// GET /health - Probe the default game database.
pub async fn health(State(state): State<Arc<QueryState>>) -> Json<HealthResponse> {
    let db_ok = match state.registry.lookup(None) {
        Ok(pool) => pool
            .run(|conn| conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)))
            .await
            .is_ok(),
        Err(_) => false,
    };

    Json(HealthResponse {
        status: if db_ok {
            "ok".into()
        } else {
            "degraded".into()
        },
        db_ok,
        default_game: state.registry.default_game().to_string(),
    })
}

/// GET /check-raw-data - Latest players and playtime sessions for a game.
pub async fn check_raw_data(
    State(state): State<Arc<QueryState>>,
    params: Result<Query<GameQuery>, QueryRejection>,
) -> AppResult<Json<RawDataResponse>> {
    let Query(params) = params?;
    let pool = state.registry.lookup(params.game_name.as_deref())?;

    let (players, playtimes) = pool
        .run(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, name, test_type, created_at
                 FROM players
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?1",
            )?;
            let players = stmt
                .query_map(params![RAW_DATA_LIMIT], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut stmt = conn.prepare_cached(
                "SELECT id, player_id, total_playtime, start_time, test_type
                 FROM playtimes
                 ORDER BY start_time DESC, id DESC
                 LIMIT ?1",
            )?;
            let playtimes = stmt
                .query_map(params![RAW_DATA_LIMIT], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok((players, playtimes))
        })
        .await?;

    let players = players
        .into_iter()
        .map(|(id, name, test_type, created_at)| {
            Ok(PlayerRecord {
                id,
                name,
                test_type,
                created_at: to_utc(created_at)?,
            })
        })
        .collect::<AppResult<Vec<_>>>()?;

    let playtimes = playtimes
        .into_iter()
        .map(|(id, player_id, total_play_time, start_time, test_type)| {
            Ok(PlaytimeRecord {
                id,
                player_id,
                total_play_time,
                start_time: to_utc(start_time)?,
                test_type,
            })
        })
        .collect::<AppResult<Vec<_>>>()?;

    Ok(Json(RawDataResponse { players, playtimes }))
}
