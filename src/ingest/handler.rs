use crate::config::IngestConfig;
use crate::error::{AppError, AppResult, LoggedJson};
use crate::storage::registry::TenantRegistry;
use crate::storage::writer::{self, NewPlaytime, NewPurchase};
use crate::types::{CreatedResponse, PlayerItemRequest, PlaytimeRequest};
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;

pub struct IngestState {
    pub registry: Arc<TenantRegistry>,
    pub config: IngestConfig,
}

fn validate_text(field: &str, value: &str, max_bytes: usize) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{field} is required")));
    }
    if value.len() > max_bytes {
        return Err(AppError::Validation(format!(
            "{field} exceeds {max_bytes} bytes"
        )));
    }
    Ok(())
}

fn validate_start_time(start_time: i64) -> AppResult<()> {
    if start_time < 0 {
        return Err(AppError::Validation(
            "startTime must be a non-negative Unix timestamp".to_string(),
        ));
    }
    Ok(())
}

/// Validate a playtime event against size limits and value ranges.
fn validate_playtime(req: &PlaytimeRequest, config: &IngestConfig) -> AppResult<()> {
    validate_text("name", &req.name, config.max_name_bytes)?;
    validate_text("testType", &req.test_type, config.max_test_type_bytes)?;
    validate_start_time(req.start_time)?;
    if !req.total_play_time.is_finite() || req.total_play_time < 0.0 {
        return Err(AppError::Validation(
            "totalPlayTime must be a non-negative number of seconds".to_string(),
        ));
    }
    Ok(())
}

fn validate_purchase(req: &PlayerItemRequest, config: &IngestConfig) -> AppResult<()> {
    validate_text("name", &req.name, config.max_name_bytes)?;
    validate_text("testType", &req.test_type, config.max_test_type_bytes)?;
    validate_start_time(req.start_time)?;
    if req.item_purchase < 0 {
        return Err(AppError::Validation(
            "itemPurchase must be non-negative".to_string(),
        ));
    }
    Ok(())
}

fn created(player_id: i64) -> (StatusCode, Json<CreatedResponse>) {
    (
        StatusCode::CREATED,
        Json(CreatedResponse {
            status: "created".to_string(),
            player_id,
        }),
    )
}

/// POST /playtime
pub async fn ingest_playtime(
    State(state): State<Arc<IngestState>>,
    LoggedJson(req): LoggedJson<PlaytimeRequest>,
) -> AppResult<(StatusCode, Json<CreatedResponse>)> {
    validate_playtime(&req, &state.config)?;
    let pool = state.registry.resolve(req.game_name.as_deref())?;

    let player_id = writer::record_playtime(
        &pool,
        NewPlaytime {
            name: req.name,
            test_type: req.test_type,
            start_time: req.start_time,
            total_playtime: req.total_play_time,
        },
    )
    .await?;

    tracing::debug!(game = pool.name(), player_id, "playtime recorded");
    Ok(created(player_id))
}

/// POST /playeritem
pub async fn ingest_player_item(
    State(state): State<Arc<IngestState>>,
    LoggedJson(req): LoggedJson<PlayerItemRequest>,
) -> AppResult<(StatusCode, Json<CreatedResponse>)> {
    validate_purchase(&req, &state.config)?;
    let pool = state.registry.resolve(req.game_name.as_deref())?;

    let player_id = writer::record_purchase(
        &pool,
        NewPurchase {
            name: req.name,
            test_type: req.test_type,
            start_time: req.start_time,
            item_purchase: req.item_purchase,
        },
    )
    .await?;

    tracing::debug!(game = pool.name(), player_id, "purchase recorded");
    Ok(created(player_id))
}
