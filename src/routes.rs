//! Router configuration.
//!
//! # Routes
//!
//! ## Ingest (rate limited per client IP when `rate_limit.enabled`)
//! - `POST /playtime`
//! - `POST /playeritem`
//!
//! ## Metrics
//! - `POST /concurrent-users`, `/concurrent-users-hourly`
//! - `POST /average-play-hours`, `/average-play-hours-hourly`
//! - `POST /total-purchases`, `/average-revenue`, `/average-revenue-per-player`
//! - `GET /test-types`
//!
//! ## Retention (GET with query string, POST with JSON body)
//! - `/retention` (`retentionType` required)
//! - `/retention/7-day`, `/7-day-retention`
//! - `/retention/31-day`, `/31-day-retention`
//!
//! ## Operations
//! - `GET /check-raw-data`
//! - `GET /health`

use std::sync::Arc;
use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::extract::DefaultBodyLimit;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{BoxError, Router};
use tower::timeout::{error::Elapsed, TimeoutLayer};
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorError,
    GovernorLayer,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::analytics::{handler as metrics, retention, AnalyticsState};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::ingest::handler::{self as ingest, IngestState};
use crate::query::handler::{self as query, QueryState};
use crate::storage::registry::TenantRegistry;

/// Build the service router around a shared tenant registry.
///
/// With rate limiting enabled the server must be started with
/// `into_make_service_with_connect_info::<SocketAddr>()` so the limiter can
/// fall back to the peer address.
pub fn build_router(registry: Arc<TenantRegistry>, config: &AppConfig) -> Router {
    let ingest_state = Arc::new(IngestState {
        registry: registry.clone(),
        config: config.ingest.clone(),
    });
    let analytics_state = Arc::new(AnalyticsState::new(
        registry.clone(),
        config.analytics.clone(),
    ));
    let query_state = Arc::new(QueryState { registry });

    // ── Ingest ──
    let mut ingest_routes = Router::new()
        .route("/playtime", post(ingest::ingest_playtime))
        .route("/playeritem", post(ingest::ingest_player_item))
        .layer(DefaultBodyLimit::max(config.ingest.max_payload_bytes));

    if config.rate_limit.enabled {
        let governor_conf = GovernorConfigBuilder::default()
            .key_extractor(SmartIpKeyExtractor)
            .per_millisecond(config.rate_limit.replenish_interval_ms)
            .burst_size(config.rate_limit.burst_size)
            .finish();
        match governor_conf {
            Some(conf) => {
                ingest_routes = ingest_routes.layer(
                    GovernorLayer::new(conf).error_handler(|err: GovernorError| {
                        AppError::from(err).into_response()
                    }),
                )
            }
            None => tracing::warn!("invalid rate limit settings, ingest is not rate limited"),
        }
    }
    let ingest_routes = ingest_routes.with_state(ingest_state);

    // ── Metrics and retention ──
    let analytics_routes = Router::new()
        .route("/concurrent-users", post(metrics::concurrent_users))
        .route(
            "/concurrent-users-hourly",
            post(metrics::concurrent_users_hourly),
        )
        .route("/average-play-hours", post(metrics::average_play_hours))
        .route(
            "/average-play-hours-hourly",
            post(metrics::average_play_hours_hourly),
        )
        .route("/total-purchases", post(metrics::total_purchases))
        .route("/average-revenue", post(metrics::average_revenue))
        .route(
            "/average-revenue-per-player",
            post(metrics::average_revenue_per_player),
        )
        .route("/test-types", get(metrics::test_types))
        .route(
            "/retention",
            get(retention::retention_get).post(retention::retention_post),
        )
        .route(
            "/retention/7-day",
            get(retention::fixed_retention_get::<7>).post(retention::fixed_retention_post::<7>),
        )
        .route(
            "/7-day-retention",
            get(retention::fixed_retention_get::<7>).post(retention::fixed_retention_post::<7>),
        )
        .route(
            "/retention/31-day",
            get(retention::fixed_retention_get::<31>).post(retention::fixed_retention_post::<31>),
        )
        .route(
            "/31-day-retention",
            get(retention::fixed_retention_get::<31>).post(retention::fixed_retention_post::<31>),
        )
        .with_state(analytics_state);

    // ── Operations ──
    let query_routes = Router::new()
        .route("/check-raw-data", get(query::check_raw_data))
        .route("/health", get(query::health))
        .with_state(query_state);

    Router::new()
        .merge(ingest_routes)
        .merge(analytics_routes)
        .merge(query_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(build_cors_layer(&config.server.cors_origins))
                .layer(HandleErrorLayer::new(handle_middleware_error))
                .layer(TimeoutLayer::new(Duration::from_secs(
                    config.server.request_timeout_secs,
                ))),
        )
}

/// Render errors from the outer tower layers with the usual JSON body.
async fn handle_middleware_error(err: BoxError) -> AppError {
    if err.is::<Elapsed>() {
        AppError::Timeout("request exceeded server.request_timeout_secs".to_string())
    } else {
        AppError::Internal(format!("middleware error: {err}"))
    }
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
