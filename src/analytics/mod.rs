pub mod handler;
pub mod queries;
pub mod retention;
pub mod series;
pub mod types;

use crate::config::AnalyticsConfig;
use crate::storage::registry::TenantRegistry;
use std::sync::Arc;

/// Shared state for analytics endpoints.
pub struct AnalyticsState {
    pub registry: Arc<TenantRegistry>,
    pub config: AnalyticsConfig,
}

impl AnalyticsState {
    pub fn new(registry: Arc<TenantRegistry>, config: AnalyticsConfig) -> Self {
        Self { registry, config }
    }
}
