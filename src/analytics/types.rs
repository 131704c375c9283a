use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::one_or_many;

/// Body shared by all bucketed metric endpoints.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRequest {
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    /// Omitted, null, `""` or `[]` means every label in the game.
    #[serde(default, alias = "testTypes", deserialize_with = "one_or_many")]
    pub test_type: Option<Vec<String>>,
    #[serde(default)]
    pub game_name: Option<String>,
}

/// One `(bucket, label, value)` row as read from a metric template.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesRow<V> {
    pub bucket: i64,
    pub label: String,
    pub value: V,
}

// ── Bucketed metrics ──

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniqueUsersPoint {
    pub date: DateTime<Utc>,
    pub test_type: String,
    pub unique_users: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvgHoursPoint {
    pub date: DateTime<Utc>,
    pub test_type: String,
    pub avg_hours: f64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalPurchasesPoint {
    pub date: DateTime<Utc>,
    pub test_type: String,
    pub total_purchases: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvgRevenuePoint {
    pub date: DateTime<Utc>,
    pub test_type: String,
    pub avg_revenue: f64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvgRevenuePerPlayerPoint {
    pub date: DateTime<Utc>,
    pub test_type: String,
    pub avg_revenue_per_player: f64,
}

// ── Retention ──

/// `retentionType` as sent in a JSON body: `7`, `"7"`, `"7-day"`, `"weekly"`...
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawRetentionType {
    Days(i64),
    Text(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionBody {
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub retention_type: Option<RawRetentionType>,
    #[serde(default, alias = "testTypes", deserialize_with = "one_or_many")]
    pub test_type: Option<Vec<String>>,
    #[serde(default)]
    pub game_name: Option<String>,
}

/// Query-string form of [`RetentionBody`]; `testType` is comma separated.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionParams {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub retention_type: Option<String>,
    #[serde(alias = "testTypes")]
    pub test_type: Option<String>,
    pub game_name: Option<String>,
}

/// One row of the retention template.
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionRow {
    pub day: i64,
    pub label: String,
    pub new_players: i64,
    pub returning_players: i64,
    pub retention_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionPoint {
    pub date: NaiveDate,
    pub new_players: i64,
    pub returning_players: i64,
    pub retention_rate: f64,
}

/// Label → one point per day in the requested range.
pub type RetentionResponse = BTreeMap<String, Vec<RetentionPoint>>;
