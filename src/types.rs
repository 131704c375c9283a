use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{AppError, AppResult};

pub const SECONDS_PER_DAY: i64 = 86_400;
pub const SECONDS_PER_HOUR: i64 = 3_600;

/// Body of `POST /playtime`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaytimeRequest {
    pub name: String,
    /// Session length in seconds.
    pub total_play_time: f64,
    /// Unix seconds.
    pub start_time: i64,
    pub test_type: String,
    #[serde(default)]
    pub game_name: Option<String>,
}

/// Body of `POST /playeritem`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerItemRequest {
    pub name: String,
    pub start_time: i64,
    pub test_type: String,
    pub item_purchase: i64,
    #[serde(default)]
    pub game_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedResponse {
    pub status: String,
    pub player_id: i64,
}

/// `?gameName=` on the GET endpoints.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameQuery {
    #[serde(default)]
    pub game_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub db_ok: bool,
    pub default_game: String,
}

/// Latest rows returned by `GET /check-raw-data`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    pub id: i64,
    pub name: String,
    pub test_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaytimeRecord {
    pub id: i64,
    pub player_id: i64,
    pub total_play_time: f64,
    pub start_time: DateTime<Utc>,
    pub test_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RawDataResponse {
    pub players: Vec<PlayerRecord>,
    pub playtimes: Vec<PlaytimeRecord>,
}

/// Accepts `"A"`, `["A", "B"]`, or `null` for a list-of-labels field.
pub fn one_or_many<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => None,
        Some(OneOrMany::One(s)) => Some(vec![s]),
        Some(OneOrMany::Many(v)) => Some(v),
    })
}

/// Inclusive time range in Unix seconds, validated before any query runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: i64,
    pub end: i64,
}

impl DateRange {
    /// Parse `startDate` / `endDate` request values.
    ///
    /// A date-only `endDate` covers that whole day.
    pub fn parse(start: Option<&str>, end: Option<&str>, max_days: i64) -> AppResult<Self> {
        let start = require(start, "startDate")?;
        let end = require(end, "endDate")?;

        let start = parse_instant(start, false)
            .ok_or_else(|| AppError::Validation(format!("invalid startDate: {start}")))?;
        let end = parse_instant(end, true)
            .ok_or_else(|| AppError::Validation(format!("invalid endDate: {end}")))?;

        if start > end {
            return Err(AppError::Validation(
                "startDate must not be after endDate".to_string(),
            ));
        }
        let range = DateRange { start, end };
        if range.day_count() > max_days {
            return Err(AppError::Validation(format!(
                "date range exceeds {max_days} days"
            )));
        }
        Ok(range)
    }

    /// Start of the day containing `start`.
    pub fn first_day(&self) -> i64 {
        floor_to(self.start, SECONDS_PER_DAY)
    }

    /// Start of the day containing `end`.
    pub fn last_day(&self) -> i64 {
        floor_to(self.end, SECONDS_PER_DAY)
    }

    /// Number of calendar days touched by the range.
    pub fn day_count(&self) -> i64 {
        (self.last_day() - self.first_day()) / SECONDS_PER_DAY + 1
    }
}

fn require<'a>(value: Option<&'a str>, field: &str) -> AppResult<&'a str> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(AppError::Validation(format!("{field} is required"))),
    }
}

pub fn floor_to(ts: i64, step: i64) -> i64 {
    ts - ts.rem_euclid(step)
}

fn parse_instant(raw: &str, end_of_day: bool) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&naive).timestamp());
        }
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    let time = if end_of_day {
        NaiveTime::from_hms_opt(23, 59, 59)?
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)?
    };
    Some(Utc.from_utc_datetime(&date.and_time(time)).timestamp())
}

/// Unix seconds to a UTC timestamp for JSON output.
pub fn to_utc(ts: i64) -> AppResult<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
        .ok_or_else(|| AppError::Internal(format!("timestamp out of range: {ts}")))
}

/// Unix seconds to the UTC calendar date.
pub fn to_date(ts: i64) -> AppResult<NaiveDate> {
    Ok(to_utc(ts)?.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_only_end_covers_whole_day() {
        let range = DateRange::parse(Some("2024-01-01"), Some("2024-01-03"), 366).unwrap();
        assert_eq!(range.start, 1_704_067_200);
        assert_eq!(range.end, 1_704_067_200 + 3 * SECONDS_PER_DAY - 1);
        assert_eq!(range.day_count(), 3);
    }

    #[test]
    fn test_accepts_datetime_formats() {
        let a = DateRange::parse(Some("2024-01-01T10:30:00"), Some("2024-01-01 12:00:00"), 366)
            .unwrap();
        assert_eq!(a.end - a.start, 5_400);

        let b = DateRange::parse(Some("2024-01-01T10:30:00Z"), Some("2024-01-01T12:30:00+02:00"), 366)
            .unwrap();
        assert_eq!(b.start, b.end);
    }

    #[test]
    fn test_rejects_bad_ranges() {
        assert!(matches!(
            DateRange::parse(None, Some("2024-01-01"), 366),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            DateRange::parse(Some("yesterday"), Some("2024-01-01"), 366),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            DateRange::parse(Some("2024-02-01"), Some("2024-01-01"), 366),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            DateRange::parse(Some("2024-01-01"), Some("2024-01-31"), 7),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_single_day_range() {
        let range = DateRange::parse(Some("2024-03-10"), Some("2024-03-10"), 1).unwrap();
        assert_eq!(range.day_count(), 1);
        assert_eq!(range.first_day(), range.last_day());
    }

    #[test]
    fn test_one_or_many_shapes() {
        #[derive(Deserialize)]
        struct LabelHolder {
            #[serde(default, deserialize_with = "one_or_many")]
            labels: Option<Vec<String>>,
        }

        let one: LabelHolder = serde_json::from_str(r#"{"labels": "A"}"#).unwrap();
        assert_eq!(one.labels, Some(vec!["A".to_string()]));

        let many: LabelHolder = serde_json::from_str(r#"{"labels": ["A", "B"]}"#).unwrap();
        assert_eq!(many.labels, Some(vec!["A".to_string(), "B".to_string()]));

        let null: LabelHolder = serde_json::from_str(r#"{"labels": null}"#).unwrap();
        assert_eq!(null.labels, None);

        let missing: LabelHolder = serde_json::from_str("{}").unwrap();
        assert_eq!(missing.labels, None);
    }
}
