//! SQL templates for the analytics endpoints.
//!
//! Timestamps are Unix seconds. Labels are always bound as one JSON array
//! and expanded with `json_each`, so a template has a fixed parameter count
//! regardless of how many test types a request names.

use crate::config::{CohortBasis, TestTypeSource};
use crate::types::DateRange;

/// Distinct players with a session starting in each day.
/// Parameters: ?1 = range start, ?2 = range end, ?3 = labels (JSON array)
pub const CONCURRENT_USERS_DAILY_SQL: &str = r#"
SELECT
    start_time - start_time % 86400 AS bucket,
    test_type,
    COUNT(DISTINCT player_id) AS unique_users
FROM playtimes
WHERE start_time BETWEEN ?1 AND ?2
    AND test_type IN (SELECT value FROM json_each(?3))
GROUP BY bucket, test_type
ORDER BY bucket, test_type
"#;

/// Distinct players whose session overlaps each hour of the range.
/// A session is counted in every hour it spans, not only the hour it starts in.
/// Sessions are narrowed to the range once, before the per-hour join.
/// Parameters: ?1 = range start, ?2 = range end, ?3 = labels (JSON array)
pub const CONCURRENT_USERS_HOURLY_SQL: &str = r#"
WITH RECURSIVE hours(hour) AS (
    SELECT ?1 - ?1 % 3600
    UNION ALL
    SELECT hour + 3600 FROM hours WHERE hour + 3600 <= ?2
),
sessions AS (
    SELECT player_id, test_type, start_time, start_time + total_playtime AS end_time
    FROM playtimes
    WHERE start_time <= ?2 + 3600
        AND start_time + total_playtime > ?1 - ?1 % 3600
        AND test_type IN (SELECT value FROM json_each(?3))
)
SELECT
    h.hour AS bucket,
    s.test_type,
    COUNT(DISTINCT s.player_id) AS unique_users
FROM hours h
JOIN sessions s
    -- Inclusive hour end: a session starting exactly at H+1h also counts in H.
    ON s.start_time <= h.hour + 3600
    AND s.end_time > h.hour
GROUP BY h.hour, s.test_type
ORDER BY h.hour, s.test_type
"#;

/// Mean session length in hours per day.
/// Parameters: ?1 = range start, ?2 = range end, ?3 = labels (JSON array)
pub const AVG_PLAY_HOURS_DAILY_SQL: &str = r#"
SELECT
    start_time - start_time % 86400 AS bucket,
    test_type,
    AVG(total_playtime) / 3600.0 AS avg_hours
FROM playtimes
WHERE start_time BETWEEN ?1 AND ?2
    AND test_type IN (SELECT value FROM json_each(?3))
GROUP BY bucket, test_type
ORDER BY bucket, test_type
"#;

/// Mean session length in hours per starting hour.
/// Parameters: ?1 = range start, ?2 = range end, ?3 = labels (JSON array)
pub const AVG_PLAY_HOURS_HOURLY_SQL: &str = r#"
SELECT
    start_time - start_time % 3600 AS bucket,
    test_type,
    AVG(total_playtime) / 3600.0 AS avg_hours
FROM playtimes
WHERE start_time BETWEEN ?1 AND ?2
    AND test_type IN (SELECT value FROM json_each(?3))
GROUP BY bucket, test_type
ORDER BY bucket, test_type
"#;

/// Parameters: ?1 = range start, ?2 = range end, ?3 = labels (JSON array)
pub const TOTAL_PURCHASES_SQL: &str = r#"
SELECT
    start_time - start_time % 86400 AS bucket,
    test_type,
    SUM(item_purchase) AS total_purchases
FROM player_items
WHERE start_time BETWEEN ?1 AND ?2
    AND test_type IN (SELECT value FROM json_each(?3))
GROUP BY bucket, test_type
ORDER BY bucket, test_type
"#;

/// Parameters: ?1 = range start, ?2 = range end, ?3 = labels (JSON array)
pub const AVG_REVENUE_SQL: &str = r#"
SELECT
    start_time - start_time % 86400 AS bucket,
    test_type,
    AVG(CAST(item_purchase AS REAL)) AS avg_revenue
FROM player_items
WHERE start_time BETWEEN ?1 AND ?2
    AND test_type IN (SELECT value FROM json_each(?3))
GROUP BY bucket, test_type
ORDER BY bucket, test_type
"#;

/// Mean daily revenue over every player that existed on the day, counting
/// players without purchases as zero.
/// Parameters: ?1 = first day start, ?2 = last day start, ?3 = labels (JSON array)
pub const AVG_REVENUE_PER_PLAYER_SQL: &str = r#"
WITH RECURSIVE days(day) AS (
    SELECT ?1
    UNION ALL
    SELECT day + 86400 FROM days WHERE day + 86400 <= ?2
),
player_days AS (
    SELECT d.day, p.id AS player_id, p.test_type
    FROM days d
    JOIN players p ON p.created_at - p.created_at % 86400 <= d.day
    WHERE p.test_type IN (SELECT value FROM json_each(?3))
),
daily_revenue AS (
    SELECT
        pd.day,
        pd.test_type,
        pd.player_id,
        COALESCE(SUM(i.item_purchase), 0) AS revenue
    FROM player_days pd
    LEFT JOIN player_items i
        ON i.player_id = pd.player_id
        AND i.test_type = pd.test_type
        AND i.start_time >= pd.day
        AND i.start_time < pd.day + 86400
    GROUP BY pd.day, pd.test_type, pd.player_id
)
SELECT
    day AS bucket,
    test_type,
    AVG(CAST(revenue AS REAL)) AS avg_revenue_per_player
FROM daily_revenue
GROUP BY day, test_type
ORDER BY day, test_type
"#;

pub const PLAYER_TEST_TYPES_SQL: &str =
    "SELECT DISTINCT test_type FROM players ORDER BY test_type";

pub const PLAYTIME_TEST_TYPES_SQL: &str =
    "SELECT DISTINCT test_type FROM playtimes ORDER BY test_type";

pub fn test_types_sql(source: TestTypeSource) -> &'static str {
    match source {
        TestTypeSource::Player => PLAYER_TEST_TYPES_SQL,
        TestTypeSource::Playtime => PLAYTIME_TEST_TYPES_SQL,
    }
}

const COHORT_BY_CREATED_AT: &str = r#"
cohort AS (
    SELECT id AS player_id, test_type, created_at - created_at % 86400 AS cohort_day
    FROM players
    WHERE created_at >= ?1
        AND created_at < ?2 + 86400
        AND test_type IN (SELECT value FROM json_each(?3))
)"#;

const COHORT_BY_FIRST_PLAYTIME: &str = r#"
cohort AS (
    SELECT
        player_id,
        test_type,
        MIN(start_time) - MIN(start_time) % 86400 AS cohort_day
    FROM playtimes
    WHERE test_type IN (SELECT value FROM json_each(?3))
    GROUP BY player_id, test_type
    HAVING MIN(start_time) >= ?1 AND MIN(start_time) < ?2 + 86400
)"#;

/// N-day retention per cohort day and label.
///
/// Emits exactly one row for every (day, label) pair in the range; days
/// without a cohort report zero players and a zero rate.
/// Parameters: ?1 = first day start, ?2 = last day start,
///             ?3 = labels (JSON array), ?4 = N (days)
pub fn retention_sql(basis: CohortBasis) -> String {
    let cohort = match basis {
        CohortBasis::CreatedAt => COHORT_BY_CREATED_AT,
        CohortBasis::FirstPlaytime => COHORT_BY_FIRST_PLAYTIME,
    };

    format!(
        r#"
WITH RECURSIVE days(day) AS (
    SELECT ?1
    UNION ALL
    SELECT day + 86400 FROM days WHERE day + 86400 <= ?2
),
labels(test_type) AS (
    SELECT DISTINCT value FROM json_each(?3)
),
{cohort},
cohort_sizes AS (
    SELECT cohort_day, test_type, COUNT(*) AS new_players
    FROM cohort
    GROUP BY cohort_day, test_type
),
returned AS (
    SELECT c.cohort_day, c.test_type, COUNT(DISTINCT c.player_id) AS returning_players
    FROM cohort c
    WHERE EXISTS (
        SELECT 1 FROM playtimes pt
        WHERE pt.player_id = c.player_id
            AND pt.test_type = c.test_type
            AND pt.start_time >= c.cohort_day + ?4 * 86400
            AND pt.start_time < c.cohort_day + (?4 + 1) * 86400
    )
    GROUP BY c.cohort_day, c.test_type
)
SELECT
    d.day,
    l.test_type,
    COALESCE(cs.new_players, 0) AS new_players,
    COALESCE(r.returning_players, 0) AS returning_players,
    CASE
        WHEN COALESCE(cs.new_players, 0) > 0
        THEN ROUND(COALESCE(r.returning_players, 0) * 100.0 / cs.new_players, 2)
        ELSE 0.0
    END AS retention_rate
FROM days d
CROSS JOIN labels l
LEFT JOIN cohort_sizes cs ON cs.cohort_day = d.day AND cs.test_type = l.test_type
LEFT JOIN returned r ON r.cohort_day = d.day AND r.test_type = l.test_type
ORDER BY d.day, l.test_type
"#
    )
}

/// The bucketed metrics served under `POST /<metric>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    ConcurrentUsers,
    ConcurrentUsersHourly,
    AvgPlayHours,
    AvgPlayHoursHourly,
    TotalPurchases,
    AvgRevenue,
    AvgRevenuePerPlayer,
}

impl Metric {
    pub fn name(self) -> &'static str {
        match self {
            Metric::ConcurrentUsers => "concurrent_users",
            Metric::ConcurrentUsersHourly => "concurrent_users_hourly",
            Metric::AvgPlayHours => "average_play_hours",
            Metric::AvgPlayHoursHourly => "average_play_hours_hourly",
            Metric::TotalPurchases => "total_purchases",
            Metric::AvgRevenue => "average_revenue",
            Metric::AvgRevenuePerPlayer => "average_revenue_per_player",
        }
    }

    pub fn sql(self) -> &'static str {
        match self {
            Metric::ConcurrentUsers => CONCURRENT_USERS_DAILY_SQL,
            Metric::ConcurrentUsersHourly => CONCURRENT_USERS_HOURLY_SQL,
            Metric::AvgPlayHours => AVG_PLAY_HOURS_DAILY_SQL,
            Metric::AvgPlayHoursHourly => AVG_PLAY_HOURS_HOURLY_SQL,
            Metric::TotalPurchases => TOTAL_PURCHASES_SQL,
            Metric::AvgRevenue => AVG_REVENUE_SQL,
            Metric::AvgRevenuePerPlayer => AVG_REVENUE_PER_PLAYER_SQL,
        }
    }

    /// Values for ?1 and ?2. Day-series templates take day starts, the rest
    /// take the exact instants.
    pub fn bounds(self, range: &DateRange) -> (i64, i64) {
        match self {
            Metric::AvgRevenuePerPlayer => (range.first_day(), range.last_day()),
            _ => (range.start, range.end),
        }
    }
}
