use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use argus_core::ids::ToolCallId;
use argus_core::metrics::{
    FailureRateDataPoint, LatencyDataPoint, MetricsOverview, TokenUsageDataPoint,
    ToolCallDataPoint,
};
use argus_core::{ToolCallEvent, ToolCallStatus};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// A stored tool call row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallRow {
    pub id: ToolCallId,
    pub request_id: Uuid,
    pub tool_name: String,
    pub duration_ms: i64,
    pub status: ToolCallStatus,
    pub input_tokens: i64,
    pub output_tokens: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: String,
}

pub struct ToolCallRepo {
    db: Database,
}

impl ToolCallRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn ping(&self) -> Result<(), StoreError> {
        self.db.ping()
    }

    /// Persist an ingested tool call event.
    ///
    /// Defaults are applied here: absent token counts become 0, absent
    /// metadata becomes `{}`, absent timestamp becomes the server clock.
    #[instrument(skip(self, event), fields(tool_name = %event.tool_name, status = %event.status))]
    pub fn insert(&self, event: &ToolCallEvent) -> Result<ToolCallRow, StoreError> {
        let request_id = Uuid::parse_str(&event.request_id)
            .map_err(|e| StoreError::Serialization(format!("invalid request_id: {e}")))?;

        let id = ToolCallId::new();
        let created_at = event
            .timestamp
            .unwrap_or_else(Utc::now)
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        let metadata = event
            .metadata
            .clone()
            .unwrap_or_else(|| serde_json::json!({}));
        let input_tokens = event.input_tokens.unwrap_or(0);
        let output_tokens = event.output_tokens.unwrap_or(0);

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tool_calls (
                    id, request_id, tool_name, duration_ms, status,
                    input_tokens, output_tokens, error_message, metadata, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    id.as_str(),
                    request_id.to_string(),
                    event.tool_name,
                    event.duration_ms,
                    event.status.to_string(),
                    input_tokens,
                    output_tokens,
                    event.error_message,
                    serde_json::to_string(&metadata)?,
                    created_at,
                ],
            )?;

            Ok(ToolCallRow {
                id,
                request_id,
                tool_name: event.tool_name.clone(),
                duration_ms: event.duration_ms,
                status: event.status,
                input_tokens,
                output_tokens,
                error_message: event.error_message.clone(),
                metadata,
                created_at,
            })
        })
    }

    /// Most recent tool calls, newest first.
    #[instrument(skip(self))]
    pub fn recent(&self, limit: u32) -> Result<Vec<ToolCallRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, request_id, tool_name, duration_ms, status,
                        input_tokens, output_tokens, error_message, metadata, created_at
                 FROM tool_calls
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?1",
            )?;
            let mut rows = stmt.query([limit])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_tool_call(row)?);
            }
            Ok(results)
        })
    }

    /// All tool calls for one agent request, oldest first.
    #[instrument(skip(self), fields(request_id = %request_id))]
    pub fn chain(&self, request_id: &Uuid) -> Result<Vec<ToolCallRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, request_id, tool_name, duration_ms, status,
                        input_tokens, output_tokens, error_message, metadata, created_at
                 FROM tool_calls
                 WHERE request_id = ?1
                 ORDER BY created_at ASC, id ASC",
            )?;
            let mut rows = stmt.query([request_id.to_string()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_tool_call(row)?);
            }
            Ok(results)
        })
    }

    /// Headline aggregates over the trailing window.
    #[instrument(skip(self))]
    pub fn overview(&self, hours: u32) -> Result<MetricsOverview, StoreError> {
        self.db.with_conn(|conn| {
            let (total_calls, avg_latency_ms, total_tokens, failure_rate) = conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(AVG(duration_ms), 0),
                        COALESCE(SUM(input_tokens + output_tokens), 0),
                        CASE WHEN COUNT(*) > 0
                             THEN SUM(status = 'failed') * 100.0 / COUNT(*)
                             ELSE 0 END
                 FROM tool_calls
                 WHERE datetime(created_at) >= datetime('now', ?1)",
                [window_modifier(hours)],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, f64>(3)?,
                    ))
                },
            )?;

            Ok(MetricsOverview {
                total_calls,
                avg_latency_ms,
                total_tokens,
                failure_rate,
                // Cross-period comparison is out of scope; placeholder value.
                change_percent: 0.0,
            })
        })
    }

    /// Successes and failures per hourly bucket, oldest bucket first.
    #[instrument(skip(self))]
    pub fn tool_calls_by_hour(&self, hours: u32) -> Result<Vec<ToolCallDataPoint>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT strftime('%H:00', created_at) AS hour,
                        COALESCE(SUM(status = 'success'), 0),
                        COALESCE(SUM(status = 'failed'), 0)
                 FROM tool_calls
                 WHERE datetime(created_at) >= datetime('now', ?1)
                 GROUP BY strftime('%Y-%m-%dT%H', created_at)
                 ORDER BY strftime('%Y-%m-%dT%H', created_at)",
            )?;
            let mut rows = stmt.query([window_modifier(hours)])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(ToolCallDataPoint {
                    hour: row_helpers::get(row, 0, "tool_calls", "created_at")?,
                    success: row_helpers::get(row, 1, "tool_calls", "status")?,
                    failures: row_helpers::get(row, 2, "tool_calls", "status")?,
                });
            }
            Ok(results)
        })
    }

    /// Token consumption per hourly bucket, oldest bucket first.
    #[instrument(skip(self))]
    pub fn token_usage_by_hour(&self, hours: u32) -> Result<Vec<TokenUsageDataPoint>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT strftime('%H:00', created_at) AS hour,
                        COALESCE(SUM(input_tokens), 0),
                        COALESCE(SUM(output_tokens), 0)
                 FROM tool_calls
                 WHERE datetime(created_at) >= datetime('now', ?1)
                 GROUP BY strftime('%Y-%m-%dT%H', created_at)
                 ORDER BY strftime('%Y-%m-%dT%H', created_at)",
            )?;
            let mut rows = stmt.query([window_modifier(hours)])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(TokenUsageDataPoint {
                    hour: row_helpers::get(row, 0, "tool_calls", "created_at")?,
                    input: row_helpers::get(row, 1, "tool_calls", "input_tokens")?,
                    output: row_helpers::get(row, 2, "tool_calls", "output_tokens")?,
                });
            }
            Ok(results)
        })
    }

    /// Failure percentage per hourly bucket, oldest bucket first.
    #[instrument(skip(self))]
    pub fn failure_rate_by_hour(
        &self,
        hours: u32,
    ) -> Result<Vec<FailureRateDataPoint>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT strftime('%H:00', created_at) AS hour,
                        SUM(status = 'failed') * 100.0 / COUNT(*)
                 FROM tool_calls
                 WHERE datetime(created_at) >= datetime('now', ?1)
                 GROUP BY strftime('%Y-%m-%dT%H', created_at)
                 ORDER BY strftime('%Y-%m-%dT%H', created_at)",
            )?;
            let mut rows = stmt.query([window_modifier(hours)])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(FailureRateDataPoint {
                    hour: row_helpers::get(row, 0, "tool_calls", "created_at")?,
                    failure_percent: row_helpers::get(row, 1, "tool_calls", "status")?,
                });
            }
            Ok(results)
        })
    }

    /// Latency percentiles per tool over the trailing window.
    ///
    /// SQLite has no PERCENTILE_CONT, so durations are fetched per tool and
    /// the continuous (linearly interpolated) percentile is computed here.
    /// Only successful calls count toward latency.
    #[instrument(skip(self))]
    pub fn latency_by_tool(&self, hours: u32) -> Result<Vec<LatencyDataPoint>, StoreError> {
        let durations: BTreeMap<String, Vec<f64>> = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT tool_name, duration_ms
                 FROM tool_calls
                 WHERE datetime(created_at) >= datetime('now', ?1)
                   AND status = 'success'
                 ORDER BY tool_name, duration_ms",
            )?;
            let mut rows = stmt.query([window_modifier(hours)])?;
            let mut by_tool: BTreeMap<String, Vec<f64>> = BTreeMap::new();
            while let Some(row) = rows.next()? {
                let tool: String = row_helpers::get(row, 0, "tool_calls", "tool_name")?;
                let duration: f64 = row_helpers::get(row, 1, "tool_calls", "duration_ms")?;
                by_tool.entry(tool).or_default().push(duration);
            }
            Ok(by_tool)
        })?;

        Ok(durations
            .into_iter()
            .map(|(tool, sorted)| LatencyDataPoint {
                tool,
                p50: percentile(&sorted, 0.50),
                p95: percentile(&sorted, 0.95),
                p99: percentile(&sorted, 0.99),
            })
            .collect())
    }
}

/// SQLite datetime modifier for a trailing window of `hours`.
fn window_modifier(hours: u32) -> String {
    format!("-{hours} hours")
}

/// Continuous percentile over an ascending-sorted slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = q * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
        }
    }
}

fn row_to_tool_call(row: &rusqlite::Row<'_>) -> Result<ToolCallRow, StoreError> {
    let id: String = row_helpers::get(row, 0, "tool_calls", "id")?;
    let request_id: String = row_helpers::get(row, 1, "tool_calls", "request_id")?;
    let status: String = row_helpers::get(row, 4, "tool_calls", "status")?;
    let metadata: String = row_helpers::get(row, 8, "tool_calls", "metadata")?;

    Ok(ToolCallRow {
        id: ToolCallId::from_raw(id),
        request_id: Uuid::parse_str(&request_id).map_err(|e| StoreError::CorruptRow {
            table: "tool_calls",
            column: "request_id",
            detail: e.to_string(),
        })?,
        tool_name: row_helpers::get(row, 2, "tool_calls", "tool_name")?,
        duration_ms: row_helpers::get(row, 3, "tool_calls", "duration_ms")?,
        status: row_helpers::parse_enum(&status, "tool_calls", "status")?,
        input_tokens: row_helpers::get(row, 5, "tool_calls", "input_tokens")?,
        output_tokens: row_helpers::get(row, 6, "tool_calls", "output_tokens")?,
        error_message: row_helpers::get_opt(row, 7, "tool_calls", "error_message")?,
        metadata: row_helpers::parse_json(&metadata, "tool_calls", "metadata")?,
        created_at: row_helpers::get(row, 9, "tool_calls", "created_at")?,
    })
}
