//! Aggregate metric shapes returned by the observability API.
//!
//! Field names are part of the external contract consumed by the dashboard;
//! `FailureRateDataPoint` keeps its historical camelCase key.

use serde::{Deserialize, Serialize};

/// Tool call successes/failures for one hourly bucket.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallDataPoint {
    pub hour: String,
    pub success: i64,
    pub failures: i64,
}

/// Latency percentiles for one tool over the query window.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LatencyDataPoint {
    pub tool: String,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Token consumption for one hourly bucket.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenUsageDataPoint {
    pub hour: String,
    pub input: i64,
    pub output: i64,
}

/// Failure percentage for one hourly bucket.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailureRateDataPoint {
    pub hour: String,
    #[serde(rename = "failurePercent")]
    pub failure_percent: f64,
}

/// Headline aggregates over the query window.
///
/// `change_percent` is a placeholder for cross-period comparison and always
/// reports 0.0.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsOverview {
    pub total_calls: i64,
    pub avg_latency_ms: f64,
    pub total_tokens: i64,
    pub failure_rate: f64,
    pub change_percent: f64,
}
