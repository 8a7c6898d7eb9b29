use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a tool call as reported by the agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Success,
    Failed,
}

impl std::fmt::Display for ToolCallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ToolCallStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown tool call status: {other}")),
        }
    }
}

/// Inbound tool-call telemetry event posted by an agent.
///
/// `request_id` groups the calls of one agent request into a chain and must
/// parse as a UUID; the handler validates it before the event is accepted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallEvent {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub duration_ms: i64,
    pub status: ToolCallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A message fanned out to every connected live-viewer.
///
/// Serializes as the `{"type": <kind>, "data": <payload>}` envelope the
/// stream's consumers depend on. The payload is opaque here: the hub passes
/// it through without interpreting it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BroadcastMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: serde_json::Value,
}

impl BroadcastMessage {
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Envelope for an ingested tool-call event.
    pub fn tool_call(event: &ToolCallEvent) -> Self {
        Self::new(
            "tool_call",
            serde_json::to_value(event).unwrap_or(serde_json::Value::Null),
        )
    }
}
