pub mod events;
pub mod ids;
pub mod metrics;

pub use events::{BroadcastMessage, ToolCallEvent, ToolCallStatus};
pub use ids::ToolCallId;
