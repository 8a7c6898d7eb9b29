pub mod database;
pub mod error;
pub mod row_helpers;
pub mod schema;
pub mod tool_calls;

pub use database::Database;
pub use error::StoreError;
pub use tool_calls::{ToolCallRepo, ToolCallRow};
