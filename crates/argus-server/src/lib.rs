pub mod client;
pub mod event_bridge;
pub mod handlers;
pub mod server;

pub use server::{start, ServerConfig, ServerHandle};
