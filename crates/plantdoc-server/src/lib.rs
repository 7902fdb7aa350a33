//! PlantDoc Server
//!
//! HTTP front end for the leaf diagnosis pipeline. Inference runs on
//! blocking threads behind a bounded permit pool so the async runtime keeps
//! serving health, metrics and chat requests while models are busy.

pub mod chat;
pub mod config;
pub mod routes;
pub mod state;

pub use chat::{ChatConfig, ChatRelay, ChatReply, CompletionBackend, GeminiClient, APOLOGY_REPLY, DEMO_REPLY};
pub use config::{AppConfig, ConfigOverrides, ServerConfig};
pub use routes::{create_router, AppError};
pub use state::AppState;
