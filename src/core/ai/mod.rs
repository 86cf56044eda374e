pub mod ai_provider;
pub mod models;

pub use ai_provider::{AiError, AiProvider};
pub use models::{AiConfig, AiMessage};
