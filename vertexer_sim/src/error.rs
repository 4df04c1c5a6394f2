//! Error types for the simulation harness.

use thiserror::Error;
use vertexer_core::VertexError;
use vertexer_env::EnvError;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("Engine error: {0}")]
    Engine(#[from] VertexError),

    #[error("Geometry error: {0}")]
    Env(#[from] EnvError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Bad simulation parameters
    #[error("Config error: {0}")]
    Config(String),
}

impl SimError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
