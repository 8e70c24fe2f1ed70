//! Parley - turn-based conversation coordination for generative text models
//!
//! Drives an interactive chat with a text model on a background worker,
//! streams generated fragments to a polling caller and keeps the model's
//! context window coherent over arbitrarily long sessions.

pub mod backend;
pub mod config;
pub mod coordinator;
pub mod emotion;
pub mod engine;
pub mod prompts;
pub mod session;
pub mod transcript;

pub use backend::{Backend, BackendLoader, Token};
pub use config::{
    Budget, FragmentGranularity, GenerationConfig, RotationMode, SamplingParams, ScriptedConfig,
    SessionConfig,
};
pub use coordinator::{Coordinator, CoordinatorStatus, Readiness, ReplyTicket, TurnOutcome};
pub use emotion::{AffectionScore, Emotion, EmotionInterpreter, Interpretation};
pub use engine::{ConversationEngine, FragmentSink};
pub use session::{TurnEnd, TurnState};
pub use transcript::Transcript;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParleyError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Prompt error: {0}")]
    PromptError(String),

    #[error("Model load error: {0}")]
    ModelLoadError(String),

    #[error("Inference error: {0}")]
    InferenceError(String),

    #[error("Context overflow: {0}")]
    ContextOverflow(String),

    #[error("Engine not ready: {0}")]
    NotReady(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("IO error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for ParleyError {
    fn from(e: std::io::Error) -> Self {
        ParleyError::IOError(e.to_string())
    }
}

impl ParleyError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Startup errors require fixing the configuration or assets
            ParleyError::ConfigError(_) => false,
            ParleyError::PromptError(_) => false,
            ParleyError::ModelLoadError(_) => false,
            // A failed reply is retried on the next human turn
            ParleyError::InferenceError(_) => true,
            ParleyError::ContextOverflow(_) => true,
            // The caller only has to wait for the engine
            ParleyError::NotReady(_) => true,
            ParleyError::ChannelError(_) => false,
            ParleyError::IOError(_) => false,
        }
    }

    /// Get a user-friendly description
    pub fn user_message(&self) -> String {
        match self {
            ParleyError::ConfigError(_) => {
                "Configuration error. Please check settings.".to_string()
            }
            ParleyError::PromptError(_) => {
                "Failed to read the prompt file. Please verify prompt files are present."
                    .to_string()
            }
            ParleyError::ModelLoadError(_) => {
                "Failed to load AI model. Please verify model files are present.".to_string()
            }
            ParleyError::InferenceError(_) => {
                "AI response generation failed. Please try again.".to_string()
            }
            ParleyError::ContextOverflow(_) => {
                "The message was too long for the conversation. Please try a shorter one."
                    .to_string()
            }
            ParleyError::NotReady(_) => "The AI is still waking up. Please wait.".to_string(),
            ParleyError::ChannelError(_) => {
                "Internal communication error. Please restart the application.".to_string()
            }
            ParleyError::IOError(_) => "File system error occurred.".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ParleyError>;
