//! Conversation engines
//!
//! The coordinator drives a [`ConversationEngine`] without caring whether
//! replies come from canned lines or from a model.

pub mod model;
pub mod scripted;

use crate::backend::BackendLoader;
use crate::config::SessionConfig;
use crate::session::{TurnEnd, TurnState};
use crate::{ParleyError, Result};
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

pub use model::ModelEngine;
pub use scripted::ScriptedEngine;

/// Destination for generated text fragments
pub trait FragmentSink {
    fn push(&mut self, fragment: String);
}

impl FragmentSink for Sender<String> {
    fn push(&mut self, fragment: String) {
        // The receiving side may already be gone during teardown
        let _ = self.send(fragment);
    }
}

impl FragmentSink for Vec<String> {
    fn push(&mut self, fragment: String) {
        Vec::push(self, fragment);
    }
}

/// Engine lifecycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Readiness {
    #[default]
    NotStarted,
    Loading,
    Ready,
    /// Initialization failed; the engine will never become ready
    Failed,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

impl std::fmt::Display for Readiness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Readiness::NotStarted => write!(f, "NotStarted"),
            Readiness::Loading => write!(f, "Loading"),
            Readiness::Ready => write!(f, "Ready"),
            Readiness::Failed => write!(f, "Failed"),
        }
    }
}

pub enum ConversationEngine {
    Scripted(ScriptedEngine),
    ModelBacked(ModelEngine),
}

impl ConversationEngine {
    /// Pick the engine variant for `config`: a model file selects the
    /// model-backed engine, which then needs a loader.
    pub fn from_config(
        config: SessionConfig,
        loader: Option<Box<dyn BackendLoader>>,
    ) -> Result<Self> {
        config.validate()?;
        match (&config.model_file, loader) {
            (None, _) => Ok(ConversationEngine::Scripted(ScriptedEngine::new(config))),
            (Some(_), Some(loader)) => Ok(ConversationEngine::ModelBacked(ModelEngine::new(
                config, loader,
            ))),
            (Some(model_file), None) => Err(ParleyError::ConfigError(format!(
                "model file '{}' configured but no backend loader available",
                model_file
            ))),
        }
    }

    pub fn user_label(&self) -> &str {
        &self.config().user_label
    }

    pub fn agent_label(&self) -> &str {
        &self.config().agent_label
    }

    pub fn config(&self) -> &SessionConfig {
        match self {
            ConversationEngine::Scripted(engine) => engine.config(),
            ConversationEngine::ModelBacked(engine) => engine.config(),
        }
    }

    pub fn readiness(&self) -> Readiness {
        match self {
            ConversationEngine::Scripted(engine) => engine.readiness(),
            ConversationEngine::ModelBacked(engine) => engine.readiness(),
        }
    }

    pub fn turn_state(&self) -> TurnState {
        match self {
            ConversationEngine::Scripted(engine) => engine.turn_state(),
            ConversationEngine::ModelBacked(engine) => engine.turn_state(),
        }
    }

    /// Load resources. Runs once; a second call is rejected.
    pub fn initialize(&mut self) -> Result<()> {
        if self.readiness() != Readiness::NotStarted {
            return Err(ParleyError::ConfigError(format!(
                "engine already initialized ({})",
                self.readiness()
            )));
        }
        match self {
            ConversationEngine::Scripted(engine) => engine.initialize(),
            ConversationEngine::ModelBacked(engine) => engine.initialize(),
        }
    }

    /// Append a human turn without generating a reply.
    pub fn process_input(&mut self, text: &str, sink: &mut dyn FragmentSink) -> Result<()> {
        self.ensure_ready()?;
        match self {
            ConversationEngine::Scripted(engine) => engine.process_input(text),
            ConversationEngine::ModelBacked(engine) => engine.process_input(text, sink),
        }
    }

    /// Generate until the agent's turn ends.
    pub fn generate_reply(&mut self, sink: &mut dyn FragmentSink) -> Result<TurnEnd> {
        self.ensure_ready()?;
        match self {
            ConversationEngine::Scripted(engine) => engine.generate_reply(sink),
            ConversationEngine::ModelBacked(engine) => engine.generate_reply(sink),
        }
    }

    /// Switch to the prompt in `prompt_file` and reply to it immediately.
    pub fn retrain(&mut self, prompt_file: &str, sink: &mut dyn FragmentSink) -> Result<TurnEnd> {
        self.ensure_ready()?;
        match self {
            ConversationEngine::Scripted(engine) => engine.retrain(prompt_file, sink),
            ConversationEngine::ModelBacked(engine) => engine.retrain(prompt_file, sink),
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.readiness() {
            Readiness::Ready => Ok(()),
            other => Err(ParleyError::NotReady(format!("engine is {}", other))),
        }
    }
}
