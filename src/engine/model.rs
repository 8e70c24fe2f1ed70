use super::{FragmentSink, Readiness};
use crate::backend::BackendLoader;
use crate::config::SessionConfig;
use crate::prompts;
use crate::session::{Session, TurnEnd, TurnState};
use crate::{ParleyError, Result};
use std::time::Instant;
use tracing::{debug, info};

/// Engine backed by a generative model
pub struct ModelEngine {
    config: SessionConfig,
    loader: Box<dyn BackendLoader>,
    session: Option<Session>,
    readiness: Readiness,
}

impl ModelEngine {
    pub fn new(config: SessionConfig, loader: Box<dyn BackendLoader>) -> Self {
        Self {
            config,
            loader,
            session: None,
            readiness: Readiness::NotStarted,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness
    }

    pub fn turn_state(&self) -> TurnState {
        self.session
            .as_ref()
            .map(Session::state)
            .unwrap_or_default()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Load the model and prime it with the opening prompt.
    pub fn initialize(&mut self) -> Result<()> {
        self.readiness = Readiness::Loading;
        match self.load() {
            Ok(session) => {
                self.session = Some(session);
                self.readiness = Readiness::Ready;
                Ok(())
            }
            Err(e) => {
                self.readiness = Readiness::Failed;
                Err(e)
            }
        }
    }

    fn load(&self) -> Result<Session> {
        let model_path = self
            .config
            .model_path()
            .ok_or_else(|| ParleyError::ConfigError("no model file configured".to_string()))?;
        let prompt = prompts::load(&self.config, &self.config.prompt_file)?;

        info!("Loading model from {}", model_path.display());
        let start = Instant::now();
        let backend = self.loader.load(&model_path, &self.config.generation)?;
        info!(
            "Model loaded in {:.1}s (n_ctx = {})",
            start.elapsed().as_secs_f32(),
            backend.context_size()
        );

        let mut session = Session::new(
            backend,
            self.config.generation.clone(),
            self.config.sampling.clone(),
            self.config.antiprompts(),
        )?;
        session.prime(&prompt)?;
        Ok(session)
    }

    fn session_mut(&mut self) -> Result<&mut Session> {
        self.session
            .as_mut()
            .ok_or_else(|| ParleyError::NotReady("model is not loaded".to_string()))
    }

    /// Queue a human line, echoing the agent label so the transcript names
    /// the next speaker. An empty line passes the turn straight back.
    ///
    /// Input that arrives while the prompt is still unevaluated (a failed
    /// opening turn) waits behind it.
    pub fn process_input(&mut self, text: &str, sink: &mut dyn FragmentSink) -> Result<()> {
        let prefix = self.config.input_prefix.clone();
        let agent_label = self.config.agent_label.clone();
        let session = self.session_mut()?;

        if session.is_priming() {
            debug!("Prompt not evaluated yet, input goes behind it");
        }

        let mut buffer = prefix;
        buffer.push_str(text);
        if buffer.chars().count() > 1 {
            buffer.push_str(&agent_label);
            buffer.push(' ');
            for c in agent_label.chars() {
                sink.push(c.to_string());
            }
            let count = session.queue_text(&buffer)?;
            debug!("Queued {} input tokens", count);
        } else {
            debug!("Empty line, passing control back");
        }
        Ok(())
    }

    pub fn generate_reply(&mut self, sink: &mut dyn FragmentSink) -> Result<TurnEnd> {
        self.session_mut()?.generate(sink)
    }

    /// Replace the opening prompt and reply to the new one.
    pub fn retrain(&mut self, prompt_file: &str, sink: &mut dyn FragmentSink) -> Result<TurnEnd> {
        let prompt = prompts::load(&self.config, prompt_file)?;
        info!("Retraining on {}", prompt_file);
        let session = self.session_mut()?;
        session.retrain(&prompt)?;
        session.generate(sink)
    }
}
