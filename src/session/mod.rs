//! Token-level conversation session
//!
//! A [`Session`] owns the backend and drives it one cycle at a time:
//! evaluate whatever is pending, forward queued prompt or human tokens, or
//! sample a new token and echo it. Each call to [`Session::generate`] runs
//! cycles until the agent's turn ends.

pub mod antiprompt;
pub mod context;
pub mod history;

use crate::backend::{Backend, Token};
use crate::config::{Budget, FragmentGranularity, GenerationConfig, SamplingParams};
use crate::engine::FragmentSink;
use crate::{ParleyError, Result};
use antiprompt::AntipromptSet;
use context::TokenContext;
use history::RecentTokens;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Fragment pushed once a turn is complete
pub const FLUSH_SENTINEL: &str = " ";

/// Where the session is within a turn
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnState {
    /// Prompt tokens queued but not yet evaluated
    #[default]
    Priming,
    /// Feeding pending tokens to the backend
    Evaluating,
    /// Drawing the next token
    Sampling,
    /// Pushing the sampled token's text to the sink
    Echoing,
    /// Checking for a turn boundary
    AwaitingTurnBoundary,
    /// The agent yielded; the human has the floor
    WaitingForHuman,
}

impl TurnState {
    /// Whether the agent is mid-turn
    pub fn is_busy(&self) -> bool {
        !matches!(self, TurnState::WaitingForHuman)
    }
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnState::Priming => write!(f, "Priming"),
            TurnState::Evaluating => write!(f, "Evaluating"),
            TurnState::Sampling => write!(f, "Sampling"),
            TurnState::Echoing => write!(f, "Echoing"),
            TurnState::AwaitingTurnBoundary => write!(f, "AwaitingTurnBoundary"),
            TurnState::WaitingForHuman => write!(f, "WaitingForHuman"),
        }
    }
}

/// Why the agent's turn ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnEnd {
    /// A turn marker appeared at the tail of the output
    Antiprompt,
    /// The backend produced its end-of-generation token
    EndOfGeneration,
    /// The per-turn token budget ran out
    BudgetExhausted,
    /// The context is full and rotation is disabled
    ContextFull,
    /// A canned reply was played back
    Scripted,
}

pub struct Session {
    backend: Box<dyn Backend>,
    context: TokenContext,
    recent: RecentTokens,
    antiprompts: AntipromptSet,
    /// Prompt and human tokens not yet forwarded for evaluation
    queued: VecDeque<Token>,
    /// Tokens forwarded or sampled but not yet evaluated
    pending: Vec<Token>,
    /// Prompt tokens the backend has not accepted yet
    prompt_left: usize,
    config: GenerationConfig,
    sampling: SamplingParams,
    remaining: usize,
    state: TurnState,
}

impl Session {
    /// Wrap a loaded backend. The session stays empty until [`Session::prime`].
    pub fn new(
        backend: Box<dyn Backend>,
        config: GenerationConfig,
        sampling: SamplingParams,
        antiprompts: Vec<String>,
    ) -> Result<Self> {
        config.validate()?;
        if matches!(config.rotation, crate::config::RotationMode::Grouped { .. })
            && !backend.supports_position_division()
        {
            return Err(ParleyError::ConfigError(
                "grouped rotation needs a backend that can divide positions".to_string(),
            ));
        }

        let context = TokenContext::new(backend.context_size(), config.rotation);
        let recent = RecentTokens::new(config.repeat_last_n);
        let antiprompts = AntipromptSet::new(antiprompts, config.effective_slack());
        let remaining = match config.budget {
            Budget::Limited(n) => n,
            _ => 0,
        };

        info!(
            "Session ready: n_ctx = {}, n_batch = {}, budget = {:?}, rotation = {:?}",
            backend.context_size(),
            config.batch_size,
            config.budget,
            config.rotation
        );

        Ok(Self {
            backend,
            context,
            recent,
            antiprompts,
            queued: VecDeque::new(),
            pending: Vec::new(),
            prompt_left: 0,
            config,
            sampling,
            remaining,
            state: TurnState::WaitingForHuman,
        })
    }

    /// Replace everything in the context with `prompt`.
    ///
    /// A prompt that does not fit is rejected before anything is touched.
    /// The prompt is evaluated by the next [`Session::generate`].
    pub fn prime(&mut self, prompt: &str) -> Result<()> {
        let tokens = self.backend.tokenize(prompt, true)?;
        if tokens.len() > self.context.limit() {
            return Err(ParleyError::ConfigError(format!(
                "prompt too long ({} tokens, max {})",
                tokens.len(),
                self.context.limit()
            )));
        }

        self.context.clear(self.backend.as_mut())?;
        let keep = self
            .config
            .keep
            .map(|k| k.min(tokens.len()))
            .unwrap_or(tokens.len());
        self.context.set_keep(keep);
        self.recent.clear();
        self.pending.clear();
        self.prompt_left = tokens.len();
        self.queued = tokens.into();
        self.state = TurnState::Priming;

        debug!("Primed with {} tokens, keeping {}", self.queued.len(), keep);
        Ok(())
    }

    /// Switch to a new prompt and start a fresh budget window.
    pub fn retrain(&mut self, prompt: &str) -> Result<()> {
        self.prime(prompt)?;
        if let Budget::Limited(n) = self.config.budget {
            self.remaining = n;
        }
        Ok(())
    }

    /// Whether part of the prompt still waits for evaluation
    pub fn is_priming(&self) -> bool {
        self.prompt_left > 0
    }

    /// Tokenize `text` (no BOS) and queue it behind any pending input.
    pub fn queue_text(&mut self, text: &str) -> Result<usize> {
        let tokens = self.backend.tokenize(text, false)?;
        let count = tokens.len();
        self.queued.extend(tokens);
        Ok(count)
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Tokens left in the current budget window (`Budget::Limited` only)
    pub fn remaining_budget(&self) -> usize {
        self.remaining
    }

    pub fn n_past(&self) -> usize {
        self.context.n_past()
    }

    pub fn context(&self) -> &TokenContext {
        &self.context
    }

    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    /// Run cycles until the agent yields its turn.
    ///
    /// On a backend failure the pending tokens are dropped and the session
    /// goes back to waiting for the human, so the next turn starts clean.
    /// Prompt tokens are the exception: they go back in front of the queue
    /// and are retried by the next turn.
    pub fn generate(&mut self, sink: &mut dyn FragmentSink) -> Result<TurnEnd> {
        let start = Instant::now();
        match self.run_turn(sink) {
            Ok(end) => {
                self.state = TurnState::WaitingForHuman;
                sink.push(FLUSH_SENTINEL.to_string());
                debug!(
                    "Turn ended by {:?} after {}ms (n_past = {}, budget left = {})",
                    end,
                    start.elapsed().as_millis(),
                    self.context.n_past(),
                    self.remaining
                );
                Ok(end)
            }
            Err(e) => {
                error!("Turn failed: {}", e);
                if self.prompt_left > 0 {
                    self.requeue_pending();
                } else {
                    self.pending.clear();
                }
                self.state = TurnState::WaitingForHuman;
                Err(e)
            }
        }
    }

    fn run_turn(&mut self, sink: &mut dyn FragmentSink) -> Result<TurnEnd> {
        loop {
            if !self.pending.is_empty() {
                if let Some(end) = self.evaluate_pending()? {
                    return Ok(end);
                }
            }

            if !self.queued.is_empty() {
                self.forward_queued();
                continue;
            }

            let token = self.sample()?;
            self.echo(token, sink);

            self.state = TurnState::AwaitingTurnBoundary;
            if let Some(end) = self.check_boundary(token, sink)? {
                return Ok(end);
            }
        }
    }

    fn evaluate_pending(&mut self) -> Result<Option<TurnEnd>> {
        if self.state != TurnState::Priming {
            self.state = TurnState::Evaluating;
        }

        let limit = self.context.limit();
        if self.pending.len() > limit {
            let skipped = self.pending.len() - limit;
            warn!(
                "Input too long: skipped {} token{}",
                skipped,
                if skipped != 1 { "s" } else { "" }
            );
            self.pending.truncate(limit);
        }

        if self.config.budget == Budget::UntilContextFull && !self.context.fits(self.pending.len())
        {
            info!("Context full, ending turn");
            self.pending.clear();
            return Ok(Some(TurnEnd::ContextFull));
        }

        let batch = std::mem::take(&mut self.pending);
        let before = self.context.evaluated();
        let result = self
            .context
            .evaluate(self.backend.as_mut(), &batch, self.config.batch_size);
        let done = self.context.evaluated() - before;
        self.prompt_left = self.prompt_left.saturating_sub(done);
        if let Err(e) = result {
            self.pending = batch[done..].to_vec();
            return Err(e);
        }
        Ok(None)
    }

    /// Put unevaluated tokens back in front of the queue.
    fn requeue_pending(&mut self) {
        let count = self.pending.len();
        for token in self.pending.drain(..).rev() {
            self.queued.push_front(token);
        }
        // Forwarding pushed them already; they are pushed again on retry
        self.recent.clear();
        for &token in self.context.resident() {
            self.recent.push(token);
        }
        warn!(
            "Prompt interrupted, {} tokens requeued ({} still to evaluate)",
            count, self.prompt_left
        );
    }

    /// Move up to one batch of queued tokens into the pending buffer.
    fn forward_queued(&mut self) {
        let mut forwarded = 0;
        while let Some(token) = self.queued.pop_front() {
            self.pending.push(token);
            self.recent.push(token);
            forwarded += 1;
            if self.pending.len() >= self.config.batch_size {
                break;
            }
        }
        debug!("Forwarded {} queued tokens", forwarded);
    }

    fn sample(&mut self) -> Result<Token> {
        self.state = TurnState::Sampling;
        let recent = self.recent.to_vec();
        let token = self.backend.sample(&self.sampling, &recent)?;

        self.recent.push(token);
        self.pending.push(token);
        if let Budget::Limited(_) = self.config.budget {
            self.remaining = self.remaining.saturating_sub(1);
        }
        Ok(token)
    }

    fn echo(&mut self, token: Token, sink: &mut dyn FragmentSink) {
        self.state = TurnState::Echoing;
        if token == self.backend.eos_token() {
            return;
        }
        let piece = self.backend.token_to_piece(token);
        match self.config.granularity {
            FragmentGranularity::Character => {
                for c in piece.chars() {
                    sink.push(c.to_string());
                }
            }
            FragmentGranularity::Token => {
                if !piece.is_empty() {
                    sink.push(piece);
                }
            }
        }
    }

    fn check_boundary(
        &mut self,
        token: Token,
        sink: &mut dyn FragmentSink,
    ) -> Result<Option<TurnEnd>> {
        let tail = self.recent.tail(self.config.antiprompt_scan_tokens);
        let text = self.backend.detokenize(&tail);
        if let Some(marker) = self.antiprompts.find_at_tail(&text) {
            debug!("Found turn marker '{}'", marker);
            return Ok(Some(TurnEnd::Antiprompt));
        }

        let marker = self.antiprompts.primary().map(str::to_string);

        if token == self.backend.eos_token() {
            debug!("Found end-of-generation token");
            if let Some(marker) = marker {
                self.queue_text(&format!("\n{} ", marker))?;
                sink.push(format!("\n{}", marker));
            }
            return Ok(Some(TurnEnd::EndOfGeneration));
        }

        if let Budget::Limited(n) = self.config.budget {
            if self.remaining == 0 {
                debug!("Reached the token budget of {}", n);
                self.remaining = n;
                if let Some(marker) = marker {
                    self.queue_text(&format!("\n{}", marker))?;
                    sink.push(format!(" ...\n{}", marker));
                }
                return Ok(Some(TurnEnd::BudgetExhausted));
            }
        }

        Ok(None)
    }
}
