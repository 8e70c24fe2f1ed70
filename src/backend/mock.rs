//! Deterministic character-level backend for exercising the session
//!
//! Every `char` is its own token. Sampling pops from a script queue and
//! falls back to a filler character once the script runs dry. All state
//! lives behind a shared handle so tests can inspect it after the backend
//! has been moved into an engine.

use super::{Backend, Token};
use crate::config::SamplingParams;
use crate::{ParleyError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::ops::Range;
use std::sync::Arc;

pub(crate) const BOS: Token = Token(-1);
pub(crate) const EOS: Token = Token(-2);
const FILLER: char = 'a';

#[derive(Debug, Default)]
pub(crate) struct MockState {
    /// Cached (position, token) pairs
    pub cells: Vec<(usize, Token)>,
    /// Tokens handed out by `sample`, front first
    pub script: VecDeque<Token>,
    /// (n_past, batch length) for each evaluate call
    pub evaluations: Vec<(usize, usize)>,
    /// Length of the recent-token slice seen by each sample call
    pub sample_history_lens: Vec<usize>,
    pub fail_next_evaluate: bool,
    pub fail_next_sample: bool,
}

#[derive(Clone)]
pub(crate) struct MockHandle(Arc<Mutex<MockState>>);

impl MockHandle {
    pub fn script_text(&self, text: &str) {
        let mut state = self.0.lock();
        state.script.extend(text.chars().map(char_token));
    }

    pub fn script_eos(&self) {
        self.0.lock().script.push_back(EOS);
    }

    pub fn fail_next_evaluate(&self) {
        self.0.lock().fail_next_evaluate = true;
    }

    pub fn fail_next_sample(&self) {
        self.0.lock().fail_next_sample = true;
    }

    /// Cached tokens ordered by position
    pub fn cells(&self) -> Vec<(usize, Token)> {
        let mut cells = self.0.lock().cells.clone();
        cells.sort_by_key(|(pos, _)| *pos);
        cells
    }

    pub fn evaluations(&self) -> Vec<(usize, usize)> {
        self.0.lock().evaluations.clone()
    }

    pub fn sample_count(&self) -> usize {
        self.0.lock().sample_history_lens.len()
    }

    pub fn max_sample_history(&self) -> usize {
        self.0
            .lock()
            .sample_history_lens
            .iter()
            .copied()
            .max()
            .unwrap_or(0)
    }
}

pub(crate) struct MockBackend {
    n_ctx: usize,
    division: bool,
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new(n_ctx: usize) -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(MockState::default()));
        let backend = Self {
            n_ctx,
            division: true,
            state: Arc::clone(&state),
        };
        (backend, MockHandle(state))
    }

    pub fn without_division(mut self) -> Self {
        self.division = false;
        self
    }
}

pub(crate) fn char_token(c: char) -> Token {
    Token(c as i32)
}

impl Backend for MockBackend {
    fn context_size(&self) -> usize {
        self.n_ctx
    }

    fn eos_token(&self) -> Token {
        EOS
    }

    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<Token>> {
        let mut tokens = Vec::with_capacity(text.len() + 1);
        if add_bos {
            tokens.push(BOS);
        }
        tokens.extend(text.chars().map(char_token));
        Ok(tokens)
    }

    fn evaluate(&mut self, tokens: &[Token], n_past: usize) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_next_evaluate {
            state.fail_next_evaluate = false;
            return Err(ParleyError::InferenceError("mock evaluate failure".into()));
        }
        let next = state.cells.iter().map(|(p, _)| p + 1).max().unwrap_or(0);
        if n_past != next {
            return Err(ParleyError::InferenceError(format!(
                "position gap: evaluate at {} but cache ends at {}",
                n_past, next
            )));
        }
        if n_past + tokens.len() > self.n_ctx {
            return Err(ParleyError::InferenceError(format!(
                "context overflow: {} + {} > {}",
                n_past,
                tokens.len(),
                self.n_ctx
            )));
        }
        state.evaluations.push((n_past, tokens.len()));
        for (i, &token) in tokens.iter().enumerate() {
            state.cells.push((n_past + i, token));
        }
        Ok(())
    }

    fn sample(&mut self, _params: &SamplingParams, recent: &[Token]) -> Result<Token> {
        let mut state = self.state.lock();
        if state.fail_next_sample {
            state.fail_next_sample = false;
            return Err(ParleyError::InferenceError("mock sample failure".into()));
        }
        state.sample_history_lens.push(recent.len());
        Ok(state.script.pop_front().unwrap_or(char_token(FILLER)))
    }

    fn token_to_piece(&self, token: Token) -> String {
        if token == BOS || token == EOS {
            return String::new();
        }
        u32::try_from(token.0)
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    }

    fn remove_positions(&mut self, positions: Range<usize>) -> Result<()> {
        self.state
            .lock()
            .cells
            .retain(|(pos, _)| !positions.contains(pos));
        Ok(())
    }

    fn shift_positions(&mut self, positions: Range<usize>, delta: isize) -> Result<()> {
        for (pos, _) in self.state.lock().cells.iter_mut() {
            if positions.contains(pos) {
                *pos = pos.checked_add_signed(delta).ok_or_else(|| {
                    ParleyError::InferenceError("position shifted below zero".into())
                })?;
            }
        }
        Ok(())
    }

    fn divide_positions(&mut self, positions: Range<usize>, divisor: usize) -> Result<()> {
        if !self.division {
            return Err(ParleyError::InferenceError("division unsupported".into()));
        }
        for (pos, _) in self.state.lock().cells.iter_mut() {
            if positions.contains(pos) {
                *pos /= divisor;
            }
        }
        Ok(())
    }

    fn supports_position_division(&self) -> bool {
        self.division
    }
}
