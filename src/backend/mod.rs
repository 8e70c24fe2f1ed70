//! Opaque model backend interface
//!
//! The conversation layer never touches weights, logits or attention state
//! directly. Everything it needs from a model is expressed by [`Backend`]:
//! tokenize, evaluate a batch at a position, sample the next token,
//! detokenize, and a handful of position-cache edits used by context
//! rotation.

#[cfg(test)]
pub(crate) mod mock;

use crate::config::{GenerationConfig, SamplingParams};
use crate::{ParleyError, Result};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::Path;

/// Wrapper for a model token id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Token(pub i32);

impl From<i32> for Token {
    #[inline]
    fn from(value: i32) -> Self {
        Token(value)
    }
}

impl From<Token> for i32 {
    #[inline]
    fn from(token: Token) -> i32 {
        token.0
    }
}

/// A loaded model the session can drive token by token.
///
/// Implementations own their native resources and release them on drop.
/// Positions refer to slots in the backend's attention cache; the session
/// keeps its own mirror of which token lives where.
pub trait Backend: Send {
    /// Maximum number of positions the context can hold (n_ctx).
    fn context_size(&self) -> usize;

    /// End-of-generation token.
    fn eos_token(&self) -> Token;

    /// Tokenize text, optionally prepending the beginning-of-sequence token.
    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<Token>>;

    /// Evaluate `tokens` starting at position `n_past`.
    fn evaluate(&mut self, tokens: &[Token], n_past: usize) -> Result<()>;

    /// Draw the next token from the logits of the last evaluation.
    ///
    /// `recent` holds the most recent tokens, oldest first, for repetition
    /// penalties.
    fn sample(&mut self, params: &SamplingParams, recent: &[Token]) -> Result<Token>;

    /// Text piece for a single token.
    fn token_to_piece(&self, token: Token) -> String;

    /// Drop every cached token whose position lies in `positions`.
    fn remove_positions(&mut self, positions: Range<usize>) -> Result<()>;

    /// Add `delta` to the position of every cached token in `positions`.
    fn shift_positions(&mut self, positions: Range<usize>, delta: isize) -> Result<()>;

    /// Integer-divide the position of every cached token in `positions`.
    ///
    /// Needed for grouped rotation only.
    fn divide_positions(&mut self, _positions: Range<usize>, _divisor: usize) -> Result<()> {
        Err(ParleyError::InferenceError(
            "backend does not support position division".to_string(),
        ))
    }

    /// Whether [`Backend::divide_positions`] is implemented.
    fn supports_position_division(&self) -> bool {
        false
    }

    /// Detokenize a run of tokens by concatenating their pieces.
    fn detokenize(&self, tokens: &[Token]) -> String {
        tokens.iter().map(|&t| self.token_to_piece(t)).collect()
    }
}

/// Builds a backend from a model file.
///
/// Loading is slow (often minutes) and always runs on the coordinator's
/// worker thread.
pub trait BackendLoader: Send {
    fn load(&self, model_path: &Path, config: &GenerationConfig) -> Result<Box<dyn Backend>>;
}

impl<F> BackendLoader for F
where
    F: Fn(&Path, &GenerationConfig) -> Result<Box<dyn Backend>> + Send,
{
    fn load(&self, model_path: &Path, config: &GenerationConfig) -> Result<Box<dyn Backend>> {
        self(model_path, config)
    }
}
