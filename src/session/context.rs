//! Mirror of the backend's attention cache and the rotation that keeps it
//! inside the context window.

use crate::backend::{Backend, Token};
use crate::config::{RotationMode, CONTEXT_MARGIN};
use crate::{ParleyError, Result};
use tracing::{debug, info};

/// Tokens resident in the backend, in evaluation order
///
/// `n_past` is the next free position. In flat mode it equals the number of
/// resident tokens; grouped rotation packs several tokens per position so it
/// grows slower.
pub struct TokenContext {
    resident: Vec<Token>,
    n_past: usize,
    keep: usize,
    limit: usize,
    rotation: RotationMode,
    /// Start of the first uncompressed group (grouped mode)
    group_start: usize,
    /// Tokens accepted by the backend since creation, never rewound
    evaluated: usize,
}

impl TokenContext {
    pub fn new(context_size: usize, rotation: RotationMode) -> Self {
        Self {
            resident: Vec::new(),
            n_past: 0,
            keep: 0,
            limit: context_size.saturating_sub(CONTEXT_MARGIN),
            rotation,
            group_start: 0,
            evaluated: 0,
        }
    }

    pub fn n_past(&self) -> usize {
        self.n_past
    }

    /// Protected prefix length
    pub fn keep(&self) -> usize {
        self.keep
    }

    pub fn set_keep(&mut self, keep: usize) {
        self.keep = keep;
    }

    /// Positions usable before rotation kicks in
    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn resident(&self) -> &[Token] {
        &self.resident
    }

    /// Running count of evaluated tokens; the difference across a failed
    /// [`TokenContext::evaluate`] tells how much of the input got in.
    pub fn evaluated(&self) -> usize {
        self.evaluated
    }

    /// Whether `pending` more positions fit without rotating
    pub fn fits(&self, pending: usize) -> bool {
        self.n_past + pending <= self.limit
    }

    /// Evaluate `tokens` in batches, rotating the context as needed.
    ///
    /// On error the tokens of the failing batch are not recorded; everything
    /// evaluated before it stays resident.
    pub fn evaluate(
        &mut self,
        backend: &mut dyn Backend,
        tokens: &[Token],
        batch_size: usize,
    ) -> Result<()> {
        let chunk_size = match self.rotation {
            RotationMode::Flat => batch_size,
            RotationMode::Grouped { width, .. } => batch_size.min(width),
        }
        .max(1);

        for chunk in tokens.chunks(chunk_size) {
            if let RotationMode::Grouped { factor, width } = self.rotation {
                self.compress_groups(backend, factor, width)?;
            }
            if !self.fits(chunk.len()) {
                match self.rotation {
                    RotationMode::Flat => self.rotate_flat(backend, chunk.len())?,
                    RotationMode::Grouped { .. } => {
                        return Err(ParleyError::ContextOverflow(format!(
                            "{} positions in use, {} more requested, limit {}",
                            self.n_past,
                            chunk.len(),
                            self.limit
                        )))
                    }
                }
            }

            backend.evaluate(chunk, self.n_past)?;
            self.resident.extend_from_slice(chunk);
            self.n_past += chunk.len();
            self.evaluated += chunk.len();
        }
        Ok(())
    }

    /// Drop half of the tokens after the protected prefix until `pending`
    /// more positions fit.
    fn rotate_flat(&mut self, backend: &mut dyn Backend, pending: usize) -> Result<()> {
        while !self.fits(pending) {
            let n_left = self.n_past.saturating_sub(self.keep);
            let n_discard = n_left / 2;
            if n_discard == 0 {
                return Err(ParleyError::ContextOverflow(format!(
                    "cannot free {} positions: {} in use, {} protected",
                    pending, self.n_past, self.keep
                )));
            }
            info!(
                "Context full, rotating: n_past = {}, n_keep = {}, discarding {}",
                self.n_past, self.keep, n_discard
            );

            let first = self.keep;
            let rest = first + n_discard;
            backend.remove_positions(first..rest)?;
            backend.shift_positions(rest..self.n_past, -(n_discard as isize))?;

            self.resident.drain(first..rest);
            self.n_past -= n_discard;
        }
        Ok(())
    }

    /// Self-extend: pack each full window of `width` positions into
    /// `width / factor` positions.
    fn compress_groups(
        &mut self,
        backend: &mut dyn Backend,
        factor: usize,
        width: usize,
    ) -> Result<()> {
        while self.n_past >= self.group_start + width {
            let ga_i = self.group_start;
            let ib = (factor * ga_i) / width;
            let bd = (width / factor) * (factor - 1);
            let offset = ib * bd;
            let dd = (width / factor) as isize - offset as isize - width as isize;

            debug!(
                "Compressing group: n_past = {}, start = {}, shift = {}, delta = {}",
                self.n_past, ga_i, offset, dd
            );

            backend.shift_positions(ga_i..self.n_past, offset as isize)?;
            backend.divide_positions(ga_i + offset..ga_i + offset + width, factor)?;
            backend.shift_positions(ga_i + offset + width..self.n_past + offset, dd)?;

            self.n_past -= bd;
            self.group_start += width / factor;
        }
        Ok(())
    }

    /// Forget every resident token.
    pub fn clear(&mut self, backend: &mut dyn Backend) -> Result<()> {
        if self.n_past > 0 {
            backend.remove_positions(0..self.n_past)?;
        }
        self.resident.clear();
        self.n_past = 0;
        self.keep = 0;
        self.group_start = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{char_token, MockBackend};

    fn tokens(text: &str) -> Vec<Token> {
        text.chars().map(char_token).collect()
    }

    #[test]
    fn test_evaluate_in_batches() {
        let (mut backend, handle) = MockBackend::new(64);
        let mut context = TokenContext::new(64, RotationMode::Flat);

        context
            .evaluate(&mut backend, &tokens("hello world"), 4)
            .unwrap();

        assert_eq!(context.n_past(), 11);
        assert_eq!(handle.evaluations(), vec![(0, 4), (4, 4), (8, 3)]);
        assert_eq!(context.resident(), tokens("hello world").as_slice());
    }

    #[test]
    fn test_flat_rotation_keeps_prefix() {
        let (mut backend, handle) = MockBackend::new(24);
        let mut context = TokenContext::new(24, RotationMode::Flat);
        context.evaluate(&mut backend, &tokens("KEEP"), 8).unwrap();
        context.set_keep(4);

        // 4 + 16 = 20 = limit, still fits
        context
            .evaluate(&mut backend, &tokens("abcdefghijklmnop"), 8)
            .unwrap();
        assert_eq!(context.n_past(), 20);

        // One more token forces a rotation discarding (20 - 4) / 2 = 8
        context.evaluate(&mut backend, &tokens("Z"), 8).unwrap();
        assert_eq!(context.n_past(), 13);

        let cells = handle.cells();
        let text: String = cells
            .iter()
            .map(|(_, t)| char::from_u32(t.0 as u32).unwrap())
            .collect();
        assert_eq!(text, "KEEPijklmnopZ");
        let positions: Vec<usize> = cells.iter().map(|(p, _)| *p).collect();
        assert_eq!(positions, (0..13).collect::<Vec<_>>());
        assert_eq!(context.resident(), tokens("KEEPijklmnopZ").as_slice());
    }

    #[test]
    fn test_never_exceeds_limit() {
        let (mut backend, handle) = MockBackend::new(32);
        let mut context = TokenContext::new(32, RotationMode::Flat);
        context.evaluate(&mut backend, &tokens("PP"), 8).unwrap();
        context.set_keep(2);

        for _ in 0..200 {
            context.evaluate(&mut backend, &tokens("x"), 8).unwrap();
            assert!(context.n_past() <= context.limit());
        }
        for (n_past, len) in handle.evaluations() {
            assert!(n_past + len <= 32 - CONTEXT_MARGIN);
        }
        let cells = handle.cells();
        assert_eq!(cells[0].1, char_token('P'));
        assert_eq!(cells[1].1, char_token('P'));
    }

    #[test]
    fn test_rotation_fails_when_prefix_fills_context() {
        let (mut backend, _) = MockBackend::new(12);
        let mut context = TokenContext::new(12, RotationMode::Flat);
        context.evaluate(&mut backend, &tokens("12345678"), 8).unwrap();
        context.set_keep(8);

        let result = context.evaluate(&mut backend, &tokens("x"), 8);
        assert!(matches!(result, Err(ParleyError::ContextOverflow(_))));
        assert_eq!(context.n_past(), 8);
    }

    #[test]
    fn test_grouped_compression() {
        let (mut backend, handle) = MockBackend::new(64);
        let mut context = TokenContext::new(
            64,
            RotationMode::Grouped {
                factor: 2,
                width: 8,
            },
        );

        context
            .evaluate(&mut backend, &tokens("abcdefghijkl"), 16)
            .unwrap();
        // First 8 positions are packed into 4 before the second chunk
        assert_eq!(context.n_past(), 8);
        assert_eq!(handle.evaluations(), vec![(0, 8), (4, 4)]);

        context.evaluate(&mut backend, &tokens("mnop"), 16).unwrap();
        assert_eq!(context.n_past(), 12);

        // The second window (positions 4..12) is packed before "q"
        context.evaluate(&mut backend, &tokens("q"), 16).unwrap();
        assert_eq!(context.n_past(), 9);
        assert_eq!(context.resident().len(), 17);

        let cells = handle.cells();
        let max = cells.iter().map(|(p, _)| *p).max().unwrap();
        assert_eq!(max + 1, context.n_past());
        // Token order is preserved
        let text: String = cells
            .iter()
            .map(|(_, t)| char::from_u32(t.0 as u32).unwrap())
            .collect();
        assert_eq!(text, "abcdefghijklmnopq");
    }

    #[test]
    fn test_failed_batch_not_recorded() {
        let (mut backend, handle) = MockBackend::new(64);
        let mut context = TokenContext::new(64, RotationMode::Flat);
        context.evaluate(&mut backend, &tokens("ok"), 8).unwrap();

        handle.fail_next_evaluate();
        assert!(context.evaluate(&mut backend, &tokens("bad"), 8).is_err());
        assert_eq!(context.n_past(), 2);
        assert_eq!(context.evaluated(), 2);

        context.evaluate(&mut backend, &tokens("go"), 8).unwrap();
        assert_eq!(context.n_past(), 4);
        assert_eq!(context.evaluated(), 4);
    }

    #[test]
    fn test_clear() {
        let (mut backend, handle) = MockBackend::new(64);
        let mut context = TokenContext::new(64, RotationMode::Flat);
        context.evaluate(&mut backend, &tokens("abc"), 8).unwrap();
        context.set_keep(3);
        context.clear(&mut backend).unwrap();

        assert_eq!(context.n_past(), 0);
        assert_eq!(context.keep(), 0);
        assert!(handle.cells().is_empty());
    }
}
