//! Canned-reply engine
//!
//! Plays back the lines of a prompt file one per turn, typed out like the
//! model engine would. Useful for demos and for running the full pipeline
//! without model weights.

use super::{FragmentSink, Readiness};
use crate::config::SessionConfig;
use crate::prompts;
use crate::session::{TurnEnd, TurnState};
use crate::{ParleyError, Result};
use std::time::Duration;
use tracing::{debug, info};

pub struct ScriptedEngine {
    config: SessionConfig,
    lines: Vec<String>,
    next_line: usize,
    readiness: Readiness,
    state: TurnState,
}

impl ScriptedEngine {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            lines: Vec::new(),
            next_line: 0,
            readiness: Readiness::NotStarted,
            state: TurnState::Priming,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness
    }

    pub fn turn_state(&self) -> TurnState {
        self.state
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn initialize(&mut self) -> Result<()> {
        self.readiness = Readiness::Loading;
        info!("Loading scripted engine from {}", self.config.prompt_file);

        if self.config.scripted.warmup_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.config.scripted.warmup_ms));
        }

        match self.load_lines(&self.config.prompt_file) {
            Ok(lines) => {
                info!("Scripted engine ready with {} lines", lines.len());
                self.lines = lines;
                self.readiness = Readiness::Ready;
                Ok(())
            }
            Err(e) => {
                self.readiness = Readiness::Failed;
                Err(e)
            }
        }
    }

    fn load_lines(&self, prompt_file: &str) -> Result<Vec<String>> {
        let lines = prompts::lines(&prompts::load(&self.config, prompt_file)?);
        if lines.is_empty() {
            return Err(ParleyError::PromptError(format!(
                "{} has no lines to play back",
                prompt_file
            )));
        }
        Ok(lines)
    }

    pub fn process_input(&mut self, text: &str) -> Result<()> {
        debug!("Scripted engine heard: {}", text);
        self.state = TurnState::Evaluating;
        Ok(())
    }

    pub fn generate_reply(&mut self, sink: &mut dyn FragmentSink) -> Result<TurnEnd> {
        self.state = TurnState::Sampling;
        let line = &self.lines[self.next_line % self.lines.len()];
        self.next_line = (self.next_line + 1) % self.lines.len();
        let reply = self.compose(line);

        self.state = TurnState::Echoing;
        let delay = Duration::from_millis(self.config.scripted.fragment_delay_ms);
        let chars: Vec<char> = reply.chars().collect();
        for chunk in chars.chunks(self.config.scripted.chunk_chars) {
            sink.push(chunk.iter().collect());
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
        }

        self.state = TurnState::WaitingForHuman;
        debug!("Scripted reply: {:?}", reply);
        Ok(TurnEnd::Scripted)
    }

    /// Hand the turn back explicitly unless the line already does.
    fn compose(&self, line: &str) -> String {
        let trimmed = line.trim_end();
        if trimmed.ends_with(self.config.user_label.as_str()) {
            format!("{} ", trimmed)
        } else {
            format!("{}\n{} ", line, self.config.user_label)
        }
    }

    pub fn retrain(&mut self, prompt_file: &str, sink: &mut dyn FragmentSink) -> Result<TurnEnd> {
        let lines = self.load_lines(prompt_file)?;
        info!(
            "Scripted engine retrained on {} ({} lines)",
            prompt_file,
            lines.len()
        );
        self.lines = lines;
        self.next_line = 0;
        self.generate_reply(sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn prompt_dir(files: &[(&str, &str)]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("parley-scripted-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        for (name, contents) in files {
            std::fs::write(dir.join(name), contents).unwrap();
        }
        dir
    }

    fn ready_engine(dir: &PathBuf) -> ScriptedEngine {
        let config = SessionConfig::new("Rob:", "Pocket:", "canned.txt").with_prompts_dir(dir);
        let mut engine = ScriptedEngine::new(config);
        engine.initialize().unwrap();
        engine
    }

    #[test]
    fn test_reply_ending_with_marker() {
        let dir = prompt_dir(&[("canned.txt", "Hi there Rob: \n")]);
        let mut engine = ready_engine(&dir);

        engine.process_input("Hello").unwrap();
        let mut out = Vec::new();
        let end = engine.generate_reply(&mut out).unwrap();

        assert_eq!(end, TurnEnd::Scripted);
        assert_eq!(out.concat(), "Hi there Rob: ");
        assert_eq!(out.len(), "Hi there Rob: ".chars().count());
        assert_eq!(engine.turn_state(), TurnState::WaitingForHuman);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_reply_gets_marker_appended() {
        let dir = prompt_dir(&[("canned.txt", "How was ${USERNAME}'s day?\n")]);
        let mut engine = ready_engine(&dir);

        let mut out = Vec::new();
        engine.generate_reply(&mut out).unwrap();
        assert_eq!(out.concat(), "How was Rob's day?\nRob: ");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_lines_cycle_in_order() {
        let dir = prompt_dir(&[("canned.txt", "one Rob:\ntwo Rob:\n")]);
        let mut engine = ready_engine(&dir);

        let replies: Vec<String> = (0..3)
            .map(|_| {
                let mut out = Vec::new();
                engine.generate_reply(&mut out).unwrap();
                out.concat()
            })
            .collect();
        assert_eq!(replies, vec!["one Rob: ", "two Rob: ", "one Rob: "]);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_retrain_switches_lines() {
        let dir = prompt_dir(&[
            ("canned.txt", "old line Rob:\n"),
            ("story.txt", "new line Rob:\nsecond Rob:\n"),
        ]);
        let mut engine = ready_engine(&dir);

        let mut out = Vec::new();
        engine.retrain("story.txt", &mut out).unwrap();
        assert_eq!(out.concat(), "new line Rob: ");
        assert_eq!(engine.lines().len(), 2);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_retrain_missing_file_keeps_lines() {
        let dir = prompt_dir(&[("canned.txt", "still here Rob:\n")]);
        let mut engine = ready_engine(&dir);

        let mut out = Vec::new();
        assert!(engine.retrain("missing.txt", &mut out).is_err());
        assert!(out.is_empty());
        engine.generate_reply(&mut out).unwrap();
        assert_eq!(out.concat(), "still here Rob: ");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_chunked_output() {
        let dir = prompt_dir(&[("canned.txt", "abcdefg Rob:\n")]);
        let config = SessionConfig::new("Rob:", "Pocket:", "canned.txt")
            .with_prompts_dir(&dir)
            .with_scripted(crate::config::ScriptedConfig {
                chunk_chars: 4,
                ..Default::default()
            });
        let mut engine = ScriptedEngine::new(config);
        engine.initialize().unwrap();

        let mut out = Vec::new();
        engine.generate_reply(&mut out).unwrap();
        assert_eq!(out, vec!["abcd", "efg ", "Rob:", " "]);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_prompt_fails_initialize() {
        let config = SessionConfig::default().with_prompts_dir("/nonexistent");
        let mut engine = ScriptedEngine::new(config);
        assert!(matches!(
            engine.initialize(),
            Err(ParleyError::PromptError(_))
        ));
        assert_eq!(engine.readiness(), Readiness::Failed);
    }

    #[test]
    fn test_empty_prompt_fails_initialize() {
        let dir = prompt_dir(&[("canned.txt", "\n\n")]);
        let config = SessionConfig::new("Rob:", "Pocket:", "canned.txt").with_prompts_dir(&dir);
        let mut engine = ScriptedEngine::new(config);
        assert!(engine.initialize().is_err());
        assert_eq!(engine.readiness(), Readiness::Failed);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
