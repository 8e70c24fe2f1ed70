//! Presentation-side view of a conversation
//!
//! Consumes the fragments drained from the coordinator, strips emotion tags,
//! tracks whose turn it is and keeps a timestamped log of who said what.

use crate::emotion::{AffectionScore, Emotion, EmotionInterpreter, Interpretation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

/// Hint prepended to human lines so the agent keeps tagging its replies
pub const DEFAULT_EMOTION_HINT: &str = "/neutral ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speaker {
    Human,
    Agent,
    Narrator,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: Uuid,
    pub speaker: Speaker,
    pub text: String,
    /// Last mood shown while this entry was written
    pub emotion: Option<Emotion>,
    pub affection: u8,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    fn new(speaker: Speaker, text: String, emotion: Option<Emotion>, affection: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            speaker,
            text,
            emotion,
            affection,
            timestamp: Utc::now(),
        }
    }
}

pub struct Transcript {
    user_label: String,
    agent_label: String,
    interpreter: EmotionInterpreter,
    text: String,
    reply: String,
    reply_emotion: Option<Emotion>,
    entries: Vec<TranscriptEntry>,
    is_interacting: bool,
    exchanges: usize,
    max_exchanges: Option<usize>,
    closing_lines: Vec<String>,
    finished: bool,
    emotion_hint: String,
}

impl Transcript {
    pub fn new(user_label: impl Into<String>, agent_label: impl Into<String>) -> Self {
        let agent_label = agent_label.into();
        let closing_lines = vec![
            "(You hear the bells ring)\n".to_string(),
            format!(
                "\n{} Anyways. Looks like its time for class. See you later!\n",
                agent_label
            ),
        ];
        Self {
            user_label: user_label.into(),
            agent_label,
            interpreter: EmotionInterpreter::new(),
            text: String::new(),
            reply: String::new(),
            reply_emotion: None,
            entries: Vec::new(),
            is_interacting: false,
            exchanges: 0,
            max_exchanges: None,
            closing_lines,
            finished: false,
            emotion_hint: DEFAULT_EMOTION_HINT.to_string(),
        }
    }

    /// End the conversation after `max` agent turns.
    pub fn with_max_exchanges(mut self, max: usize) -> Self {
        self.max_exchanges = Some(max);
        self
    }

    pub fn with_closing_lines(mut self, lines: Vec<String>) -> Self {
        self.closing_lines = lines;
        self
    }

    pub fn with_emotion_hint(mut self, hint: impl Into<String>) -> Self {
        self.emotion_hint = hint.into();
        self
    }

    pub fn with_interpreter(mut self, interpreter: EmotionInterpreter) -> Self {
        self.interpreter = interpreter;
        self
    }

    /// Route one drained fragment.
    pub fn feed(&mut self, fragment: &str) -> Interpretation {
        let interpretation = self.interpreter.feed(fragment);
        match &interpretation {
            Interpretation::Visible(text) => {
                self.text.push_str(text);
                self.reply.push_str(text);
                self.check_turn_marker();
            }
            Interpretation::Tag(emotion) => self.reply_emotion = Some(*emotion),
            Interpretation::Consumed | Interpretation::Dropped(_) => {}
        }
        interpretation
    }

    fn check_turn_marker(&mut self) {
        if self.finished || self.is_interacting {
            return;
        }
        let marker = format!("{} ", self.user_label);
        if !self.text.ends_with(&marker) {
            return;
        }

        self.is_interacting = true;
        self.exchanges += 1;
        let reply = std::mem::take(&mut self.reply);
        let reply = reply.strip_suffix(&marker).unwrap_or(&reply).trim().to_string();
        let emotion = self.reply_emotion.take();
        self.record(Speaker::Agent, reply, emotion);
        debug!("Agent turn {} complete", self.exchanges);

        if self.max_exchanges == Some(self.exchanges) {
            self.close();
        }
    }

    fn close(&mut self) {
        info!("Conversation finished after {} exchanges", self.exchanges);
        for line in self.closing_lines.clone() {
            self.text.push_str(&line);
            let speaker = if line.trim_start().starts_with(self.agent_label.as_str()) {
                Speaker::Agent
            } else {
                Speaker::Narrator
            };
            self.record(speaker, line.trim().to_string(), None);
        }
        self.is_interacting = false;
        self.finished = true;
    }

    fn record(&mut self, speaker: Speaker, text: String, emotion: Option<Emotion>) {
        if text.is_empty() {
            return;
        }
        let affection = self.interpreter.affection().value();
        self.entries
            .push(TranscriptEntry::new(speaker, text, emotion, affection));
    }

    /// Turn a typed line into coordinator input, taking the floor from the
    /// human. Returns `None` when it is not the human's turn.
    pub fn compose_input(&mut self, line: &str) -> Option<String> {
        if !self.is_interacting || self.finished {
            return None;
        }
        self.text.push_str(line);
        self.text.push('\n');
        self.record(Speaker::Human, line.trim().to_string(), None);
        self.is_interacting = false;
        Some(format!("{}{}", self.emotion_hint, line))
    }

    /// Recovery input for when the agent seems stuck.
    pub fn unstick(&mut self) -> String {
        self.text.push('\n');
        self.is_interacting = true;
        format!("{} /confused \nSorry, can you repeat that?", self.user_label)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_interacting(&self) -> bool {
        self.is_interacting
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn exchanges(&self) -> usize {
        self.exchanges
    }

    pub fn emotion(&self) -> Emotion {
        self.interpreter.emotion()
    }

    pub fn affection(&self) -> AffectionScore {
        self.interpreter.affection()
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.entries)
    }
}
