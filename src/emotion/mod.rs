//! Inline emotion tags
//!
//! The agent is nudged into prefixing what it says with a mood, written as
//! `/label ` (slash, label, single space). Output arrives as a stream of
//! small fragments, so the interpreter is a small state machine: a `/`
//! fragment opens a tag, following fragments accumulate the label and a
//! lone space closes it.
//!
//! There is no escaping. A literal `/` fragment in dialogue opens a tag and
//! swallows text up to the next space.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, trace};

/// Fragment that opens a tag
pub const TAG_OPEN: &str = "/";

/// Fragment that closes a tag
pub const TAG_CLOSE: &str = " ";

/// Moods the agent can express
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    #[default]
    Neutral,
    Happy,
    Playful,
    Confused,
    Disgusted,
    Angry,
}

impl Emotion {
    pub const ALL: [Emotion; 6] = [
        Emotion::Neutral,
        Emotion::Happy,
        Emotion::Playful,
        Emotion::Confused,
        Emotion::Disgusted,
        Emotion::Angry,
    ];

    /// Parse a tag label. Labels are matched exactly.
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.label() == label)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Emotion::Neutral => "neutral",
            Emotion::Happy => "happy",
            Emotion::Playful => "playful",
            Emotion::Confused => "confused",
            Emotion::Disgusted => "disgusted",
            Emotion::Angry => "angry",
        }
    }

    /// Column of this mood in the character sprite sheet
    pub fn sprite_index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Affection change applied for each mood
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffectionTable {
    deltas: [i32; 6],
}

impl Default for AffectionTable {
    fn default() -> Self {
        Self {
            deltas: [5, 7, 10, -5, -10, -15],
        }
    }
}

impl AffectionTable {
    pub fn with_delta(mut self, emotion: Emotion, delta: i32) -> Self {
        self.deltas[emotion.sprite_index()] = delta;
        self
    }

    pub fn delta(&self, emotion: Emotion) -> i32 {
        self.deltas[emotion.sprite_index()]
    }
}

/// How much the agent likes the human, in `[0, 99]`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AffectionScore(u8);

impl AffectionScore {
    pub const MIN: u8 = 0;
    pub const MAX: u8 = 99;

    pub fn new(value: i32) -> Self {
        Self(value.clamp(Self::MIN as i32, Self::MAX as i32) as u8)
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    /// Apply a delta, clamping the result into range.
    pub fn apply(&mut self, delta: i32) {
        *self = Self::new((self.0 as i32).saturating_add(delta));
    }

    /// Fill level of a 16-step affection meter
    pub fn meter_level(&self) -> u8 {
        self.0 / 16
    }
}

/// What a fragment turned out to be
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Interpretation {
    /// Plain text for display
    Visible(String),
    /// A complete, recognized tag
    Tag(Emotion),
    /// Part of a tag still being read
    Consumed,
    /// A complete tag with an unknown label
    Dropped(String),
}

#[derive(Clone, Debug)]
pub struct EmotionInterpreter {
    in_tag: bool,
    label: String,
    emotion: Emotion,
    affection: AffectionScore,
    table: AffectionTable,
}

impl Default for EmotionInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl EmotionInterpreter {
    pub fn new() -> Self {
        Self {
            in_tag: false,
            label: String::new(),
            emotion: Emotion::Neutral,
            affection: AffectionScore::default(),
            table: AffectionTable::default(),
        }
    }

    pub fn with_table(mut self, table: AffectionTable) -> Self {
        self.table = table;
        self
    }

    pub fn with_affection(mut self, start: i32) -> Self {
        self.affection = AffectionScore::new(start);
        self
    }

    pub fn emotion(&self) -> Emotion {
        self.emotion
    }

    pub fn affection(&self) -> AffectionScore {
        self.affection
    }

    pub fn in_tag(&self) -> bool {
        self.in_tag
    }

    /// Classify one output fragment.
    pub fn feed(&mut self, fragment: &str) -> Interpretation {
        if !self.in_tag {
            if fragment == TAG_OPEN {
                self.in_tag = true;
                self.label.clear();
                return Interpretation::Consumed;
            }
            return Interpretation::Visible(fragment.to_string());
        }

        if fragment != TAG_CLOSE {
            self.label.push_str(fragment);
            return Interpretation::Consumed;
        }

        self.in_tag = false;
        let label = std::mem::take(&mut self.label);
        match Emotion::from_label(&label) {
            Some(emotion) => {
                self.emotion = emotion;
                self.affection.apply(self.table.delta(emotion));
                debug!(
                    "Emotion {} (affection {})",
                    emotion,
                    self.affection.value()
                );
                Interpretation::Tag(emotion)
            }
            None => {
                trace!("Dropping unknown tag '{}'", label);
                Interpretation::Dropped(label)
            }
        }
    }

    /// Forget a half-read tag.
    pub fn reset(&mut self) {
        self.in_tag = false;
        self.label.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_chars(interpreter: &mut EmotionInterpreter, text: &str) -> Vec<Interpretation> {
        text.chars()
            .map(|c| interpreter.feed(&c.to_string()))
            .collect()
    }

    fn visible(results: &[Interpretation]) -> String {
        results
            .iter()
            .filter_map(|r| match r {
                Interpretation::Visible(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_tag_is_consumed() {
        let mut interpreter = EmotionInterpreter::new();
        let results = feed_chars(&mut interpreter, "/happy Hello there");

        assert_eq!(visible(&results), "Hello there");
        assert!(results.contains(&Interpretation::Tag(Emotion::Happy)));
        assert_eq!(interpreter.emotion(), Emotion::Happy);
        assert_eq!(interpreter.affection().value(), 7);
        assert_eq!(interpreter.emotion().sprite_index(), 1);
    }

    #[test]
    fn test_unknown_label_dropped() {
        let mut interpreter = EmotionInterpreter::new().with_affection(50);
        let results = feed_chars(&mut interpreter, "/sleepy zzz");

        assert_eq!(visible(&results), "zzz");
        assert!(results.contains(&Interpretation::Dropped("sleepy".to_string())));
        assert_eq!(interpreter.affection().value(), 50);
        assert_eq!(interpreter.emotion(), Emotion::Neutral);
    }

    #[test]
    fn test_affection_clamped() {
        let mut interpreter = EmotionInterpreter::new();
        for _ in 0..30 {
            feed_chars(&mut interpreter, "/playful ");
        }
        assert_eq!(interpreter.affection().value(), 99);

        for _ in 0..30 {
            feed_chars(&mut interpreter, "/angry ");
        }
        assert_eq!(interpreter.affection().value(), 0);
    }

    #[test]
    fn test_extreme_table_does_not_overflow() {
        let table = AffectionTable::default()
            .with_delta(Emotion::Happy, i32::MAX)
            .with_delta(Emotion::Angry, i32::MIN);
        let mut interpreter = EmotionInterpreter::new().with_table(table).with_affection(98);

        feed_chars(&mut interpreter, "/happy ");
        assert_eq!(interpreter.affection().value(), 99);
        feed_chars(&mut interpreter, "/angry ");
        assert_eq!(interpreter.affection().value(), 0);
    }

    #[test]
    fn test_affection_stays_in_range_for_mixed_sequence() {
        let mut interpreter = EmotionInterpreter::new();
        let labels = ["neutral", "angry", "happy", "disgusted", "playful", "confused"];
        for i in 0..200 {
            let tag = format!("/{} ", labels[(i * 7) % labels.len()]);
            feed_chars(&mut interpreter, &tag);
            assert!(interpreter.affection().value() <= AffectionScore::MAX);
        }
    }

    #[test]
    fn test_multi_char_fragments_accumulate() {
        let mut interpreter = EmotionInterpreter::new();
        assert_eq!(interpreter.feed("/"), Interpretation::Consumed);
        assert_eq!(interpreter.feed("conf"), Interpretation::Consumed);
        assert_eq!(interpreter.feed("used"), Interpretation::Consumed);
        assert!(interpreter.in_tag());
        assert_eq!(interpreter.feed(" "), Interpretation::Tag(Emotion::Confused));
        assert!(!interpreter.in_tag());
    }

    #[test]
    fn test_slash_inside_text_opens_tag() {
        let mut interpreter = EmotionInterpreter::new();
        let results = feed_chars(&mut interpreter, "and/or maybe");
        assert_eq!(visible(&results), "andmaybe");
        assert!(results.contains(&Interpretation::Dropped("or".to_string())));
    }

    #[test]
    fn test_label_parsing() {
        for emotion in Emotion::ALL {
            assert_eq!(Emotion::from_label(emotion.label()), Some(emotion));
        }
        assert_eq!(Emotion::from_label("Happy"), None);
        assert_eq!(Emotion::Angry.sprite_index(), 5);
    }

    #[test]
    fn test_meter_level() {
        assert_eq!(AffectionScore::new(0).meter_level(), 0);
        assert_eq!(AffectionScore::new(40).meter_level(), 2);
        assert_eq!(AffectionScore::new(500).meter_level(), 6);
    }
}
