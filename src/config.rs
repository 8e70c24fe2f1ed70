//! Session configuration
//!
//! Every knob has a default matching the shipped companion character, so a
//! caller only has to name the labels and the opening prompt.

use crate::{ParleyError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Positions kept free at the end of the context window
pub const CONTEXT_MARGIN: usize = 4;

/// How many tokens the agent may emit before it must yield its turn
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Budget {
    /// Force a turn boundary after this many sampled tokens
    Limited(usize),
    /// Generate until an antiprompt or end-of-generation token
    Infinite,
    /// Like `Infinite`, but end the turn instead of rotating a full context
    UntilContextFull,
}

impl Default for Budget {
    fn default() -> Self {
        Budget::Limited(128)
    }
}

/// Strategy for making room once the context window is full
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationMode {
    /// Keep the protected prefix and drop half of what follows it
    #[default]
    Flat,
    /// Compress positions group-wise instead of discarding tokens
    Grouped {
        /// Group factor (n)
        factor: usize,
        /// Group width in positions (w)
        width: usize,
    },
}

/// Size of the fragments pushed to the outbound channel
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentGranularity {
    /// One fragment per character; required by the inline emotion tags
    #[default]
    Character,
    /// One fragment per detokenized token
    Token,
}

/// Sampler settings forwarded to the backend
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    /// Temperature for sampling (0.0 = deterministic)
    pub temperature: f32,

    /// Top-k sampling parameter (0 = disabled)
    pub top_k: usize,

    /// Top-p (nucleus) sampling parameter
    pub top_p: f32,

    /// Repetition penalty over the recent-token window (1.0 = no penalty)
    pub repeat_penalty: f32,

    /// Mirostat version (0 = off, 1 or 2)
    pub mirostat: u8,

    /// Mirostat target entropy
    pub mirostat_tau: f32,

    /// Mirostat learning rate
    pub mirostat_eta: f32,

    /// Fixed RNG seed, if any
    pub seed: Option<u64>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.6,
            top_k: 40,
            top_p: 0.95,
            repeat_penalty: 1.17647,
            mirostat: 2,
            mirostat_tau: 5.0,
            mirostat_eta: 0.1,
            seed: None,
        }
    }
}

/// Token-level generation settings for the model-backed engine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Context window size requested from the backend
    pub context_size: usize,

    /// Maximum tokens submitted per evaluate call
    pub batch_size: usize,

    /// Per-turn sampling budget
    pub budget: Budget,

    /// Protected prefix length; `None` keeps the whole initial prompt
    pub keep: Option<usize>,

    /// Context rotation strategy
    pub rotation: RotationMode,

    /// Size of the recent-token ring used for repetition penalties
    pub repeat_last_n: usize,

    /// How many recent tokens are detokenized when looking for an antiprompt
    pub antiprompt_scan_tokens: usize,

    /// Extra characters tolerated after an antiprompt; `None` picks 0 for
    /// interactive sessions and 2 otherwise
    pub antiprompt_slack: Option<usize>,

    /// Extra turn markers besides the user label
    pub extra_antiprompts: Vec<String>,

    /// Fragment size for streamed output
    pub granularity: FragmentGranularity,

    /// Whether a human takes turns with the model
    pub interactive: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            context_size: 4096,
            batch_size: 1024,
            budget: Budget::default(),
            keep: None,
            rotation: RotationMode::Flat,
            repeat_last_n: 256,
            antiprompt_scan_tokens: 32,
            antiprompt_slack: None,
            extra_antiprompts: Vec::new(),
            granularity: FragmentGranularity::Character,
            interactive: true,
        }
    }
}

impl GenerationConfig {
    /// Set the context window size
    pub fn with_context_size(mut self, context_size: usize) -> Self {
        self.context_size = context_size;
        self
    }

    /// Set the evaluation batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the sampling budget
    pub fn with_budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }

    /// Set the protected prefix length
    pub fn with_keep(mut self, keep: usize) -> Self {
        self.keep = Some(keep);
        self
    }

    /// Set the rotation mode
    pub fn with_rotation(mut self, rotation: RotationMode) -> Self {
        self.rotation = rotation;
        self
    }

    /// Set the recent-token ring size
    pub fn with_repeat_last_n(mut self, repeat_last_n: usize) -> Self {
        self.repeat_last_n = repeat_last_n;
        self
    }

    /// Set the antiprompt slack explicitly
    pub fn with_antiprompt_slack(mut self, slack: usize) -> Self {
        self.antiprompt_slack = Some(slack);
        self
    }

    /// Add a turn marker
    pub fn with_antiprompt(mut self, marker: impl Into<String>) -> Self {
        self.extra_antiprompts.push(marker.into());
        self
    }

    /// Set the fragment granularity
    pub fn with_granularity(mut self, granularity: FragmentGranularity) -> Self {
        self.granularity = granularity;
        self
    }

    /// Enable or disable interactive mode
    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// Antiprompt slack after applying the mode-dependent default
    pub fn effective_slack(&self) -> usize {
        self.antiprompt_slack
            .unwrap_or(if self.interactive { 0 } else { 2 })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.context_size <= CONTEXT_MARGIN {
            return Err(ParleyError::ConfigError(format!(
                "context size must exceed {} tokens",
                CONTEXT_MARGIN
            )));
        }
        if self.batch_size == 0 {
            return Err(ParleyError::ConfigError("batch size must be positive".into()));
        }
        if self.repeat_last_n == 0 || self.antiprompt_scan_tokens == 0 {
            return Err(ParleyError::ConfigError(
                "token history windows must be positive".into(),
            ));
        }
        if let Budget::Limited(0) = self.budget {
            return Err(ParleyError::ConfigError("token budget must be positive".into()));
        }
        if let RotationMode::Grouped { factor, width } = self.rotation {
            if factor < 2 || width == 0 || width % factor != 0 {
                return Err(ParleyError::ConfigError(format!(
                    "grouped rotation needs factor >= 2 and a width divisible by it (got n={}, w={})",
                    factor, width
                )));
            }
        }
        Ok(())
    }
}

/// Pacing of the scripted engine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptedConfig {
    /// Characters per pushed fragment
    pub chunk_chars: usize,

    /// Pause after each fragment, in milliseconds
    pub fragment_delay_ms: u64,

    /// Simulated loading time, in milliseconds
    pub warmup_ms: u64,
}

impl Default for ScriptedConfig {
    fn default() -> Self {
        Self {
            chunk_chars: 1,
            fragment_delay_ms: 0,
            warmup_ms: 0,
        }
    }
}

/// Complete configuration of one conversation session
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Label the human speaks under, e.g. `"Rob:"`
    pub user_label: String,

    /// Label the agent speaks under, e.g. `"Pocket:"`
    pub agent_label: String,

    /// Opening prompt template, relative to `prompts_dir`
    pub prompt_file: String,

    /// Directory holding prompt templates
    pub prompts_dir: PathBuf,

    /// Model weights, relative to `models_dir`; `None` selects the scripted engine
    pub model_file: Option<String>,

    /// Directory holding model files
    pub models_dir: PathBuf,

    /// Trailing characters cut from a label before it replaces a placeholder
    pub label_trim: usize,

    /// Text inserted before every human line
    pub input_prefix: String,

    /// Token-level generation settings
    pub generation: GenerationConfig,

    /// Sampler settings
    pub sampling: SamplingParams,

    /// Scripted engine pacing
    pub scripted: ScriptedConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_label: "Rob:".to_string(),
            agent_label: "Pocket:".to_string(),
            prompt_file: "initial.txt".to_string(),
            prompts_dir: PathBuf::from("assets/Prompts"),
            model_file: None,
            models_dir: PathBuf::from("assets/Models"),
            label_trim: 1,
            input_prefix: " ".to_string(),
            generation: GenerationConfig::default(),
            sampling: SamplingParams::default(),
            scripted: ScriptedConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Create a configuration for the given speakers and opening prompt
    pub fn new(
        user_label: impl Into<String>,
        agent_label: impl Into<String>,
        prompt_file: impl Into<String>,
    ) -> Self {
        Self {
            user_label: user_label.into(),
            agent_label: agent_label.into(),
            prompt_file: prompt_file.into(),
            ..Default::default()
        }
    }

    /// Load a configuration from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ParleyError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        toml::from_str(&text)
            .map_err(|e| ParleyError::ConfigError(format!("invalid {}: {}", path.display(), e)))
    }

    /// Select the model-backed engine
    pub fn with_model_file(mut self, model_file: impl Into<String>) -> Self {
        self.model_file = Some(model_file.into());
        self
    }

    /// Set the prompt directory
    pub fn with_prompts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.prompts_dir = dir.into();
        self
    }

    /// Set the model directory
    pub fn with_models_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.models_dir = dir.into();
        self
    }

    /// Set the generation settings
    pub fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    /// Set the sampler settings
    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    /// Set the scripted engine pacing
    pub fn with_scripted(mut self, scripted: ScriptedConfig) -> Self {
        self.scripted = scripted;
        self
    }

    /// Path of the opening prompt template
    pub fn prompt_path(&self) -> PathBuf {
        self.prompts_dir.join(&self.prompt_file)
    }

    /// Path of the model file, if one is configured
    pub fn model_path(&self) -> Option<PathBuf> {
        self.model_file.as_ref().map(|f| self.models_dir.join(f))
    }

    /// Markers that end the agent's turn: the user label first
    pub fn antiprompts(&self) -> Vec<String> {
        let mut markers = vec![self.user_label.clone()];
        markers.extend(self.generation.extra_antiprompts.iter().cloned());
        markers
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for (name, label) in [("user", &self.user_label), ("agent", &self.agent_label)] {
            if label.trim().is_empty() {
                return Err(ParleyError::ConfigError(format!("{} label is empty", name)));
            }
            if label.chars().count() <= self.label_trim {
                return Err(ParleyError::ConfigError(format!(
                    "{} label '{}' is shorter than the trim of {} characters",
                    name, label, self.label_trim
                )));
            }
        }
        if self.prompt_file.is_empty() {
            return Err(ParleyError::ConfigError("prompt file is not set".into()));
        }
        if self.scripted.chunk_chars == 0 {
            return Err(ParleyError::ConfigError(
                "scripted chunk size must be positive".into(),
            ));
        }
        self.generation.validate()
    }
}
