//! Prompt templates
//!
//! Templates are plain text files that may mention the speakers through the
//! `${USERNAME}` and `${AINAME}` placeholders.

use crate::config::SessionConfig;
use crate::{ParleyError, Result};
use std::path::Path;
use tracing::debug;

/// Placeholder for the human's name
pub const USER_PLACEHOLDER: &str = "${USERNAME}";

/// Placeholder for the agent's name
pub const AGENT_PLACEHOLDER: &str = "${AINAME}";

/// Cut `trim` trailing characters from a label (`"Rob:"` becomes `"Rob"`).
pub fn display_name(label: &str, trim: usize) -> &str {
    let keep = label.chars().count().saturating_sub(trim);
    match label.char_indices().nth(keep) {
        Some((idx, _)) => &label[..idx],
        None => label,
    }
}

/// Replace every placeholder in `template`.
pub fn substitute(template: &str, user_label: &str, agent_label: &str, trim: usize) -> String {
    template
        .replace(USER_PLACEHOLDER, display_name(user_label, trim))
        .replace(AGENT_PLACEHOLDER, display_name(agent_label, trim))
}

/// Read a template file and substitute the speakers configured in `config`.
pub fn load(config: &SessionConfig, prompt_file: &str) -> Result<String> {
    let path = config.prompts_dir.join(prompt_file);
    let template = read_template(&path)?;
    debug!(
        "Loaded prompt template {} ({} bytes)",
        path.display(),
        template.len()
    );
    Ok(substitute(
        &template,
        &config.user_label,
        &config.agent_label,
        config.label_trim,
    ))
}

fn read_template(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        ParleyError::PromptError(format!("cannot read {}: {}", path.display(), e))
    })
}

/// Non-empty lines of a substituted template.
pub fn lines(prompt: &str) -> Vec<String> {
    prompt
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}
