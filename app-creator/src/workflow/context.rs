//! Run-scoped state shared by the stages of one workflow run.

use serde::{Deserialize, Serialize};

/// Which stage produced a progress message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Architect,
    Reviewer,
    Coder,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Architect => write!(f, "architect"),
            Stage::Reviewer => write!(f, "reviewer"),
            Stage::Coder => write!(f, "coder"),
        }
    }
}

/// One human-readable progress line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub stage: Stage,
    pub message: String,
}

/// Mutable store owned by exactly one run. Never shared between runs.
#[derive(Debug)]
pub struct Context {
    specification: String,
    number_reviews: u32,
    /// `None` when progress recording is disabled.
    progress: Option<Vec<Progress>>,
}

impl Context {
    pub fn new(specification: impl Into<String>, record_progress: bool) -> Self {
        Self {
            specification: specification.into(),
            number_reviews: 0,
            progress: record_progress.then(Vec::new),
        }
    }

    pub fn specification(&self) -> &str {
        &self.specification
    }

    pub fn number_reviews(&self) -> u32 {
        self.number_reviews
    }

    /// Count one reviewer invocation and return the new total.
    pub fn bump_reviews(&mut self) -> u32 {
        self.number_reviews += 1;
        self.number_reviews
    }

    /// Append a progress message. Always traced; stored only when recording.
    pub fn note(&mut self, stage: Stage, message: String) {
        tracing::info!(stage = %stage, "{message}");
        if let Some(log) = self.progress.as_mut() {
            log.push(Progress { stage, message });
        }
    }

    pub fn progress(&self) -> &[Progress] {
        self.progress.as_deref().unwrap_or(&[])
    }

    pub(crate) fn into_progress(self) -> Vec<Progress> {
        self.progress.unwrap_or_default()
    }
}

/// Shorten `text` to `max_chars` characters, appending "..." when cut.
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
