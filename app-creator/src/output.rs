//! Terminal output for runs.
//!
//! Progress lines are prefixed with the stage that produced them, long text is
//! wrapped on word boundaries, and file listings are capped.

use std::io::{self, Write};
use std::path::Path;

use crate::packager::FileSet;
use crate::workflow::{Progress, RunOutcome, Verdict};

/// Terminal width budget for wrapped lines.
const WRAP: usize = 100;
/// Files listed before the tree is cut off.
const MAX_TREE: usize = 20;

/// Print a message with a role prefix, wrapping long lines.
pub fn say(out: &mut impl Write, role: &str, text: &str) -> io::Result<()> {
    for line in wrap_lines(text, WRAP) {
        writeln!(out, "[{role}] {line}")?;
    }
    Ok(())
}

/// Print a one-line status update.
pub fn status(out: &mut impl Write, role: &str, emoji: &str, text: &str) -> io::Result<()> {
    writeln!(out, "[{role}] {emoji} {text}")
}

pub fn progress(out: &mut impl Write, entry: &Progress) -> io::Result<()> {
    say(out, &entry.stage.to_string(), &entry.message)
}

/// Summarize how a run ended.
pub fn verdict(out: &mut impl Write, outcome: &RunOutcome) -> io::Result<()> {
    match outcome.verdict {
        Verdict::Approved => status(
            out,
            "reviewer",
            "✅",
            &format!("Approved after {} review(s)", outcome.reviews),
        ),
        Verdict::Exhausted => status(
            out,
            "reviewer",
            "⚠️",
            &format!(
                "Review budget exhausted after {} review(s); artifact is unapproved",
                outcome.reviews.saturating_sub(1)
            ),
        ),
    }
}

/// List the packaged files.
pub fn file_tree(out: &mut impl Write, root: &Path, files: &FileSet) -> io::Result<()> {
    status(
        out,
        "packager",
        "📁",
        &format!("{} file(s) in {}", files.len(), root.display()),
    )?;
    for path in files.paths().take(MAX_TREE) {
        writeln!(out, "  {path}")?;
    }
    if files.len() > MAX_TREE {
        writeln!(out, "  ... and {} more", files.len() - MAX_TREE)?;
    }
    Ok(())
}

/// Wrap text into lines of at most `max_len` bytes, breaking on word boundaries.
/// Single words longer than `max_len` are kept whole.
fn wrap_lines(text: &str, max_len: usize) -> Vec<String> {
    let mut result = Vec::new();
    for line in text.lines() {
        if line.len() <= max_len {
            result.push(line.to_string());
            continue;
        }
        let mut current = String::new();
        for word in line.split_whitespace() {
            if !current.is_empty() && current.len() + word.len() + 1 > max_len {
                result.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
        if !current.is_empty() {
            result.push(current);
        }
    }
    result
}
