//! app-creator: turn a natural-language spec into a packaged multi-file app.
//!
//! - Workflow: architect drafts, reviewer critiques, coder revises, bounded
//!   by a review budget
//! - Packager: splits the final artifact into files and writes a manifest

pub mod config;
pub mod history;
pub mod llm;
pub mod output;
pub mod packager;
pub mod retry;
pub mod workflow;
