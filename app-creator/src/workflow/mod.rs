//! Bounded architect/reviewer/coder workflow.
//!
//! Stages:
//! - Architect: writes the first draft from the specification
//! - Reviewer: approves, asks for changes, or hits the review budget
//! - Coder: revises the draft from reviewer feedback
//!
//! Every stage but the terminal ones makes exactly one completion call.

mod context;
mod engine;
pub mod prompts;

pub use context::{truncate, Context, Progress, Stage};
pub use engine::{
    Engine, EngineConfig, RunOutcome, Step, Verdict, WorkflowState, MAX_REVIEWS,
};
