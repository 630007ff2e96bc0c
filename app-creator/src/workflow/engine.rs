//! The architect → reviewer → coder state machine.

use serde::{Deserialize, Serialize};

use super::context::{truncate, Context, Progress, Stage};
use super::prompts;
use crate::llm::{Completion, CompletionError};
use crate::retry::{retry_async, RetryConfig};

/// Default review budget.
pub const MAX_REVIEWS: u32 = 3;

/// Progress messages quote at most this many characters of code or review.
const QUOTE_CHARS: usize = 60;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Reviewer invocations allowed before the forced exit.
    pub max_reviews: u32,
    /// Keep progress messages in the returned outcome.
    pub record_progress: bool,
    /// Retry policy applied to each completion call.
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_reviews: MAX_REVIEWS,
            record_progress: true,
            retry: RetryConfig::default(),
        }
    }
}

/// State tags. `Package` and `Stop` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    Start,
    Code,
    Review,
    Package,
    Stop,
}

impl WorkflowState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowState::Package | WorkflowState::Stop)
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowState::Start => write!(f, "start"),
            WorkflowState::Code => write!(f, "code"),
            WorkflowState::Review => write!(f, "review"),
            WorkflowState::Package => write!(f, "package"),
            WorkflowState::Stop => write!(f, "stop"),
        }
    }
}

/// A state together with the payload carried into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Start,
    Code { code: String },
    Review { review: String, code: String },
    Package { code: String },
    Stop { result: String },
}

impl Step {
    pub fn state(&self) -> WorkflowState {
        match self {
            Step::Start => WorkflowState::Start,
            Step::Code { .. } => WorkflowState::Code,
            Step::Review { .. } => WorkflowState::Review,
            Step::Package { .. } => WorkflowState::Package,
            Step::Stop { .. } => WorkflowState::Stop,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// The reviewer approved the artifact.
    Approved,
    /// The review budget ran out; the artifact is unapproved.
    Exhausted,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Approved => write!(f, "approved"),
            Verdict::Exhausted => write!(f, "exhausted"),
        }
    }
}

impl std::str::FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(Verdict::Approved),
            "exhausted" => Ok(Verdict::Exhausted),
            other => Err(format!("unknown verdict: {other}")),
        }
    }
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub artifact: String,
    pub verdict: Verdict,
    /// Reviewer-stage invocations, including the one that hit the budget.
    pub reviews: u32,
    pub progress: Vec<Progress>,
}

impl RunOutcome {
    pub fn is_approved(&self) -> bool {
        self.verdict == Verdict::Approved
    }
}

/// Drives one specification to a final artifact.
///
/// `run` borrows the engine immutably and owns its [`Context`], so a single
/// engine can serve any number of concurrent runs.
pub struct Engine<C> {
    llm: C,
    config: EngineConfig,
}

impl<C: Completion> Engine<C> {
    pub fn new(llm: C) -> Self {
        Self::with_config(llm, EngineConfig::default())
    }

    pub fn with_config(llm: C, config: EngineConfig) -> Self {
        Self { llm, config }
    }

    pub fn with_max_reviews(mut self, max_reviews: u32) -> Self {
        self.config.max_reviews = max_reviews;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn llm(&self) -> &C {
        &self.llm
    }

    /// Run the state machine to completion.
    ///
    /// A completion failure that survives the retry policy ends the run; no
    /// partial artifact is returned.
    pub async fn run(&self, specification: &str) -> Result<RunOutcome, CompletionError> {
        let mut ctx = Context::new(specification, self.config.record_progress);
        let mut step = Step::Start;

        loop {
            step = match step {
                Step::Package { code } => return Ok(finish(ctx, code, Verdict::Approved)),
                Step::Stop { result } => return Ok(finish(ctx, result, Verdict::Exhausted)),
                other => self.advance(&mut ctx, other).await?,
            };
        }
    }

    /// Perform the action of `step` and return the step it transitions to.
    /// Terminal steps are returned unchanged.
    pub async fn advance(&self, ctx: &mut Context, step: Step) -> Result<Step, CompletionError> {
        let from = step.state();
        let next = match step {
            Step::Start => self.architect(ctx).await?,
            Step::Code { code } => self.reviewer(ctx, code).await?,
            Step::Review { review, code } => self.coder(ctx, &review, &code).await?,
            terminal @ (Step::Package { .. } | Step::Stop { .. }) => terminal,
        };
        tracing::debug!(from = %from, to = %next.state(), reviews = ctx.number_reviews(), "Workflow transition");
        Ok(next)
    }

    async fn architect(&self, ctx: &mut Context) -> Result<Step, CompletionError> {
        ctx.note(
            Stage::Architect,
            format!(
                "Writing app using this specification: {}",
                truncate(ctx.specification(), QUOTE_CHARS)
            ),
        );
        let code = self.call(prompts::architect(ctx.specification())).await?;
        Ok(Step::Code { code })
    }

    async fn reviewer(&self, ctx: &mut Context, code: String) -> Result<Step, CompletionError> {
        let n = ctx.bump_reviews();
        if n > self.config.max_reviews {
            ctx.note(
                Stage::Reviewer,
                format!("Already reviewed {} times, stopping!", n - 1),
            );
            return Ok(Step::Stop { result: code });
        }

        ctx.note(
            Stage::Reviewer,
            format!("Review #{n}: {}", truncate(&code, QUOTE_CHARS)),
        );
        let review = self.call(prompts::reviewer(ctx.specification(), &code)).await?;

        if prompts::is_approval(&review) {
            ctx.note(
                Stage::Reviewer,
                format!("Reviewer says: {}", truncate(&review, QUOTE_CHARS)),
            );
            return Ok(Step::Package { code });
        }
        Ok(Step::Review { review, code })
    }

    async fn coder(
        &self,
        ctx: &mut Context,
        review: &str,
        code: &str,
    ) -> Result<Step, CompletionError> {
        ctx.note(
            Stage::Coder,
            format!(
                "Update code based on review: {}",
                truncate(review, QUOTE_CHARS)
            ),
        );
        let code = self
            .call(prompts::coder(ctx.specification(), code, review))
            .await?;
        Ok(Step::Code { code })
    }

    async fn call(&self, prompt: String) -> Result<String, CompletionError> {
        retry_async(&self.config.retry, || self.llm.complete(&prompt)).await
    }
}

fn finish(ctx: Context, artifact: String, verdict: Verdict) -> RunOutcome {
    let reviews = ctx.number_reviews();
    tracing::info!(verdict = %verdict, reviews, "Workflow finished");
    RunOutcome {
        artifact,
        verdict,
        reviews,
        progress: ctx.into_progress(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned replies; anything past the script is a rejecting review.
    struct Scripted {
        replies: Mutex<VecDeque<Result<String, CompletionError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, CompletionError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }

        fn count(&self, prefix: &str) -> usize {
            self.prompts()
                .iter()
                .filter(|p| p.starts_with(prefix))
                .count()
        }
    }

    impl Completion for Scripted {
        async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let next = self.replies.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok("- needs more tests".to_string()))
        }
    }

    fn no_retry(max_reviews: u32) -> EngineConfig {
        EngineConfig {
            max_reviews,
            record_progress: true,
            retry: RetryConfig::no_retry(),
        }
    }

    #[tokio::test]
    async fn approval_on_first_review() {
        let llm = Scripted::new(vec![Ok("draft".into()), Ok("Looks great".into())]);
        let engine = Engine::with_config(&llm, no_retry(3));
        let out = engine.run("spec").await.unwrap();

        assert_eq!(out.artifact, "draft");
        assert_eq!(out.verdict, Verdict::Approved);
        assert_eq!(out.reviews, 1);
        assert_eq!(llm.count("Build an app"), 1);
        assert_eq!(llm.count("Review this code"), 1);
        assert_eq!(llm.prompts().len(), 2);
    }

    #[tokio::test]
    async fn revision_then_approval_returns_revised_code() {
        let llm = Scripted::new(vec![
            Ok("v1".into()),
            Ok("- handle errors".into()),
            Ok("v2".into()),
            Ok("Looks great, ship it".into()),
        ]);
        let engine = Engine::with_config(&llm, no_retry(3));
        let out = engine.run("spec").await.unwrap();

        assert_eq!(out.artifact, "v2");
        assert!(out.is_approved());
        assert_eq!(out.reviews, 2);
        let prompts = llm.prompts();
        assert!(prompts[2].contains("<code>v1</code>"));
        assert!(prompts[2].contains("<review>- handle errors</review>"));
        assert!(prompts[3].contains("<code>v2</code>"));
    }

    #[tokio::test]
    async fn budget_forces_exit_with_unrevised_code() {
        for n in 0..5u32 {
            let mut script = vec![Ok("v0".to_string())];
            for i in 1..=n {
                script.push(Ok(format!("- fix #{i}")));
                script.push(Ok(format!("v{i}")));
            }
            let llm = Scripted::new(script);
            let engine = Engine::with_config(&llm, no_retry(n));
            let out = engine.run("spec").await.unwrap();

            assert_eq!(out.verdict, Verdict::Exhausted, "n={n}");
            assert_eq!(out.artifact, format!("v{n}"), "n={n}");
            assert_eq!(out.reviews, n + 1);
            assert_eq!(llm.count("Review this code"), n as usize);
            assert_eq!(llm.count("We need to improve"), n as usize);
            assert_eq!(llm.count("Build an app"), 1);
        }
    }

    #[tokio::test]
    async fn completion_error_aborts_run() {
        let llm = Scripted::new(vec![
            Ok("draft".into()),
            Err(CompletionError::Auth("revoked".into())),
        ]);
        let engine = Engine::with_config(&llm, no_retry(3));
        let err = engine.run("spec").await.unwrap_err();
        assert!(matches!(err, CompletionError::Auth(_)));
    }

    #[tokio::test]
    async fn transient_error_is_retried_without_spending_reviews() {
        let llm = Scripted::new(vec![
            Ok("draft".into()),
            Err(CompletionError::Transport("reset".into())),
            Ok("Looks great".into()),
        ]);
        let config = EngineConfig {
            retry: RetryConfig {
                max_attempts: 2,
                initial_delay: std::time::Duration::ZERO,
                max_delay: std::time::Duration::ZERO,
                jitter: false,
                ..RetryConfig::default()
            },
            ..no_retry(1)
        };
        let engine = Engine::with_config(&llm, config);
        let out = engine.run("spec").await.unwrap();
        assert!(out.is_approved());
        assert_eq!(out.reviews, 1);
        assert_eq!(llm.count("Review this code"), 2);
    }

    #[tokio::test]
    async fn progress_messages_follow_stages() {
        let llm = Scripted::new(vec![
            Ok("v1".into()),
            Ok("- rename".into()),
            Ok("v2".into()),
        ]);
        let engine = Engine::with_config(&llm, no_retry(1));
        let out = engine.run("a calculator").await.unwrap();

        let stages: Vec<Stage> = out.progress.iter().map(|p| p.stage).collect();
        assert_eq!(
            stages,
            [Stage::Architect, Stage::Reviewer, Stage::Coder, Stage::Reviewer]
        );
        assert_eq!(
            out.progress[0].message,
            "Writing app using this specification: a calculator"
        );
        assert_eq!(out.progress[1].message, "Review #1: v1");
        assert_eq!(out.progress[3].message, "Already reviewed 1 times, stopping!");
    }

    #[tokio::test]
    async fn disabled_progress_does_not_change_result() {
        let script = || {
            vec![
                Ok("v1".to_string()),
                Ok("- rename".to_string()),
                Ok("v2".to_string()),
                Ok("Looks great".to_string()),
            ]
        };
        let with = Scripted::new(script());
        let without = Scripted::new(script());
        let a = Engine::with_config(&with, no_retry(3)).run("s").await.unwrap();
        let b = Engine::with_config(
            &without,
            EngineConfig {
                record_progress: false,
                ..no_retry(3)
            },
        )
        .run("s")
        .await
        .unwrap();

        assert_eq!(a.artifact, b.artifact);
        assert_eq!(a.verdict, b.verdict);
        assert_eq!(with.prompts(), without.prompts());
        assert!(b.progress.is_empty());
    }

    #[tokio::test]
    async fn advance_walks_one_transition_at_a_time() {
        let llm = Scripted::new(vec![Ok("draft".into()), Ok("Looks great".into())]);
        let engine = Engine::with_config(&llm, no_retry(3));
        let mut ctx = Context::new("spec", false);

        let step = engine.advance(&mut ctx, Step::Start).await.unwrap();
        assert_eq!(step, Step::Code { code: "draft".into() });
        let step = engine.advance(&mut ctx, step).await.unwrap();
        assert_eq!(step, Step::Package { code: "draft".into() });
        assert!(step.state().is_terminal());
        let again = engine.advance(&mut ctx, step.clone()).await.unwrap();
        assert_eq!(again, step);
        assert_eq!(ctx.number_reviews(), 1);
    }

    #[test]
    fn verdict_round_trips_through_str() {
        for v in [Verdict::Approved, Verdict::Exhausted] {
            assert_eq!(v.to_string().parse::<Verdict>().unwrap(), v);
        }
        assert!("maybe".parse::<Verdict>().is_err());
    }
}
