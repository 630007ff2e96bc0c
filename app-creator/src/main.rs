//! app-creator: spec in, packaged app out.
//!
//!   app-creator run "Create a hello world script"   # run the agent loop and package
//!   app-creator run --spec-file spec.md --output out
//!   app-creator package artifact.md --output out     # package an existing artifact
//!   app-creator history                              # list recorded runs
//!
//! Talks to Anthropic when ANTHROPIC_API_KEY is set, otherwise to an
//! OpenAI-compatible server (LM Studio on localhost:1234 by default).

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};

use app_creator::config::{Config, ProviderKind};
use app_creator::history::{History, RunRecord};
use app_creator::llm::{LlmClient, Provider, DEFAULT_OPENAI_BASE_URL};
use app_creator::output;
use app_creator::packager;
use app_creator::workflow::{Engine, EngineConfig, MAX_REVIEWS};

#[derive(Parser)]
#[command(name = "app-creator", version, about = "Turn a spec into a reviewed, packaged app")]
struct Args {
    /// Config file (default: ~/.config/app-creator/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Completion backend
    #[arg(long, global = true, value_enum)]
    provider: Option<ProviderKind>,

    /// Model name
    #[arg(long, global = true)]
    model: Option<String>,

    /// Base URL of an OpenAI-compatible server
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Anthropic API key
    #[arg(long, global = true, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    anthropic_api_key: Option<String>,

    /// API key for the OpenAI-compatible server, if it needs one
    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// Record runs in this SQLite database
    #[arg(long, global = true)]
    history_db: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the architect/reviewer/coder loop on a specification
    Run {
        /// Specification text
        #[arg(required_unless_present = "spec_file")]
        spec: Option<String>,

        /// Read the specification from a file
        #[arg(long, conflicts_with = "spec")]
        spec_file: Option<PathBuf>,

        /// Output directory for the packaged files
        #[arg(long)]
        output: Option<PathBuf>,

        /// Review budget before the forced exit
        #[arg(long)]
        max_reviews: Option<u32>,

        /// Only print the artifact, don't write files
        #[arg(long)]
        no_package: bool,

        /// Also save the raw artifact text to this file
        #[arg(long)]
        save_artifact: Option<PathBuf>,
    },

    /// Package an artifact file into an output directory
    Package {
        /// File holding the artifact text
        artifact: PathBuf,

        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show recorded runs
    History {
        /// Show the full artifact of this run
        id: Option<i64>,

        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json);

    let config = Config::load(args.config.as_deref())?;

    match &args.command {
        Command::Run {
            spec,
            spec_file,
            output,
            max_reviews,
            no_package,
            save_artifact,
        } => {
            let spec = match (spec, spec_file) {
                (Some(s), _) => s.clone(),
                (None, Some(path)) => tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read spec {}", path.display()))?,
                (None, None) => anyhow::bail!("I need a spec! Tell me what to build."),
            };
            let out_dir = output.clone().unwrap_or_else(|| config.output_dir());
            run(
                &args,
                &config,
                &spec,
                (!no_package).then_some(out_dir.as_path()),
                *max_reviews,
                save_artifact.as_deref(),
            )
            .await
        }
        Command::Package { artifact, output } => {
            let text = tokio::fs::read_to_string(artifact)
                .await
                .with_context(|| format!("Failed to read artifact {}", artifact.display()))?;
            let out_dir = output.clone().unwrap_or_else(|| config.output_dir());
            let files = packager::package(&text, &out_dir).await?;
            output::file_tree(&mut std::io::stdout().lock(), &out_dir, &files)?;
            Ok(())
        }
        Command::History { id, limit } => {
            let history = open_history(&args, &config)?
                .context("No history database configured (use --history-db or history_db in config)")?;
            show_history(&history, *id, *limit)
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "app_creator=info".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_client(args: &Args, config: &Config) -> Result<LlmClient> {
    let kind = args.provider.or(config.provider).unwrap_or(
        if args.anthropic_api_key.is_some() {
            ProviderKind::Anthropic
        } else {
            ProviderKind::Openai
        },
    );

    let provider = match kind {
        ProviderKind::Anthropic => Provider::Anthropic {
            api_key: args
                .anthropic_api_key
                .clone()
                .context("Anthropic provider needs ANTHROPIC_API_KEY or --anthropic-api-key")?,
        },
        ProviderKind::Openai => Provider::OpenAiCompatible {
            base_url: args
                .base_url
                .clone()
                .or_else(|| config.base_url.clone())
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            api_key: args.openai_api_key.clone(),
        },
    };

    let mut client = LlmClient::new(provider);
    if let Some(model) = args.model.as_deref().or(config.model.as_deref()) {
        client = client.with_model(model);
    }
    if let Some(max_tokens) = config.max_tokens {
        client = client.with_max_tokens(max_tokens);
    }
    if let Some(temperature) = config.temperature {
        client = client.with_temperature(temperature);
    }
    Ok(client)
}

fn open_history(args: &Args, config: &Config) -> Result<Option<History>> {
    let Some(path) = args.history_db.as_ref().or(config.history_db.as_ref()) else {
        return Ok(None);
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    History::open(path).map(Some)
}

async fn run(
    args: &Args,
    config: &Config,
    spec: &str,
    out_dir: Option<&Path>,
    max_reviews: Option<u32>,
    save_artifact: Option<&Path>,
) -> Result<()> {
    if spec.trim().is_empty() {
        anyhow::bail!("I need a spec! Tell me what to build.");
    }

    let client = build_client(args, config)?;
    let history = open_history(args, config)?;
    let engine = Engine::with_config(
        client,
        EngineConfig {
            max_reviews: max_reviews.or(config.max_reviews).unwrap_or(MAX_REVIEWS),
            record_progress: true,
            retry: config.retry.to_retry_config(),
        },
    );

    tracing::info!(
        model = %engine.llm().model(),
        max_reviews = engine.config().max_reviews,
        "Starting app creator"
    );

    let started_at = Utc::now().to_rfc3339();
    let outcome = engine.run(spec).await.context("Workflow failed")?;

    let mut stdout = std::io::stdout().lock();
    for entry in &outcome.progress {
        output::progress(&mut stdout, entry)?;
    }
    output::verdict(&mut stdout, &outcome)?;

    if let Some(path) = save_artifact {
        tokio::fs::write(path, &outcome.artifact)
            .await
            .with_context(|| format!("Failed to save artifact to {}", path.display()))?;
    }

    let mut written = Vec::new();
    if let Some(out_dir) = out_dir {
        let files = packager::package(&outcome.artifact, out_dir).await?;
        if files.is_empty() {
            output::status(
                &mut stdout,
                "packager",
                "⚠️",
                "No fenced file blocks found in the artifact; only the manifest was written",
            )?;
        }
        output::file_tree(&mut stdout, out_dir, &files)?;
        written = files.paths().map(str::to_string).collect();
    }

    writeln!(stdout, "\nFinal code generated:\n{}", outcome.artifact)?;

    if let Some(history) = history {
        let id = history.record(&RunRecord {
            id: None,
            specification: spec.to_string(),
            verdict: outcome.verdict,
            reviews: outcome.reviews,
            artifact: outcome.artifact.clone(),
            files: written,
            progress: outcome.progress.clone(),
            started_at,
            finished_at: Utc::now().to_rfc3339(),
        })?;
        tracing::info!(id, "Run recorded");
    }

    Ok(())
}

fn show_history(history: &History, id: Option<i64>, limit: usize) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    if let Some(id) = id {
        let run = history
            .get(id)?
            .with_context(|| format!("No run with id {id}"))?;
        writeln!(stdout, "Run #{id} ({}, {} review(s))", run.verdict, run.reviews)?;
        writeln!(stdout, "Spec: {}", run.specification)?;
        for entry in &run.progress {
            output::progress(&mut stdout, entry)?;
        }
        writeln!(stdout, "Files: {}", run.files.join(", "))?;
        writeln!(stdout, "\n{}", run.artifact)?;
        return Ok(());
    }

    for run in history.recent(limit)? {
        writeln!(
            stdout,
            "#{:<4} {:<9} {:>2} review(s)  {}  {}",
            run.id.unwrap_or_default(),
            run.verdict.to_string(),
            run.reviews,
            run.finished_at,
            app_creator::workflow::truncate(run.specification.trim(), 60),
        )?;
    }
    Ok(())
}
