//! Compass orchestration core: demo CLI
//!
//! Builds a runtime from the reference agents (or a config file) and drives
//! it from the command line with the offline model.
//!
//! Usage:
//!   cargo run -p demo -- list
//!   cargo run -p demo -- submit "plan a week in Lisbon on a budget"
//!   cargo run -p demo -- verify agents/luna.toml
//!   cargo run -p demo -- seal agents/luna.toml --scope full
//!   cargo run -p demo -- ab-demo --users 200

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use compass_contracts::{
    agent::{DigestAlgorithm, IntegrityScope},
    error::{CompassError, CompassResult},
    task::{ExecutionContext, TaskRequest},
};
use compass_core::ToolCatalog;
use compass_feedback::{AbTestConfig, AbVerdict, Variant};
use compass_loader::{seal, DefinitionLoader, LoaderSettings};
use compass_runtime::{CompassConfig, OfflineModel, Runtime};

// ── CLI definition ────────────────────────────────────────────────────────────

/// Compass: agent orchestration for travel assistants.
#[derive(Parser)]
#[command(
    name = "demo",
    about = "Compass orchestration core demo",
    long_about = "Loads agent definitions, routes free-text tasks to agents through the\n\
                  candidate search, and exercises the feedback and A/B testing loop."
)]
struct Cli {
    /// Configuration file; defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Agents directory, overriding the configuration.
    #[arg(long, global = true)]
    agents: Option<PathBuf>,

    /// Fixed candidate search seed for reproducible selection.
    #[arg(long, global = true)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List registered agents and any definitions that were rejected.
    List,
    /// Run one task to completion and print its status view.
    Submit {
        task: String,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        platform: Option<String>,
    },
    /// Validate one definition file, checking its digest if it declares one.
    Verify { file: PathBuf },
    /// Embed a fresh integrity digest into a definition file.
    Seal {
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = Algorithm::Sha256)]
        algorithm: Algorithm,
        #[arg(long, value_enum, default_value_t = Scope::Content)]
        scope: Scope,
        /// Overwrite the file instead of printing the sealed document.
        #[arg(long)]
        write: bool,
    },
    /// Simulate an A/B test and feed the result into strategy optimization.
    AbDemo {
        #[arg(long, default_value_t = 120)]
        users: usize,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Algorithm {
    Sha256,
    Sha512,
}

#[derive(Clone, Copy, ValueEnum)]
enum Scope {
    Content,
    Full,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Set RUST_LOG=debug for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let result = match &cli.command {
        Command::List => list(&cli),
        Command::Submit { task, user, platform } => {
            submit(&cli, task, user.clone(), platform.clone()).await
        }
        Command::Verify { file } => verify(file),
        Command::Seal { file, algorithm, scope, write } => {
            seal_file(file, *algorithm, *scope, *write)
        }
        Command::AbDemo { users } => ab_demo(&cli, *users),
    };

    if let Err(e) = result {
        eprintln!("Demo error [{}]: {}", e.code(), e);
        std::process::exit(1);
    }
}

fn build_runtime(cli: &Cli) -> CompassResult<Runtime> {
    let mut config = match &cli.config {
        Some(path) => CompassConfig::from_file(path)?,
        None => CompassConfig::default(),
    };
    if let Some(dir) = &cli.agents {
        config.loader.agents_dir = dir.clone();
    }
    if cli.seed.is_some() {
        config.orchestrator.search_seed = cli.seed;
    }
    Runtime::build(config, Arc::new(OfflineModel), Arc::new(ToolCatalog::with_builtins()))
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn list(cli: &Cli) -> CompassResult<()> {
    let runtime = build_runtime(cli)?;

    println!("Agents ({})", runtime.agents().len());
    println!("==========");
    for agent in runtime.agents() {
        println!("{}  {} v{}", agent.id, agent.name, agent.version);
        println!("    capabilities: {}", agent.capabilities.join(", "));
        println!("    tools:        {}", agent.tools.join(", "));
    }

    let rejected = &runtime.startup_report().errors;
    if !rejected.is_empty() {
        println!();
        println!("Rejected ({})", rejected.len());
        for failure in rejected {
            println!("  {}: [{}] {}", failure.origin, failure.error.code(), failure.error);
        }
    }
    Ok(())
}

async fn submit(
    cli: &Cli,
    task: &str,
    user: Option<String>,
    platform: Option<String>,
) -> CompassResult<()> {
    let runtime = build_runtime(cli)?;
    let analysis = runtime.engine().analyze(task);
    info!(
        complexity = ?analysis.complexity,
        dimensions = ?analysis.dimensions,
        "task analyzed"
    );

    let mut request = TaskRequest::new(task);
    request.context = ExecutionContext {
        user_id: user,
        platform: platform.or_else(|| Some("cli".to_string())),
        ..ExecutionContext::default()
    };

    let view = runtime.engine().run(request).await?;
    println!("{}", to_json(&view)?);
    runtime.shutdown();
    Ok(())
}

fn verify(file: &Path) -> CompassResult<()> {
    let loader = DefinitionLoader::new(LoaderSettings::default())?;
    let definition = loader.load_file(file)?;

    println!("ok: {} ({})", definition.name, definition.id);
    match &definition.integrity {
        Some(declared) => println!(
            "    digest verified ({:?}, {:?} scope)",
            declared.algorithm, declared.scope
        ),
        None => println!("    no digest declared"),
    }
    println!(
        "    {} enabled capabilities, {} tools",
        definition.enabled_capabilities().count(),
        definition.tools.len()
    );
    Ok(())
}

fn seal_file(file: &Path, algorithm: Algorithm, scope: Scope, write: bool) -> CompassResult<()> {
    let io_error = |e: std::io::Error| CompassError::Io {
        path: file.display().to_string(),
        reason: e.to_string(),
    };
    let source = std::fs::read_to_string(file).map_err(io_error)?;

    let algorithm = match algorithm {
        Algorithm::Sha256 => DigestAlgorithm::Sha256,
        Algorithm::Sha512 => DigestAlgorithm::Sha512,
    };
    let scope = match scope {
        Scope::Content => IntegrityScope::Content,
        Scope::Full => IntegrityScope::Full,
    };
    let sealed = seal(&source, algorithm, scope)?;

    if write {
        std::fs::write(file, &sealed).map_err(io_error)?;
        println!("sealed {}", file.display());
    } else {
        print!("{sealed}");
    }
    Ok(())
}

/// Variant A converts noticeably better than B, so a large enough run
/// concludes with A as the winner.
fn ab_demo(cli: &Cli, users: usize) -> CompassResult<()> {
    let runtime = build_runtime(cli)?;
    let feedback = runtime.feedback();

    let id = feedback.create_test(AbTestConfig {
        name: "itinerary tone".to_string(),
        description: "day-by-day tables versus narrative prose".to_string(),
        dimension: Some("planning".to_string()),
    });

    for i in 0..users {
        let user = format!("traveller-{i}");
        let converts = match feedback.assign(id, &user)? {
            Variant::A => i % 3 != 0,
            Variant::B => i % 5 == 0,
        };
        if converts {
            feedback.record_conversion(id, &user)?;
        }
    }

    match feedback.analyze_test(id)? {
        AbVerdict::InsufficientSample { participants, required } => {
            println!("not enough participants yet: {participants} of {required}");
        }
        AbVerdict::Concluded(analysis) => {
            println!("{}", to_json(&analysis)?);
            let plan = feedback.optimize();
            println!("strategy bias now: {:?}", runtime.engine().strategy_bias());
            println!("recommendations: {}", plan.recommendations.len());
        }
    }
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> CompassResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| CompassError::Config { reason: e.to_string() })
}
