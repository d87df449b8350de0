//! testrun-analyzer CLI
//!
//! Usage:
//!   testrun-analyzer analyze --plan <ID> --suite <ID> [OPTIONS]
//!   testrun-analyzer suite --plan <ID> --suite <ID>
//!
//! Examples:
//!   testrun-analyzer analyze --plan 42 --suite 1337               # Terminal summary
//!   testrun-analyzer analyze --plan 42 --suite 1337 --min-roc 50  # Ignore small ramps
//!   testrun-analyzer analyze --plan 42 --suite 1337 -o json       # Full report as JSON
//!   testrun-analyzer suite --plan 42 --suite 1337 -o markdown     # Expected test cases

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use testrun_analyzer::telemetry::init_tracing;
use testrun_analyzer::{
    AnalysisEvent, AnalysisRequest, Analyzer, Config, OutputFormat, Reporter,
};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "testrun-analyzer")]
#[command(about = "Release boundary and flakiness analysis for Azure DevOps test plans")]
struct Cli {
    /// Config file (defaults to TESTRUN_ANALYZER_CONFIG or ~/.binks/testrun-analyzer.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Detect release events and summarize each one
    Analyze {
        #[command(flatten)]
        target: Target,

        /// Minimum day-over-day increase in executed tests
        #[arg(long, allow_negative_numbers = true)]
        min_roc: Option<i64>,

        /// Print stage progress to stderr
        #[arg(long)]
        progress: bool,

        /// Output format: terminal, markdown, json
        #[arg(short, long, default_value = "terminal")]
        output: String,
    },

    /// List the expected test cases of a suite and its descendants
    Suite {
        #[command(flatten)]
        target: Target,

        /// Output format: terminal, markdown, json
        #[arg(short, long, default_value = "terminal")]
        output: String,
    },
}

#[derive(Args)]
struct Target {
    /// Test plan id
    #[arg(long, env = "TESTRUN_PLAN_ID")]
    plan: Option<u32>,

    /// Target suite id
    #[arg(long, env = "TESTRUN_SUITE_ID")]
    suite: Option<u32>,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => {
            let mut config = Config::load_from_path(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            config.apply_env();
            Ok(config)
        }
        None => Config::load(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing("testrun_analyzer", cli.verbose)?;

    let config = load_config(cli.config.as_ref())?;
    let analyzer = Analyzer::from_config(&config)?;

    match cli.command {
        Command::Analyze {
            target,
            min_roc,
            progress,
            output,
        } => {
            let request = AnalysisRequest {
                plan_id: target.plan,
                suite_id: target.suite,
                min_roc,
                as_of: None,
            };
            run_analysis(analyzer, request, progress, &output).await
        }
        Command::Suite { target, output } => {
            let request = AnalysisRequest {
                plan_id: target.plan,
                suite_id: target.suite,
                ..Default::default()
            };
            let (plan_id, suite_id) = request.validate()?;
            let expected = analyzer.resolve_suite(plan_id, suite_id).await?;
            let format: OutputFormat = output.parse().unwrap_or_default();
            println!("{}", Reporter::new(format).suite(&expected.listing(plan_id, suite_id)));
            Ok(())
        }
    }
}

async fn run_analysis(
    analyzer: Analyzer,
    request: AnalysisRequest,
    show_progress: bool,
    output: &str,
) -> Result<()> {
    let format: OutputFormat = output.parse().unwrap_or_default();
    let reporter = Reporter::new(format);

    // Fail fast on missing ids before spawning anything
    request.validate()?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling analysis...");
            ctrl_c.cancel();
        }
    });

    let (handle, mut events) = Arc::new(analyzer).analyze_streamed(request, cancel);

    let mut outcome = Err(anyhow::anyhow!("analysis ended without a report"));
    while let Some(event) = events.recv().await {
        match event {
            AnalysisEvent::Progress {
                stage,
                message,
                percent,
                ..
            } => {
                if show_progress {
                    eprintln!("[{:>3}%] {}: {}", percent, stage, message);
                }
            }
            AnalysisEvent::Report { report } => {
                println!("{}", reporter.report(&report));
                outcome = Ok(());
            }
            AnalysisEvent::Failed { message, .. } => {
                outcome = Err(anyhow::anyhow!("Analysis failed: {}", message));
            }
        }
    }

    handle.await?;
    outcome
}
