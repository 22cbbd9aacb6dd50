//! mender - iterative script repair
//!
//! Runs a script, and while it fails, asks a language model for a fix and
//! applies it.

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use mender::repair::{ExecutionLogStore, RepairOutcome};
use mender::{
    ConfigOverrides, MenderError, RealFileSystem, RepairConfig, RepairDependencies, RepairLoop,
    RunLock,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mender")]
#[command(version)]
#[command(about = "Iteratively repair a failing script with a language model", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (defaults to ./mender.toml)
    #[arg(short, long, global = true, env = "MENDER_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "MENDER_JSON_LOGS")]
    json_logs: bool,

    #[command(flatten)]
    run: RunArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Script to repair [default: script.py]
    #[arg(short, long, env = "MENDER_TARGET")]
    target: Option<PathBuf>,

    /// Interpreter used to run the script [default: python3, then python]
    #[arg(long, env = "MENDER_INTERPRETER")]
    interpreter: Option<String>,

    /// Maximum iterations [default: 10]
    #[arg(short = 'n', long, env = "MENDER_MAX_ITERATIONS")]
    max_iterations: Option<u32>,

    /// Execution log path [default: full_execution_log.json]
    #[arg(long, env = "MENDER_LOG_PATH")]
    log_path: Option<PathBuf>,

    /// Kill the script after this many seconds
    #[arg(long, value_name = "SECS", env = "MENDER_RUN_TIMEOUT")]
    run_timeout: Option<u64>,

    /// Pause after applying a fix, in milliseconds [default: 2000]
    #[arg(long, value_name = "MS", env = "MENDER_SETTLE_DELAY_MS")]
    settle_delay: Option<u64>,

    /// Gemini model [default: gemini-2.0-flash-001]
    #[arg(short, long, env = "MENDER_MODEL")]
    model: Option<String>,

    /// Google Cloud project; routes requests through Vertex AI
    #[arg(long, env = "GOOGLE_CLOUD_PROJECT")]
    project: Option<String>,

    /// Vertex AI region [default: us-central1]
    #[arg(long, env = "GOOGLE_CLOUD_LOCATION")]
    location: Option<String>,

    /// Attempts per oracle request [default: 3]
    #[arg(long, env = "MENDER_RETRY_ATTEMPTS")]
    retry_attempts: Option<u32>,
}

impl From<RunArgs> for ConfigOverrides {
    fn from(args: RunArgs) -> Self {
        Self {
            target: args.target,
            interpreter: args.interpreter,
            max_iterations: args.max_iterations,
            log_path: args.log_path,
            run_timeout_secs: args.run_timeout,
            settle_delay_ms: args.settle_delay,
            model: args.model,
            project: args.project,
            location: args.location,
            retry_attempts: args.retry_attempts,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize a persisted execution log
    Inspect {
        /// Log file [default: configured log path]
        log: Option<PathBuf>,
    },
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose {
        "mender=debug,info"
    } else {
        "mender=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    let result = match cli.command {
        Some(Commands::Inspect { log }) => inspect(cli.config, log),
        None => repair(cli.config, cli.run).await,
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            e.downcast_ref::<MenderError>()
                .map_or(1, MenderError::exit_code)
        }
    };
    std::process::exit(code);
}

async fn repair(config_path: Option<PathBuf>, args: RunArgs) -> anyhow::Result<i32> {
    let config = RepairConfig::load(config_path.as_deref())?.with_overrides(args.into());
    config.validate()?;

    if !config.target.is_file() {
        return Err(MenderError::invalid(
            "target",
            format!("{} does not exist", config.target.display()),
        )
        .into());
    }

    let _lock = RunLock::acquire(&config.target)?;
    print_banner(&config);

    let log_path = config.log_path.clone();
    let deps = RepairDependencies::real(&config)?;
    let outcome = RepairLoop::new(config, deps)?.run().await?;

    print_outcome(&outcome, &log_path);
    Ok(outcome.exit_code())
}

fn print_banner(config: &RepairConfig) {
    println!("{}", "mender".green().bold());
    println!("   Target:         {}", config.target.display());
    println!("   Model:          {}", config.oracle.model);
    match &config.oracle.project {
        Some(project) => println!("   Endpoint:       Vertex AI ({project})"),
        None => println!("   Endpoint:       Gemini API"),
    }
    println!("   Max iterations: {}", config.max_iterations);
    println!("   Log:            {}", config.log_path.display());
    println!();
}

fn print_outcome(outcome: &RepairOutcome, log_path: &std::path::Path) {
    println!();
    if outcome.succeeded() {
        println!(
            "{} Script ran successfully after {} iteration(s)",
            "✓".green().bold(),
            outcome.iterations
        );
        if let Some(last) = outcome.log.last() {
            if !last.report.stdout.is_empty() {
                println!("{}", "Output:".bold());
                print!("{}", last.report.stdout);
            }
        }
    } else {
        println!(
            "{} Reached maximum iterations ({}). Script may not be fully corrected.",
            "✗".red().bold(),
            outcome.iterations
        );
    }
    println!("Full execution log saved to: {}", log_path.display());
}

fn inspect(config_path: Option<PathBuf>, log: Option<PathBuf>) -> anyhow::Result<i32> {
    let path = match log {
        Some(path) => path,
        None => RepairConfig::load(config_path.as_deref())?.log_path,
    };

    let store = ExecutionLogStore::new(Arc::new(RealFileSystem::new()), path.clone());
    let log = store.load()?;

    println!("{} {}", "Execution log:".bold(), path.display());
    for record in log.iter() {
        let status = if record.report.succeeded {
            "success".green()
        } else if record.report.timed_out {
            "timeout".yellow()
        } else {
            "failure".red()
        };
        let files = record.context.len();
        let fix = if record.fix_applied {
            "fix applied".cyan().to_string()
        } else if record.proposal.is_some() {
            "proposal not applied".to_string()
        } else if record.report.succeeded {
            String::new()
        } else {
            "no proposal".to_string()
        };
        println!(
            "  #{:<3} {:<8} {:>7}ms  {} file(s)  {}",
            record.iteration_number, status, record.duration_ms, files, fix
        );
    }

    let summary = log.summary();
    println!();
    println!("   Iterations:    {}", summary.iterations);
    println!(
        "   Final status:  {}",
        if summary.succeeded {
            "succeeded".green()
        } else {
            "failing".red()
        }
    );
    println!("   Fixes applied: {}", summary.fixes_applied);
    println!("   Proposals:     {}", summary.proposals);
    println!("   Timeouts:      {}", summary.timeouts);
    println!("   Total time:    {}ms", summary.total_duration_ms);
    Ok(0)
}
