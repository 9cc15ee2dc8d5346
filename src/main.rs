//! taskpool - CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use taskpool::demo::{self, DemoReport};
use taskpool::util::config::{self, Settings};
use taskpool::util::logger::{self, LogLevel};
use taskpool::{NAME, VERSION};

/// Bounded priority task pool: demos and configuration
#[derive(Parser, Debug)]
#[command(name = "taskpool")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Config file to use instead of the default lookup
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Override the number of workers
    #[arg(long, global = true)]
    pool_size: Option<usize>,

    /// Override the synchronous execution limit, in milliseconds
    #[arg(long, global = true)]
    max_sync_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a demo scenario
    Demo {
        #[command(subcommand)]
        scenario: Scenario,
    },

    /// Print the effective configuration
    Config,

    /// Print version information
    Version,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Scenario {
    /// One High task overtakes nine queued Low tasks
    Priority,
    /// A three-member group where the middle member fails
    Group,
    /// A dedicated channel adding two numbers
    Channel,
    /// Cancel a pending task and a running task
    Cancel,
}

fn load_settings(args: &Args) -> Result<Settings> {
    let mut settings = match &args.config {
        Some(path) => {
            let mut settings = Settings::load_from(path)
                .with_context(|| format!("Failed to load config: {}", path.display()))?;
            settings.apply_overrides(|name| std::env::var(name).ok())?;
            settings
        },
        None => Settings::load().context("Failed to load config")?,
    };
    if let Some(pool_size) = args.pool_size {
        settings.pool.pool_size = pool_size;
    }
    if let Some(max_sync_ms) = args.max_sync_ms {
        settings.pool.max_sync_ms = max_sync_ms;
    }
    if let Some(level) = args.log_level {
        settings.log.level = level;
    } else if args.verbose {
        settings.log.level = LogLevel::Debug;
    }
    Ok(settings)
}

fn print_report(
    report: &DemoReport,
    json: bool,
) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("== {} ==", report.name);
    for line in &report.lines {
        println!("{}", line);
    }
    if let Some(stats) = &report.stats {
        println!(
            "submitted={} completed={} failed={} cancelled={} timed_out={} peak_running={}",
            stats.submitted,
            stats.completed,
            stats.failed,
            stats.cancelled,
            stats.timed_out,
            stats.peak_running
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let settings = load_settings(&args)?;
    logger::init_with_level(settings.log.level);

    if args.verbose {
        eprintln!("{} version: {}", NAME, VERSION);
        if let Some(path) = config::find_config_file() {
            eprintln!("Config: {}", path.display());
        }
    }

    match args.command {
        Commands::Demo { scenario } => {
            let report = match scenario {
                Scenario::Priority => demo::priority(settings.pool.clone()),
                Scenario::Group => demo::group(settings.pool.clone()),
                Scenario::Channel => demo::channel(),
                Scenario::Cancel => demo::cancel(settings.pool.clone()),
            }
            .with_context(|| format!("Demo {:?} failed", scenario))?;
            print_report(&report, args.json)?;
        },
        Commands::Config => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&settings)?);
            } else {
                print!("{}", settings.to_toml()?);
            }
        },
        Commands::Version => {
            println!("{} {}", NAME, VERSION);
        },
    }

    Ok(())
}
