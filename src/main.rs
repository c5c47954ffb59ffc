use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{ArgGroup, Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

mod aggregate;
mod availability;
mod cascade;
mod config;
mod db;
mod error;
mod inspections;
mod models;
mod period;
mod report;
mod store;

use aggregate::ConflictPolicy;
use availability::PeriodType;
use cascade::MonthSelector;
use config::Config;
use db::PgStore;
use error::SummaryError;
use models::Tier;

#[derive(Parser)]
#[command(name = "entomo-rollup")]
#[command(about = "Daily, weekly and monthly roll-ups of vector-control field inspections", long_about = None)]
struct Cli {
    /// Config file (defaults to .entomo-rollup.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    InitConfig {
        #[arg(long, default_value = config::DEFAULT_PATH)]
        out: PathBuf,
    },
    /// Create or upgrade the database schema
    InitDb,
    /// Load sample inspections
    Seed,
    /// Import inspections from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Rebuild every agent's daily summary for a date from inspections
    RegenerateDaily {
        #[arg(long, value_parser = period::parse_date)]
        date: NaiveDate,
        #[arg(long)]
        policy: Option<ConflictPolicy>,
    },
    /// Rebuild the weekly summary for the week containing a date
    RegenerateWeekly {
        #[arg(long, value_parser = period::parse_date)]
        date: NaiveDate,
        #[arg(long)]
        policy: Option<ConflictPolicy>,
    },
    /// Rebuild the monthly summary for a month
    #[command(group(
        ArgGroup::new("month_scope")
            .args(["date", "month"])
            .required(true)
            .multiple(false)
    ))]
    RegenerateMonthly {
        #[arg(long, value_parser = period::parse_date)]
        date: Option<NaiveDate>,
        #[arg(long, requires = "year")]
        month: Option<u32>,
        #[arg(long, requires = "month")]
        year: Option<i32>,
        #[arg(long)]
        policy: Option<ConflictPolicy>,
    },
    /// Rebuild the week and then the month containing a date
    RegenerateAll {
        #[arg(long, value_parser = period::parse_date)]
        date: NaiveDate,
        #[arg(long)]
        policy: Option<ConflictPolicy>,
    },
    /// Report whether a week or month has data to regenerate
    CheckAvailability {
        #[arg(long)]
        period_type: PeriodType,
        #[arg(long, value_parser = period::parse_date)]
        date: NaiveDate,
    },
    /// List stored summaries, newest first
    List {
        #[arg(long)]
        tier: Tier,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Print chart-ready datasets for the period containing a date
    Chart {
        #[arg(long)]
        tier: Tier,
        #[arg(long, value_parser = period::parse_date)]
        date: NaiveDate,
    },
    /// Generate a markdown report for the week and month containing a date
    Report {
        #[arg(long, value_parser = period::parse_date)]
        date: NaiveDate,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn init_logging(verbose: bool, config: &Config) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Exit codes: 0 success, 1 runtime or persistence failure, 2 invalid input.
#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        error!("{err:#}");
        eprintln!("Error: {err:#}");
        let client_error = err
            .downcast_ref::<SummaryError>()
            .is_some_and(SummaryError::is_client_error);
        std::process::exit(if client_error { 2 } else { 1 });
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::InitConfig { out } = &cli.command {
        if out.exists() {
            anyhow::bail!("{} already exists, remove it or edit it manually", out.display());
        }
        std::fs::write(out, Config::default_toml())
            .with_context(|| format!("failed to write {}", out.display()))?;
        println!("Config written to {}.", out.display());
        return Ok(());
    }

    let config = Config::resolve(cli.config.as_deref())?;
    init_logging(cli.verbose, &config);
    debug!(
        max_connections = config.database.max_connections,
        default_policy = %config.aggregation.default_policy,
        "configuration loaded"
    );

    let pool = db::connect(config.database_url()?, config.database.max_connections).await?;
    let default_policy = config.default_policy()?;
    let store = PgStore::new(pool.clone());

    match cli.command {
        Commands::InitConfig { .. } => {}
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let inserted = inspections::seed(&store).await?;
            println!("Inserted {inserted} sample inspections.");
        }
        Commands::Import { csv } => {
            let inserted = inspections::import_csv(&store, &csv).await?;
            println!("Inserted {inserted} inspections from {}.", csv.display());
        }
        Commands::RegenerateDaily { date, policy } => {
            let report =
                cascade::regenerate_daily(&store, date, policy.unwrap_or(default_policy)).await?;
            print_json(&report)?;
        }
        Commands::RegenerateWeekly { date, policy } => {
            let report =
                cascade::regenerate_weekly(&store, date, policy.unwrap_or(default_policy)).await?;
            print_json(&report)?;
        }
        Commands::RegenerateMonthly {
            date,
            month,
            year,
            policy,
        } => {
            let selector = match (date, month, year) {
                (Some(date), _, _) => MonthSelector::Containing(date),
                (None, Some(month), Some(year)) => MonthSelector::Explicit { month, year },
                _ => anyhow::bail!("pass --date or both --month and --year"),
            };
            let report =
                cascade::regenerate_monthly(&store, selector, policy.unwrap_or(default_policy))
                    .await?;
            print_json(&report)?;
        }
        Commands::RegenerateAll { date, policy } => {
            let report =
                cascade::regenerate_all(&store, date, policy.unwrap_or(default_policy)).await;
            print_json(&report)?;
            if report.has_failures() {
                anyhow::bail!("cascade finished with failed tiers");
            }
        }
        Commands::CheckAvailability { period_type, date } => {
            let availability = availability::check_availability(&store, period_type, date).await?;
            print_json(&availability)?;
        }
        Commands::List { tier, limit } => {
            let rows = report::list_summaries(&store, tier, Some(limit)).await?;
            print_json(&rows)?;
        }
        Commands::Chart { tier, date } => {
            let chart = report::chart_data(&store, tier, date).await?;
            print_json(&chart)?;
        }
        Commands::Report { date, out } => {
            let markdown = report::period_report(&store, date).await?;
            std::fs::write(&out, markdown)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
