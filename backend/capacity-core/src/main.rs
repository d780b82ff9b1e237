// src/main.rs
use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::{
    collections::BTreeSet,
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use capacity_core::{
    allocation_validation::parse_fte,
    csv_io,
    in_memory::{InMemoryAllocationRepository, StaticTimeSource, StaticUserDirectory},
    utilization::{overload_summary, OverloadSummary},
    AllocationFilter, AllocationService, AssignmentRequest, CapacityConfig, DateRange,
    DayOutcome, UserInfo, UtilizationRecord,
};

#[derive(Parser, Debug)]
#[command(
    name = "capacity-core",
    version,
    about = "Plan, compress and analyze team capacity allocations"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print allocations as compressed date ranges per user and project
    Ranges {
        #[arg(long)]
        allocations: PathBuf,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
    },
    /// Assign a user to a project for every working day in a range
    Expand {
        #[arg(long)]
        allocations: PathBuf,
        #[arg(long)]
        user: String,
        #[arg(long)]
        project: String,
        /// Fraction of a full working day, between 0 and 1
        #[arg(long)]
        fte: String,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        #[arg(long)]
        user_name: Option<String>,
        #[arg(long)]
        project_name: Option<String>,
        /// Where to write the resulting allocations
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Compare planned capacity with logged hours
    Analyze {
        #[arg(long)]
        allocations: PathBuf,
        #[arg(long)]
        hours: PathBuf,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
    },
}

#[derive(Serialize)]
struct AnalysisOutput {
    utilization: Vec<UtilizationRecord>,
    summary: OverloadSummary,
}

// --- Main Application Logic ---

#[tokio::main]
async fn main() -> Result<()> {
    // --- Setup ---
    let cli = Cli::parse();
    let config = CapacityConfig::from_env().context("Failed to load CAPACITY_* configuration")?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;
    info!("Configuration loaded: {:?}", config);

    match cli.command {
        Command::Ranges {
            allocations,
            user,
            project,
            start,
            end,
        } => {
            let repo = load_repository(&allocations)?;
            let service = build_service(&config, &repo)?;
            let mut filter = AllocationFilter::period(DateRange::new(start, end)?);
            filter.user_key = user;
            filter.project_key = project;

            for project_ranges in service.list_ranges(&filter).await? {
                println!(
                    "{} / {} ({})",
                    project_ranges.user_key, project_ranges.project_key, project_ranges.project_name
                );
                for range in project_ranges.ranges {
                    println!(
                        "  {} .. {}  {} FTE",
                        range.start_date,
                        range.end_date,
                        range.fte.normalize()
                    );
                }
            }
        }
        Command::Expand {
            allocations,
            user,
            project,
            fte,
            start,
            end,
            user_name,
            project_name,
            out,
        } => {
            let repo = if allocations.exists() {
                load_repository(&allocations)?
            } else {
                warn!(
                    "{} does not exist, starting from an empty allocation set",
                    allocations.display()
                );
                InMemoryAllocationRepository::new()
            };
            let service = build_service(&config, &repo)?;

            let fte = parse_fte(&fte).context("Invalid --fte")?;
            let mut request = AssignmentRequest::new(&user, &project, fte, start, end);
            if let Some(name) = user_name {
                request = request.user_display_name(&name);
            }
            if let Some(name) = project_name {
                request = request.project_name(&name);
            }

            let report = service.assign_range(&request).await?;
            for day in &report.days {
                println!("{}  {}", day.date, describe(&day.outcome));
            }
            let counts = report.counts();
            println!(
                "created: {}, updated: {}, skipped: {}, failed: {}, not attempted: {}",
                counts.created, counts.updated, counts.skipped, counts.failed, counts.not_attempted
            );

            if let Some(out) = out {
                let file = File::create(&out)
                    .with_context(|| format!("Failed to create {}", out.display()))?;
                csv_io::write_allocations(file, &repo.snapshot()?)
                    .with_context(|| format!("Failed to write {}", out.display()))?;
                info!("Wrote {} allocations to {}", repo.len(), out.display());
            }
        }
        Command::Analyze {
            allocations,
            hours,
            start,
            end,
        } => {
            let repo = load_repository(&allocations)?;
            let service = build_service(&config, &repo)?;
            let period = DateRange::new(start, end)?;

            let file = File::open(&hours)
                .with_context(|| format!("Failed to open {}", hours.display()))?;
            let actual_hours = csv_io::read_hours(file)
                .with_context(|| format!("Failed to read {}", hours.display()))?;
            let logged_users: BTreeSet<String> =
                actual_hours.keys().map(|(user_key, _)| user_key.clone()).collect();
            let users = StaticUserDirectory::new(
                logged_users
                    .into_iter()
                    .map(|key| UserInfo {
                        display_name: key.clone(),
                        key,
                        active: true,
                    })
                    .collect(),
            );
            let time_source = StaticTimeSource::from(actual_hours);

            let utilization = service
                .utilization(period, &users, &time_source, config.hours_per_fte_day)
                .await?;
            let summary = overload_summary(&repo.snapshot()?, period);
            let output = AnalysisOutput {
                utilization,
                summary,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

fn load_repository(path: &Path) -> Result<InMemoryAllocationRepository> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let rows = csv_io::read_allocations(file)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(InMemoryAllocationRepository::seeded(rows)?)
}

fn build_service(
    config: &CapacityConfig,
    repo: &InMemoryAllocationRepository,
) -> Result<AllocationService> {
    Ok(AllocationService::new(Arc::new(repo.clone()))
        .policy(Arc::new(config.working_day_policy()?))
        .concurrency(config.expand_concurrency)
        .contiguity(config.contiguity()?))
}

fn describe(outcome: &DayOutcome) -> String {
    match outcome {
        DayOutcome::Created => "created".to_string(),
        DayOutcome::Updated { previous_fte } => {
            format!("updated (was {})", previous_fte.normalize())
        }
        DayOutcome::Unchanged => "unchanged".to_string(),
        DayOutcome::Deleted => "deleted".to_string(),
        DayOutcome::Skipped(reason) => format!("skipped: {}", reason),
        DayOutcome::Failed(e) => format!("FAILED: {}", e),
        DayOutcome::NotAttempted => "not attempted".to_string(),
    }
}
