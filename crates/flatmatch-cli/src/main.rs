use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use flatmatch_core::{NotificationFrequency, SearchCriteria};
use flatmatch_sync::{pipeline_from_env, SearchOutcome};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "flatmatch-cli")]
#[command(about = "Swiss apartment listing matcher")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the scrape and notification scheduler
    Run,
    /// Run one scrape cycle
    Scrape,
    /// Run one match-and-notify cycle for a tier
    Match { frequency: NotificationFrequency },
    /// Live search using criteria from a JSON file
    Search { criteria_file: PathBuf },
    /// Apply database migrations
    Migrate,
    #[command(subcommand)]
    Profile(ProfileCommand),
}

#[derive(Debug, Subcommand)]
enum ProfileCommand {
    /// Subscribe an address to a JSON criteria file
    Add {
        email: String,
        criteria_file: PathBuf,
        #[arg(long, default_value = "daily")]
        frequency: NotificationFrequency,
    },
    List { email: String },
    Delete { id: Uuid },
}

async fn read_criteria(path: &PathBuf) -> Result<SearchCriteria> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Migrations and profile management only make sense against Postgres; a
/// profile created in memory would vanish when the command exits.
fn require_database(command: Option<&Commands>, has_database: bool) -> Result<()> {
    let needs = match command {
        Some(Commands::Migrate) => "run migrations",
        Some(Commands::Profile(_)) => "manage profiles",
        _ => return Ok(()),
    };
    if !has_database {
        bail!("DATABASE_URL must be set to {needs}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let pipeline = pipeline_from_env().await?;
    require_database(cli.command.as_ref(), pipeline.stores.pg.is_some())?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let cron = pipeline.cron_schedule();
            let mut sched = pipeline.scheduler.clone().start(&cron).await?;
            tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
            info!("shutting down scheduler");
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Scrape => {
            if let Some(summary) = pipeline.scheduler.run_scrape_cycle(Utc::now()).await {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
        }
        Commands::Match { frequency } => {
            if let Some(summary) = pipeline.scheduler.run_match_cycle(frequency, Utc::now()).await? {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
        }
        Commands::Search { criteria_file } => {
            let criteria = read_criteria(&criteria_file).await?;
            match pipeline.search.search(&criteria, Utc::now()).await? {
                SearchOutcome::Matches { matches } => {
                    println!("{}", serde_json::to_string_pretty(&matches)?);
                }
                SearchOutcome::NoMatches { total_scraped, duration } => {
                    println!(
                        "no matching listings found ({total_scraped} scraped in {:.2}s)",
                        duration.as_secs_f64()
                    );
                }
            }
        }
        Commands::Migrate => {
            let Some(pg) = &pipeline.stores.pg else {
                bail!("DATABASE_URL must be set to run migrations");
            };
            pg.migrate().await?;
            println!("migrations applied");
        }
        Commands::Profile(ProfileCommand::Add {
            email,
            criteria_file,
            frequency,
        }) => {
            let criteria = read_criteria(&criteria_file).await?;
            let profile = pipeline
                .stores
                .profiles
                .create(&email, &criteria, frequency, Utc::now())
                .await?;
            println!("{}", profile.id);
        }
        Commands::Profile(ProfileCommand::List { email }) => {
            let profiles = pipeline.stores.profiles.list_for_email(&email).await?;
            println!("{}", serde_json::to_string_pretty(&profiles)?);
        }
        Commands::Profile(ProfileCommand::Delete { id }) => {
            pipeline.stores.profiles.delete(id).await?;
            println!("deleted {id}");
        }
    }

    Ok(())
}
