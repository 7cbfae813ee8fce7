use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use scoreline_sync::{
    Backfill, BackfillOptions, BackgroundService, Components, LatestSync, PeriodIngestor,
    SyncConfig,
};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "scoreline")]
#[command(about = "Competition ingestion: season backfill, latest sync and rating backfill")]
struct Cli {
    /// Sport key; defaults to SCORELINE_SPORT or "nfl".
    #[arg(long, global = true)]
    sport: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ingest every period of a season that is missing competitions.
    Backfill {
        #[arg(long)]
        season: String,
        /// Maximum competitions added across the run; 0 is unbounded.
        #[arg(long, default_value_t = 0)]
        limit: usize,
        /// Re-fetch every period and patch stored records instead.
        #[arg(long)]
        update: bool,
        /// Skip periods that already hold competitions.
        #[arg(long)]
        skip_populated: bool,
        /// Print the run report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Sync the provider's current period once.
    SyncLatest,
    /// Generate ratings for stored competitions that lack one.
    FillRatings {
        /// Only the most recent N stored periods.
        #[arg(long)]
        recent: Option<usize>,
    },
    /// Apply database migrations (requires DATABASE_URL).
    Migrate,
    /// Run the scheduled latest sync, rating pass and rating jobs until Ctrl-C.
    Serve,
}

fn init_tracing() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("scoreline=info"))?;
    let json = std::env::var("SCORELINE_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty())
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing()?;
    let cli = Cli::parse();

    let mut config = SyncConfig::from_env();
    if let Some(sport) = cli.sport {
        config.sport = sport;
    }
    let components = Components::build(config).await?;
    let sport = components.config.sport.clone();

    match cli.command.unwrap_or(Commands::SyncLatest) {
        Commands::Backfill {
            season,
            limit,
            update,
            skip_populated,
            json,
        } => {
            let ingestor = PeriodIngestor::new(
                Arc::clone(&components.source),
                Arc::clone(&components.repository),
            );
            let backfill = Backfill::new(ingestor).with_options(BackfillOptions { skip_populated });
            let report = if update {
                backfill.run_update(&sport, &season, limit).await
            } else {
                backfill.run(&sport, &season, limit).await
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.summary_line());
                for error in &report.errors {
                    eprintln!("  error: {error}");
                }
            }
            if report.has_errors() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::SyncLatest => {
            let ingestor = PeriodIngestor::new(
                Arc::clone(&components.source),
                Arc::clone(&components.repository),
            );
            let sync = LatestSync::new(Arc::clone(&components.source), ingestor)
                .with_ratings(components.ratings());
            match sync.run_once(&sport).await? {
                Some(result) => {
                    println!(
                        "{} {}: fetched={} existing={} added={}",
                        sport,
                        result.label(),
                        result.fetched_count,
                        result.existing_count,
                        result.added_count
                    );
                    if let Some(error) = result.error {
                        eprintln!("  error: {error}");
                        return Ok(ExitCode::FAILURE);
                    }
                }
                None => println!("{sport}: provider reports no current period"),
            }
        }
        Commands::FillRatings { recent } => {
            let ratings = components
                .ratings()
                .with_recent_periods(recent.or(components.config.rating_recent_periods));
            let summary = ratings.fill_missing(&sport).await?;
            println!(
                "{sport}: {} competitions processed, {} ratings stored",
                summary.processed, summary.updated
            );
        }
        Commands::Migrate => {
            let Some(pg) = &components.postgres else {
                bail!("DATABASE_URL must be set to run migrations");
            };
            pg.migrate().await?;
            println!("migrations applied");
        }
        Commands::Serve => {
            if let Some(pg) = &components.postgres {
                pg.migrate().await?;
            }
            let mut service = BackgroundService::new(&components);
            service.start().await?;
            tokio::signal::ctrl_c().await?;
            info!("shutdown signal received");
            service.shutdown().await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
