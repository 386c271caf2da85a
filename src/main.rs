use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;

use care_compliance::aggregate::{self, MonthFilter};
use care_compliance::bmi::{bmi, BmiCategory};
use care_compliance::config::{AppConfig, JsonFileStore, Preferences};
use care_compliance::db::{self, PgStore};
use care_compliance::mapping::parse_timestamp;
use care_compliance::models::{CareStatus, EvaluationRecord, NewEvaluation};
use care_compliance::store::{RecordStore, SnapshotQuery};
use care_compliance::subscription::{subscribe_all, subscribe_latest, SnapshotEvent};
use care_compliance::{logging, report};

#[derive(Parser)]
#[command(name = "care-compliance")]
#[command(about = "Ward care-compliance evaluations and monthly reporting", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed evaluations
    Seed,
    /// Import evaluations from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Record a new evaluation
    Record {
        #[arg(long)]
        assessor: String,
        /// done, not_done or na
        #[arg(long)]
        bone: CareStatus,
        /// done, not_done or na
        #[arg(long)]
        incontinence: CareStatus,
        #[arg(long, default_value = "")]
        notes: String,
        /// Assessment date (YYYY-MM-DD or RFC 3339); defaults to now
        #[arg(long, value_parser = parse_date_arg)]
        date: Option<DateTime<Utc>>,
        #[arg(long)]
        created_by: Option<String>,
    },
    /// Delete an evaluation by id
    Delete {
        #[arg(long, default_value = "")]
        id: String,
    },
    /// Print monthly compliance summaries
    Summary {
        /// YYYY-MM or "all"
        #[arg(long, default_value = "all")]
        month: MonthFilter,
    },
    /// List the months that have evaluations, newest first
    Months,
    /// List the most recent evaluations
    Latest {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Generate a markdown report
    Report {
        /// YYYY-MM or "all"
        #[arg(long, default_value = "all")]
        month: MonthFilter,
        #[arg(long, default_value = "care-compliance-report.md")]
        out: PathBuf,
    },
    /// Follow the shared collection and print summaries as it changes
    Watch {
        /// Follow only the latest evaluations instead of the full collection
        #[arg(long)]
        latest: bool,
    },
    /// Open the shared-secret gate for write commands
    Unlock {
        #[arg(long)]
        secret: String,
    },
    /// Close the shared-secret gate
    Lock,
    /// List remembered assessor names
    Assessors,
    /// Compute a body mass index
    Bmi {
        #[arg(long)]
        weight_kg: f64,
        #[arg(long)]
        height_cm: f64,
    },
}

fn parse_date_arg(value: &str) -> Result<DateTime<Utc>, String> {
    parse_timestamp(value).ok_or_else(|| format!("unrecognised date: {value}"))
}

async fn connect(config: &AppConfig) -> anyhow::Result<PgStore> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(config.database_url()?)
        .await
        .context("failed to connect to Postgres")?;
    Ok(PgStore::new(pool))
}

fn print_monthly(records: &[EvaluationRecord], filter: &MonthFilter) {
    let scoped = aggregate::filter_by_month(records, filter);
    let summaries = aggregate::summarize_monthly(&scoped);

    if summaries.is_empty() {
        println!("No evaluations found for {filter}.");
        return;
    }

    for summary in summaries.iter() {
        println!(
            "- {}: {} evaluations, done {}, not done {}, n/a {} ({:.1}% done)",
            summary.label,
            summary.total,
            summary.done,
            summary.not_done,
            summary.na,
            aggregate::percentage(summary.done, summary.total * 2)
        );
    }
}

fn open_preferences(config: &AppConfig) -> anyhow::Result<Preferences<JsonFileStore>> {
    Ok(Preferences::new(JsonFileStore::open(&config.settings_path)?))
}

fn print_months(records: &[EvaluationRecord]) {
    let months = aggregate::available_months(records);
    if months.is_empty() {
        println!("No evaluations recorded yet.");
        return;
    }
    for month in months {
        println!("- {month} ({})", aggregate::month_label(&month));
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    run(cli, &config).await
}

async fn run(cli: Cli, config: &AppConfig) -> anyhow::Result<()> {
    match cli.command {
        Commands::InitDb => {
            let store = connect(config).await?;
            db::init_db(store.pool()).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let store = connect(config).await?;
            let inserted = db::seed(&store).await?;
            println!("Inserted {inserted} seed evaluations.");
        }
        Commands::Import { csv } => {
            let store = connect(config).await?;
            let inserted = db::import_csv(&store, &csv).await?;
            println!("Inserted {inserted} evaluations from {}.", csv.display());
        }
        Commands::Record {
            assessor,
            bone,
            incontinence,
            notes,
            date,
            created_by,
        } => {
            let mut preferences = open_preferences(config)?;
            anyhow::ensure!(
                preferences.may_write(config.shared_secret.as_deref()),
                "Locked. Run `unlock` with the ward's shared secret first."
            );
            let payload = NewEvaluation {
                assessor,
                bone_protection: bone,
                incontinence_care: incontinence,
                notes,
                assessment_date: date.unwrap_or_else(Utc::now),
                created_by,
            }
            .validated()
            .map_err(|err| anyhow::anyhow!(err.user_message()))?;

            let store = connect(config).await?;
            let id = store
                .create(payload.clone())
                .await
                .map_err(|err| anyhow::anyhow!(err.user_message()))?;
            preferences.remember_assessor(&payload.assessor)?;
            println!("Recorded evaluation {id}.");
        }
        Commands::Delete { id } => {
            let preferences = open_preferences(config)?;
            anyhow::ensure!(
                preferences.may_write(config.shared_secret.as_deref()),
                "Locked. Run `unlock` with the ward's shared secret first."
            );
            if id.trim().is_empty() {
                println!("No evaluation selected; nothing deleted.");
                return Ok(());
            }
            let store = connect(config).await?;
            store
                .delete(&id)
                .await
                .map_err(|err| anyhow::anyhow!(err.user_message()))?;
            println!("Deleted evaluation {}.", id.trim());
        }
        Commands::Summary { month } => {
            let store = connect(config).await?;
            let records = store
                .fetch(SnapshotQuery::All)
                .await
                .map_err(|err| anyhow::anyhow!(err.user_message()))?;
            print_monthly(&records, &month);
        }
        Commands::Months => {
            let store = connect(config).await?;
            let records = store
                .fetch(SnapshotQuery::All)
                .await
                .map_err(|err| anyhow::anyhow!(err.user_message()))?;
            print_months(&records);
        }
        Commands::Latest { limit } => {
            let store = connect(config).await?;
            let limit = limit.unwrap_or(config.latest_limit);
            let records = store
                .fetch(SnapshotQuery::Latest(limit))
                .await
                .map_err(|err| anyhow::anyhow!(err.user_message()))?;

            if records.is_empty() {
                println!("No evaluations recorded yet.");
                return Ok(());
            }
            for record in records.iter() {
                println!(
                    "- [{}] {} by {}: bone protection {}, incontinence care {}",
                    record.id,
                    record.assessment_date.format("%Y-%m-%d %H:%M"),
                    record.assessor,
                    record.bone_protection,
                    record.incontinence_care
                );
            }
        }
        Commands::Report { month, out } => {
            let store = connect(config).await?;
            let records = store
                .fetch(SnapshotQuery::All)
                .await
                .map_err(|err| anyhow::anyhow!(err.user_message()))?;
            let report = report::build_report(&month, &records, config.latest_limit);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Watch { latest } => {
            let store = Arc::new(connect(config).await?);
            let mut subscription = if latest {
                subscribe_latest(store, config.latest_limit)
            } else {
                subscribe_all(store)
            };

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        subscription.unsubscribe();
                        println!("Stopped watching.");
                        break;
                    }
                    event = subscription.recv() => match event {
                        Some(SnapshotEvent::Snapshot(records)) => {
                            println!(
                                "{} evaluations as of {}:",
                                records.len(),
                                Utc::now().format("%H:%M:%S")
                            );
                            print_monthly(&records, &MonthFilter::All);
                        }
                        Some(SnapshotEvent::Failed(message)) => anyhow::bail!(message),
                        None => break,
                    }
                }
            }
        }
        Commands::Unlock { secret } => {
            let Some(expected) = config.shared_secret.as_deref() else {
                println!("No shared secret configured; write commands are already open.");
                return Ok(());
            };
            let mut preferences = open_preferences(config)?;
            if preferences.unlock(&secret, expected)? {
                println!("Unlocked.");
            } else {
                anyhow::bail!("Shared secret did not match.");
            }
        }
        Commands::Lock => {
            open_preferences(config)?.lock()?;
            println!("Locked.");
        }
        Commands::Assessors => {
            let names = open_preferences(config)?.known_assessors();
            if names.is_empty() {
                println!("No assessors remembered yet.");
            }
            for name in names {
                println!("- {name}");
            }
        }
        Commands::Bmi {
            weight_kg,
            height_cm,
        } => {
            let value = bmi(weight_kg, height_cm)
                .context("weight and height must both be positive")?;
            println!("BMI {value:.1} ({})", BmiCategory::from_bmi(value));
        }
    }

    Ok(())
}
