use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;

mod aggregate;
mod classify;
mod config;
mod correlate;
mod db;
mod filters;
mod indicators;
mod join;
mod loader;
mod logging;
mod models;
mod rank;
mod report;

use config::{Config, DataSource, GlobalArgs, OutputFormat};
use indicators::Pipeline;
use models::Datasets;
use rank::Direction;
use report::Style;

#[derive(Parser)]
#[command(name = "uev-metrics")]
#[command(about = "Dropout, performance and support indicators for the Virtual Education Unit", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Copy the CSV exports into a new Postgres snapshot
    Import,
    /// List imported snapshots
    Snapshots,
    /// Global indicators and the riskiest programs
    Overview,
    /// Status counts, program indicators, riskiest courses and segments
    Enrollment {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Courses ranked by dropout rate
    Courses {
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, value_enum, default_value_t = Direction::Descending)]
        order: Direction,
    },
    /// Dropout and failure by modality and sub-period
    Segments,
    /// Group size, grades and failure by course and teacher
    Teachers {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Support reasons, response times and satisfaction
    Support,
    /// Support response time against dropout by semester, faculty and program
    Correlate,
    /// Top programs by dropout, top support reasons and support averages
    Summary,
    /// Write every section to a markdown report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing(config::DEFAULT_LOG_DIRECTIVE);
    let cli = Cli::parse();
    let config = Config::from_args(cli.global);

    match cli.command {
        Commands::InitDb => {
            let pool = db::connect(require_database_url(&config)?).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Import => {
            let database_url = require_database_url(&config)?;
            let datasets = loader::load_files(&config.files)?;
            let pool = db::connect(database_url).await?;
            let snapshot_id = db::import_snapshot(&pool, &datasets).await?;
            println!(
                "Imported snapshot {snapshot_id}: {} enrollments, {} courses, {} support cases.",
                datasets.enrollments.len(),
                datasets.courses.len(),
                datasets.support_cases.len()
            );
        }
        Commands::Snapshots => {
            let pool = db::connect(require_database_url(&config)?).await?;
            let snapshots = db::list_snapshots(&pool).await?;
            if snapshots.is_empty() {
                println!("No snapshots imported yet.");
                return Ok(());
            }
            for snapshot in snapshots {
                println!(
                    "- {} imported {} ({} enrollments, {} courses, {} support cases)",
                    snapshot.id,
                    snapshot.imported_at.format("%Y-%m-%d %H:%M"),
                    snapshot.enrollments,
                    snapshot.courses,
                    snapshot.support_cases
                );
            }
        }
        command => {
            let datasets = load_datasets(&config).await?;
            if datasets.is_empty() {
                tracing::warn!("all three datasets are empty");
            }
            let pipeline = Pipeline::new(
                &datasets,
                config.join_keys,
                &config.filter,
                config.max_unmatched_share,
            );
            run_analysis(command, &config, &pipeline)?;
        }
    }

    Ok(())
}

fn require_database_url(config: &Config) -> anyhow::Result<&str> {
    config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set to a Postgres instance for this command")
}

async fn load_datasets(config: &Config) -> anyhow::Result<Datasets> {
    match config.source() {
        DataSource::Csv(files) => loader::load_files(&files),
        DataSource::Postgres {
            database_url,
            snapshot,
        } => {
            let pool = db::connect(&database_url).await?;
            let snapshot_id = match snapshot {
                Some(id) => id,
                None => db::latest_snapshot(&pool)
                    .await?
                    .context("no snapshot imported yet; run `uev-metrics import` first")?,
            };
            db::fetch_datasets(&pool, snapshot_id).await
        }
    }
}

fn emit<T: Serialize>(
    format: OutputFormat,
    value: &T,
    render: impl FnOnce(&mut String, Style, &T),
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => {
            let mut output = String::new();
            render(&mut output, Style::Text, value);
            print!("{}", output.trim_start());
        }
    }
    Ok(())
}

fn run_analysis(command: Commands, config: &Config, pipeline: &Pipeline<'_>) -> anyhow::Result<()> {
    match command {
        Commands::Overview => emit(config.format, &pipeline.overview(), report::render_overview),
        Commands::Enrollment { limit } => {
            emit(config.format, &pipeline.enrollment(limit), report::render_enrollment)
        }
        Commands::Courses { limit, order } => {
            let title = match order {
                Direction::Descending => "Courses with the highest dropout rate",
                Direction::Ascending => "Courses with the lowest dropout rate",
            };
            emit(config.format, &pipeline.top_courses(limit, order), |output, style, table| {
                report::render_table_section(output, style, title, table)
            })
        }
        Commands::Segments => {
            emit(config.format, &pipeline.modality_subperiod(), |output, style, table| {
                report::render_table_section(
                    output,
                    style,
                    "Dropout + failure by modality and sub-period",
                    table,
                )
            })
        }
        Commands::Teachers { limit } => {
            emit(config.format, &pipeline.teaching(limit), report::render_teaching)
        }
        Commands::Support => emit(config.format, &pipeline.support(), report::render_support),
        Commands::Correlate => {
            emit(config.format, &pipeline.correlation()?, report::render_correlation)
        }
        Commands::Summary => emit(config.format, &pipeline.summary(), report::render_summary),
        Commands::Report { out, limit } => {
            let overview = pipeline.overview();
            let enrollment = pipeline.enrollment(limit);
            let teaching = pipeline.teaching(limit);
            let support = pipeline.support();
            let correlation = pipeline.correlation()?;
            let summary = pipeline.summary();

            let report = report::build_report(&report::ReportInput {
                generated_on: chrono::Utc::now().date_naive(),
                filter: &config.filter,
                join_stats: pipeline.join_stats,
                degraded_join: pipeline.degraded_join,
                overview: &overview,
                enrollment: &enrollment,
                teaching: &teaching,
                support: &support,
                correlation: &correlation,
                summary: &summary,
            });
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
            Ok(())
        }
        Commands::InitDb | Commands::Import | Commands::Snapshots => Ok(()),
    }
}
