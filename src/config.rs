use std::path::PathBuf;

use clap::{Args, ValueEnum};
use uuid::Uuid;

use crate::filters::Filter;
use crate::join::JoinKeys;
use crate::loader::DataFiles;

pub const DEFAULT_LOG_DIRECTIVE: &str = "uev_metrics=info";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Options shared by every subcommand.
#[derive(Debug, Clone, Args)]
pub struct GlobalArgs {
    /// Directory holding the three CSV exports
    #[arg(long, env = "UEV_DATA_DIR", default_value = ".", global = true)]
    pub data_dir: PathBuf,
    /// Enrollment CSV, overrides the file in --data-dir
    #[arg(long, global = true)]
    pub enrollments_file: Option<PathBuf>,
    /// Course/teacher CSV, overrides the file in --data-dir
    #[arg(long, global = true)]
    pub courses_file: Option<PathBuf>,
    /// Support case CSV, overrides the file in --data-dir
    #[arg(long, global = true)]
    pub support_file: Option<PathBuf>,
    /// Read datasets from Postgres instead of CSV files
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    pub database_url: Option<String>,
    /// Snapshot to read from Postgres; defaults to the latest import
    #[arg(long, global = true)]
    pub snapshot: Option<Uuid>,
    /// Columns matching enrollments with course rows
    #[arg(long, value_enum, default_value_t = JoinKeys::Course, global = true)]
    pub join_keys: JoinKeys,
    /// Warn when more than this share of enrollments has no course row
    #[arg(long, default_value_t = 0.5, global = true)]
    pub max_unmatched_share: f64,
    #[arg(long = "semester", global = true)]
    pub semesters: Vec<String>,
    #[arg(long = "faculty", global = true)]
    pub faculties: Vec<String>,
    #[arg(long = "program", global = true)]
    pub programs: Vec<String>,
    #[arg(long = "modality", global = true)]
    pub modalities: Vec<String>,
    #[arg(long = "region", global = true)]
    pub regions: Vec<String>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub format: OutputFormat,
}

/// Where the datasets come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    Csv(DataFiles),
    Postgres {
        database_url: String,
        snapshot: Option<Uuid>,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub files: DataFiles,
    pub database_url: Option<String>,
    pub snapshot: Option<Uuid>,
    pub join_keys: JoinKeys,
    pub max_unmatched_share: f64,
    pub filter: Filter,
    pub format: OutputFormat,
}

impl Config {
    pub fn from_args(args: GlobalArgs) -> Self {
        let mut files = DataFiles::in_dir(&args.data_dir);
        if let Some(path) = args.enrollments_file {
            files.enrollments = path;
        }
        if let Some(path) = args.courses_file {
            files.courses = path;
        }
        if let Some(path) = args.support_file {
            files.support_cases = path;
        }

        Self {
            files,
            database_url: args.database_url.filter(|url| !url.trim().is_empty()),
            snapshot: args.snapshot,
            join_keys: args.join_keys,
            max_unmatched_share: args.max_unmatched_share.clamp(0.0, 1.0),
            filter: Filter {
                semesters: args.semesters,
                faculties: args.faculties,
                programs: args.programs,
                modalities: args.modalities,
                regions: args.regions,
            },
            format: args.format,
        }
    }

    /// Postgres wins whenever a database URL is configured.
    pub fn source(&self) -> DataSource {
        match &self.database_url {
            Some(url) => DataSource::Postgres {
                database_url: url.clone(),
                snapshot: self.snapshot,
            },
            None => DataSource::Csv(self.files.clone()),
        }
    }
}
