//! Command Line Interface (CLI) arguments.

use crate::error::MatrixStoreError;
use crate::extract::{ExtractLocation, S3Settings};
use crate::live::Selector;
use crate::models::YearMonth;
use crate::s3_client::S3Credentials;

use clap::{Args, Parser, Subcommand};
use expanduser::expanduser;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Matrix store command line interface
#[derive(Clone, Debug, Parser)]
#[command(version, about)]
pub struct CommandLineArgs {
    /// Directory holding published builds and the live pointer
    #[arg(
        long,
        default_value = "~/.local/share/matrixstore",
        env = "MATRIXSTORE_BUILD_DIR"
    )]
    pub build_dir: String,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Build a new store file from extracts
    Build(BuildArgs),
    /// Point the live pointer at a build
    SetLive(SetLiveArgs),
    /// Delete all but the newest builds
    Prune(PruneArgs),
}

#[derive(Clone, Debug, Args)]
pub struct BuildArgs {
    /// Latest month in the build, as YYYY-MM
    pub end_month: YearMonth,
    /// Number of months in the build
    #[arg(long, default_value_t = 60, env = "MATRIXSTORE_MONTHS")]
    pub months: u32,
    /// Prescribing extract, sorted by code, organisation and date. A path or s3://bucket/key
    #[arg(long)]
    pub prescribing: ExtractLocation,
    /// Organisation statistics extract, sorted by organisation and date
    #[arg(long)]
    pub statistics: ExtractLocation,
    /// Presentation attributes extract
    #[arg(long)]
    pub presentations: Option<ExtractLocation>,
    /// Code remapping extract
    #[arg(long)]
    pub remap: Option<ExtractLocation>,
    /// URL of the S3 service holding extracts
    #[arg(long, env = "MATRIXSTORE_S3_ENDPOINT")]
    pub s3_endpoint: Option<Url>,
    #[arg(long, env = "MATRIXSTORE_S3_ACCESS_KEY", requires = "s3_secret_key")]
    pub s3_access_key: Option<String>,
    #[arg(long, env = "MATRIXSTORE_S3_SECRET_KEY", requires = "s3_access_key")]
    pub s3_secret_key: Option<String>,
    /// Maximum time in seconds to wait for each extract download.
    #[arg(long, default_value_t = 300, env = "MATRIXSTORE_EXTRACT_TIMEOUT")]
    pub extract_timeout: u64,
    /// Make the new build live once published
    #[arg(long, default_value_t = false)]
    pub set_live: bool,
}

impl BuildArgs {
    /// S3 connection settings, if an endpoint was given.
    pub fn s3_settings(&self) -> Option<S3Settings> {
        let endpoint = self.s3_endpoint.clone()?;
        let credentials = match (&self.s3_access_key, &self.s3_secret_key) {
            (Some(access_key), Some(secret_key)) => S3Credentials::access_key(access_key, secret_key),
            _ => S3Credentials::None,
        };
        Some(S3Settings {
            endpoint,
            credentials,
            timeout: Duration::from_secs(self.extract_timeout),
        })
    }
}

#[derive(Clone, Debug, Args)]
pub struct SetLiveArgs {
    /// Make the newest build of this month live, as YYYY-MM
    #[arg(long, conflicts_with = "filename")]
    pub date: Option<YearMonth>,
    /// Make this build file live
    #[arg(long)]
    pub filename: Option<String>,
}

impl SetLiveArgs {
    pub fn selector(&self) -> Selector {
        match (&self.date, &self.filename) {
            (Some(month), _) => Selector::Month(*month),
            (None, Some(filename)) => Selector::Filename(filename.clone()),
            (None, None) => Selector::Latest,
        }
    }
}

#[derive(Clone, Debug, Args)]
pub struct PruneArgs {
    /// Number of builds to keep, newest first. The live build is always kept.
    #[arg(long, default_value_t = 3, env = "MATRIXSTORE_KEEP")]
    pub keep: usize,
}

impl CommandLineArgs {
    /// The build directory with any leading `~` expanded.
    pub fn build_dir(&self) -> Result<PathBuf, MatrixStoreError> {
        Ok(expanduser(&self.build_dir)?)
    }
}

/// Returns parsed command line arguments.
pub fn parse() -> CommandLineArgs {
    CommandLineArgs::parse()
}
