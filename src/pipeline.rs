//! Offline build of a new store file.
//!
//! A build runs these stages in order, each committing its own transaction:
//!
//! 1. [BuildFile::create]: schema and axes
//! 2. [BuildFile::import_statistics]: organisation statistics
//! 3. [BuildFile::import_prescribing]: one row per presentation
//! 4. [BuildFile::remap]: fold retired presentation codes into their replacements
//! 5. [BuildFile::calculate_totals]: the all-presentations totals
//! 6. [BuildFile::publish]: compact, hash, name and move into the build directory
//!
//! The order is enforced by the type of [BuildFile]: each stage consumes the file in one state
//! and returns it in the next, so for example totals cannot be calculated before remapping:
//!
//! ```compile_fail
//! use matrixstore::pipeline::{BuildFile, PrescribingImported};
//!
//! fn totals_too_early(file: BuildFile<PrescribingImported>) {
//!     file.calculate_totals();
//! }
//! ```
//!
//! Until it is published a build lives in `<build_dir>/tmp/`. A failed build is left there for
//! inspection and is never given a canonical name.

mod init;
mod prescribing;
mod publish;
mod remap;
mod statistics;
mod totals;

use crate::axis::Axis;
use crate::error::MatrixStoreError;
use crate::extract::RecordSource;
use crate::matrix_ops::DENSITY_THRESHOLD;
use crate::models::{
    PrescribingRecord, PresentationRecord, RemapRecord, StatisticsRecord, YearMonth,
};

use rusqlite::Connection;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use time::Date;
use tracing::instrument;

/// Schema and axes written.
#[derive(Debug)]
pub struct Initialised;

/// Organisation statistics written.
#[derive(Debug)]
pub struct StatisticsImported;

/// Presentation rows written.
#[derive(Debug)]
pub struct PrescribingImported;

/// Retired codes folded into their replacements.
#[derive(Debug)]
pub struct Remapped;

/// Totals written. The file is complete.
#[derive(Debug)]
pub struct TotalsCalculated;

/// Parameters of a build.
#[derive(Clone, Debug, PartialEq)]
pub struct BuildOptions {
    /// Latest month in the build
    pub end_month: YearMonth,
    /// Number of months in the build, ending with `end_month`
    pub months: u32,
    /// Fill ratio above which matrices are stored densely
    pub threshold: f64,
}

impl BuildOptions {
    pub fn new(end_month: YearMonth, months: u32) -> Self {
        Self {
            end_month,
            months,
            threshold: DENSITY_THRESHOLD,
        }
    }
}

/// Inputs of a build.
pub struct BuildSources<'a> {
    /// Sorted by (code, organisation, date)
    pub prescribing: &'a dyn RecordSource<PrescribingRecord>,
    /// Sorted by (organisation, date)
    pub statistics: &'a dyn RecordSource<StatisticsRecord>,
    pub presentations: Option<&'a dyn RecordSource<PresentationRecord>>,
    pub remap: Option<&'a dyn RecordSource<RemapRecord>>,
}

/// A store file under construction, in build state `S`.
#[derive(Debug)]
pub struct BuildFile<S> {
    build_dir: PathBuf,
    path: PathBuf,
    connection: Connection,
    organisations: Axis<String>,
    dates: Axis<Date>,
    threshold: f64,
    state: PhantomData<S>,
}

impl<S> BuildFile<S> {
    /// Location of the unpublished file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Shape of every matrix in the file.
    pub fn shape(&self) -> (usize, usize) {
        (self.organisations.len(), self.dates.len())
    }

    pub fn organisations(&self) -> &[String] {
        self.organisations.labels()
    }

    pub fn dates(&self) -> &[Date] {
        self.dates.labels()
    }

    /// Matrix cell of an organisation and month, or `None` when either is outside the build.
    fn cell(&self, organisation: &str, date: &Date) -> Option<(usize, usize)> {
        Some((
            self.organisations.offset(organisation)?,
            self.dates.offset(date)?,
        ))
    }

    fn advance<T>(self) -> BuildFile<T> {
        BuildFile {
            build_dir: self.build_dir,
            path: self.path,
            connection: self.connection,
            organisations: self.organisations,
            dates: self.dates,
            threshold: self.threshold,
            state: PhantomData,
        }
    }
}

/// Run every stage and publish, returning the path of the new store file.
#[instrument(skip(sources))]
pub fn build(
    build_dir: &Path,
    options: &BuildOptions,
    sources: &BuildSources,
) -> Result<PathBuf, MatrixStoreError> {
    let no_remap: Vec<RemapRecord> = vec![];
    BuildFile::create(build_dir, options, sources.prescribing)?
        .import_statistics(sources.statistics)?
        .import_prescribing(sources.prescribing, sources.presentations)?
        .remap(sources.remap.unwrap_or(&no_remap))?
        .calculate_totals()?
        .publish()
}
