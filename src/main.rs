//! This file defines the matrixstore binary entry point.

use matrixstore::cli::{self, BuildArgs, Command};
use matrixstore::error::{ErrorReport, MatrixStoreError};
use matrixstore::extract::{self, ExtractLocation, JsonLinesFile, RecordSource, S3Settings};
use matrixstore::live;
use matrixstore::models::{PresentationRecord, RemapRecord};
use matrixstore::pipeline::{self, BuildOptions, BuildSources};
use matrixstore::tracing;

use std::path::Path;

async fn fetch_optional(
    location: Option<&ExtractLocation>,
    build_dir: &Path,
    s3: Option<&S3Settings>,
) -> Result<Option<JsonLinesFile>, MatrixStoreError> {
    match location {
        Some(location) => Ok(Some(extract::fetch(location, build_dir, s3).await?)),
        None => Ok(None),
    }
}

async fn build(build_dir: &Path, args: &BuildArgs) -> Result<(), MatrixStoreError> {
    let s3 = args.s3_settings();
    let prescribing = extract::fetch(&args.prescribing, build_dir, s3.as_ref()).await?;
    let statistics = extract::fetch(&args.statistics, build_dir, s3.as_ref()).await?;
    let presentations = fetch_optional(args.presentations.as_ref(), build_dir, s3.as_ref()).await?;
    let remap = fetch_optional(args.remap.as_ref(), build_dir, s3.as_ref()).await?;

    let options = BuildOptions::new(args.end_month, args.months);
    let sources = BuildSources {
        prescribing: &prescribing,
        statistics: &statistics,
        presentations: presentations
            .as_ref()
            .map(|file| file as &dyn RecordSource<PresentationRecord>),
        remap: remap
            .as_ref()
            .map(|file| file as &dyn RecordSource<RemapRecord>),
    };
    // The build is synchronous SQLite work.
    let published = tokio::task::block_in_place(|| pipeline::build(build_dir, &options, &sources))?;
    println!("{}", published.display());
    if args.set_live {
        let name = published
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_else(|| MatrixStoreError::InvalidArgument {
                message: format!("{} has no file name", published.display()),
            })?;
        live::set_live(build_dir, &live::Selector::Filename(name))?;
    }
    Ok(())
}

async fn run(args: cli::CommandLineArgs) -> Result<(), MatrixStoreError> {
    let build_dir = args.build_dir()?;
    match &args.command {
        Command::Build(build_args) => build(&build_dir, build_args).await,
        Command::SetLive(set_live) => {
            let name = live::set_live(&build_dir, &set_live.selector())?;
            println!("{}", name);
            Ok(())
        }
        Command::Prune(prune) => {
            for name in live::prune(&build_dir, prune.keep)? {
                println!("{}", name);
            }
            Ok(())
        }
    }
}

/// Application entry point
#[tokio::main]
async fn main() {
    let args = cli::parse();
    tracing::init_tracing();
    if let Err(error) = run(args).await {
        ErrorReport::new(&error).log();
        std::process::exit(error.category().exit_code());
    }
}
