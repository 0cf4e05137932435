//! The live pointer: a symbolic link in the build directory naming the build that readers open.
//!
//! The link target is always a bare file name, so a build directory can be moved without
//! breaking it. The link is replaced by renaming a freshly made link over it, never edited in
//! place, so a reader resolving it mid-swap sees either the old or the new build.

use crate::error::MatrixStoreError;
use crate::models::YearMonth;
use crate::naming::{BuildName, LIVE_NAME};

use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{event, instrument, Level};

/// Path of the live pointer in a build directory.
pub fn pointer_path(build_dir: &Path) -> PathBuf {
    build_dir.join(LIVE_NAME)
}

/// Which build to make live.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Selector {
    /// Newest build of the most recent data
    Latest,
    /// Newest build whose latest month is this one
    Month(YearMonth),
    /// Exactly this file
    Filename(String),
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::Month(month) => write!(f, "month {}", month),
            Self::Filename(name) => write!(f, "file {}", name),
        }
    }
}

/// Canonically named builds in a directory, in ascending lexical order.
///
/// Everything else, including the live pointer and unfinished builds, is ignored.
pub fn list_builds(build_dir: &Path) -> Result<Vec<String>, MatrixStoreError> {
    let mut names = vec![];
    for entry in std::fs::read_dir(build_dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if BuildName::parse(name).is_some() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// File name the live pointer refers to, or `None` when there is no pointer.
pub fn live_target(build_dir: &Path) -> Result<Option<String>, MatrixStoreError> {
    let pointer = pointer_path(build_dir);
    match std::fs::symlink_metadata(&pointer) {
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
        Ok(metadata) if !metadata.file_type().is_symlink() => {
            return Err(MatrixStoreError::LivePointerNotSymlink { path: pointer })
        }
        Ok(_) => (),
    }
    let target = std::fs::read_link(&pointer)?;
    Ok(target
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.to_string()))
}

fn select(build_dir: &Path, selector: &Selector) -> Result<String, MatrixStoreError> {
    let no_match = || MatrixStoreError::NoMatchingBuild {
        selector: selector.to_string(),
    };
    match selector {
        Selector::Latest => list_builds(build_dir)?.pop().ok_or_else(no_match),
        Selector::Month(month) => list_builds(build_dir)?
            .into_iter()
            .rev()
            .find(|name| BuildName::parse(name).map(|build| build.month) == Some(*month))
            .ok_or_else(no_match),
        Selector::Filename(name) => {
            if name.is_empty() || name.contains(std::path::is_separator) || name == LIVE_NAME {
                return Err(MatrixStoreError::InvalidArgument {
                    message: format!("{} is not a build file name", name),
                });
            }
            if !build_dir.join(name).is_file() {
                return Err(MatrixStoreError::BuildFileMissing { name: name.clone() });
            }
            Ok(name.clone())
        }
    }
}

/// Point the live pointer at the selected build, returning its file name.
///
/// Nothing is changed when the existing pointer is not a symbolic link or the selected build
/// does not exist.
#[instrument]
pub fn set_live(build_dir: &Path, selector: &Selector) -> Result<String, MatrixStoreError> {
    let previous = live_target(build_dir)?;
    let name = select(build_dir, selector)?;
    let staging = build_dir.join(format!(
        ".{}.{}",
        LIVE_NAME,
        uuid::Uuid::new_v4().simple()
    ));
    std::os::unix::fs::symlink(&name, &staging)?;
    if let Err(err) = std::fs::rename(&staging, pointer_path(build_dir)) {
        // Best effort; the rename error is the one worth reporting.
        let _ = std::fs::remove_file(&staging);
        return Err(err.into());
    }
    event!(
        Level::INFO,
        "Live store is now {} (was {})",
        name,
        previous.as_deref().unwrap_or("unset")
    );
    Ok(name)
}

/// Delete all but the `keep` newest builds, returning the deleted names.
///
/// The live build is never deleted, even when it is older than the kept ones.
#[instrument]
pub fn prune(build_dir: &Path, keep: usize) -> Result<Vec<String>, MatrixStoreError> {
    let live = live_target(build_dir)?;
    let mut builds = list_builds(build_dir)?;
    builds.truncate(builds.len().saturating_sub(keep));
    let mut deleted = vec![];
    for name in builds {
        if live.as_deref() == Some(name.as_str()) {
            continue;
        }
        std::fs::remove_file(build_dir.join(&name))?;
        event!(Level::INFO, "Deleted old build {}", name);
        deleted.push(name);
    }
    Ok(deleted)
}
