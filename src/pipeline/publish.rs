//! Final stage: compact, hash, name and move into the build directory.

use super::{BuildFile, TotalsCalculated};
use crate::error::MatrixStoreError;
use crate::models::YearMonth;
use crate::naming::{self, BuildName};

use std::path::PathBuf;
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing::{event, instrument, Level};

impl BuildFile<TotalsCalculated> {
    /// Publish with the current UTC time as the build time.
    pub fn publish(self) -> Result<PathBuf, MatrixStoreError> {
        let now = OffsetDateTime::now_utc();
        self.publish_at(PrimitiveDateTime::new(now.date(), now.time()))
    }

    /// Compact the file, then move it into the build directory under its canonical name.
    ///
    /// The file is closed before it is hashed, so the name reflects its final content. Returns
    /// the published path.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn publish_at(self, built_at: PrimitiveDateTime) -> Result<PathBuf, MatrixStoreError> {
        self.connection.execute_batch("VACUUM")?;
        let BuildFile {
            build_dir,
            path,
            connection,
            dates,
            ..
        } = self;
        connection.close().map_err(|(_, error)| error)?;

        let month = dates
            .last()
            .map(|date| YearMonth::of(*date))
            .ok_or_else(|| MatrixStoreError::CorruptStore {
                reason: "build has no dates".to_string(),
            })?;
        let name = BuildName {
            month,
            built_at,
            hash: naming::hash_file(&path)?,
        };
        let published = build_dir.join(name.file_name()?);
        std::fs::rename(&path, &published)?;
        event!(Level::INFO, "Published {}", published.display());
        Ok(published)
    }
}
