//! Error handling.

use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_smithy_types::byte_stream::error::Error as ByteStreamError;
use ndarray::ShapeError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strum_macros::Display;
use thiserror::Error;
use tracing::{event, Level};
use zune_inflate::errors::InflateDecodeErrors;

/// Matrix store error type
///
/// This type encapsulates the various errors that may occur while building, publishing or
/// querying a store. Each variant belongs to an [ErrorCategory].
#[derive(Debug, Error)]
pub enum MatrixStoreError {
    /// Malformed matrix blob
    #[error("corrupt matrix blob: {reason}")]
    CorruptBlob { reason: String },

    /// Error decompressing data
    #[error("failed to decompress data")]
    DecompressionZune(#[from] InflateDecodeErrors),

    /// Filesystem error
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    /// Error from the embedded SQL engine
    #[error("SQLite error")]
    Sqlite(#[from] rusqlite::Error),

    /// Error creating ndarray array from shape
    #[error("failed to create array from shape")]
    ShapeInvalid(#[from] ShapeError),

    /// Error converting between integer types
    #[error(transparent)]
    TryFromInt(#[from] std::num::TryFromIntError),

    /// Store file content is inconsistent
    #[error("corrupt store: {reason}")]
    CorruptStore { reason: String },

    /// Store file written with an incompatible schema
    #[error("store schema version {found} is not supported (expected {expected})")]
    SchemaMismatch { expected: i64, found: i64 },

    /// Query matched no rows
    #[error("nothing matches {query}")]
    NotFound { query: String },

    /// Single-row query matched several rows
    #[error("{count} rows match {query}, expected one")]
    AmbiguousResult { query: String, count: usize },

    /// Organisation code not on the organisation axis
    #[error("unknown organisation {code}")]
    UnknownOrganisation { code: String },

    /// Date not on the calendar axis
    #[error("unknown date {date}")]
    UnknownDate { date: String },

    /// Group identifier not known to a row grouper
    #[error("unknown group {group}")]
    UnknownGroup { group: String },

    /// No store has been registered
    #[error("no live store has been set")]
    NoLiveStore,

    /// Extract records out of order
    #[error("input is not sorted: {current} follows {previous}")]
    UnsortedInput { previous: String, current: String },

    /// Malformed extract record
    #[error("invalid record at {location} line {line}")]
    Extract {
        location: String,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// Malformed `YYYY-MM-DD` date
    #[error("invalid date {value}")]
    InvalidDate {
        value: String,
        #[source]
        source: time::error::Parse,
    },

    /// Malformed `YYYY-MM` month
    #[error("invalid month {value}, expected YYYY-MM")]
    InvalidMonth { value: String },

    /// Invalid argument supplied by the caller
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// The live pointer path exists but is not a symbolic link
    #[error("{} exists and is not a symbolic link", path.display())]
    LivePointerNotSymlink { path: PathBuf },

    /// No build file matches the selection
    #[error("no build matches {selector}")]
    NoMatchingBuild { selector: String },

    /// Explicitly named build file does not exist
    #[error("build file {name} does not exist")]
    BuildFileMissing { name: String },

    /// Memoised function called with an argument that has no stable cache key
    #[error("argument {position} of type {kind} cannot be used as a cache key")]
    UncacheableArgument { position: usize, kind: &'static str },

    /// Error using function cache
    #[error("function cache error {error}")]
    CacheError { error: String },

    /// Error (de)serialising JSON
    #[error("JSON error")]
    Json(#[from] serde_json::Error),

    /// Error formatting a timestamp
    #[error("failed to format timestamp")]
    TimeFormat(#[from] time::error::Format),

    /// Error reading object data from S3
    #[error("error receiving object from S3 storage")]
    S3ByteStream(#[from] ByteStreamError),

    /// Missing Content-Length header in S3 response.
    #[error("S3 response missing Content-Length header")]
    S3ContentLengthMissing,

    /// Error while retrieving an object from S3
    #[error("error retrieving object from S3 storage")]
    S3GetObject(#[from] SdkError<GetObjectError>),

    /// Extract download took too long
    #[error("extract download timed out after {seconds} seconds")]
    ExtractTimeout { seconds: u64 },
}

/// Broad classes of failure.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum ErrorCategory {
    /// The build cannot continue; its temporary file is left for inspection
    BuildFatal,
    /// A query referred to something the store does not hold
    Lookup,
    /// Stored data could not be decoded
    Codec,
    /// The live pointer could not be updated
    Publisher,
    /// The caller supplied invalid input
    Usage,
}

impl ErrorCategory {
    /// Process exit code used by the binary.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::BuildFatal => 1,
            Self::Usage => 2,
            Self::Lookup => 3,
            Self::Codec => 4,
            Self::Publisher => 5,
        }
    }
}

impl MatrixStoreError {
    /// Returns the category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            // Codec
            Self::CorruptBlob { reason: _ }
            | Self::CorruptStore { reason: _ }
            | Self::DecompressionZune(_)
            | Self::ShapeInvalid(_)
            | Self::TryFromInt(_) => ErrorCategory::Codec,

            // Lookup
            Self::NotFound { query: _ }
            | Self::AmbiguousResult { query: _, count: _ }
            | Self::UnknownOrganisation { code: _ }
            | Self::UnknownDate { date: _ }
            | Self::UnknownGroup { group: _ }
            | Self::NoLiveStore => ErrorCategory::Lookup,

            // Publisher
            Self::LivePointerNotSymlink { path: _ }
            | Self::NoMatchingBuild { selector: _ }
            | Self::BuildFileMissing { name: _ } => ErrorCategory::Publisher,

            // Usage
            Self::InvalidMonth { value: _ }
            | Self::InvalidArgument { message: _ }
            | Self::UncacheableArgument {
                position: _,
                kind: _,
            } => ErrorCategory::Usage,

            // Build fatal
            Self::Io(_)
            | Self::Sqlite(_)
            | Self::SchemaMismatch {
                expected: _,
                found: _,
            }
            | Self::UnsortedInput {
                previous: _,
                current: _,
            }
            | Self::Extract {
                location: _,
                line: _,
                source: _,
            }
            | Self::InvalidDate { value: _, source: _ }
            | Self::CacheError { error: _ }
            | Self::Json(_)
            | Self::TimeFormat(_)
            | Self::S3ByteStream(_)
            | Self::S3ContentLengthMissing
            | Self::ExtractTimeout { seconds: _ } => ErrorCategory::BuildFatal,

            Self::S3GetObject(sdk_error) => match sdk_error {
                // A missing object or bucket means the extract location is wrong.
                SdkError::ServiceError(get_obj_error) => {
                    let get_obj_error = get_obj_error.err();
                    match get_obj_error {
                        GetObjectError::InvalidObjectState(_) | GetObjectError::NoSuchKey(_) => {
                            ErrorCategory::Usage
                        }
                        // Quite a lot of error cases end up as unhandled. Attempt to determine
                        // the error from the code.
                        _ => match get_obj_error.code() {
                            Some("NoSuchBucket")
                            | Some("InvalidAccessKeyId")
                            | Some("SignatureDoesNotMatch")
                            | Some("AccessDenied") => ErrorCategory::Usage,
                            _ => ErrorCategory::BuildFatal,
                        },
                    }
                }
                _ => ErrorCategory::BuildFatal,
            },
        }
    }
}

/// Human readable report of an error and its causes
///
/// Implements serde (de)serialise.
#[derive(Debug, Deserialize, PartialEq, Serialize)]
pub struct ErrorReport {
    /// Main error message
    pub message: String,

    /// Optional list of causes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caused_by: Option<Vec<String>>,
}

impl ErrorReport {
    /// Return a new ErrorReport
    ///
    /// # Arguments
    ///
    /// * `error`: The error that occurred
    pub fn new<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        let message = error.to_string();
        let mut caused_by = None;
        let mut current = error.source();
        while let Some(source) = current {
            let mut causes: Vec<String> = caused_by.unwrap_or_default();
            causes.push(source.to_string());
            caused_by = Some(causes);
            current = source.source();
        }
        // Remove duplicate entries.
        if let Some(caused_by) = caused_by.as_mut() {
            caused_by.dedup()
        }
        ErrorReport { message, caused_by }
    }

    /// Emit the report as error events.
    pub fn log(&self) {
        event!(Level::ERROR, "{}", self.message);
        for cause in self.caused_by.iter().flatten() {
            event!(Level::ERROR, "Caused by: {}", cause);
        }
    }
}

impl std::fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        for cause in self.caused_by.iter().flatten() {
            write!(f, "\nCaused by: {}", cause)?;
        }
        Ok(())
    }
}
