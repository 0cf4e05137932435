//! Record sources feeding the build pipeline.
//!
//! Extracts are JSON Lines files, one record per line, optionally gzip compressed (detected by a
//! `.gz` suffix). They may live on local disk or in S3, in which case they are first downloaded
//! into the build directory's scratch area.

use crate::error::MatrixStoreError;
use crate::s3_client::{S3Client, S3Credentials};

use flate2::read::MultiGzDecoder;
use serde::de::DeserializeOwned;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines, Read};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{event, instrument, Level};
use url::Url;

/// Name of the scratch directory inside a build directory.
pub const TMP_DIR: &str = "tmp";

/// Scratch directory of a build directory, created if missing.
pub fn tmp_dir(build_dir: &Path) -> Result<PathBuf, MatrixStoreError> {
    let dir = build_dir.join(TMP_DIR);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// One pass over the records of a source.
pub type Records<'a, T> = Box<dyn Iterator<Item = Result<T, MatrixStoreError>> + 'a>;

/// A source of records that can be read more than once.
pub trait RecordSource<T> {
    /// Start a fresh pass over the records.
    fn records(&self) -> Result<Records<'_, T>, MatrixStoreError>;
}

/// Records held in memory.
impl<T: Clone> RecordSource<T> for Vec<T> {
    fn records(&self) -> Result<Records<'_, T>, MatrixStoreError> {
        Ok(Box::new(self.iter().cloned().map(Ok)))
    }
}

/// A local JSON Lines file.
#[derive(Clone, Debug, PartialEq)]
pub struct JsonLinesFile {
    path: PathBuf,
}

impl JsonLinesFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_gzip(&self) -> bool {
        self.path
            .extension()
            .map(|extension| extension == "gz")
            .unwrap_or(false)
    }

    /// Open the file for one pass over its records.
    pub fn open<T: DeserializeOwned>(&self) -> Result<JsonLines<T>, MatrixStoreError> {
        let file = File::open(&self.path)?;
        let reader: Box<dyn Read> = if self.is_gzip() {
            Box::new(MultiGzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Ok(JsonLines {
            location: self.path.display().to_string(),
            lines: BufReader::new(reader).lines(),
            line: 0,
            marker: PhantomData,
        })
    }
}

impl<T: DeserializeOwned + 'static> RecordSource<T> for JsonLinesFile {
    fn records(&self) -> Result<Records<'_, T>, MatrixStoreError> {
        Ok(Box::new(self.open::<T>()?))
    }
}

/// Iterator over the records of a JSON Lines file. Blank lines are skipped.
pub struct JsonLines<T> {
    location: String,
    lines: Lines<BufReader<Box<dyn Read>>>,
    line: usize,
    marker: PhantomData<T>,
}

impl<T: DeserializeOwned> Iterator for JsonLines<T> {
    type Item = Result<T, MatrixStoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let text = match self.lines.next()? {
                Ok(text) => text,
                Err(err) => return Some(Err(err.into())),
            };
            self.line += 1;
            if text.trim().is_empty() {
                continue;
            }
            return Some(
                serde_json::from_str(&text).map_err(|source| MatrixStoreError::Extract {
                    location: self.location.clone(),
                    line: self.line,
                    source,
                }),
            );
        }
    }
}

/// Read every record of a source into memory.
pub fn read_all<T, S: RecordSource<T> + ?Sized>(source: &S) -> Result<Vec<T>, MatrixStoreError> {
    source.records()?.collect()
}

/// Where an extract lives.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExtractLocation {
    Local(PathBuf),
    S3 { bucket: String, key: String },
}

impl FromStr for ExtractLocation {
    type Err = MatrixStoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if !value.starts_with("s3://") {
            return Ok(Self::Local(PathBuf::from(value)));
        }
        let invalid = || MatrixStoreError::InvalidArgument {
            message: format!("invalid S3 location {}, expected s3://bucket/key", value),
        };
        let url = Url::parse(value).map_err(|_| invalid())?;
        let bucket = url.host_str().ok_or_else(invalid)?.to_string();
        let key = url.path().trim_start_matches('/').to_string();
        if bucket.is_empty() || key.is_empty() {
            return Err(invalid());
        }
        Ok(Self::S3 { bucket, key })
    }
}

impl fmt::Display for ExtractLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::S3 { bucket, key } => write!(f, "s3://{}/{}", bucket, key),
        }
    }
}

/// Connection settings for extracts stored in S3.
#[derive(Clone, Debug)]
pub struct S3Settings {
    pub endpoint: Url,
    pub credentials: S3Credentials,
    /// Upper bound on each download
    pub timeout: Duration,
}

/// Make an extract available as a local file.
///
/// Local extracts are used in place. S3 extracts are downloaded into `<build_dir>/tmp/`,
/// keeping the object's file name so that a `.gz` suffix is still recognised.
#[instrument(skip(s3))]
pub async fn fetch(
    location: &ExtractLocation,
    build_dir: &Path,
    s3: Option<&S3Settings>,
) -> Result<JsonLinesFile, MatrixStoreError> {
    let (bucket, key) = match location {
        ExtractLocation::Local(path) => return Ok(JsonLinesFile::new(path.clone())),
        ExtractLocation::S3 { bucket, key } => (bucket, key),
    };
    let settings = s3.ok_or_else(|| MatrixStoreError::InvalidArgument {
        message: format!("{} requires an S3 endpoint", location),
    })?;
    let file_name = key.rsplit('/').next().unwrap_or(key.as_str());
    let destination = tmp_dir(build_dir)?.join(format!(
        "extract_{}_{}",
        uuid::Uuid::new_v4().simple(),
        file_name
    ));
    let client = S3Client::new(&settings.endpoint, settings.credentials.clone());
    let size = tokio::time::timeout(
        settings.timeout,
        client.download_to_file(bucket, key, &destination),
    )
    .await
    .map_err(|_| MatrixStoreError::ExtractTimeout {
        seconds: settings.timeout.as_secs(),
    })??;
    event!(
        Level::INFO,
        "Downloaded {} ({} bytes) to {}",
        location,
        size,
        destination.display()
    );
    Ok(JsonLinesFile::new(destination))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::models::{PrescribingRecord, RemapRecord};
    use crate::test_utils;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn remap(former: &str, current: &str) -> RemapRecord {
        RemapRecord {
            former: former.to_string(),
            current: current.to_string(),
        }
    }

    #[test]
    fn test_read_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remap.jsonl");
        let records = vec![remap("A", "B"), remap("C", "D")];
        test_utils::write_jsonl(&path, &records);
        let source = JsonLinesFile::new(&path);
        let first: Vec<RemapRecord> = read_all(&source).unwrap();
        assert_eq!(records, first);
        // A second pass sees the same records.
        let second: Vec<RemapRecord> = read_all(&source).unwrap();
        assert_eq!(records, second);
    }

    #[test]
    fn test_read_gzip_and_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remap.jsonl.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder
            .write_all(b"{\"former\":\"A\",\"current\":\"B\"}\n\n{\"former\":\"C\",\"current\":\"D\"}\n")
            .unwrap();
        encoder.finish().unwrap();
        let records: Vec<RemapRecord> = read_all(&JsonLinesFile::new(&path)).unwrap();
        assert_eq!(vec![remap("A", "B"), remap("C", "D")], records);
    }

    #[test]
    fn test_read_malformed_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prescribing.jsonl");
        std::fs::write(
            &path,
            "{\"code\":\"X\",\"organisation\":\"P1\",\"date\":\"2020-01-01\"}\n{\"code\":\n",
        )
        .unwrap();
        let source = JsonLinesFile::new(&path);
        match read_all::<PrescribingRecord, _>(&source).unwrap_err() {
            MatrixStoreError::Extract {
                location,
                line,
                source: _,
            } => {
                assert!(location.ends_with("prescribing.jsonl"));
                assert_eq!(2, line);
            }
            err => panic!("unexpected error {}", err),
        }
    }

    #[test]
    fn test_read_missing_file() {
        let source = JsonLinesFile::new("/nonexistent/remap.jsonl");
        assert!(matches!(
            read_all::<RemapRecord, _>(&source),
            Err(MatrixStoreError::Io(_))
        ));
    }

    #[test]
    fn test_in_memory_source() {
        let records = vec![remap("A", "B")];
        let read: Vec<RemapRecord> = read_all(&records).unwrap();
        assert_eq!(records, read);
    }

    #[test]
    fn test_parse_location() {
        assert_eq!(
            ExtractLocation::Local(PathBuf::from("data/prescribing.jsonl")),
            "data/prescribing.jsonl".parse().unwrap()
        );
        let location: ExtractLocation = "s3://extracts/2021/prescribing.jsonl.gz".parse().unwrap();
        assert_eq!(
            ExtractLocation::S3 {
                bucket: "extracts".to_string(),
                key: "2021/prescribing.jsonl.gz".to_string(),
            },
            location
        );
        assert_eq!("s3://extracts/2021/prescribing.jsonl.gz", location.to_string());
        for invalid in ["s3://", "s3://bucket", "s3://bucket/"] {
            assert!(matches!(
                invalid.parse::<ExtractLocation>(),
                Err(MatrixStoreError::InvalidArgument { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_fetch_local() {
        let dir = tempfile::tempdir().unwrap();
        let location = ExtractLocation::Local(PathBuf::from("remap.jsonl"));
        let file = fetch(&location, dir.path(), None).await.unwrap();
        assert_eq!(Path::new("remap.jsonl"), file.path());
    }

    #[tokio::test]
    async fn test_fetch_s3_without_settings() {
        let dir = tempfile::tempdir().unwrap();
        let location: ExtractLocation = "s3://bucket/remap.jsonl".parse().unwrap();
        assert!(matches!(
            fetch(&location, dir.path(), None).await,
            Err(MatrixStoreError::InvalidArgument { .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_s3_timeout() {
        // Nothing listens on this address, so the request cannot finish within the timeout.
        let dir = tempfile::tempdir().unwrap();
        let settings = S3Settings {
            endpoint: Url::parse("http://10.255.255.1:9000").unwrap(),
            credentials: S3Credentials::access_key("user", "password"),
            timeout: Duration::from_millis(1),
        };
        let location: ExtractLocation = "s3://bucket/remap.jsonl".parse().unwrap();
        match fetch(&location, dir.path(), Some(&settings)).await.unwrap_err() {
            MatrixStoreError::ExtractTimeout { seconds } => assert_eq!(0, seconds),
            err => panic!("unexpected error {}", err),
        }
    }
}
