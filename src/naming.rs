//! Canonical names of build files.
//!
//! A published build is called `store_<YYYY-MM>_<YYYY-MM-DD--HH-MM>_<hash>.sqlite`: the latest
//! month it holds, the time it was built and the first 16 hex digits of the MD5 of its content.
//! Names sort lexically by month, then build time.

use crate::error::MatrixStoreError;
use crate::models::YearMonth;

use std::fs::File;
use std::io::Read;
use std::path::Path;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::PrimitiveDateTime;

const PREFIX: &str = "store_";
const EXTENSION: &str = ".sqlite";
const HASH_LEN: usize = 16;
const TIMESTAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]--[hour]-[minute]");

/// Name of the live pointer in a build directory.
pub const LIVE_NAME: &str = "store_live.sqlite";

/// Components of a canonical build file name.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct BuildName {
    pub month: YearMonth,
    pub built_at: PrimitiveDateTime,
    pub hash: String,
}

impl BuildName {
    /// Render the file name.
    pub fn file_name(&self) -> Result<String, MatrixStoreError> {
        Ok(format!(
            "{}{}_{}_{}{}",
            PREFIX,
            self.month,
            self.built_at.format(TIMESTAMP_FORMAT)?,
            self.hash,
            EXTENSION
        ))
    }

    /// Parse a file name, returning `None` for anything that is not a canonical build name.
    pub fn parse(name: &str) -> Option<Self> {
        let stem = name.strip_prefix(PREFIX)?.strip_suffix(EXTENSION)?;
        let mut parts = stem.split('_');
        let month = parts.next()?.parse::<YearMonth>().ok()?;
        let built_at = PrimitiveDateTime::parse(parts.next()?, TIMESTAMP_FORMAT).ok()?;
        let hash = parts.next()?;
        if parts.next().is_some()
            || hash.len() != HASH_LEN
            || !hash
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        {
            return None;
        }
        Some(Self {
            month,
            built_at,
            hash: hash.to_string(),
        })
    }
}

/// Content hash of a file: the first 16 hex digits of its MD5 digest.
///
/// The file is streamed rather than read into memory.
pub fn hash_file(path: &Path) -> Result<String, MatrixStoreError> {
    let mut file = File::open(path)?;
    let mut context = md5::Context::new();
    let mut buffer = vec![0; 1 << 16];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        context.consume(&buffer[..read]);
    }
    let digest = context.compute();
    Ok(hex::encode(&digest.0[..HASH_LEN / 2]))
}

#[cfg(test)]
mod tests {
    use super::*;

    use regex::Regex;
    use time::macros::datetime;

    fn sample() -> BuildName {
        BuildName {
            month: YearMonth::new(2021, 3).unwrap(),
            built_at: datetime!(2021-04-12 9:05),
            hash: "0123456789abcdef".to_string(),
        }
    }

    #[test]
    fn test_file_name() {
        let name = sample().file_name().unwrap();
        assert_eq!("store_2021-03_2021-04-12--09-05_0123456789abcdef.sqlite", name);
        let pattern =
            Regex::new(r"^store_\d{4}-\d{2}_\d{4}-\d{2}-\d{2}--\d{2}-\d{2}_[0-9a-f]{16}\.sqlite$")
                .unwrap();
        assert!(pattern.is_match(&name));
    }

    #[test]
    fn test_parse() {
        let name = sample().file_name().unwrap();
        assert_eq!(Some(sample()), BuildName::parse(&name));
    }

    #[test]
    fn test_parse_rejects_others() {
        for name in [
            LIVE_NAME,
            "store_2021-03_2021-04-12--09-05_0123456789abcdef.sqlite-journal",
            "store_2021-03_2021-04-12--09-05_0123456789ABCDEF.sqlite",
            "store_2021-03_2021-04-12--09-05_0123456789abcde.sqlite",
            "store_2021-3_2021-04-12--09-05_0123456789abcdef.sqlite",
            "store_2021-03_2021-04-12_0123456789abcdef.sqlite",
            "store_2021-03_2021-04-12--09-05_0123456789abcdef_x.sqlite",
            "build_0c1d.sqlite",
        ] {
            assert_eq!(None, BuildName::parse(name), "{}", name);
        }
    }

    #[test]
    fn test_names_sort_by_month_then_time() {
        let older = sample();
        let mut rebuilt = sample();
        rebuilt.built_at = datetime!(2021-05-01 0:00);
        rebuilt.hash = "0000000000000000".to_string();
        let mut newer = sample();
        newer.month = YearMonth::new(2021, 4).unwrap();
        let mut names = vec![
            newer.file_name().unwrap(),
            older.file_name().unwrap(),
            rebuilt.file_name().unwrap(),
        ];
        names.sort();
        assert_eq!(
            vec![
                older.file_name().unwrap(),
                rebuilt.file_name().unwrap(),
                newer.file_name().unwrap()
            ],
            names
        );
    }

    #[test]
    fn test_hash_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"hello world").unwrap();
        // md5("hello world") = 5eb63bbbe01eeed093cb22bb8f5acdc3
        assert_eq!("5eb63bbbe01eeed0", hash_file(&path).unwrap());
    }
}
