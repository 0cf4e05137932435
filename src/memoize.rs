//! Memoisation of expensive store computations.
//!
//! A memoised computation is identified by a [MemoizedFn] (name and version) together with its
//! arguments. Arguments contribute to the cache key through [CacheArgument]; a [MatrixStore]
//! contributes the content hash of its file, so results computed against one build are never
//! served for another. Results are stored JSON encoded in a [CacheBackend] and never expire.

use crate::error::MatrixStoreError;
use crate::models::{format_date, Field, YearMonth};
use crate::store::MatrixStore;

use cached::stores::{DiskCache, DiskCacheBuilder};
use cached::{Cached, IOCached, UnboundCache};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use time::Date;
use tracing::{event, Level};

/// Incremental builder of a cache key.
///
/// Every value is written as a one byte type tag followed by a length prefixed payload, so
/// different argument lists cannot produce the same byte stream.
pub struct CacheKeyBuilder {
    context: md5::Context,
}

impl CacheKeyBuilder {
    fn new() -> Self {
        Self {
            context: md5::Context::new(),
        }
    }

    /// Append one tagged value.
    pub fn write(&mut self, tag: u8, payload: &[u8]) {
        self.context.consume([tag]);
        self.context.consume((payload.len() as u64).to_le_bytes());
        self.context.consume(payload);
    }

    fn finish(self) -> String {
        format!("{:x}", self.context.compute())
    }
}

/// A value that may be used as an argument to a memoised computation.
pub trait CacheArgument {
    /// Write this argument's contribution to the key.
    ///
    /// # Arguments
    ///
    /// * `key`: Key being built
    /// * `position`: Zero-based position of the argument, used in errors
    fn write_key(&self, key: &mut CacheKeyBuilder, position: usize) -> Result<(), MatrixStoreError>;
}

impl<T: CacheArgument + ?Sized> CacheArgument for &T {
    fn write_key(&self, key: &mut CacheKeyBuilder, position: usize) -> Result<(), MatrixStoreError> {
        (**self).write_key(key, position)
    }
}

impl CacheArgument for bool {
    fn write_key(&self, key: &mut CacheKeyBuilder, _: usize) -> Result<(), MatrixStoreError> {
        key.write(b'b', &[*self as u8]);
        Ok(())
    }
}

macro_rules! impl_int_argument {
    ($($t:ty),*) => {
        $(
            impl CacheArgument for $t {
                fn write_key(
                    &self,
                    key: &mut CacheKeyBuilder,
                    _: usize,
                ) -> Result<(), MatrixStoreError> {
                    // All integer types share a tag so that 3_u8 and 3_i64 hit the same entry.
                    key.write(b'i', &(*self as i128).to_le_bytes());
                    Ok(())
                }
            }
        )*
    };
}

impl_int_argument!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl CacheArgument for f32 {
    fn write_key(&self, key: &mut CacheKeyBuilder, position: usize) -> Result<(), MatrixStoreError> {
        (*self as f64).write_key(key, position)
    }
}

impl CacheArgument for f64 {
    fn write_key(&self, key: &mut CacheKeyBuilder, _: usize) -> Result<(), MatrixStoreError> {
        key.write(b'f', &self.to_le_bytes());
        Ok(())
    }
}

impl CacheArgument for str {
    fn write_key(&self, key: &mut CacheKeyBuilder, _: usize) -> Result<(), MatrixStoreError> {
        key.write(b's', self.as_bytes());
        Ok(())
    }
}

impl CacheArgument for String {
    fn write_key(&self, key: &mut CacheKeyBuilder, position: usize) -> Result<(), MatrixStoreError> {
        self.as_str().write_key(key, position)
    }
}

impl CacheArgument for Date {
    fn write_key(&self, key: &mut CacheKeyBuilder, _: usize) -> Result<(), MatrixStoreError> {
        key.write(b'd', format_date(*self).as_bytes());
        Ok(())
    }
}

impl CacheArgument for YearMonth {
    fn write_key(&self, key: &mut CacheKeyBuilder, _: usize) -> Result<(), MatrixStoreError> {
        key.write(b'm', self.to_string().as_bytes());
        Ok(())
    }
}

impl CacheArgument for Field {
    fn write_key(&self, key: &mut CacheKeyBuilder, _: usize) -> Result<(), MatrixStoreError> {
        key.write(b'F', self.column().as_bytes());
        Ok(())
    }
}

impl CacheArgument for MatrixStore {
    fn write_key(&self, key: &mut CacheKeyBuilder, _: usize) -> Result<(), MatrixStoreError> {
        key.write(b'S', self.cache_key().as_bytes());
        Ok(())
    }
}

impl<T: CacheArgument> CacheArgument for Option<T> {
    fn write_key(&self, key: &mut CacheKeyBuilder, position: usize) -> Result<(), MatrixStoreError> {
        match self {
            Some(value) => value.write_key(key, position),
            None => {
                key.write(b'n', &[]);
                Ok(())
            }
        }
    }
}

/// Dynamically typed arguments are accepted only when they hold a scalar.
impl CacheArgument for serde_json::Value {
    fn write_key(&self, key: &mut CacheKeyBuilder, position: usize) -> Result<(), MatrixStoreError> {
        use serde_json::Value;
        let uncacheable = |kind| MatrixStoreError::UncacheableArgument { position, kind };
        match self {
            Value::Bool(value) => value.write_key(key, position),
            Value::Number(number) => match (number.as_i64(), number.as_u64(), number.as_f64()) {
                (Some(value), _, _) => value.write_key(key, position),
                (_, Some(value), _) => value.write_key(key, position),
                (_, _, Some(value)) => value.write_key(key, position),
                _ => Err(uncacheable("number")),
            },
            Value::String(value) => value.write_key(key, position),
            Value::Null => Err(uncacheable("null")),
            Value::Array(_) => Err(uncacheable("array")),
            Value::Object(_) => Err(uncacheable("object")),
        }
    }
}

/// Identity of a memoised computation.
///
/// Bump `version` whenever the computation's output changes for the same inputs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MemoizedFn {
    pub name: &'static str,
    pub version: u32,
}

impl MemoizedFn {
    pub const fn new(name: &'static str, version: u32) -> Self {
        Self { name, version }
    }

    /// Cache key for a call with the given arguments.
    pub fn key(&self, args: &[&dyn CacheArgument]) -> Result<String, MatrixStoreError> {
        let mut key = CacheKeyBuilder::new();
        key.write(b'N', self.name.as_bytes());
        key.write(b'V', &self.version.to_le_bytes());
        for (position, arg) in args.iter().enumerate() {
            arg.write_key(&mut key, position)?;
        }
        Ok(key.finish())
    }
}

/// Storage for memoised results.
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, MatrixStoreError>;
    fn set(&self, key: &str, value: String) -> Result<(), MatrixStoreError>;
}

/// Unbounded in-process cache.
pub struct MemoryCache {
    entries: Mutex<UnboundCache<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(UnboundCache::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cache_size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheBackend for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<String>, MatrixStoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.cache_get(&key.to_string()).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<(), MatrixStoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.cache_set(key.to_string(), value);
        Ok(())
    }
}

/// Cache persisted in a directory, surviving process restarts.
pub struct DiskCacheBackend {
    cache: DiskCache<String, String>,
}

impl DiskCacheBackend {
    /// Open or create the cache in `directory`.
    pub fn new(directory: &Path) -> Result<Self, MatrixStoreError> {
        let cache = DiskCacheBuilder::new("matrixstore_memo")
            .set_disk_directory(directory)
            .set_sync_to_disk_on_cache_change(true)
            .build()
            .map_err(|err| MatrixStoreError::CacheError {
                error: format!("{:?}", err),
            })?;
        Ok(Self { cache })
    }
}

impl CacheBackend for DiskCacheBackend {
    fn get(&self, key: &str) -> Result<Option<String>, MatrixStoreError> {
        self.cache
            .cache_get(&key.to_string())
            .map_err(|err| MatrixStoreError::CacheError {
                error: format!("{:?}", err),
            })
    }

    fn set(&self, key: &str, value: String) -> Result<(), MatrixStoreError> {
        self.cache
            .cache_set(key.to_string(), value)
            .map_err(|err| MatrixStoreError::CacheError {
                error: format!("{:?}", err),
            })?;
        Ok(())
    }
}

/// Runs computations through a cache.
pub struct Memoizer<B> {
    backend: B,
}

impl<B: CacheBackend> Memoizer<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Return the cached result of `function(args)`, computing and storing it on a miss.
    ///
    /// Fails with [MatrixStoreError::UncacheableArgument] before computing anything if an
    /// argument cannot be keyed. A cached value that no longer decodes is recomputed.
    pub fn call<T, F>(
        &self,
        function: &MemoizedFn,
        args: &[&dyn CacheArgument],
        compute: F,
    ) -> Result<T, MatrixStoreError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, MatrixStoreError>,
    {
        let key = function.key(args)?;
        if let Some(json) = self.backend.get(&key)? {
            match serde_json::from_str(&json) {
                Ok(value) => {
                    event!(Level::DEBUG, "Cache hit for {} ({})", function.name, key);
                    return Ok(value);
                }
                Err(err) => event!(
                    Level::WARN,
                    "Discarding undecodable cache entry for {}: {}",
                    function.name,
                    err
                ),
            }
        }
        event!(Level::DEBUG, "Cache miss for {} ({})", function.name, key);
        let value = compute()?;
        self.backend.set(&key, serde_json::to_string(&value)?)?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::matrix::AnyMatrix;
    use crate::store::PresentationFilter;
    use crate::test_utils;
    use std::cell::Cell;
    use time::macros::date;

    const TOTAL: MemoizedFn = MemoizedFn::new("total", 1);

    fn store() -> MatrixStore {
        MatrixStore::from_connection(test_utils::sample_connection()).unwrap()
    }

    #[test]
    fn test_key_is_stable() {
        let a = TOTAL.key(&[&"0101", &3_i32, &date!(2020 - 01 - 01)]).unwrap();
        let b = TOTAL.key(&[&"0101".to_string(), &3_u64, &date!(2020 - 01 - 01)]).unwrap();
        assert_eq!(a, b);
        assert_eq!(32, a.len());
    }

    #[test]
    fn test_key_differs() {
        let base = TOTAL.key(&[&"ab", &"c"]).unwrap();
        assert_ne!(base, TOTAL.key(&[&"a", &"bc"]).unwrap());
        assert_ne!(base, MemoizedFn::new("total", 2).key(&[&"ab", &"c"]).unwrap());
        assert_ne!(base, MemoizedFn::new("other", 1).key(&[&"ab", &"c"]).unwrap());
        assert_ne!(
            TOTAL.key(&[&1_i64]).unwrap(),
            TOTAL.key(&[&1.0_f64]).unwrap()
        );
        assert_ne!(
            TOTAL.key(&[&None::<i64>]).unwrap(),
            TOTAL.key(&[&Some(0_i64)]).unwrap()
        );
    }

    #[test]
    fn test_key_depends_on_store() {
        let first = store();
        let second = store();
        assert_ne!(
            TOTAL.key(&[&first, &Field::Items]).unwrap(),
            TOTAL.key(&[&second, &Field::Items]).unwrap()
        );
    }

    #[test]
    fn test_json_value_arguments() {
        let scalar = serde_json::json!("0101");
        assert_eq!(
            TOTAL.key(&[&"0101"]).unwrap(),
            TOTAL.key(&[&scalar]).unwrap()
        );
        for (value, kind) in [
            (serde_json::json!([1, 2]), "array"),
            (serde_json::json!({"a": 1}), "object"),
            (serde_json::Value::Null, "null"),
        ] {
            match TOTAL.key(&[&1, &value]).unwrap_err() {
                MatrixStoreError::UncacheableArgument { position, kind: k } => {
                    assert_eq!(1, position);
                    assert_eq!(kind, k);
                }
                err => panic!("unexpected error {}", err),
            }
        }
    }

    #[test]
    fn test_call_computes_once() {
        let memoizer = Memoizer::new(MemoryCache::new());
        let calls = Cell::new(0);
        let compute = || {
            calls.set(calls.get() + 1);
            Ok(vec![1.5, 2.5])
        };
        let first: Vec<f64> = memoizer.call(&TOTAL, &[&"x"], compute).unwrap();
        let second: Vec<f64> = memoizer.call(&TOTAL, &[&"x"], compute).unwrap();
        assert_eq!(first, second);
        assert_eq!(1, calls.get());
        let _: Vec<f64> = memoizer.call(&TOTAL, &[&"y"], compute).unwrap();
        assert_eq!(2, calls.get());
        assert_eq!(2, memoizer.backend().len());
    }

    #[test]
    fn test_call_uncacheable_does_not_compute() {
        let memoizer = Memoizer::new(MemoryCache::new());
        let result: Result<i64, _> = memoizer.call(&TOTAL, &[&serde_json::json!([])], || {
            panic!("computed")
        });
        assert!(matches!(
            result,
            Err(MatrixStoreError::UncacheableArgument { .. })
        ));
        assert!(memoizer.backend().is_empty());
    }

    #[test]
    fn test_call_error_is_not_cached() {
        let memoizer = Memoizer::new(MemoryCache::new());
        let result: Result<i64, _> = memoizer.call(&TOTAL, &[&1], || {
            Err(MatrixStoreError::NoLiveStore)
        });
        assert!(result.is_err());
        assert!(memoizer.backend().is_empty());
    }

    #[test]
    fn test_memory_cache_construction() {
        let cache = MemoryCache::default();
        assert!(cache.is_empty());
        cache.set("k", "v".to_string()).unwrap();
        assert_eq!(1, cache.len());
        assert_eq!(Some("v".to_string()), cache.get("k").unwrap());
        assert!(MemoryCache::new().is_empty());
    }

    #[test]
    fn test_memoize_matrix_result() {
        let store = store();
        let memoizer = Memoizer::new(MemoryCache::new());
        let function = MemoizedFn::new("generic_items", 1);
        let compute = || store.sum_matching(&PresentationFilter::Generic(true), Field::Items);
        let first: AnyMatrix = memoizer
            .call(&function, &[&store, &Field::Items], compute)
            .unwrap();
        let cached: AnyMatrix = memoizer
            .call(&function, &[&store, &Field::Items], || panic!("computed"))
            .unwrap();
        assert_eq!(first, cached);
    }

    #[test]
    fn test_disk_cache() {
        let dir = tempfile::tempdir().unwrap();
        let memoizer = Memoizer::new(DiskCacheBackend::new(dir.path()).unwrap());
        let value: String = memoizer
            .call(&TOTAL, &[&"k"], || Ok("computed".to_string()))
            .unwrap();
        assert_eq!("computed", value);
        let cached: String = memoizer
            .call(&TOTAL, &[&"k"], || panic!("computed twice"))
            .unwrap();
        assert_eq!("computed", cached);
    }
}
