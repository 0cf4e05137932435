//! Process-wide handle on the store currently being served.

use crate::error::MatrixStoreError;
use crate::store::MatrixStore;

use std::sync::{Arc, PoisonError, RwLock};
use tracing::{event, Level};

/// Holds the current [MatrixStore].
///
/// Readers take a cheap [Arc] clone. Replacing the store does not disturb readers still using
/// the previous one; it is closed once the last of them drops it.
#[derive(Debug, Default)]
pub struct StoreRegistry {
    current: RwLock<Option<Arc<MatrixStore>>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `store` current, returning the previous store, if any.
    pub fn set(&self, store: Arc<MatrixStore>) -> Option<Arc<MatrixStore>> {
        event!(
            Level::INFO,
            "Registering store {}",
            store
                .path()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "in memory".to_string())
        );
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(store)
    }

    /// The current store.
    pub fn get(&self) -> Result<Arc<MatrixStore>, MatrixStoreError> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(MatrixStoreError::NoLiveStore)
    }

    /// Forget the current store, returning it, if any.
    pub fn clear(&self) -> Option<Arc<MatrixStore>> {
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_utils;

    fn store() -> Arc<MatrixStore> {
        Arc::new(MatrixStore::from_connection(test_utils::sample_connection()).unwrap())
    }

    #[test]
    fn test_empty_registry() {
        let registry = StoreRegistry::new();
        match registry.get().unwrap_err() {
            MatrixStoreError::NoLiveStore => (),
            err => panic!("unexpected error {}", err),
        }
        assert!(registry.clear().is_none());
    }

    #[test]
    fn test_set_get_clear() {
        let registry = StoreRegistry::new();
        let first = store();
        assert!(registry.set(first.clone()).is_none());
        assert!(Arc::ptr_eq(&first, &registry.get().unwrap()));

        let second = store();
        let previous = registry.set(second.clone()).unwrap();
        assert!(Arc::ptr_eq(&first, &previous));
        assert!(Arc::ptr_eq(&second, &registry.get().unwrap()));

        // A reader holding the old store can keep using it.
        assert_eq!((3, 3), previous.shape());

        assert!(registry.clear().is_some());
        assert!(registry.get().is_err());
    }
}
