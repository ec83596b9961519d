use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::backend::DatasetName;

/// Per-dataset write locks.
///
/// Load, merge and persist of one dataset must not interleave with another
/// writer of the same dataset. Writers of different datasets never contend.
/// A wipe of the whole namespace waits for every in-flight writer and holds
/// new ones off until it is done.
#[derive(Debug, Default)]
pub struct DatasetLocks {
    locks: Mutex<HashMap<DatasetName, Arc<Mutex<()>>>>,
    namespace: RwLock<()>,
}

impl DatasetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for `name`, created on first use.
    pub fn handle(&self, name: &DatasetName) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(name.clone()).or_default())
    }

    /// Held by a writer for the whole load, merge and persist.
    pub fn writer(&self) -> RwLockReadGuard<'_, ()> {
        self.namespace.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Held while the namespace is wiped.
    pub fn wiper(&self) -> RwLockWriteGuard<'_, ()> {
        self.namespace.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Locks `handle`. A writer that panicked mid-update cannot have left a
/// half-written dataset behind (persist is atomic), so poisoning is ignored.
pub fn exclusive(handle: &Mutex<()>) -> MutexGuard<'_, ()> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_name_shares_lock() {
        let locks = DatasetLocks::new();
        let a = locks.handle(&DatasetName::new("klines", "A_1m.csv"));
        let b = locks.handle(&DatasetName::new("klines", "A_1m.csv"));
        let c = locks.handle(&DatasetName::new("klines", "B_1m.csv"));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));

        let _guard = exclusive(&a);
        assert!(b.try_lock().is_err());
        assert!(c.try_lock().is_ok());
    }

    #[test]
    fn test_wiper_excludes_writers() {
        let locks = DatasetLocks::new();
        {
            let _writer = locks.writer();
            let _other = locks.writer();
            assert!(locks.namespace.try_write().is_err());
        }
        let _wiper = locks.wiper();
        assert!(locks.namespace.try_read().is_err());
    }
}
