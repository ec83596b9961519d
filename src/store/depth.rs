use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::backend::{Backend, DatasetName, is_valid_key};
use super::locks::{self, DatasetLocks};
use crate::codec::DecodeError;
use crate::model::{DepthSnapshot, Result, StoreError};

pub const NAMESPACE: &str = "depth";

const EXTENSION: &str = ".json";

pub fn dataset_name(symbol: &str) -> DatasetName {
    DatasetName::new(NAMESPACE, format!("{symbol}{EXTENSION}"))
}

/// Stored form of a depth dataset. `rows`/`cols` is the shape every
/// snapshot in `snapshots` shares.
#[derive(Debug, Serialize, Deserialize)]
struct DepthDataset {
    rows: usize,
    cols: usize,
    snapshots: Vec<DepthSnapshot>,
}

/// Append-only order book history: one dataset per symbol.
///
/// Snapshots are never merged; two captures with the same `time` are both
/// kept, in arrival order.
pub struct DepthStore {
    backend: Arc<dyn Backend>,
    locks: DatasetLocks,
}

impl DepthStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            locks: DatasetLocks::new(),
        }
    }

    /// Appends one snapshot to `symbol`'s history.
    ///
    /// The first snapshot fixes the dataset shape; later snapshots with a
    /// different (rows, cols) are rejected and the dataset is left as is.
    pub fn append_snapshot(&self, symbol: &str, time: i64, rows: Vec<Vec<f64>>) -> Result<()> {
        if !is_valid_key(symbol) {
            return Err(StoreError::InvalidKey(symbol.to_string()));
        }
        let shape = snapshot_shape(symbol, &rows)?;

        let name = dataset_name(symbol);
        let _writer = self.locks.writer();
        let handle = self.locks.handle(&name);
        let _guard = locks::exclusive(&handle);

        let mut dataset = match self.load(&name)? {
            Some(dataset) => {
                if (dataset.rows, dataset.cols) != shape {
                    log::warn!(
                        "rejected {}x{} snapshot for {}, dataset is {}x{}",
                        shape.0,
                        shape.1,
                        symbol,
                        dataset.rows,
                        dataset.cols
                    );
                    return Err(StoreError::ShapeMismatch {
                        symbol: symbol.to_string(),
                        reason: format!(
                            "shape {}x{} does not match established {}x{}",
                            shape.0, shape.1, dataset.rows, dataset.cols
                        ),
                    });
                }
                dataset
            }
            None => {
                log::info!("created depth dataset {} with shape {}x{}", name, shape.0, shape.1);
                DepthDataset {
                    rows: shape.0,
                    cols: shape.1,
                    snapshots: Vec::new(),
                }
            }
        };
        dataset.snapshots.push(DepthSnapshot { time, rows });

        let bytes = serde_json::to_vec(&dataset).map_err(|e| StoreError::StorageWrite {
            name: name.to_string(),
            source: std::io::Error::from(e).into(),
        })?;
        self.backend.persist(&name, &bytes).map_err(|source| {
            log::error!("failed to persist {}: {}", name, source);
            StoreError::StorageWrite {
                name: name.to_string(),
                source,
            }
        })?;

        log::debug!("{} now holds {} snapshots", name, dataset.snapshots.len());
        Ok(())
    }

    /// Every snapshot of `symbol` in insertion order.
    ///
    /// Unlike kline queries, a symbol that was never written is an error.
    pub fn read_all(&self, symbol: &str) -> Result<Vec<DepthSnapshot>> {
        if !is_valid_key(symbol) {
            return Err(StoreError::NotFound(symbol.to_string()));
        }
        match self.load(&dataset_name(symbol))? {
            Some(dataset) => Ok(dataset.snapshots),
            None => {
                log::error!("no depth dataset for {}", symbol);
                Err(StoreError::NotFound(symbol.to_string()))
            }
        }
    }

    /// Sorted symbols that have a depth dataset.
    pub fn list_symbols(&self) -> Result<Vec<String>> {
        let files = self
            .backend
            .names(NAMESPACE)
            .map_err(|source| StoreError::StorageRead {
                name: NAMESPACE.to_string(),
                source,
            })?;
        Ok(files
            .iter()
            .filter_map(|file| file.strip_suffix(EXTENSION))
            .map(str::to_string)
            .collect())
    }

    /// Removes every depth dataset once in-flight appends have finished.
    pub fn wipe_all(&self) -> Result<()> {
        let _wiper = self.locks.wiper();
        self.backend
            .wipe(NAMESPACE)
            .map_err(|source| StoreError::StorageWrite {
                name: NAMESPACE.to_string(),
                source,
            })?;
        log::info!("wiped all depth datasets");
        Ok(())
    }

    fn load(&self, name: &DatasetName) -> Result<Option<DepthDataset>> {
        let bytes = self
            .backend
            .load(name)
            .map_err(|source| StoreError::StorageRead {
                name: name.to_string(),
                source,
            })?;

        match bytes {
            Some(bytes) => {
                let dataset = serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;
                Ok(Some(dataset))
            }
            None => Ok(None),
        }
    }
}

/// (rows, cols) of a snapshot, rejecting empty, ragged or non-finite input.
fn snapshot_shape(symbol: &str, rows: &[Vec<f64>]) -> Result<(usize, usize)> {
    let cols = rows.first().map_or(0, Vec::len);
    if cols == 0 {
        return Err(StoreError::ShapeMismatch {
            symbol: symbol.to_string(),
            reason: "snapshot is empty".to_string(),
        });
    }

    for (i, row) in rows.iter().enumerate() {
        if row.len() != cols {
            return Err(StoreError::ShapeMismatch {
                symbol: symbol.to_string(),
                reason: format!("row {} has {} columns, expected {}", i, row.len(), cols),
            });
        }
        if let Some(j) = row.iter().position(|v| !v.is_finite()) {
            return Err(DecodeError::NonFiniteLevel { row: i, col: j }.into());
        }
    }
    Ok((rows.len(), cols))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fs::FsBackend;
    use crate::store::memory::MemoryBackend;

    fn book(levels: usize, seed: f64) -> Vec<Vec<f64>> {
        (0..levels)
            .map(|i| vec![seed + i as f64 * 0.01, 1.5 + i as f64])
            .collect()
    }

    fn memory_store() -> DepthStore {
        DepthStore::new(Arc::new(MemoryBackend::new()))
    }

    #[test]
    fn test_append_preserves_history() {
        let store = memory_store();
        let first = book(20, 65000.1);
        store.append_snapshot("BTCUSDT", 1234567890, first.clone()).unwrap();
        store.append_snapshot("BTCUSDT", 1234567891, book(20, 65001.3)).unwrap();

        let history = store.read_all("BTCUSDT").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].time, 1234567890);
        assert_eq!(history[0].rows[0], first[0]);
        assert_eq!(history[0].rows, first);
        assert_eq!(history[1].time, 1234567891);
    }

    #[test]
    fn test_same_time_is_appended_not_merged() {
        let store = memory_store();
        store.append_snapshot("ETHUSDT", 10, book(3, 1.0)).unwrap();
        store.append_snapshot("ETHUSDT", 10, book(3, 2.0)).unwrap();
        store.append_snapshot("ETHUSDT", 5, book(3, 3.0)).unwrap();

        let times: Vec<i64> = store.read_all("ETHUSDT").unwrap().iter().map(|s| s.time).collect();
        assert_eq!(times, vec![10, 10, 5]);
    }

    #[test]
    fn test_shape_mismatch_leaves_dataset_unchanged() {
        let store = memory_store();
        store.append_snapshot("BTCUSDT", 1, book(20, 1.0)).unwrap();

        let wide: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64, 1.0, 2.0]).collect();
        let err = store.append_snapshot("BTCUSDT", 2, wide).unwrap_err();
        assert!(matches!(err, StoreError::ShapeMismatch { .. }));

        let err = store.append_snapshot("BTCUSDT", 3, book(19, 1.0)).unwrap_err();
        assert!(matches!(err, StoreError::ShapeMismatch { .. }));

        let history = store.read_all("BTCUSDT").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].rows, book(20, 1.0));
    }

    #[test]
    fn test_ragged_and_empty_snapshots_are_rejected() {
        let store = memory_store();
        let ragged = vec![vec![1.0, 2.0], vec![3.0]];
        assert!(matches!(
            store.append_snapshot("BTCUSDT", 1, ragged),
            Err(StoreError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            store.append_snapshot("BTCUSDT", 1, Vec::new()),
            Err(StoreError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            store.append_snapshot("BTCUSDT", 1, vec![vec![f64::NAN, 1.0]]),
            Err(StoreError::Decode(DecodeError::NonFiniteLevel { row: 0, col: 0 }))
        ));
        assert!(matches!(store.read_all("BTCUSDT"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_read_unknown_symbol_is_not_found() {
        let store = memory_store();
        assert!(matches!(store.read_all("NOPE"), Err(StoreError::NotFound(_))));
        assert!(matches!(store.read_all("../NOPE"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_invalid_symbol_is_rejected_on_write() {
        let store = memory_store();
        assert!(matches!(
            store.append_snapshot("a/b", 1, book(2, 1.0)),
            Err(StoreError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_list_and_wipe() {
        let store = memory_store();
        store.append_snapshot("ETHUSDT", 1, book(2, 1.0)).unwrap();
        store.append_snapshot("BTCUSDT", 1, book(4, 1.0)).unwrap();
        assert_eq!(store.list_symbols().unwrap(), vec!["BTCUSDT", "ETHUSDT"]);

        store.wipe_all().unwrap();
        assert!(store.list_symbols().unwrap().is_empty());
    }

    #[test]
    fn test_prices_survive_disk_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![vec![0.1 + 0.2, 1e-9], vec![65432.123456789, 0.30000000000000004]];
        {
            let store = DepthStore::new(Arc::new(FsBackend::open(dir.path()).unwrap()));
            store.append_snapshot("BTCUSDT", 42, rows.clone()).unwrap();
        }
        assert!(dir.path().join("depth/BTCUSDT.json").is_file());

        let store = DepthStore::new(Arc::new(FsBackend::open(dir.path()).unwrap()));
        let history = store.read_all("BTCUSDT").unwrap();
        assert_eq!(history[0].rows, rows);
    }

    #[test]
    fn test_concurrent_appends_keep_every_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = DepthStore::new(Arc::new(FsBackend::open(dir.path()).unwrap()));

        std::thread::scope(|scope| {
            for worker in 0..6_i64 {
                let store = &store;
                scope.spawn(move || {
                    for i in 0..8 {
                        let time = worker * 100 + i;
                        store.append_snapshot("BTCUSDT", time, book(5, time as f64)).unwrap();
                    }
                });
            }
        });

        let history = store.read_all("BTCUSDT").unwrap();
        assert_eq!(history.len(), 48);
        let mut times: Vec<i64> = history.iter().map(|s| s.time).collect();
        times.sort();
        let expected: Vec<i64> = (0..6).flat_map(|w| (0..8).map(move |i| w * 100 + i)).collect();
        assert_eq!(times, expected);
        for snapshot in &history {
            assert_eq!(snapshot.rows, book(5, snapshot.time as f64));
        }
    }

    #[test]
    fn test_wipe_during_appends_never_fails_a_writer() {
        let dir = tempfile::tempdir().unwrap();
        let store = DepthStore::new(Arc::new(FsBackend::open(dir.path()).unwrap()));

        std::thread::scope(|scope| {
            for worker in 0..4_i64 {
                let store = &store;
                scope.spawn(move || {
                    for i in 0..20 {
                        store.append_snapshot("ETHUSDT", worker * 100 + i, book(3, 1.0)).unwrap();
                    }
                });
            }
            scope.spawn(|| {
                for _ in 0..10 {
                    store.wipe_all().unwrap();
                }
            });
        });

        store.wipe_all().unwrap();
        assert!(store.list_symbols().unwrap().is_empty());
        store.append_snapshot("ETHUSDT", 1, book(3, 1.0)).unwrap();
        assert_eq!(store.read_all("ETHUSDT").unwrap().len(), 1);
    }
}
