use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::backend::{Backend, DatasetName, is_valid_key};
use super::locks::{self, DatasetLocks};
use crate::codec;
use crate::model::{Candlestick, Result, StoreError};
use crate::query::RangeQuery;

pub const NAMESPACE: &str = "klines";

const EXTENSION: &str = ".csv";

/// Dataset name for a (symbol, timeframe) pair: `klines/{symbol}_{timeframe}.csv`.
pub fn dataset_name(symbol: &str, timeframe: &str) -> DatasetName {
    DatasetName::new(NAMESPACE, format!("{symbol}_{timeframe}{EXTENSION}"))
}

/// Splits a dataset file name back into (symbol, timeframe).
fn parse_dataset_name(file: &str) -> Option<(&str, &str)> {
    file.strip_suffix(EXTENSION)?.rsplit_once('_')
}

fn is_valid_pair(symbol: &str, timeframe: &str) -> bool {
    is_valid_key(symbol) && is_valid_key(timeframe) && !timeframe.contains('_')
}

/// Keyed candlestick storage: one dataset per (symbol, timeframe).
///
/// Writes merge by `open_time` (last write wins), reads are always ascending.
pub struct KlineStore {
    backend: Arc<dyn Backend>,
    locks: DatasetLocks,
}

impl KlineStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            locks: DatasetLocks::new(),
        }
    }

    /// Merges `records` into their datasets.
    ///
    /// Returns the post-merge size of every touched dataset, summed. A group
    /// that fails to persist aborts the call; groups persisted before it stay.
    pub fn upsert(&self, records: Vec<Candlestick>) -> Result<usize> {
        let mut groups: BTreeMap<(String, String), Vec<Candlestick>> = BTreeMap::new();
        for record in records {
            groups
                .entry((record.symbol.clone(), record.timeframe.clone()))
                .or_default()
                .push(record);
        }

        let mut total = 0;
        for ((symbol, timeframe), batch) in groups {
            total += self.merge_group(&symbol, &timeframe, batch)?;
        }
        Ok(total)
    }

    fn merge_group(&self, symbol: &str, timeframe: &str, batch: Vec<Candlestick>) -> Result<usize> {
        if !is_valid_pair(symbol, timeframe) {
            return Err(StoreError::InvalidKey(format!("{symbol}_{timeframe}")));
        }

        let name = dataset_name(symbol, timeframe);
        let _writer = self.locks.writer();
        let handle = self.locks.handle(&name);
        let _guard = locks::exclusive(&handle);

        let existing = self.load(&name, symbol, timeframe)?;
        let created = existing.is_none();

        let mut merged: BTreeMap<i64, Candlestick> = existing
            .unwrap_or_default()
            .into_iter()
            .map(|candle| (candle.open_time, candle))
            .collect();
        for candle in batch {
            merged.insert(candle.open_time, candle);
        }
        let merged: Vec<Candlestick> = merged.into_values().collect();

        let bytes = codec::write_rows(&merged).map_err(|e| StoreError::StorageWrite {
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

        if created {
            log::info!("created kline dataset {}", name);
        }
        log::debug!("{} now holds {} klines", name, merged.len());
        Ok(merged.len())
    }

    /// Ascending klines of one pair, filtered and paginated by `query`.
    /// An unknown pair yields an empty result.
    pub fn query(&self, symbol: &str, timeframe: &str, query: &RangeQuery) -> Result<Vec<Candlestick>> {
        if !is_valid_pair(symbol, timeframe) {
            log::debug!("query for unaddressable pair {:?}/{:?}", symbol, timeframe);
            return Ok(Vec::new());
        }

        let name = dataset_name(symbol, timeframe);
        match self.load(&name, symbol, timeframe)? {
            Some(candles) => Ok(query.evaluate(candles)),
            None => Ok(Vec::new()),
        }
    }

    /// Sorted, deduplicated symbols with at least one dataset, optionally
    /// restricted to one timeframe.
    pub fn list_symbols(&self, timeframe: Option<&str>) -> Result<Vec<String>> {
        let files = self
            .backend
            .names(NAMESPACE)
            .map_err(|source| StoreError::StorageRead {
                name: NAMESPACE.to_string(),
                source,
            })?;

        let symbols: BTreeSet<String> = files
            .iter()
            .filter_map(|file| parse_dataset_name(file))
            .filter(|(_, tf)| timeframe.is_none_or(|wanted| wanted == *tf))
            .map(|(symbol, _)| symbol.to_string())
            .collect();
        Ok(symbols.into_iter().collect())
    }

    /// Removes every kline dataset. Waits for in-flight upserts, so a writer
    /// can never resurrect a dataset it loaded before the wipe.
    pub fn wipe_all(&self) -> Result<()> {
        let _wiper = self.locks.wiper();
        self.backend
            .wipe(NAMESPACE)
            .map_err(|source| StoreError::StorageWrite {
                name: NAMESPACE.to_string(),
                source,
            })?;
        log::info!("wiped all kline datasets");
        Ok(())
    }

    fn load(&self, name: &DatasetName, symbol: &str, timeframe: &str) -> Result<Option<Vec<Candlestick>>> {
        let bytes = self
            .backend
            .load(name)
            .map_err(|source| StoreError::StorageRead {
                name: name.to_string(),
                source,
            })?;

        match bytes {
            Some(bytes) => {
                let candles = codec::read_rows(symbol, timeframe, &bytes).map_err(|e| StoreError::Corrupt {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;
                Ok(Some(candles))
            }
            None => Ok(None),
        }
    }
}
