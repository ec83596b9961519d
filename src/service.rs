//! Transport-facing facade over the kline and depth stores.
//!
//! This is where request-level policy lives: the limit/limit_first contract,
//! the default page size, outcome classification and bulk export encodings.
//! The stores themselves know none of it.

use std::io::{self, Write};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::codec;
use crate::constants::DEFAULT_KLINE_LIMIT;
use crate::model::{Candlestick, DepthSnapshot, StoreError};
use crate::query::RangeQuery;
use crate::store::backend::Backend;
use crate::store::depth::DepthStore;
use crate::store::kline::KlineStore;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("contract violation: {0}")]
    Contract(String),
    #[error("invalid input: {0}")]
    Input(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("export failed: {0}")]
    Export(#[from] io::Error),
}

/// How a transport should report an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Client,
    NotFound,
    Server,
}

impl ServiceError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ServiceError::Contract(_) | ServiceError::Input(_) => ErrorClass::Client,
            ServiceError::Store(StoreError::Decode(_) | StoreError::InvalidKey(_)) => ErrorClass::Client,
            ServiceError::Store(StoreError::NotFound(_)) => ErrorClass::NotFound,
            ServiceError::Store(_) | ServiceError::Export(_) => ErrorClass::Server,
        }
    }
}

/// Parameters of a kline query as they arrive from a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KlineParams {
    pub symbol: String,
    pub timeframe: String,
    pub start_date: Option<i64>,
    pub end_date: Option<i64>,
    pub limit: Option<usize>,
    pub limit_first: Option<usize>,
}

impl KlineParams {
    pub fn new(symbol: impl Into<String>, timeframe: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
            ..Self::default()
        }
    }

    /// Builds the engine query. Passing both `limit` and `limit_first` is a
    /// contract violation; passing neither applies the default tail limit.
    pub fn to_query(&self) -> Result<RangeQuery, ServiceError> {
        let query = RangeQuery {
            start: self.start_date,
            end: self.end_date,
            page: None,
        };
        match (self.limit, self.limit_first) {
            (Some(_), Some(_)) => Err(ServiceError::Contract(
                "limit and limit_first are mutually exclusive".into(),
            )),
            (Some(n), None) => Ok(query.last(n)),
            (None, Some(n)) => Ok(query.first(n)),
            (None, None) => Ok(query.last(DEFAULT_KLINE_LIMIT)),
        }
    }
}

/// The four capability groups exposed to a transport.
pub struct MarketStore {
    klines: KlineStore,
    depth: DepthStore,
}

impl MarketStore {
    pub fn open(backend: Arc<dyn Backend>) -> Self {
        Self {
            klines: KlineStore::new(Arc::clone(&backend)),
            depth: DepthStore::new(backend),
        }
    }

    /// Decodes every record before touching storage, so a malformed record
    /// anywhere in the batch leaves every dataset unchanged.
    pub fn upsert_klines(&self, records: &[Value]) -> Result<usize, ServiceError> {
        let candles = records
            .iter()
            .map(codec::decode)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)?;
        let count = self.klines.upsert(candles)?;
        log::info!("upserted {} records, touched datasets hold {}", records.len(), count);
        Ok(count)
    }

    pub fn query_klines(&self, params: &KlineParams) -> Result<Vec<Candlestick>, ServiceError> {
        let query = params.to_query()?;
        Ok(self.klines.query(&params.symbol, &params.timeframe, &query)?)
    }

    pub fn list_symbols(&self, timeframe: Option<&str>) -> Result<Vec<String>, ServiceError> {
        Ok(self.klines.list_symbols(timeframe)?)
    }

    pub fn append_depth(&self, symbol: &str, time: i64, rows: Vec<Vec<f64>>) -> Result<(), ServiceError> {
        Ok(self.depth.append_snapshot(symbol, time, rows)?)
    }

    pub fn read_depth(&self, symbol: &str) -> Result<Vec<DepthSnapshot>, ServiceError> {
        Ok(self.depth.read_all(symbol)?)
    }

    pub fn list_depth_symbols(&self) -> Result<Vec<String>, ServiceError> {
        Ok(self.depth.list_symbols()?)
    }

    /// Administrative reset: removes every kline and depth dataset.
    pub fn wipe_all(&self) -> Result<(), ServiceError> {
        self.klines.wipe_all()?;
        self.depth.wipe_all()?;
        Ok(())
    }
}

/// Query result as a JSON array of wire records.
pub fn klines_to_json(candles: &[Candlestick]) -> Value {
    Value::Array(candles.iter().map(codec::encode).collect())
}

/// Query result as CSV text, same columns as the stored datasets.
pub fn klines_to_csv(candles: &[Candlestick]) -> Result<Vec<u8>, ServiceError> {
    codec::write_rows(candles).map_err(|e| ServiceError::Export(e.into()))
}

/// Depth history payload as a `.npy` (v1.0) array of little-endian f64 with
/// shape `(time, rows, cols)`. The time axis is exported separately.
pub fn depth_to_npy(snapshots: &[DepthSnapshot]) -> Result<Vec<u8>, ServiceError> {
    let (rows, cols) = snapshots.first().map_or((0, 0), DepthSnapshot::shape);
    if let Some(bad) = snapshots.iter().find(|s| {
        s.rows.len() != rows || s.rows.iter().any(|row| row.len() != cols)
    }) {
        return Err(ServiceError::Input(format!(
            "snapshot at {} does not have shape {}x{}",
            bad.time, rows, cols
        )));
    }

    let mut header = format!(
        "{{'descr': '<f8', 'fortran_order': False, 'shape': ({}, {}, {}), }}",
        snapshots.len(),
        rows,
        cols
    );
    // Magic (6) + version (2) + header length (2) + header, padded to 64 bytes.
    let unpadded = 10 + header.len() + 1;
    header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
    header.push('\n');

    let header_len = u16::try_from(header.len())
        .map_err(|_| ServiceError::Export(io::Error::other("npy header too long")))?;
    let mut out = Vec::with_capacity(10 + header.len() + snapshots.len() * rows * cols * 8);
    out.write_all(b"\x93NUMPY\x01\x00")?;
    out.write_all(&header_len.to_le_bytes())?;
    out.write_all(header.as_bytes())?;
    for value in snapshots.iter().flat_map(|s| s.rows.iter().flatten()) {
        out.write_all(&value.to_le_bytes())?;
    }
    Ok(out)
}

/// The time axis of a depth history, in stored order.
pub fn depth_times(snapshots: &[DepthSnapshot]) -> Vec<i64> {
    snapshots.iter().map(|s| s.time).collect()
}
