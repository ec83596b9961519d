use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::DecodeError;
use crate::store::backend::BackendError;

/// Structure representing a candlestick (OHLCV data) for one time bucket.
///
/// Identity is `(symbol, timeframe, open_time)`. Price and volume fields are
/// decimals so the text received on the wire is what gets stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candlestick {
    pub symbol: String,    // Symbol of the asset.
    pub timeframe: String, // Bucket width, e.g. "15m".
    pub open_time: i64,    // Bucket open, unix ms.
    pub close_time: i64,   // Bucket close, unix ms.
    pub open: Decimal,     // Opening price.
    pub high: Decimal,     // Highest price.
    pub low: Decimal,      // Lowest price.
    pub close: Decimal,    // Closing price.
    pub volume: Decimal,   // Traded volume.
    pub trades: u64,       // Number of trades in the bucket.
}

/// One captured order book: (price, volume) rows at `time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthSnapshot {
    pub time: i64,
    pub rows: Vec<Vec<f64>>,
}

impl DepthSnapshot {
    /// (rows, cols) of the payload. Callers validate raggedness separately.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.rows.first().map_or(0, Vec::len))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by the kline and depth stores.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("malformed record: {0}")]
    Decode(#[from] DecodeError),
    #[error("invalid dataset key: {0:?}")]
    InvalidKey(String),
    #[error("failed to persist dataset {name}: {source}")]
    StorageWrite {
        name: String,
        #[source]
        source: BackendError,
    },
    #[error("failed to load dataset {name}: {source}")]
    StorageRead {
        name: String,
        #[source]
        source: BackendError,
    },
    #[error("dataset {name} is corrupt: {reason}")]
    Corrupt { name: String, reason: String },
    #[error("depth snapshot for {symbol} rejected: {reason}")]
    ShapeMismatch { symbol: String, reason: String },
    #[error("no depth dataset for {0}")]
    NotFound(String),
}
