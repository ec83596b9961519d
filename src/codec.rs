//! Record codec: wire JSON <-> [`Candlestick`] <-> stored CSV rows.
//!
//! Decimal fields travel as text end to end. `Decimal` keeps the scale it
//! was parsed with, so "0.0010" is written back as "0.0010".

use std::str::FromStr;

use csv::{ReaderBuilder, WriterBuilder};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::model::Candlestick;
use crate::store::backend::is_valid_key;

/// Column order of a stored kline dataset.
pub const KLINE_COLUMNS: [&str; 8] = [
    "open_time",
    "close_time",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "trades",
];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("missing field '{0}'")]
    MissingField(&'static str),
    #[error("field '{field}' is not a decimal: {value}")]
    InvalidDecimal { field: &'static str, value: String },
    #[error("field '{field}' is not a non-negative integer: {value}")]
    InvalidCount { field: &'static str, value: String },
    #[error("field '{field}' is not an integer timestamp: {value}")]
    InvalidTimestamp { field: &'static str, value: String },
    #[error("field '{field}' cannot name a dataset: {value:?}")]
    InvalidKey { field: &'static str, value: String },
    #[error("depth level [{row}][{col}] is not a finite number")]
    NonFiniteLevel { row: usize, col: usize },
}

/// Errors reading a stored dataset back.
#[derive(Error, Debug)]
pub enum RowError {
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// One stored CSV row. Symbol and timeframe live in the dataset name.
#[derive(Debug, Serialize, Deserialize)]
struct KlineRow {
    open_time: i64,
    close_time: i64,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: String,
    trades: u64,
}

/// Decodes one wire record into a [`Candlestick`].
pub fn decode(record: &Value) -> Result<Candlestick, DecodeError> {
    let object = record.as_object().ok_or(DecodeError::NotAnObject)?;
    let field = |name: &'static str| required(object, name);

    let symbol = key_field("symbol", field("symbol")?)?;
    let timeframe = key_field("timeframe", field("timeframe")?)?;
    if timeframe.contains('_') {
        return Err(DecodeError::InvalidKey {
            field: "timeframe",
            value: timeframe,
        });
    }

    Ok(Candlestick {
        symbol,
        timeframe,
        open_time: timestamp_field("open_time", field("open_time")?)?,
        close_time: timestamp_field("close_time", field("close_time")?)?,
        open: decimal_field("open", field("open")?)?,
        high: decimal_field("high", field("high")?)?,
        low: decimal_field("low", field("low")?)?,
        close: decimal_field("close", field("close")?)?,
        volume: decimal_field("volume", field("volume")?)?,
        trades: count_field("trades", field("trades")?)?,
    })
}

/// Encodes a [`Candlestick`] as a wire record. Decimals are emitted as strings.
pub fn encode(candle: &Candlestick) -> Value {
    json!({
        "symbol": candle.symbol,
        "timeframe": candle.timeframe,
        "open_time": candle.open_time,
        "close_time": candle.close_time,
        "open": candle.open.to_string(),
        "high": candle.high.to_string(),
        "low": candle.low.to_string(),
        "close": candle.close.to_string(),
        "volume": candle.volume.to_string(),
        "trades": candle.trades,
    })
}

/// Writes candles as CSV with a header row, even when `candles` is empty.
pub fn write_rows(candles: &[Candlestick]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(KLINE_COLUMNS)?;

    for candle in candles {
        writer.serialize(KlineRow {
            open_time: candle.open_time,
            close_time: candle.close_time,
            open: candle.open.to_string(),
            high: candle.high.to_string(),
            low: candle.low.to_string(),
            close: candle.close.to_string(),
            volume: candle.volume.to_string(),
            trades: candle.trades,
        })?;
    }

    writer
        .into_inner()
        .map_err(|err| csv::Error::from(err.into_error()))
}

/// Reads a stored dataset back into candles for `symbol`/`timeframe`.
pub fn read_rows(symbol: &str, timeframe: &str, bytes: &[u8]) -> Result<Vec<Candlestick>, RowError> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(bytes);
    let mut candles = Vec::new();
    for row in reader.deserialize::<KlineRow>() {
        let row = row?;
        candles.push(Candlestick {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            open_time: row.open_time,
            close_time: row.close_time,
            open: parse_decimal("open", &row.open)?,
            high: parse_decimal("high", &row.high)?,
            low: parse_decimal("low", &row.low)?,
            close: parse_decimal("close", &row.close)?,
            volume: parse_decimal("volume", &row.volume)?,
            trades: row.trades,
        });
    }
    Ok(candles)
}

/// Parses decimal text without rounding. Scientific notation is accepted and
/// normalised to plain notation of the same value.
pub fn parse_decimal(field: &'static str, text: &str) -> Result<Decimal, DecodeError> {
    let invalid = || DecodeError::InvalidDecimal {
        field,
        value: text.to_string(),
    };
    if text.contains(['e', 'E']) {
        return Decimal::from_scientific(text).map_err(|_| invalid());
    }
    Decimal::from_str_exact(text).map_err(|_| invalid())
}

fn required<'a>(object: &'a Map<String, Value>, name: &'static str) -> Result<&'a Value, DecodeError> {
    match object.get(name) {
        None | Some(Value::Null) => Err(DecodeError::MissingField(name)),
        Some(value) => Ok(value),
    }
}

fn key_field(field: &'static str, value: &Value) -> Result<String, DecodeError> {
    match value {
        Value::String(s) if is_valid_key(s) => Ok(s.clone()),
        other => Err(DecodeError::InvalidKey {
            field,
            value: scalar_text(other).unwrap_or_else(|| other.to_string()),
        }),
    }
}

fn decimal_field(field: &'static str, value: &Value) -> Result<Decimal, DecodeError> {
    match scalar_text(value) {
        Some(text) => parse_decimal(field, &text),
        None => Err(DecodeError::InvalidDecimal {
            field,
            value: value.to_string(),
        }),
    }
}

fn count_field(field: &'static str, value: &Value) -> Result<u64, DecodeError> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => u64::from_str(s).ok(),
        _ => None,
    };
    parsed.ok_or_else(|| DecodeError::InvalidCount {
        field,
        value: value.to_string(),
    })
}

fn timestamp_field(field: &'static str, value: &Value) -> Result<i64, DecodeError> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => i64::from_str(s).ok(),
        _ => None,
    };
    parsed.ok_or_else(|| DecodeError::InvalidTimestamp {
        field,
        value: value.to_string(),
    })
}

// Strings pass through untouched. Numbers keep their source text
// (serde_json `arbitrary_precision`), never an f64 rendering.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
