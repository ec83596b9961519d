// Wire <-> stored record conversion.
pub mod codec;
// Backend selection from the environment.
pub mod config;
// module storing defaults
pub mod constants;
// Data models and store errors.
pub mod model;
// Shared range/limit evaluation.
pub mod query;
// Transport-facing facade and exports.
pub mod service;
// Data storage module.
pub mod store {
    /// Storage backend trait and dataset naming.
    pub mod backend;
    /// Order book depth history.
    pub mod depth;
    /// One file per dataset.
    pub mod fs;
    /// Candlestick storage.
    pub mod kline;
    /// Per-dataset write locks.
    pub mod locks;
    /// In-memory storage.
    pub mod memory;
    /// SQLite database interaction.
    pub mod sqlite;
}
