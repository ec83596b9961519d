// Rows returned by a kline query that names neither limit nor limit_first.
pub const DEFAULT_KLINE_LIMIT: usize = 500;

// Used when data_dir is not configured.
pub const DEFAULT_DATA_DIR: &str = "data";

// Sqlite file name under data_dir when sqlite_file is not configured.
pub const DEFAULT_SQLITE_FILE: &str = "market.sqlite";
