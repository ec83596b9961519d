use std::fmt::Display;
use std::io;

use thiserror::Error;

/// Errors raised by a storage backend.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("backend lock poisoned")]
    Poisoned,
}

/// Stable address of one dataset: `{namespace}/{file}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetName {
    pub namespace: &'static str,
    pub file: String,
}

impl DatasetName {
    pub fn new(namespace: &'static str, file: impl Into<String>) -> Self {
        Self {
            namespace,
            file: file.into(),
        }
    }
}

impl Display for DatasetName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.file)
    }
}

/// Persistence seam shared by the kline and depth stores.
///
/// A backend stores opaque byte blobs by [`DatasetName`]. `persist` must
/// replace a dataset atomically: a concurrent `load` sees either the old
/// bytes or the new bytes, never a mix.
pub trait Backend: Send + Sync {
    /// Returns `None` when the dataset was never written.
    fn load(&self, name: &DatasetName) -> Result<Option<Vec<u8>>, BackendError>;

    fn persist(&self, name: &DatasetName, bytes: &[u8]) -> Result<(), BackendError>;

    /// File names of every dataset in `namespace`, sorted.
    fn names(&self, namespace: &str) -> Result<Vec<String>, BackendError>;

    /// Removes every dataset in `namespace`.
    fn wipe(&self, namespace: &str) -> Result<(), BackendError>;
}

/// Whether `key` can be embedded in a dataset name.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key.contains(['/', '\\', '.'])
        && !key.chars().any(|c| c.is_control() || c.is_whitespace())
}
