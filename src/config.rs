use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

use crate::constants;
use crate::store::backend::{Backend, BackendError};
use crate::store::fs::FsBackend;
use crate::store::memory::MemoryBackend;
use crate::store::sqlite::SqliteBackend;

/// Which storage backend the store runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BackendKind {
    Fs,
    Sqlite,
    Memory,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fs" | "file" | "files" => Ok(BackendKind::Fs),
            "sqlite" => Ok(BackendKind::Sqlite),
            "memory" => Ok(BackendKind::Memory),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown store_backend '{0}', expected fs, sqlite or memory")]
    UnknownBackend(String),
    #[error("could not open backend: {0}")]
    Backend(#[from] BackendError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub backend: BackendKind,
    pub data_dir: PathBuf,
    pub sqlite_file: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Fs,
            data_dir: PathBuf::from(constants::DEFAULT_DATA_DIR),
            sqlite_file: None,
        }
    }
}

impl StoreConfig {
    /// Reads `store_backend`, `data_dir` and `sqlite_file` from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`StoreConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(kind) = lookup("store_backend") {
            config.backend = kind.parse()?;
        }
        if let Some(dir) = lookup("data_dir").filter(|d| !d.trim().is_empty()) {
            config.data_dir = PathBuf::from(dir);
        }
        config.sqlite_file = lookup("sqlite_file")
            .filter(|f| !f.trim().is_empty())
            .map(PathBuf::from);
        Ok(config)
    }

    pub fn sqlite_path(&self) -> PathBuf {
        self.sqlite_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join(constants::DEFAULT_SQLITE_FILE))
    }

    pub fn open_backend(&self) -> Result<Arc<dyn Backend>, ConfigError> {
        let backend: Arc<dyn Backend> = match self.backend {
            BackendKind::Fs => Arc::new(FsBackend::open(&self.data_dir)?),
            BackendKind::Sqlite => Arc::new(SqliteBackend::open(self.sqlite_path())?),
            BackendKind::Memory => Arc::new(MemoryBackend::new()),
        };
        log::info!("using {:?} backend", self.backend);
        Ok(backend)
    }
}
