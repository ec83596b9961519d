use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use tempfile::NamedTempFile;

use super::backend::{Backend, BackendError, DatasetName};

/// One file per dataset under `root/{namespace}/{file}`.
///
/// Writes go to a temporary file in the target directory which is then
/// renamed over the dataset, so readers never observe a partial file.
#[derive(Debug, Clone)]
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, BackendError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        log::debug!("opened file backend at {}", root.display());
        Ok(Self { root })
    }

    fn path(&self, name: &DatasetName) -> PathBuf {
        self.root.join(name.namespace).join(&name.file)
    }
}

impl Backend for FsBackend {
    fn load(&self, name: &DatasetName) -> Result<Option<Vec<u8>>, BackendError> {
        match fs::read(self.path(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn persist(&self, name: &DatasetName, bytes: &[u8]) -> Result<(), BackendError> {
        let dir = self.root.join(name.namespace);
        fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path(name)).map_err(|e| e.error)?;
        Ok(())
    }

    fn names(&self, namespace: &str) -> Result<Vec<String>, BackendError> {
        let entries = match fs::read_dir(self.root.join(namespace)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            // Leftover temp files from an interrupted write are not datasets.
            match entry.file_name().into_string() {
                Ok(name) if !name.starts_with('.') => names.push(name),
                _ => continue,
            }
        }
        names.sort();
        Ok(names)
    }

    fn wipe(&self, namespace: &str) -> Result<(), BackendError> {
        match fs::remove_dir_all(self.root.join(namespace)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("nothing to wipe under {}", namespace);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fs_backend_persist_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let name = DatasetName::new("klines", "BTCUSDT_15m.csv");
        {
            let backend = FsBackend::open(dir.path()).unwrap();
            assert_eq!(backend.load(&name).unwrap(), None);
            backend.persist(&name, b"first").unwrap();
            backend.persist(&name, b"second").unwrap();
        }

        let backend = FsBackend::open(dir.path()).unwrap();
        assert_eq!(backend.load(&name).unwrap(), Some(b"second".to_vec()));
        assert!(dir.path().join("klines/BTCUSDT_15m.csv").is_file());
        assert_eq!(backend.names("klines").unwrap(), vec!["BTCUSDT_15m.csv"]);
    }

    #[test]
    fn test_fs_backend_names_skip_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::open(dir.path()).unwrap();
        backend
            .persist(&DatasetName::new("depth", "ETHUSDT.json"), b"{}")
            .unwrap();
        fs::write(dir.path().join("depth/.tmpAbC123"), b"partial").unwrap();

        assert_eq!(backend.names("depth").unwrap(), vec!["ETHUSDT.json"]);
        assert!(backend.names("klines").unwrap().is_empty());
    }

    #[test]
    fn test_fs_backend_wipe() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::open(dir.path()).unwrap();
        backend
            .persist(&DatasetName::new("klines", "A_1m.csv"), b"x")
            .unwrap();
        backend
            .persist(&DatasetName::new("depth", "A.json"), b"y")
            .unwrap();

        backend.wipe("klines").unwrap();
        backend.wipe("klines").unwrap();
        assert!(!dir.path().join("klines").exists());
        assert!(dir.path().join("depth/A.json").is_file());
    }
}
