use std::collections::BTreeMap;
use std::sync::RwLock;

use super::backend::{Backend, BackendError, DatasetName};

/// Map-backed storage. Used by tests and by the `memory` backend setting.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    datasets: RwLock<BTreeMap<DatasetName, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for MemoryBackend {
    fn load(&self, name: &DatasetName) -> Result<Option<Vec<u8>>, BackendError> {
        let datasets = self.datasets.read().map_err(|_| BackendError::Poisoned)?;
        Ok(datasets.get(name).cloned())
    }

    fn persist(&self, name: &DatasetName, bytes: &[u8]) -> Result<(), BackendError> {
        let mut datasets = self.datasets.write().map_err(|_| BackendError::Poisoned)?;
        datasets.insert(name.clone(), bytes.to_vec());
        Ok(())
    }

    fn names(&self, namespace: &str) -> Result<Vec<String>, BackendError> {
        let datasets = self.datasets.read().map_err(|_| BackendError::Poisoned)?;
        Ok(datasets
            .keys()
            .filter(|name| name.namespace == namespace)
            .map(|name| name.file.clone())
            .collect())
    }

    fn wipe(&self, namespace: &str) -> Result<(), BackendError> {
        let mut datasets = self.datasets.write().map_err(|_| BackendError::Poisoned)?;
        datasets.retain(|name, _| name.namespace != namespace);
        Ok(())
    }
}
