use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OpenFlags, OptionalExtension, params};

use super::backend::{Backend, BackendError, DatasetName};

/// Embedded-engine backend: one row per dataset in a single SQLite file.
///
/// `REPLACE` swaps the whole row in one statement, which gives readers the
/// same before-or-after view as the file backend's rename.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        conn.query_row("PRAGMA journal_mode=WAL;", [], |_row| Ok(()))?;
        create_table(&conn)?;
        log::debug!("opened sqlite backend at {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, BackendError> {
        let conn = Connection::open_in_memory()?;
        create_table(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

/// Initializes the dataset table.
fn create_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS dataset (
            namespace TEXT NOT NULL,
            name TEXT NOT NULL,
            body BLOB NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (namespace, name)
        );",
        [],
    )?;
    Ok(())
}

impl Backend for SqliteBackend {
    fn load(&self, name: &DatasetName) -> Result<Option<Vec<u8>>, BackendError> {
        let conn = self.conn.lock().map_err(|_| BackendError::Poisoned)?;
        let body = conn
            .query_row(
                "SELECT body FROM dataset WHERE namespace = ?1 AND name = ?2",
                params![name.namespace, name.file],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(body)
    }

    fn persist(&self, name: &DatasetName, bytes: &[u8]) -> Result<(), BackendError> {
        let conn = self.conn.lock().map_err(|_| BackendError::Poisoned)?;
        conn.execute(
            "REPLACE INTO dataset (namespace, name, body, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                name.namespace,
                name.file,
                bytes,
                chrono::Utc::now().timestamp_millis()
            ],
        )?;
        Ok(())
    }

    fn names(&self, namespace: &str) -> Result<Vec<String>, BackendError> {
        let conn = self.conn.lock().map_err(|_| BackendError::Poisoned)?;
        let mut stmt = conn.prepare("SELECT name FROM dataset WHERE namespace = ?1 ORDER BY name")?;
        let names = stmt
            .query_map(params![namespace], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    fn wipe(&self, namespace: &str) -> Result<(), BackendError> {
        let conn = self.conn.lock().map_err(|_| BackendError::Poisoned)?;
        let removed = conn.execute("DELETE FROM dataset WHERE namespace = ?1", params![namespace])?;
        log::debug!("removed {} {} datasets from sqlite", removed, namespace);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_backend_replace_and_list() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let name = DatasetName::new("klines", "BTCUSDT_1m.csv");

        assert_eq!(backend.load(&name).unwrap(), None);
        backend.persist(&name, b"one").unwrap();
        backend.persist(&name, b"two").unwrap();
        backend
            .persist(&DatasetName::new("klines", "ADAUSDT_1m.csv"), b"three")
            .unwrap();

        assert_eq!(backend.load(&name).unwrap(), Some(b"two".to_vec()));
        assert_eq!(
            backend.names("klines").unwrap(),
            vec!["ADAUSDT_1m.csv", "BTCUSDT_1m.csv"]
        );

        backend.wipe("klines").unwrap();
        assert!(backend.names("klines").unwrap().is_empty());
    }

    #[test]
    fn test_sqlite_backend_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store/market.sqlite");
        let name = DatasetName::new("depth", "BTCUSDT.json");
        {
            let backend = SqliteBackend::open(&path).unwrap();
            backend.persist(&name, b"[]").unwrap();
        }
        let backend = SqliteBackend::open(&path).unwrap();
        assert_eq!(backend.load(&name).unwrap(), Some(b"[]".to_vec()));
    }
}
