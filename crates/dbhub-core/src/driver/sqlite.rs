//! Document store on SQLite: JSON documents in a single keyed table.

use super::{
    BackendFamily, ConfigExt, ConnectionConfig, DriverError, DriverResult, EmbeddedDriver, Record,
    StorageBackend, StoredCatalog,
};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;

/// Driver over a SQLite document database.
pub type DocumentDriver = EmbeddedDriver<SqliteStore>;

const IN_MEMORY: &str = ":memory:";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS documents (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    body TEXT NOT NULL,
    UNIQUE (collection, id)
);
CREATE TABLE IF NOT EXISTS catalog (
    key TEXT PRIMARY KEY,
    body TEXT NOT NULL
);
";

/// SQLite database holding documents of every collection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    fn init(conn: Connection, path: Option<PathBuf>) -> DriverResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Open an in-memory database.
    pub fn in_memory() -> DriverResult<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }
}

impl StorageBackend for SqliteStore {
    const FAMILY: BackendFamily = BackendFamily::DocumentStore;

    fn open(config: &ConnectionConfig) -> DriverResult<Self> {
        let path = config.required_str("path")?;
        if path == IN_MEMORY {
            return Self::in_memory();
        }
        let path = PathBuf::from(path);
        let conn = Connection::open(&path).map_err(|e| {
            DriverError::Connection(format!("cannot open {}: {}", path.display(), e))
        })?;
        Self::init(conn, Some(path))
    }

    fn collections(&self) -> DriverResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT collection FROM documents ORDER BY collection")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn load(&self, collection: &str) -> DriverResult<Vec<Record>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT body FROM documents WHERE collection = ?1 ORDER BY seq")?;
        let bodies = stmt
            .query_map(params![collection], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        bodies
            .iter()
            .map(|body| Ok(serde_json::from_str(body)?))
            .collect()
    }

    fn get(&self, collection: &str, id: &str) -> DriverResult<Option<Record>> {
        let conn = self.conn.lock();
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|b| serde_json::from_str(&b).map_err(DriverError::from))
            .transpose()
    }

    fn put_many(&self, collection: &str, records: &[(String, Record)]) -> DriverResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO documents (collection, id, body) VALUES (?1, ?2, ?3)
                 ON CONFLICT (collection, id) DO UPDATE SET body = excluded.body",
            )?;
            for (id, record) in records {
                stmt.execute(params![collection, id, serde_json::to_string(record)?])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn remove(&self, collection: &str, id: &str) -> DriverResult<bool> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;
        Ok(removed > 0)
    }

    fn clear(&self, collection: &str) -> DriverResult<u64> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM documents WHERE collection = ?1",
            params![collection],
        )?;
        Ok(removed as u64)
    }

    fn drop_collection(&self, collection: &str) -> DriverResult<()> {
        self.clear(collection).map(|_| ())
    }

    fn load_catalog(&self) -> DriverResult<StoredCatalog> {
        let conn = self.conn.lock();
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM catalog WHERE key = 'catalog'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        match body {
            Some(body) => Ok(serde_json::from_str(&body)?),
            None => Ok(StoredCatalog::default()),
        }
    }

    fn save_catalog(&self, catalog: &StoredCatalog) -> DriverResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO catalog (key, body) VALUES ('catalog', ?1)
             ON CONFLICT (key) DO UPDATE SET body = excluded.body",
            params![serde_json::to_string(catalog)?],
        )?;
        Ok(())
    }

    fn flush(&self) -> DriverResult<()> {
        Ok(())
    }

    fn size_bytes(&self) -> Option<u64> {
        let path = self.path.as_ref()?;
        std::fs::metadata(path).ok().map(|m| m.len())
    }

    /// Runs a single SQL statement against the document database.
    fn execute(&self, statement: &str) -> DriverResult<u64> {
        let conn = self.conn.lock();
        Ok(conn.execute(statement, [])? as u64)
    }
}
