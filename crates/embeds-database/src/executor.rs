//! Async SQLite executor using a dedicated background thread.
//!
//! All statements for one database run on a single thread in FIFO order, so
//! the Tokio runtime is never blocked by SQLite. Only SQL belongs inside
//! [`AsyncDatabase::call`]; decoding and projection happen outside it.
//!
//! ```ignore
//! let db = AsyncDatabase::open(path).await?;
//! let count = db.call(|conn| queries::count_embed_rows(conn, &schema)).await?;
//! ```

use crate::schema::SchemaName;
use crate::{DatabaseError, DatabaseResult};
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

const PRAGMAS: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA cache_size = -64000;
    PRAGMA temp_store = MEMORY;
    PRAGMA busy_timeout = 5000;
";

/// Convert a tokio_rusqlite::Error to DatabaseError.
fn from_tokio_rusqlite(e: tokio_rusqlite::Error) -> DatabaseError {
    match e {
        tokio_rusqlite::Error::Rusqlite(e) => DatabaseError::Sqlite(e),
        tokio_rusqlite::Error::Close(_) => DatabaseError::Connection("Connection closed".to_string()),
        tokio_rusqlite::Error::ConnectionClosed => {
            DatabaseError::Connection("Connection closed".to_string())
        }
        other => DatabaseError::Connection(other.to_string()),
    }
}

/// Async SQLite database with a dedicated executor thread.
#[derive(Clone)]
pub struct AsyncDatabase {
    conn: Connection,
    path: String,
}

impl AsyncDatabase {
    /// Open a database at the given path, creating it and its parent
    /// directory if needed, with WAL mode enabled.
    ///
    /// Migrations are not run here; the target schema and version table are
    /// caller-chosen, see [`MigrationManager`](crate::MigrationManager).
    pub async fn open(path: &Path) -> DatabaseResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let path_str = path.to_string_lossy().to_string();
        info!(path = %path_str, "Opening async database");

        let conn = Connection::open(path)
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        conn.call(|conn| {
            conn.execute_batch(PRAGMAS)?;
            Ok(())
        })
        .await
        .map_err(from_tokio_rusqlite)?;

        info!(path = %path_str, "Async database initialized with WAL mode");

        Ok(Self {
            conn,
            path: path_str,
        })
    }

    /// Open a private in-memory database.
    pub async fn open_in_memory() -> DatabaseResult<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;
        debug!("Opened in-memory database");
        Ok(Self {
            conn,
            path: ":memory:".to_string(),
        })
    }

    /// Open `path` so that its tables are visible under `schema`.
    ///
    /// `main` opens the file directly; any other schema attaches the file
    /// under that alias to an in-memory primary database.
    pub async fn open_with_schema(path: &Path, schema: &SchemaName) -> DatabaseResult<Self> {
        if *schema == SchemaName::main() {
            return Self::open(path).await;
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut db = Self::open_in_memory().await?;
        db.attach(schema, path).await?;
        db.path = path.to_string_lossy().to_string();
        Ok(db)
    }

    /// Execute a closure on the database connection.
    ///
    /// The closure runs on the dedicated SQLite thread; the caller's task is
    /// parked until the result is ready.
    pub async fn call<F, T>(&self, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> DatabaseResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let outer_result = self
            .conn
            .call(move |conn| Ok(f(conn)))
            .await;

        match outer_result {
            Ok(inner) => inner,
            Err(e) => Err(from_tokio_rusqlite(e)),
        }
    }

    /// Execute a closure that returns a rusqlite::Result.
    pub async fn call_sqlite<F, T>(&self, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.conn
            .call(move |conn| Ok(f(conn)?))
            .await
            .map_err(from_tokio_rusqlite)
    }

    /// Attach another database file under `schema`.
    pub async fn attach(&self, schema: &SchemaName, path: &Path) -> DatabaseResult<()> {
        let sql = format!("ATTACH DATABASE ?1 AS {}", schema.quoted());
        let file = path.to_string_lossy().to_string();
        let schema_name = schema.to_string();
        self.call_sqlite(move |conn| conn.execute(&sql, [&file]).map(|_| ()))
            .await?;
        info!(schema = %schema_name, path = %path.display(), "Attached database");
        Ok(())
    }

    /// Get the database file path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Check if the database is healthy by executing a simple query.
    pub async fn health_check(&self) -> DatabaseResult<()> {
        self.call_sqlite(|conn| conn.execute_batch("SELECT 1"))
            .await?;
        debug!("Database health check passed");
        Ok(())
    }

    /// Close the database connection once pending operations finish.
    pub async fn close(self) -> DatabaseResult<()> {
        self.conn
            .close()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to close database: {:?}", e)))?;
        info!(path = %self.path, "Database closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_async_database_open() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("test.db");

        let db = AsyncDatabase::open(&db_path).await.unwrap();
        assert!(db.health_check().await.is_ok());
        assert!(db_path.exists());
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_call_propagates_errors() {
        let db = AsyncDatabase::open_in_memory().await.unwrap();

        let err = db
            .call(|conn| {
                conn.execute("INSERT INTO missing_table (x) VALUES (1)", [])?;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Sqlite(_)));
        assert!(!err.is_unavailable());
    }

    #[tokio::test]
    async fn test_attach_second_database() {
        let dir = tempdir().unwrap();
        let db = AsyncDatabase::open(&dir.path().join("main.db")).await.unwrap();
        let schema = SchemaName::new("other").unwrap();

        db.attach(&schema, &dir.path().join("other.db")).await.unwrap();

        let exists = db
            .call({
                let schema = schema.clone();
                move |conn| schema.exists(conn)
            })
            .await
            .unwrap();
        assert!(exists);

        let table = schema.qualify("t");
        let count: i64 = db
            .call_sqlite(move |conn| {
                conn.execute_batch(&format!("CREATE TABLE {table} (x INTEGER); INSERT INTO {table} VALUES (1);"))?;
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_open_with_schema_attaches_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("source.db");
        let schema = SchemaName::new("src").unwrap();

        let db = AsyncDatabase::open_with_schema(&path, &schema).await.unwrap();
        let table = schema.qualify("t");
        db.call_sqlite(move |conn| conn.execute_batch(&format!("CREATE TABLE {table} (x INTEGER)")))
            .await
            .unwrap();
        db.close().await.unwrap();

        // Visible under main when opened directly.
        let direct = AsyncDatabase::open(&path).await.unwrap();
        let count: i64 = direct
            .call_sqlite(|conn| {
                conn.query_row("SELECT COUNT(*) FROM sqlite_master WHERE name = 't'", [], |row| row.get(0))
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_queries() {
        let db = AsyncDatabase::open_in_memory().await.unwrap();

        db.call_sqlite(|conn| {
            conn.execute_batch(
                "CREATE TABLE counter (id INTEGER PRIMARY KEY, val INTEGER);
                 INSERT INTO counter (val) VALUES (0);",
            )
        })
        .await
        .unwrap();

        let mut handles = vec![];
        for _ in 0..10 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                db.call_sqlite(|conn| conn.execute("UPDATE counter SET val = val + 1 WHERE id = 1", []))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let count: i32 = db
            .call_sqlite(|conn| conn.query_row("SELECT val FROM counter WHERE id = 1", [], |row| row.get(0)))
            .await
            .unwrap();
        assert_eq!(count, 10);
    }
}
