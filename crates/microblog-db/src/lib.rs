pub mod error;
pub mod migrations;
pub mod models;
pub mod queries;
pub mod schema;

use rusqlite::Connection;
use rusqlite::config::DbConfig;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

pub use error::{DbError, DbResult};
pub use migrations::MigrationChain;
pub use models::{Model, NewPost, NewUser};

/// Store handle. Constructed once at startup and passed down explicitly.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::configure(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn configure(conn: &Connection) -> DbResult<()> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        // Double-quoted names must resolve to identifiers, never string literals.
        conn.set_db_config(DbConfig::SQLITE_DBCONFIG_DQS_DDL, false)?;
        conn.set_db_config(DbConfig::SQLITE_DBCONFIG_DQS_DML, false)?;
        Ok(())
    }

    pub fn with_conn<F, T>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&Connection) -> DbResult<T>,
    {
        let conn = self.conn.lock().map_err(|_| DbError::LockPoisoned)?;
        f(&conn)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&mut Connection) -> DbResult<T>,
    {
        let mut conn = self.conn.lock().map_err(|_| DbError::LockPoisoned)?;
        f(&mut conn)
    }

    /// Revision the store currently sits at; `None` for an empty store.
    pub fn current_revision(&self) -> DbResult<Option<String>> {
        self.with_conn(migrations::read_revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_quoted_name_is_not_a_string() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute_batch("CREATE TABLE \"t\" (\"a\" INTEGER)")?;
            Ok(())
        })
        .unwrap();

        let select = db.with_conn(|conn| {
            conn.execute_batch("SELECT \"missing\" FROM \"t\"")?;
            Ok(())
        });
        assert!(matches!(select, Err(DbError::Sqlite(_))));

        let index = db.with_conn(|conn| {
            conn.execute_batch("CREATE INDEX \"ix_t_missing\" ON \"t\" (\"missing\")")?;
            Ok(())
        });
        assert!(matches!(index, Err(DbError::Sqlite(_))));
    }

    #[test]
    fn foreign_keys_are_enforced() {
        let db = Database::open_in_memory().unwrap();
        let enabled: bool = db
            .with_conn(|conn| Ok(conn.pragma_query_value(None, "foreign_keys", |r| r.get(0))?))
            .unwrap();
        assert!(enabled);
    }
}
