//! Database module for SQLite-backed order, lock and session storage

use rusqlite::{Connection, Result as SqlResult};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub mod lock;
pub mod order;
pub mod session;

pub use lock::{LockMetadata, LockStatus, TradingLock};
pub use order::OrderRecord;
pub use session::{BotSession, SessionStatus};

/// Database manager with a shared connection handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Create a new database connection
    pub fn new<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        // Contending handles wait instead of failing with SQLITE_BUSY, so
        // the unique-active index stays the only arbiter of lock races
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        Ok(Database {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (for testing)
    pub fn new_in_memory() -> SqlResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Database {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run migrations to set up or update the schema
    pub fn run_migrations(&self) -> SqlResult<()> {
        let conn = self.conn.lock().unwrap();

        let migration_sql = include_str!("migrations/V1__initial_schema.sql");
        conn.execute_batch(migration_sql)?;

        Ok(())
    }

    /// Get a reference to the connection (for custom queries)
    pub fn get_connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// Check database health
    pub fn health_check(&self) -> SqlResult<bool> {
        let conn = self.conn.lock().unwrap();
        let result: i32 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
        Ok(result == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_creation() {
        let db = Database::new_in_memory().unwrap();
        assert!(db.health_check().unwrap());
    }

    #[test]
    fn test_migrations() {
        let db = Database::new_in_memory().unwrap();
        db.run_migrations().unwrap();

        // Verify tables were created
        let conn = db.conn.lock().unwrap();
        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('orders', 'trading_locks', 'bot_sessions')",
                [],
                |row| row.get(0),
            )
            .unwrap();

        assert_eq!(count, 3);
    }

    #[test]
    fn test_migrations_idempotent() {
        let db = Database::new_in_memory().unwrap();
        db.run_migrations().unwrap();
        db.run_migrations().unwrap();
        assert!(db.health_check().unwrap());
    }
}
