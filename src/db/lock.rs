//! Trading lock records
//!
//! The durable lock is the engine's only cross-restart mutual-exclusion
//! primitive. The partial unique index on (bot_id, symbol, lock_type)
//! WHERE status='ACTIVE' arbitrates ownership: two concurrent inserts
//! cannot both succeed, regardless of what either process observed before.

use rusqlite::{params, Connection, ErrorCode, Result as SqlResult, Row};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::core::types::PositionSide;

pub const LOCK_TYPE_POSITION_OPEN: &str = "POSITION_OPEN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockStatus {
    Active,
    Released,
}

impl LockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockStatus::Active => "ACTIVE",
            LockStatus::Released => "RELEASED",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "RELEASED" => LockStatus::Released,
            _ => LockStatus::Active,
        }
    }
}

/// Structured lock metadata, serialized to JSON in the metadata column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockMetadata {
    pub entry_price: f64,
    pub side: PositionSide,
    pub quantity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closure_order_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingLock {
    pub id: Option<i64>,
    pub bot_id: String,
    pub symbol: String,
    pub lock_type: String,
    pub status: LockStatus,
    pub reason: Option<String>,
    pub position_id: String,
    pub metadata: String,
    pub created_at: Option<String>,
    pub unlock_at: Option<String>,
}

impl TradingLock {
    /// Parse a row from the database
    fn from_row(row: &Row) -> SqlResult<Self> {
        Ok(TradingLock {
            id: Some(row.get(0)?),
            bot_id: row.get(1)?,
            symbol: row.get(2)?,
            lock_type: row.get(3)?,
            status: LockStatus::from_str(&row.get::<_, String>(4)?),
            reason: row.get(5)?,
            position_id: row.get(6)?,
            metadata: row.get(7)?,
            created_at: Some(row.get(8)?),
            unlock_at: row.get(9)?,
        })
    }

    const COLUMNS: &'static str = "id, bot_id, symbol, lock_type, status, reason, position_id,
             metadata, created_at, unlock_at";

    /// Decode the JSON metadata column
    pub fn parsed_metadata(&self) -> Option<LockMetadata> {
        serde_json::from_str(&self.metadata).ok()
    }

    /// Atomically create an ACTIVE lock. Returns Ok(false) when another
    /// ACTIVE lock already holds the unique slot.
    pub fn create_active(
        conn: Arc<Mutex<Connection>>,
        bot_id: &str,
        symbol: &str,
        position_id: &str,
        reason: &str,
        metadata: &LockMetadata,
    ) -> SqlResult<bool> {
        let metadata_json = serde_json::to_string(metadata)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

        let conn = conn.lock().unwrap();
        let result = conn.execute(
            "INSERT INTO trading_locks (bot_id, symbol, lock_type, status, reason, position_id, metadata)
             VALUES (?1, ?2, ?3, 'ACTIVE', ?4, ?5, ?6)",
            params![
                bot_id,
                symbol,
                LOCK_TYPE_POSITION_OPEN,
                reason,
                position_id,
                metadata_json,
            ],
        );

        match result {
            Ok(_) => Ok(true),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Find the ACTIVE lock for (bot, symbol), if any
    pub fn find_active(
        conn: Arc<Mutex<Connection>>,
        bot_id: &str,
        symbol: &str,
    ) -> SqlResult<Option<Self>> {
        let conn = conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM trading_locks
             WHERE bot_id = ?1 AND symbol = ?2 AND lock_type = ?3 AND status = 'ACTIVE'",
            Self::COLUMNS
        ))?;

        let mut rows = stmt.query(params![bot_id, symbol, LOCK_TYPE_POSITION_OPEN])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Whether an ACTIVE lock exists for (bot, symbol)
    pub fn has_active(
        conn: Arc<Mutex<Connection>>,
        bot_id: &str,
        symbol: &str,
    ) -> SqlResult<bool> {
        let conn = conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM trading_locks
             WHERE bot_id = ?1 AND symbol = ?2 AND lock_type = ?3 AND status = 'ACTIVE'",
            params![bot_id, symbol, LOCK_TYPE_POSITION_OPEN],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Replace the metadata of the ACTIVE lock, returning affected rows
    pub fn update_metadata(
        conn: Arc<Mutex<Connection>>,
        bot_id: &str,
        symbol: &str,
        metadata: &LockMetadata,
    ) -> SqlResult<usize> {
        let metadata_json = serde_json::to_string(metadata)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

        let conn = conn.lock().unwrap();
        conn.execute(
            "UPDATE trading_locks SET metadata = ?1
             WHERE bot_id = ?2 AND symbol = ?3 AND lock_type = ?4 AND status = 'ACTIVE'",
            params![metadata_json, bot_id, symbol, LOCK_TYPE_POSITION_OPEN],
        )
    }

    /// Release the ACTIVE lock. Returns true if a lock was released.
    pub fn release(
        conn: Arc<Mutex<Connection>>,
        bot_id: &str,
        symbol: &str,
    ) -> SqlResult<bool> {
        let conn = conn.lock().unwrap();
        let rows = conn.execute(
            "UPDATE trading_locks
             SET status = 'RELEASED', unlock_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
             WHERE bot_id = ?1 AND symbol = ?2 AND lock_type = ?3 AND status = 'ACTIVE'",
            params![bot_id, symbol, LOCK_TYPE_POSITION_OPEN],
        )?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn setup() -> Database {
        let db = Database::new_in_memory().unwrap();
        db.run_migrations().unwrap();
        db
    }

    fn sample_metadata() -> LockMetadata {
        LockMetadata {
            entry_price: 0.50,
            side: PositionSide::Long,
            quantity: 100.0,
            closure_order_id: None,
        }
    }

    #[test]
    fn test_single_active_lock_per_symbol() {
        let db = setup();
        let conn = db.get_connection();

        let created = TradingLock::create_active(
            Arc::clone(&conn),
            "bot-1",
            "XRP/GBP",
            "EX-1",
            "entry fill",
            &sample_metadata(),
        )
        .unwrap();
        assert!(created);

        // Second insert loses the race at the storage layer
        let created = TradingLock::create_active(
            Arc::clone(&conn),
            "bot-1",
            "XRP/GBP",
            "EX-2",
            "entry fill",
            &sample_metadata(),
        )
        .unwrap();
        assert!(!created);

        // A different symbol is an independent slot
        let created = TradingLock::create_active(
            Arc::clone(&conn),
            "bot-1",
            "ETH/GBP",
            "EX-3",
            "entry fill",
            &sample_metadata(),
        )
        .unwrap();
        assert!(created);
    }

    #[test]
    fn test_release_reopens_slot() {
        let db = setup();
        let conn = db.get_connection();

        assert!(TradingLock::create_active(
            Arc::clone(&conn),
            "bot-1",
            "XRP/GBP",
            "EX-1",
            "entry fill",
            &sample_metadata(),
        )
        .unwrap());

        assert!(TradingLock::release(Arc::clone(&conn), "bot-1", "XRP/GBP").unwrap());
        assert!(!TradingLock::has_active(Arc::clone(&conn), "bot-1", "XRP/GBP").unwrap());

        // Released lock leaves the slot free for the next position
        assert!(TradingLock::create_active(
            Arc::clone(&conn),
            "bot-1",
            "XRP/GBP",
            "EX-2",
            "entry fill",
            &sample_metadata(),
        )
        .unwrap());

        // Double release is a no-op on the already-released row
        assert!(TradingLock::release(Arc::clone(&conn), "bot-1", "XRP/GBP").unwrap());
        assert!(!TradingLock::release(Arc::clone(&conn), "bot-1", "XRP/GBP").unwrap());
    }

    #[test]
    fn test_metadata_roundtrip() {
        let db = setup();
        let conn = db.get_connection();

        assert!(TradingLock::create_active(
            Arc::clone(&conn),
            "bot-1",
            "XRP/GBP",
            "EX-1",
            "entry fill",
            &sample_metadata(),
        )
        .unwrap());

        let mut metadata = sample_metadata();
        metadata.closure_order_id = Some("EX-9".to_string());
        let rows =
            TradingLock::update_metadata(Arc::clone(&conn), "bot-1", "XRP/GBP", &metadata).unwrap();
        assert_eq!(rows, 1);

        let lock = TradingLock::find_active(Arc::clone(&conn), "bot-1", "XRP/GBP")
            .unwrap()
            .unwrap();
        let parsed = lock.parsed_metadata().unwrap();
        assert_eq!(parsed.closure_order_id.as_deref(), Some("EX-9"));
        assert_eq!(parsed.side, PositionSide::Long);
    }
}
