//! Bot session records
//!
//! One row per engine run: status transitions (running/stopped/error) and
//! rolled-up per-run metrics, exposed read-only to operational tooling.

use rusqlite::{params, Connection, Result as SqlResult, Row};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSession {
    pub id: Option<i64>,
    pub bot_id: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub status: SessionStatus,
    pub error_message: Option<String>,
    pub trade_count: i64,
    pub traded_volume: f64,
    pub net_position: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SessionStatus {
    Running,
    Stopped,
    Error,
}

impl SessionStatus {
    fn as_str(&self) -> &str {
        match self {
            SessionStatus::Running => "RUNNING",
            SessionStatus::Stopped => "STOPPED",
            SessionStatus::Error => "ERROR",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "STOPPED" => SessionStatus::Stopped,
            "ERROR" => SessionStatus::Error,
            _ => SessionStatus::Running,
        }
    }
}

impl BotSession {
    /// Create a new running session record
    pub fn new(bot_id: String, started_at: String) -> Self {
        BotSession {
            id: None,
            bot_id,
            started_at,
            ended_at: None,
            status: SessionStatus::Running,
            error_message: None,
            trade_count: 0,
            traded_volume: 0.0,
            net_position: 0.0,
        }
    }

    /// Parse a row from the database
    fn from_row(row: &Row) -> SqlResult<Self> {
        Ok(BotSession {
            id: Some(row.get(0)?),
            bot_id: row.get(1)?,
            started_at: row.get(2)?,
            ended_at: row.get(3)?,
            status: SessionStatus::from_str(&row.get::<_, String>(4)?),
            error_message: row.get(5)?,
            trade_count: row.get(6)?,
            traded_volume: row.get(7)?,
            net_position: row.get(8)?,
        })
    }

    /// Insert session into database
    pub fn insert(&self, conn: Arc<Mutex<Connection>>) -> SqlResult<i64> {
        let conn = conn.lock().unwrap();
        conn.execute(
            "INSERT INTO bot_sessions (
                bot_id, started_at, ended_at, status, error_message,
                trade_count, traded_volume, net_position
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                self.bot_id,
                self.started_at,
                self.ended_at,
                self.status.as_str(),
                self.error_message,
                self.trade_count,
                self.traded_volume,
                self.net_position,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Accumulate fill metrics onto a session
    pub fn record_fill(
        conn: Arc<Mutex<Connection>>,
        id: i64,
        volume: f64,
        signed_quantity: f64,
    ) -> SqlResult<usize> {
        let conn = conn.lock().unwrap();
        conn.execute(
            "UPDATE bot_sessions
             SET trade_count = trade_count + 1,
                 traded_volume = traded_volume + ?1,
                 net_position = net_position + ?2
             WHERE id = ?3",
            params![volume, signed_quantity, id],
        )
    }

    /// Find session by ID
    pub fn find_by_id(conn: Arc<Mutex<Connection>>, id: i64) -> SqlResult<Option<Self>> {
        let conn = conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, bot_id, started_at, ended_at, status, error_message,
                    trade_count, traded_volume, net_position
             FROM bot_sessions WHERE id = ?1",
        )?;

        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Get latest session for a bot
    pub fn get_latest(conn: Arc<Mutex<Connection>>, bot_id: &str) -> SqlResult<Option<Self>> {
        let conn = conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, bot_id, started_at, ended_at, status, error_message,
                    trade_count, traded_volume, net_position
             FROM bot_sessions
             WHERE bot_id = ?1
             ORDER BY id DESC
             LIMIT 1",
        )?;

        let mut rows = stmt.query(params![bot_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Mark session as stopped
    pub fn mark_stopped(
        conn: Arc<Mutex<Connection>>,
        id: i64,
        ended_at: String,
    ) -> SqlResult<usize> {
        let conn = conn.lock().unwrap();
        conn.execute(
            "UPDATE bot_sessions
             SET status = 'STOPPED', ended_at = ?1
             WHERE id = ?2",
            params![ended_at, id],
        )
    }

    /// Mark session as error
    pub fn mark_error(
        conn: Arc<Mutex<Connection>>,
        id: i64,
        error_message: String,
        ended_at: String,
    ) -> SqlResult<usize> {
        let conn = conn.lock().unwrap();
        conn.execute(
            "UPDATE bot_sessions
             SET status = 'ERROR', error_message = ?1, ended_at = ?2
             WHERE id = ?3",
            params![error_message, ended_at, id],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn test_session_lifecycle() {
        let db = Database::new_in_memory().unwrap();
        db.run_migrations().unwrap();
        let conn = db.get_connection();

        let session = BotSession::new("bot-1".to_string(), "2026-01-01T00:00:00Z".to_string());
        let id = session.insert(Arc::clone(&conn)).unwrap();

        let loaded = BotSession::find_by_id(Arc::clone(&conn), id).unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Running);

        BotSession::record_fill(Arc::clone(&conn), id, 50.0, 100.0).unwrap();
        BotSession::record_fill(Arc::clone(&conn), id, 52.0, -100.0).unwrap();

        let loaded = BotSession::find_by_id(Arc::clone(&conn), id).unwrap().unwrap();
        assert_eq!(loaded.trade_count, 2);
        assert!((loaded.traded_volume - 102.0).abs() < 1e-9);
        assert!(loaded.net_position.abs() < 1e-9);

        BotSession::mark_stopped(Arc::clone(&conn), id, "2026-01-01T12:00:00Z".to_string())
            .unwrap();
        let stopped = BotSession::find_by_id(Arc::clone(&conn), id).unwrap().unwrap();
        assert_eq!(stopped.status, SessionStatus::Stopped);
    }

    #[test]
    fn test_latest_session() {
        let db = Database::new_in_memory().unwrap();
        db.run_migrations().unwrap();
        let conn = db.get_connection();

        for n in 0..3 {
            let session =
                BotSession::new("bot-1".to_string(), format!("2026-01-0{}T00:00:00Z", n + 1));
            session.insert(Arc::clone(&conn)).unwrap();
        }

        let latest = BotSession::get_latest(Arc::clone(&conn), "bot-1").unwrap().unwrap();
        assert_eq!(latest.started_at, "2026-01-03T00:00:00Z");
    }
}
