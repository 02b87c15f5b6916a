//! Durable order records
//!
//! An order row is created when an exchange placement is acknowledged and
//! mutated only from confirmed exchange outcomes. Terminal statuses are
//! immutable, which makes repeated fill events idempotent.

use rusqlite::{params, Connection, Result as SqlResult, Row};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::core::types::{OrderSide, OrderStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: Option<i64>,
    pub external_order_id: String,
    pub bot_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub price: f64,
    pub quantity: f64,
    pub status: OrderStatus,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl OrderRecord {
    /// Create a new order record ready for insertion
    pub fn new(
        external_order_id: String,
        bot_id: String,
        symbol: String,
        side: OrderSide,
        price: f64,
        quantity: f64,
    ) -> Self {
        OrderRecord {
            id: None,
            external_order_id,
            bot_id,
            symbol,
            side,
            price,
            quantity,
            status: OrderStatus::New,
            created_at: None,
            updated_at: None,
        }
    }

    /// Parse a row from the database
    fn from_row(row: &Row) -> SqlResult<Self> {
        Ok(OrderRecord {
            id: Some(row.get(0)?),
            external_order_id: row.get(1)?,
            bot_id: row.get(2)?,
            symbol: row.get(3)?,
            side: OrderSide::from_str(&row.get::<_, String>(4)?),
            price: row.get(5)?,
            quantity: row.get(6)?,
            status: OrderStatus::from_str(&row.get::<_, String>(7)?),
            created_at: Some(row.get(8)?),
            updated_at: Some(row.get(9)?),
        })
    }

    const COLUMNS: &'static str = "id, external_order_id, bot_id, symbol, side, price, quantity,
             status, created_at, updated_at";

    /// Insert order into database
    pub fn insert(&self, conn: Arc<Mutex<Connection>>) -> SqlResult<i64> {
        let conn = conn.lock().unwrap();
        conn.execute(
            "INSERT INTO orders (
                external_order_id, bot_id, symbol, side, price, quantity, status
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                self.external_order_id,
                self.bot_id,
                self.symbol,
                self.side.as_str(),
                self.price,
                self.quantity,
                self.status.as_str(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Update order status by external id. Terminal rows are left untouched,
    /// so the returned row count is 0 both for unknown orders and for
    /// already-final ones.
    pub fn update_status(
        conn: Arc<Mutex<Connection>>,
        external_order_id: &str,
        status: OrderStatus,
    ) -> SqlResult<usize> {
        let conn = conn.lock().unwrap();
        conn.execute(
            "UPDATE orders
             SET status = ?1, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
             WHERE external_order_id = ?2
               AND status NOT IN ('FILLED', 'CANCELED', 'REJECTED', 'CLOSED_BY_SL_TP')",
            params![status.as_str(), external_order_id],
        )
    }

    /// Mark a filled entry order as closed by the SL/TP engine. This is
    /// the one permitted transition out of a terminal status.
    pub fn mark_closed_by_sl_tp(
        conn: Arc<Mutex<Connection>>,
        external_order_id: &str,
    ) -> SqlResult<usize> {
        let conn = conn.lock().unwrap();
        conn.execute(
            "UPDATE orders
             SET status = 'CLOSED_BY_SL_TP', updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
             WHERE external_order_id = ?1 AND status = 'FILLED'",
            params![external_order_id],
        )
    }

    /// Find order by its external exchange id
    pub fn find_by_external_id(
        conn: Arc<Mutex<Connection>>,
        external_order_id: &str,
    ) -> SqlResult<Option<Self>> {
        let conn = conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM orders WHERE external_order_id = ?1",
            Self::COLUMNS
        ))?;

        let mut rows = stmt.query(params![external_order_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::from_row(row)?)),
            None => Ok(None),
        }
    }

    /// List non-terminal orders for (bot, symbol), most recent first
    pub fn list_non_terminal(
        conn: Arc<Mutex<Connection>>,
        bot_id: &str,
        symbol: &str,
    ) -> SqlResult<Vec<Self>> {
        let conn = conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM orders
             WHERE bot_id = ?1 AND symbol = ?2
               AND status NOT IN ('FILLED', 'CANCELED', 'REJECTED', 'CLOSED_BY_SL_TP')
             ORDER BY id DESC",
            Self::COLUMNS
        ))?;

        let rows = stmt.query_map(params![bot_id, symbol], |row| Self::from_row(row))?;
        rows.collect()
    }

    /// Count live (non-terminal) orders per side for a symbol
    pub fn count_non_terminal_by_side(
        conn: Arc<Mutex<Connection>>,
        bot_id: &str,
        symbol: &str,
        side: OrderSide,
    ) -> SqlResult<i64> {
        let conn = conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM orders
             WHERE bot_id = ?1 AND symbol = ?2 AND side = ?3
               AND status NOT IN ('FILLED', 'CANCELED', 'REJECTED', 'CLOSED_BY_SL_TP')",
            params![bot_id, symbol, side.as_str()],
            |row| row.get(0),
        )
    }
}
