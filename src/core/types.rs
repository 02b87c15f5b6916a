// Common trading types used across the engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "SELL" => OrderSide::Sell,
            _ => OrderSide::Buy,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    ClosedBySlTp,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::ClosedBySlTp => "CLOSED_BY_SL_TP",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
            "FILLED" => OrderStatus::Filled,
            "CANCELED" => OrderStatus::Canceled,
            "REJECTED" => OrderStatus::Rejected,
            "CLOSED_BY_SL_TP" => OrderStatus::ClosedBySlTp,
            _ => OrderStatus::New,
        }
    }

    /// Terminal statuses are never mutated again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Rejected
                | OrderStatus::ClosedBySlTp
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "SHORT" => PositionSide::Short,
            _ => PositionSide::Long,
        }
    }

    /// Order side that flattens a position on this side
    pub fn closing_order_side(&self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Sell,
            PositionSide::Short => OrderSide::Buy,
        }
    }
}

/// An open position awaiting closure, created when an entry fill is
/// confirmed and destroyed when the closure order's fill is confirmed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: f64,
    pub quantity: f64,
    pub stop_loss_price: f64,
    pub take_profit_price: f64,
    pub entry_order_id: String,
    pub closure_order_id: Option<String>,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Signed PnL percentage at the given price
    pub fn pnl_pct(&self, price: f64) -> f64 {
        match self.side {
            PositionSide::Long => (price - self.entry_price) / self.entry_price * 100.0,
            PositionSide::Short => (self.entry_price - price) / self.entry_price * 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridState {
    Absent,
    Partial,
    Complete,
    Locked,
}
