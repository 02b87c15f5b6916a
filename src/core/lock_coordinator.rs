// Persisted position-lock coordination
//
// All grid-mutating operations are gated on the durable trading lock. The
// storage layer's unique-active constraint is the only arbiter; nothing
// in-process is trusted across restarts.

use tracing::{error, warn};

use crate::db::{Database, LockMetadata, TradingLock};
use crate::error::TradingResult;

#[derive(Clone)]
pub struct LockCoordinator {
    db: Database,
    bot_id: String,
}

impl LockCoordinator {
    pub fn new(db: Database, bot_id: String) -> Self {
        Self { db, bot_id }
    }

    /// Whether an ACTIVE lock exists for this bot and symbol.
    ///
    /// Fails CLOSED: if the store cannot be read, the answer is "locked",
    /// because a duplicate grid is worse than a skipped cycle. The read
    /// failure is logged, not retried here.
    pub fn has_active_lock(&self, symbol: &str) -> bool {
        match TradingLock::has_active(self.db.get_connection(), &self.bot_id, symbol) {
            Ok(active) => active,
            Err(e) => {
                error!(
                    "Lock check failed for {} ({}); treating symbol as locked",
                    symbol, e
                );
                true
            }
        }
    }

    /// Atomically create an ACTIVE lock. Returns false when the slot is
    /// already held — the caller lost the race and must back off.
    pub fn create_lock(
        &self,
        symbol: &str,
        position_id: &str,
        metadata: &LockMetadata,
    ) -> TradingResult<bool> {
        let created = TradingLock::create_active(
            self.db.get_connection(),
            &self.bot_id,
            symbol,
            position_id,
            "entry fill observed",
            metadata,
        )?;

        if !created {
            warn!(
                "Lock slot for {} already held; concurrent entry handling lost the race",
                symbol
            );
        }

        Ok(created)
    }

    /// Replace the ACTIVE lock's metadata; returns affected row count
    pub fn update_lock_metadata(
        &self,
        symbol: &str,
        metadata: &LockMetadata,
    ) -> TradingResult<usize> {
        Ok(TradingLock::update_metadata(
            self.db.get_connection(),
            &self.bot_id,
            symbol,
            metadata,
        )?)
    }

    /// Release the ACTIVE lock; returns true if one was released
    pub fn release_lock(&self, symbol: &str) -> TradingResult<bool> {
        Ok(TradingLock::release(self.db.get_connection(), &self.bot_id, symbol)?)
    }

    /// The ACTIVE lock for this symbol, if any
    pub fn get_lock(&self, symbol: &str) -> TradingResult<Option<TradingLock>> {
        Ok(TradingLock::find_active(
            self.db.get_connection(),
            &self.bot_id,
            symbol,
        )?)
    }
}
