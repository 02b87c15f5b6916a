// TTL-bounded order book cache
//
// Pricing decisions on stale data risk immediate-match rejections or bad
// fills, so a stale or absent entry is a hard error, never a silent
// fallback to old data.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::{TradingError, TradingResult};
use crate::exchange::Depth;

pub struct BookCache {
    ttl: Duration,
    entries: HashMap<String, (Depth, Instant)>,
}

impl BookCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn update(&mut self, symbol: &str, depth: Depth) {
        self.entries.insert(symbol.to_string(), (depth, Instant::now()));
    }

    /// Current snapshot for a symbol; Err when absent or older than the TTL
    pub fn get(&self, symbol: &str) -> TradingResult<&Depth> {
        self.get_at(symbol, Instant::now())
    }

    fn get_at(&self, symbol: &str, now: Instant) -> TradingResult<&Depth> {
        match self.entries.get(symbol) {
            Some((depth, updated)) if now.duration_since(*updated) <= self.ttl => Ok(depth),
            Some(_) => Err(TradingError::StaleMarketData(format!(
                "order book for {} older than {:?}",
                symbol, self.ttl
            ))),
            None => Err(TradingError::StaleMarketData(format!(
                "no order book cached for {}",
                symbol
            ))),
        }
    }
}
