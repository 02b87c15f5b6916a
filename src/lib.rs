// Market-Making Grid Bot Library
//
// A per-symbol bid/ask market-making engine with a durable trading lock,
// fill-reactive position management and crash-safe order recovery.

pub mod config;
pub mod core;
pub mod db; // SQLite database layer
pub mod engine;
pub mod error; // Unified error handling
pub mod exchange;
pub mod validation; // Pre-flight validation

// Re-export core trading types
pub use crate::core::{
    BookCache, ClosureTier, Grid, GridConfig, GridManager, GridState, LockCoordinator,
    OrderRecovery, OrderSide, OrderStatus, Position, PositionMonitor, PositionSide, SymbolEvent,
    SymbolWorker,
};

// Re-export error types
pub use error::{TradingError, TradingResult};

// Re-export validation types
pub use validation::{PreFlightValidator, ValidationCheck, ValidationLevel, ValidationResult};

// Re-export configuration
pub use config::{BotConfig, Config, ConfigError, ExchangeConfig, RiskConfig, TradingConfig};

// Re-export database types
pub use db::{BotSession, Database, LockMetadata, OrderRecord, SessionStatus, TradingLock};

// Re-export exchange types
pub use exchange::{
    Depth, DepthLevel, ExchangeAdapter, FillEvent, KrakenAdapter, MarketInfo, MockExchange,
    OpenOrderInfo, OrderAck, StreamEvent,
};

// Re-export the engine
pub use engine::Engine;
