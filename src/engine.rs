// Engine instance: owns the per-symbol workers, routes stream events into
// their queues, and manages the session lifecycle.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::core::event_processor::{SymbolEvent, SymbolWorker};
use crate::db::{BotSession, Database};
use crate::error::{TradingError, TradingResult};
use crate::exchange::{ExchangeAdapter, StreamEvent};

struct WorkerHandle {
    tx: mpsc::UnboundedSender<SymbolEvent>,
    task: JoinHandle<()>,
}

pub struct Engine {
    config: Config,
    db: Database,
    exchange: Arc<dyn ExchangeAdapter>,
    workers: HashMap<String, WorkerHandle>,
    router: Option<JoinHandle<()>>,
    session_id: Option<i64>,
}

impl Engine {
    pub fn new(config: Config, db: Database, exchange: Arc<dyn ExchangeAdapter>) -> Self {
        Self {
            config,
            db,
            exchange,
            workers: HashMap::new(),
            router: None,
            session_id: None,
        }
    }

    pub fn session_id(&self) -> Option<i64> {
        self.session_id
    }

    /// Bring the engine up: migrations, session row, stream connection,
    /// one worker per symbol, and an initial recovery pass for each.
    pub async fn start(&mut self) -> TradingResult<()> {
        self.config.validate()?;
        self.db.run_migrations()?;

        let session = BotSession::new(
            self.config.bot.bot_id.clone(),
            Utc::now().to_rfc3339(),
        );
        let session_id = session.insert(self.db.get_connection())?;
        self.session_id = Some(session_id);

        let (stream_tx, stream_rx) = mpsc::unbounded_channel();
        self.exchange.connect_stream(stream_tx).await?;

        let symbols = self.config.bot.symbols.clone();
        self.exchange.subscribe_orderbook(&symbols).await?;
        self.exchange.subscribe_user_trades(&symbols).await?;

        for symbol in &symbols {
            let (tx, rx) = mpsc::unbounded_channel();
            let worker = SymbolWorker::new(
                symbol.clone(),
                &self.config,
                Arc::clone(&self.exchange),
                self.db.clone(),
                Some(session_id),
                tx.clone(),
            );
            let task = tokio::spawn(worker.run(rx));

            // Prime the book from REST so recovery can price immediately
            // instead of waiting for the first stream tick
            match self.exchange.get_depth(symbol).await {
                Ok(depth) => {
                    let _ = tx.send(SymbolEvent::Book(depth));
                }
                Err(e) => {
                    warn!("Initial depth fetch for {} failed: {}", symbol, e);
                }
            }
            let _ = tx.send(SymbolEvent::EnsureGrid);

            self.workers.insert(symbol.clone(), WorkerHandle { tx, task });
        }

        self.router = Some(self.spawn_router(stream_rx));

        info!(
            "🚀 Engine started: bot {} trading {} symbol(s), session #{}",
            self.config.bot.bot_id,
            symbols.len(),
            session_id
        );
        Ok(())
    }

    /// Route adapter stream events into the owning symbol's queue. Events
    /// for untracked symbols are dropped with a log line; one symbol's
    /// queue never blocks another's.
    fn spawn_router(
        &self,
        mut stream_rx: mpsc::UnboundedReceiver<StreamEvent>,
    ) -> JoinHandle<()> {
        let routes: HashMap<String, mpsc::UnboundedSender<SymbolEvent>> = self
            .workers
            .iter()
            .map(|(symbol, handle)| (symbol.clone(), handle.tx.clone()))
            .collect();

        tokio::spawn(async move {
            while let Some(event) = stream_rx.recv().await {
                let (symbol, event) = match event {
                    StreamEvent::Book { symbol, depth } => (symbol, SymbolEvent::Book(depth)),
                    StreamEvent::Fill(fill) => (fill.symbol.clone(), SymbolEvent::Fill(fill)),
                };

                match routes.get(&symbol) {
                    Some(tx) => {
                        if tx.send(event).is_err() {
                            error!("Worker queue for {} closed; dropping event", symbol);
                        }
                    }
                    None => debug!("Stream event for untracked symbol {}", symbol),
                }
            }
        })
    }

    /// Run until interrupted, then shut down cleanly
    pub async fn run(mut self) -> TradingResult<()> {
        self.start().await?;

        tokio::signal::ctrl_c()
            .await
            .map_err(|e| TradingError::Internal(format!("signal handling failed: {}", e)))?;
        info!("Received interrupt; shutting down");

        self.shutdown().await;
        Ok(())
    }

    /// Best-effort teardown: cancel resting orders, close worker queues,
    /// persist the session outcome.
    pub async fn shutdown(&mut self) {
        for symbol in self.config.bot.symbols.clone() {
            if let Err(e) = self.exchange.cancel_all_open_orders(&symbol).await {
                warn!("Shutdown cancel sweep for {} failed: {}", symbol, e);
            }
        }

        if let Some(router) = self.router.take() {
            router.abort();
        }

        for (_, handle) in self.workers.drain() {
            drop(handle.tx);
            handle.task.abort();
        }

        if let Some(session_id) = self.session_id {
            if let Err(e) = BotSession::mark_stopped(
                self.db.get_connection(),
                session_id,
                Utc::now().to_rfc3339(),
            ) {
                error!("Failed to persist session stop: {}", e);
            }
        }

        info!("🛑 Engine stopped");
    }

    /// Persist a fatal engine error onto the session record
    pub fn mark_error(&self, message: &str) {
        let Some(session_id) = self.session_id else {
            return;
        };
        if let Err(e) = BotSession::mark_error(
            self.db.get_connection(),
            session_id,
            message.to_string(),
            Utc::now().to_rfc3339(),
        ) {
            error!("Failed to persist session error: {}", e);
        }
    }
}
