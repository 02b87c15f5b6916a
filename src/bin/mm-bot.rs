// Market-making bot CLI
// Single entry point for engine operation and status inspection

use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use mm_grid_bot::exchange::kraken::Credentials;
use mm_grid_bot::{
    BotSession, Config, Database, Engine, KrakenAdapter, PreFlightValidator, TradingError,
};

#[derive(Parser)]
#[command(name = "mm-bot")]
#[command(version = "0.2.0")]
#[command(about = "Grid Market-Making Engine", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration and database
    Init,

    /// Run the market-making engine
    Run {
        /// Trade only these symbols (comma-separated), overriding the config
        #[arg(short, long)]
        symbols: Option<String>,

        /// Skip the pre-flight validation
        #[arg(long)]
        skip_preflight: bool,
    },

    /// Show the latest session status and metrics
    Status,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Init => cmd_init(&cli.config),
        Commands::Run { symbols, skip_preflight } => {
            cmd_run(&cli.config, symbols, skip_preflight).await
        }
        Commands::Status => cmd_status(&cli.config),
    };

    if let Err(e) = result {
        error!("{}", e.user_message());
        std::process::exit(1);
    }
}

fn cmd_init(config_path: &str) -> Result<(), TradingError> {
    let config = Config::load_or_create(config_path)?;

    if let Some(parent) = Path::new(&config.bot.db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Database::new(&config.bot.db_path)
        .map_err(|e| TradingError::DatabaseConnection(e.to_string()))?;
    db.run_migrations()
        .map_err(|e| TradingError::DatabaseMigration(e.to_string()))?;

    info!("✅ Workspace initialized: {} / {}", config_path, config.bot.db_path);
    info!("💡 Edit {} with your API keys before running", config_path);
    Ok(())
}

async fn cmd_run(
    config_path: &str,
    symbols: Option<String>,
    skip_preflight: bool,
) -> Result<(), TradingError> {
    let mut config = Config::from_file(config_path)?;

    if let Some(symbols) = symbols {
        config.bot.symbols = symbols.split(',').map(|s| s.trim().to_string()).collect();
        config.validate()?;
    }

    let exchange = Arc::new(KrakenAdapter::new(
        config.exchange.ws_url.clone(),
        config.exchange.rest_url.clone(),
        Credentials {
            api_key: config.exchange.api_key.clone(),
            api_secret: config.exchange.api_secret.clone(),
        },
    ));

    if !skip_preflight {
        let validator = PreFlightValidator::new(config.clone());
        let result = validator.validate_all(exchange.as_ref()).await;
        result.display();
        if !result.passed {
            return Err(TradingError::ValidationFailed(
                "pre-flight validation failed".to_string(),
            ));
        }
    }

    if let Some(parent) = Path::new(&config.bot.db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Database::new(&config.bot.db_path)
        .map_err(|e| TradingError::DatabaseConnection(e.to_string()))?;

    let engine = Engine::new(config, db, exchange);
    engine.run().await
}

fn cmd_status(config_path: &str) -> Result<(), TradingError> {
    let config = Config::from_file(config_path)?;
    let db = Database::new(&config.bot.db_path)
        .map_err(|e| TradingError::DatabaseConnection(e.to_string()))?;

    match BotSession::get_latest(db.get_connection(), &config.bot.bot_id)
        .map_err(|e| TradingError::DatabaseQuery(e.to_string()))?
    {
        Some(session) => {
            info!("Bot:           {}", session.bot_id);
            info!("Status:        {:?}", session.status);
            info!("Started:       {}", session.started_at);
            if let Some(ended) = &session.ended_at {
                info!("Ended:         {}", ended);
            }
            if let Some(message) = &session.error_message {
                info!("Error:         {}", message);
            }
            info!("Trades:        {}", session.trade_count);
            info!("Volume:        {:.2}", session.traded_volume);
            info!("Net position:  {:+.4}", session.net_position);
        }
        None => {
            info!("No sessions recorded for {}", config.bot.bot_id);
        }
    }
    Ok(())
}
