use clap::{Parser, Subcommand};
use scoop::adapters::{KisClient, PostgresStore, TelegramNotifier};
use scoop::auth::TokenBroker;
use scoop::config::{AppConfig, LoggingConfig};
use scoop::coordination::{shutdown::listen_for_signals, RequestCoordinator, Shutdown};
use scoop::domain::PositionStatus;
use scoop::error::Result;
use scoop::services::{AnalysisVerdict, DecisionPipeline, MarketService, TradeExecutor};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "scoop", about = "News-driven KRX stock auto-trader", version)]
struct Cli {
    /// Configuration directory
    #[arg(long, default_value = "config", global = true)]
    config_dir: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trade-execution service
    Run,
    /// Fetch the current quote for a symbol
    Price { symbol: String },
    /// List tracked positions by lifecycle status
    Positions,
    /// Feed a manual analysis verdict through the decision pipeline
    Track {
        symbol: String,
        /// Display name (defaults to the symbol)
        #[arg(long)]
        name: Option<String>,
        /// Upstream probability score (0-100)
        #[arg(long, default_value_t = 100)]
        probability: u8,
        #[arg(long)]
        target: Option<i64>,
        #[arg(long)]
        stop: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = AppConfig::load_from(&cli.config_dir)?;

    match cli.command {
        Commands::Run => run_service(cfg).await,
        Commands::Price { symbol } => show_price(cfg, &symbol).await,
        Commands::Positions => show_positions(cfg).await,
        Commands::Track {
            symbol,
            name,
            probability,
            target,
            stop,
        } => track(cfg, symbol, name, probability, target, stop).await,
    }
}

async fn run_service(cfg: AppConfig) -> Result<()> {
    let _log_guard = init_logging(&cfg.logging);
    info!("scoop starting");

    let store = Arc::new(
        PostgresStore::new(&cfg.database.url, cfg.database.max_connections).await?,
    );
    store.migrate().await?;

    let client = Arc::new(KisClient::new(&cfg.kis)?);
    let tokens = Arc::new(TokenBroker::new(
        store.clone(),
        client.clone(),
        cfg.kis.token_safety_margin_secs,
    ));

    let shutdown = Arc::new(Shutdown::new());
    listen_for_signals(shutdown.clone());

    let coordinator = RequestCoordinator::spawn(&cfg.coordinator, shutdown.token());
    let market = Arc::new(MarketService::new(client, tokens, coordinator));
    let notifier = TelegramNotifier::from_config(&cfg.telegram);

    let executor = TradeExecutor::new(
        store.clone(),
        market,
        notifier,
        cfg.trading.clone(),
        cfg.market.clone(),
    );
    executor.run(shutdown.token()).await;

    info!("scoop stopped");
    Ok(())
}

async fn show_price(cfg: AppConfig, symbol: &str) -> Result<()> {
    init_logging_simple();

    let store = Arc::new(
        PostgresStore::new(&cfg.database.url, cfg.database.max_connections).await?,
    );
    store.migrate().await?;

    let client = Arc::new(KisClient::new(&cfg.kis)?);
    let tokens = Arc::new(TokenBroker::new(
        store,
        client.clone(),
        cfg.kis.token_safety_margin_secs,
    ));
    let shutdown = Shutdown::new();
    let coordinator = RequestCoordinator::spawn(&cfg.coordinator, shutdown.token());
    let market = MarketService::new(client, tokens, coordinator);

    let price = market.current_price(symbol).await?;
    println!("{symbol}: {price}원");

    let closes = market.daily_closes(symbol, 5).await?;
    println!("last {} closes: {:?}", closes.len(), closes);
    Ok(())
}

async fn show_positions(cfg: AppConfig) -> Result<()> {
    init_logging_simple();

    let store = PostgresStore::new(&cfg.database.url, cfg.database.max_connections).await?;
    store.migrate().await?;

    for status in [
        PositionStatus::Pending,
        PositionStatus::Buying,
        PositionStatus::Open,
        PositionStatus::Selling,
        PositionStatus::Liquidated,
    ] {
        let positions = store.list_by_status(status).await?;
        if positions.is_empty() {
            continue;
        }
        println!("== {status} ({})", positions.len());
        for p in positions {
            println!(
                "  #{} {}({}) qty {} avg {}원 target {:?} stop {:?}",
                p.id, p.name, p.symbol, p.quantity, p.average_price, p.target_price, p.stop_price
            );
        }
    }
    Ok(())
}

async fn track(
    cfg: AppConfig,
    symbol: String,
    name: Option<String>,
    probability: u8,
    target: Option<i64>,
    stop: Option<i64>,
) -> Result<()> {
    init_logging_simple();

    let store = Arc::new(
        PostgresStore::new(&cfg.database.url, cfg.database.max_connections).await?,
    );
    store.migrate().await?;

    let pipeline = DecisionPipeline::new(store, None, cfg.trading.min_probability);
    let verdict = AnalysisVerdict {
        name: name.unwrap_or_else(|| symbol.clone()),
        symbol,
        probability,
        target_price: target,
        stop_price: stop,
    };

    match pipeline.submit_verdict(&verdict).await? {
        Some(id) => println!("tracking position #{id} ({})", verdict.symbol),
        None => println!(
            "probability {}% below threshold {}%, not tracking",
            verdict.probability, cfg.trading.min_probability
        ),
    }
    Ok(())
}

/// Console + daily-rolling file logging for the long-running service.
/// The returned guard must stay alive for the file writer to flush.
fn init_logging(cfg: &LoggingConfig) -> tracing_appender::non_blocking::WorkerGuard {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},sqlx=warn", cfg.level)));

    let file_appender = tracing_appender::rolling::daily("logs", "scoop.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    if cfg.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .with(fmt::layer().json().with_writer(file_writer))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .with(fmt::layer().with_ansi(false).with_writer(file_writer))
            .init();
    }
    guard
}

fn init_logging_simple() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}
