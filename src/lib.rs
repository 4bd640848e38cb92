pub mod adapters;
pub mod auth;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod services;

pub use adapters::{KisClient, PostgresStore, TelegramNotifier};
pub use auth::{TokenBroker, TokenIssuer, TokenStore};
pub use config::AppConfig;
pub use coordination::{RequestCoordinator, Shutdown, ShutdownToken};
pub use domain::{NewPosition, OrderReceipt, OrderSide, Position, PositionStatus, QuoteKey};
pub use error::{Result, ScoopError};
pub use services::{
    AnalysisVerdict, Brokerage, DecisionPipeline, MarketService, PositionStore, SellReason,
    TradeExecutor,
};
