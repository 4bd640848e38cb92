pub mod executor;
pub mod market;
pub mod pipeline;
pub mod traits;

pub use executor::{SellReason, TradeExecutor};
pub use market::MarketService;
pub use pipeline::{AnalysisVerdict, DecisionPipeline};
pub use traits::{Brokerage, PositionStore};
