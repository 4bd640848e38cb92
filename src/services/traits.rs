//! Seams between the lifecycle executor and its collaborators

use async_trait::async_trait;

use crate::domain::{NewPosition, OrderReceipt, Position, PositionStatus};
use crate::error::Result;

/// Credential-bearing brokerage access consumed by the trade executor
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Brokerage: Send + Sync {
    /// Latest traded price for a symbol, in won; always positive
    async fn current_price(&self, symbol: &str) -> Result<i64>;

    async fn buy(&self, symbol: &str, quantity: i64) -> Result<OrderReceipt>;

    async fn sell(&self, symbol: &str, quantity: i64) -> Result<OrderReceipt>;
}

/// Persistent position table, with status-guarded single-row updates
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn create_position(&self, new: &NewPosition) -> Result<i64>;

    async fn list_pending(&self) -> Result<Vec<Position>>;

    async fn list_open(&self) -> Result<Vec<Position>>;

    /// Apply `from -> to` if the row is still in `from`; `false` means the
    /// row changed underneath the caller and nothing was written.
    async fn transition(&self, id: i64, from: PositionStatus, to: PositionStatus) -> Result<bool>;

    /// Record a filled buy (quantity + average price), Buying -> Open.
    async fn record_fill(&self, id: i64, quantity: i64, avg_price: i64) -> Result<bool>;

    /// Record a filled sell (exit price), Selling -> Liquidated.
    async fn record_liquidation(&self, id: i64, exit_price: i64) -> Result<bool>;
}
