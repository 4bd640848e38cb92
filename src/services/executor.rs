//! Position lifecycle executor
//!
//! One periodic loop drives every position through its lifecycle:
//! a buy pass promotes Pending positions with market buys, a sell pass
//! re-prices Open positions against the take-profit/stop-loss thresholds,
//! and once the daily cutoff passes every Open position is sold
//! unconditionally and the loop idles until the next trading day.
//!
//! The status gates make repeated cycles idempotent: only Pending rows are
//! considered for buying and only Open rows for selling, so re-running a
//! cycle against unchanged conditions never double-buys or double-sells.
//! Every failure inside a step rolls the position back to its prior stable
//! status and is retried on a later cycle; no error escapes the loop.

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, Weekday};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::adapters::TelegramNotifier;
use crate::config::{MarketHoursConfig, TradingConfig};
use crate::coordination::ShutdownToken;
use crate::domain::{Position, PositionStatus};
use crate::error::{Result, ScoopError};
use crate::services::traits::{Brokerage, PositionStore};

/// Why an open position was sold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SellReason {
    TakeProfit,
    StopLoss,
    /// Daily cutoff liquidation, thresholds ignored
    ForcedCutoff,
}

impl std::fmt::Display for SellReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SellReason::TakeProfit => write!(f, "take-profit"),
            SellReason::StopLoss => write!(f, "stop-loss"),
            SellReason::ForcedCutoff => write!(f, "forced cutoff"),
        }
    }
}

pub struct TradeExecutor {
    store: Arc<dyn PositionStore>,
    broker: Arc<dyn Brokerage>,
    notifier: Option<Arc<TelegramNotifier>>,
    trading: TradingConfig,
    hours: MarketHoursConfig,
    /// Date the cutoff pass ran; cycles no-op for the rest of that day.
    liquidated_on: Option<NaiveDate>,
}

impl TradeExecutor {
    pub fn new(
        store: Arc<dyn PositionStore>,
        broker: Arc<dyn Brokerage>,
        notifier: Option<Arc<TelegramNotifier>>,
        trading: TradingConfig,
        hours: MarketHoursConfig,
    ) -> Self {
        Self {
            store,
            broker,
            notifier,
            trading,
            hours,
            liquidated_on: None,
        }
    }

    /// Run the periodic loop until shutdown fires.
    pub async fn run(mut self, mut shutdown: ShutdownToken) {
        info!(
            interval_secs = self.trading.poll_interval_secs,
            force_close = %self.hours.force_close,
            "trade executor started"
        );
        if let Some(notifier) = &self.notifier {
            notifier.notify_startup().await;
        }

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.trading.poll_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            self.cycle(Local::now().naive_local()).await;
        }

        info!("trade executor stopped");
    }

    /// One scheduling cycle at the given local wall-clock time.
    ///
    /// Split out from [`run`](Self::run) so the state machine can be driven
    /// with an injected clock.
    pub async fn cycle(&mut self, now: NaiveDateTime) {
        if !is_trading_day(now.date()) {
            debug!("weekend, skipping cycle");
            return;
        }

        let time = now.time();
        if time < self.hours.open || time > self.hours.close {
            debug!("market closed, skipping cycle");
            return;
        }

        if time >= self.hours.force_close {
            if self.liquidated_on == Some(now.date()) {
                // Already cleaned up today; idle until the next trading day.
                return;
            }
            info!(cutoff = %self.hours.force_close, "cutoff reached, liquidating all open positions");
            self.force_liquidate_all().await;
            self.liquidated_on = Some(now.date());
            return;
        }

        self.buy_pass().await;
        self.sell_pass().await;
    }

    // ==================== Buy pass ====================

    async fn buy_pass(&self) {
        let pending = match self.store.list_pending().await {
            Ok(pending) => pending,
            Err(e) => {
                error!("failed to list pending positions: {e}");
                return;
            }
        };
        if pending.is_empty() {
            return;
        }

        info!(count = pending.len(), "processing pending positions");
        for position in pending {
            if let Err(e) = self.execute_buy(&position).await {
                error!(id = position.id, symbol = %position.symbol, "buy failed: {e}");
            }
        }
    }

    async fn execute_buy(&self, position: &Position) -> Result<()> {
        if !self
            .store
            .transition(position.id, PositionStatus::Pending, PositionStatus::Buying)
            .await?
        {
            // Someone else claimed the row; nothing to do.
            return Ok(());
        }

        match self.try_buy(position).await {
            Ok(Some((quantity, fill_price))) => {
                info!(
                    id = position.id,
                    symbol = %position.symbol,
                    quantity,
                    fill_price,
                    "buy completed"
                );
                if let Some(notifier) = &self.notifier {
                    notifier
                        .notify_buy(&position.symbol, &position.name, quantity, fill_price)
                        .await;
                }
                Ok(())
            }
            Ok(None) => {
                // Quote exceeded the per-position budget; retried later.
                self.rollback(position.id, PositionStatus::Buying, PositionStatus::Pending)
                    .await;
                Ok(())
            }
            Err(e) => {
                self.rollback(position.id, PositionStatus::Buying, PositionStatus::Pending)
                    .await;
                Err(e)
            }
        }
    }

    /// Place the market buy; `Ok(None)` means the computed quantity was 0
    /// and no order was placed.
    async fn try_buy(&self, position: &Position) -> Result<Option<(i64, i64)>> {
        let price = self.broker.current_price(&position.symbol).await?;

        let quantity = order_quantity(self.trading.budget_per_position, price);
        if quantity == 0 {
            warn!(
                symbol = %position.symbol,
                price,
                budget = self.trading.budget_per_position,
                "price exceeds per-position budget, buy aborted"
            );
            return Ok(None);
        }

        self.broker.buy(&position.symbol, quantity).await?;

        // Fill price approximated by the latest quote.
        let fill_price = self.broker.current_price(&position.symbol).await?;
        if !self
            .store
            .record_fill(position.id, quantity, fill_price)
            .await?
        {
            return Err(ScoopError::Internal(format!(
                "position {} left buying state mid-fill",
                position.id
            )));
        }
        Ok(Some((quantity, fill_price)))
    }

    // ==================== Sell pass ====================

    async fn sell_pass(&self) {
        let open = match self.store.list_open().await {
            Ok(open) => open,
            Err(e) => {
                error!("failed to list open positions: {e}");
                return;
            }
        };

        for position in open {
            if let Err(e) = self.check_sell(&position).await {
                error!(id = position.id, symbol = %position.symbol, "sell check failed: {e}");
            }
        }
    }

    async fn check_sell(&self, position: &Position) -> Result<()> {
        let price = self.broker.current_price(&position.symbol).await?;
        let rate = profit_rate(position.average_price, price);
        debug!(
            symbol = %position.symbol,
            average_price = position.average_price,
            price,
            rate = %rate,
            "re-priced open position"
        );

        let reason = if rate >= self.trading.take_profit_pct {
            SellReason::TakeProfit
        } else if rate <= -self.trading.stop_loss_pct {
            SellReason::StopLoss
        } else {
            return Ok(());
        };

        info!(symbol = %position.symbol, rate = %rate, reason = %reason, "sell signal");
        self.execute_sell(position, price, reason).await
    }

    async fn execute_sell(
        &self,
        position: &Position,
        price: i64,
        reason: SellReason,
    ) -> Result<()> {
        if !self
            .store
            .transition(position.id, PositionStatus::Open, PositionStatus::Selling)
            .await?
        {
            return Ok(());
        }

        match self.try_sell(position, price).await {
            Ok(()) => {
                let rate = profit_rate(position.average_price, price);
                info!(
                    id = position.id,
                    symbol = %position.symbol,
                    quantity = position.quantity,
                    average_price = position.average_price,
                    exit_price = price,
                    rate = %rate,
                    reason = %reason,
                    "sell completed"
                );
                if let Some(notifier) = &self.notifier {
                    notifier
                        .notify_sell(
                            &position.symbol,
                            &position.name,
                            position.quantity,
                            position.average_price,
                            price,
                            rate,
                            &reason.to_string(),
                        )
                        .await;
                }
                Ok(())
            }
            Err(e) => {
                self.rollback(position.id, PositionStatus::Selling, PositionStatus::Open)
                    .await;
                Err(e)
            }
        }
    }

    async fn try_sell(&self, position: &Position, exit_price: i64) -> Result<()> {
        self.broker
            .sell(&position.symbol, position.quantity)
            .await?;
        if !self
            .store
            .record_liquidation(position.id, exit_price)
            .await?
        {
            return Err(ScoopError::Internal(format!(
                "position {} left selling state mid-liquidation",
                position.id
            )));
        }
        Ok(())
    }

    // ==================== Forced liquidation ====================

    /// Sell every open position regardless of profit rate. A position whose
    /// sell fails is rolled back to Open and picked up again tomorrow.
    async fn force_liquidate_all(&self) {
        let open = match self.store.list_open().await {
            Ok(open) => open,
            Err(e) => {
                error!("failed to list open positions for forced liquidation: {e}");
                return;
            }
        };
        if open.is_empty() {
            info!("no open positions to liquidate at cutoff");
            return;
        }

        warn!(count = open.len(), "force-selling all open positions");
        for position in open {
            match self.broker.current_price(&position.symbol).await {
                Ok(price) => {
                    if let Err(e) = self
                        .execute_sell(&position, price, SellReason::ForcedCutoff)
                        .await
                    {
                        error!(
                            id = position.id,
                            symbol = %position.symbol,
                            "forced liquidation failed, position stays open: {e}"
                        );
                    }
                }
                Err(e) => error!(
                    id = position.id,
                    symbol = %position.symbol,
                    "no quote for forced liquidation, position stays open: {e}"
                ),
            }
        }
    }

    async fn rollback(&self, id: i64, from: PositionStatus, to: PositionStatus) {
        match self.store.transition(id, from, to).await {
            Ok(true) => debug!(%id, %from, %to, "position rolled back"),
            Ok(false) => warn!(%id, %from, %to, "rollback skipped, status changed underneath"),
            Err(e) => error!(%id, "rollback failed: {e}"),
        }
    }
}

/// Shares bought for a fixed budget at the given price (floor division).
/// Zero means the price exceeds the budget and no order should be placed.
pub fn order_quantity(budget: i64, price: i64) -> i64 {
    if price <= 0 {
        return 0;
    }
    budget / price
}

/// Unrealized profit rate in percent.
pub fn profit_rate(average_price: i64, current_price: i64) -> Decimal {
    if average_price <= 0 {
        return Decimal::ZERO;
    }
    (Decimal::from(current_price) - Decimal::from(average_price))
        / Decimal::from(average_price)
        * dec!(100)
}

/// Weekdays only; market holidays are not tracked.
pub fn is_trading_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}
