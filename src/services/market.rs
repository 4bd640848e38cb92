//! Credential-bearing brokerage facade
//!
//! Quote lookups go through the request coordinator (queued, spaced,
//! cached under a coarse time-bucketed key); order placement dials the
//! brokerage directly since an order must never be served from a cache.

use async_trait::async_trait;
use chrono::Local;
use serde_json::Value;
use std::sync::Arc;

use crate::adapters::KisClient;
use crate::auth::TokenBroker;
use crate::coordination::RequestCoordinator;
use crate::domain::{OrderReceipt, OrderSide, QuoteKey};
use crate::error::{Result, ScoopError};
use crate::services::traits::Brokerage;

pub struct MarketService {
    client: Arc<KisClient>,
    tokens: Arc<TokenBroker>,
    coordinator: Arc<RequestCoordinator>,
}

impl MarketService {
    pub fn new(
        client: Arc<KisClient>,
        tokens: Arc<TokenBroker>,
        coordinator: Arc<RequestCoordinator>,
    ) -> Self {
        Self {
            client,
            tokens,
            coordinator,
        }
    }

    /// Latest traded price, minute-bucketed in the quote cache.
    pub async fn current_price(&self, symbol: &str) -> Result<i64> {
        let key = QuoteKey::current(symbol, Local::now().naive_local());
        let client = self.client.clone();
        let tokens = self.tokens.clone();
        let sym = symbol.to_string();

        let raw = self
            .coordinator
            .submit(&key, move || async move {
                let token = tokens.access_token().await?;
                client.current_price(&token, &sym).await
            })
            .await?;

        parse_price(&raw, symbol)
    }

    /// Closing prices for the last `days` trading days, most recent first;
    /// day-bucketed in the quote cache.
    pub async fn daily_closes(&self, symbol: &str, days: usize) -> Result<Vec<i64>> {
        let key = QuoteKey::daily(symbol, Local::now().naive_local());
        let client = self.client.clone();
        let tokens = self.tokens.clone();
        let sym = symbol.to_string();

        let raw = self
            .coordinator
            .submit(&key, move || async move {
                let token = tokens.access_token().await?;
                client.daily_prices(&token, &sym, days).await
            })
            .await?;

        parse_closes(&raw, symbol)
    }

    async fn order(&self, symbol: &str, quantity: i64, side: OrderSide) -> Result<OrderReceipt> {
        let token = self.tokens.access_token().await?;
        self.client.submit_order(&token, symbol, quantity, side).await
    }
}

#[async_trait]
impl Brokerage for MarketService {
    async fn current_price(&self, symbol: &str) -> Result<i64> {
        MarketService::current_price(self, symbol).await
    }

    async fn buy(&self, symbol: &str, quantity: i64) -> Result<OrderReceipt> {
        self.order(symbol, quantity, OrderSide::Buy).await
    }

    async fn sell(&self, symbol: &str, quantity: i64) -> Result<OrderReceipt> {
        self.order(symbol, quantity, OrderSide::Sell).await
    }
}

/// Extract a positive price from the quote payload's `stck_prpr` field.
fn parse_price(raw: &Value, symbol: &str) -> Result<i64> {
    let price = raw["stck_prpr"]
        .as_str()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .or_else(|| raw["stck_prpr"].as_i64());

    match price {
        Some(p) if p > 0 => Ok(p),
        Some(p) => Err(ScoopError::InvalidQuote(format!(
            "non-positive price {p} for {symbol}"
        ))),
        None => Err(ScoopError::InvalidQuote(format!(
            "quote payload for {symbol} carries no price"
        ))),
    }
}

fn parse_closes(raw: &Value, symbol: &str) -> Result<Vec<i64>> {
    let bars = raw.as_array().ok_or_else(|| {
        ScoopError::InvalidQuote(format!("daily payload for {symbol} is not a bar list"))
    })?;

    bars.iter()
        .map(|bar| {
            bar["stck_clpr"]
                .as_str()
                .and_then(|s| s.trim().parse::<i64>().ok())
                .or_else(|| bar["stck_clpr"].as_i64())
                .filter(|p| *p > 0)
                .ok_or_else(|| {
                    ScoopError::InvalidQuote(format!("bad closing price for {symbol}"))
                })
        })
        .collect()
}
