//! Telegram bot notifications
//!
//! Trade events (buys, sells, forced liquidations) are pushed to a chat so
//! failures are visible without watching the logs. Sending is best-effort;
//! a failed notification never fails the trade step that produced it.

use reqwest::Client;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::TelegramConfig;

#[derive(Clone)]
pub struct TelegramNotifier {
    client: Client,
    api_url: String,
    chat_id: String,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

impl TelegramNotifier {
    /// Build from config; `None` when bot token or chat id is missing.
    pub fn from_config(cfg: &TelegramConfig) -> Option<Arc<Self>> {
        if !cfg.enabled() {
            info!("Telegram notifications disabled (missing bot_token or chat_id)");
            return None;
        }
        info!("Telegram notifications enabled");
        Some(Arc::new(Self {
            client: Client::new(),
            api_url: format!("https://api.telegram.org/bot{}/sendMessage", cfg.bot_token),
            chat_id: cfg.chat_id.clone(),
        }))
    }

    pub async fn send(&self, text: &str) {
        let message = SendMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode: "Markdown",
        };

        match self.client.post(&self.api_url).json(&message).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!("Telegram notification sent");
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                error!("Telegram notification failed: {} - {}", status, body);
            }
            Err(e) => error!("Telegram request failed: {}", e),
        }
    }

    pub async fn notify_startup(&self) {
        self.send("🚀 *scoop* trade executor started").await;
    }

    pub async fn notify_buy(&self, symbol: &str, name: &str, quantity: i64, price: i64) {
        let total = quantity * price;
        self.send(&format!(
            "💰 *Buy* {name}({symbol})\n{quantity} shares @ {price}원 (total {total}원)"
        ))
        .await;
    }

    pub async fn notify_sell(
        &self,
        symbol: &str,
        name: &str,
        quantity: i64,
        average_price: i64,
        exit_price: i64,
        profit_rate: Decimal,
        reason: &str,
    ) {
        let profit = (exit_price - average_price) * quantity;
        let sign = if profit_rate.is_sign_positive() { "+" } else { "" };
        self.send(&format!(
            "💸 *Sell* {name}({symbol}) — {reason}\n\
             {quantity} shares: {average_price}원 → {exit_price}원\n\
             P/L {profit:+}원 ({sign}{profit_rate:.2}%)"
        ))
        .await;
    }

    pub async fn notify_position_created(&self, symbol: &str, name: &str, probability: u8) {
        self.send(&format!(
            "📈 *Tracking* {name}({symbol}) — probability {probability}%"
        ))
        .await;
    }
}
