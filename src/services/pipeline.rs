//! Decision pipeline boundary
//!
//! Upstream analyzers score how likely a stock is to rise on a news or
//! disclosure event. A score clearing the threshold becomes a pending
//! position; the lifecycle executor takes it from there. This is the only
//! place positions are created.

use std::sync::Arc;
use tracing::info;

use crate::adapters::TelegramNotifier;
use crate::domain::NewPosition;
use crate::error::Result;
use crate::services::traits::PositionStore;

/// Validated output of an upstream analysis
#[derive(Debug, Clone)]
pub struct AnalysisVerdict {
    pub symbol: String,
    pub name: String,
    /// Probability (0-100) that the stock rises on this event
    pub probability: u8,
    pub target_price: Option<i64>,
    pub stop_price: Option<i64>,
}

pub struct DecisionPipeline {
    store: Arc<dyn PositionStore>,
    notifier: Option<Arc<TelegramNotifier>>,
    min_probability: u8,
}

impl DecisionPipeline {
    pub fn new(
        store: Arc<dyn PositionStore>,
        notifier: Option<Arc<TelegramNotifier>>,
        min_probability: u8,
    ) -> Self {
        Self {
            store,
            notifier,
            min_probability,
        }
    }

    /// Create a pending position if the verdict clears the threshold.
    /// Returns the new position id, or `None` for a below-threshold score.
    pub async fn submit_verdict(&self, verdict: &AnalysisVerdict) -> Result<Option<i64>> {
        if verdict.probability < self.min_probability {
            info!(
                symbol = %verdict.symbol,
                probability = verdict.probability,
                threshold = self.min_probability,
                "below threshold, not tracking"
            );
            return Ok(None);
        }

        let id = self
            .store
            .create_position(&NewPosition {
                symbol: verdict.symbol.clone(),
                name: verdict.name.clone(),
                target_price: verdict.target_price,
                stop_price: verdict.stop_price,
            })
            .await?;

        info!(
            %id,
            symbol = %verdict.symbol,
            probability = verdict.probability,
            "tracking new position"
        );
        if let Some(notifier) = &self.notifier {
            notifier
                .notify_position_created(&verdict.symbol, &verdict.name, verdict.probability)
                .await;
        }
        Ok(Some(id))
    }
}
