//! Position lifecycle types
//!
//! A position moves along a strict path:
//! Pending -> Buying -> Open -> Selling -> Liquidated,
//! with two rollback edges (Buying -> Pending, Selling -> Open) for failed
//! order attempts. Liquidated is terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScoopError};

/// Lifecycle status of a tracked position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    /// Created by the decision pipeline, waiting for a buy attempt
    Pending,
    /// Buy order in flight
    Buying,
    /// Shares held, monitored against target/stop thresholds
    Open,
    /// Sell order in flight
    Selling,
    /// Sold (or force-sold); terminal
    Liquidated,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Pending => "pending",
            PositionStatus::Buying => "buying",
            PositionStatus::Open => "open",
            PositionStatus::Selling => "selling",
            PositionStatus::Liquidated => "liquidated",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "pending" => Ok(PositionStatus::Pending),
            "buying" => Ok(PositionStatus::Buying),
            "open" => Ok(PositionStatus::Open),
            "selling" => Ok(PositionStatus::Selling),
            "liquidated" => Ok(PositionStatus::Liquidated),
            other => Err(ScoopError::Internal(format!(
                "unknown position status: {other}"
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PositionStatus::Liquidated)
    }

    /// Whether `self -> next` is a legal edge of the lifecycle graph.
    pub fn can_transition_to(&self, next: PositionStatus) -> bool {
        use PositionStatus::*;
        matches!(
            (*self, next),
            (Pending, Buying)
                | (Buying, Open)
                | (Buying, Pending) // buy attempt failed
                | (Open, Selling)
                | (Selling, Liquidated)
                | (Selling, Open) // sell attempt failed
        )
    }
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked stock holding (intent or actual ownership)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: i64,
    /// 6-digit listing code, e.g. "005930"
    pub symbol: String,
    /// Display name, e.g. "삼성전자"
    pub name: String,
    /// Shares held; 0 until the buy order fills
    pub quantity: i64,
    /// Average acquisition price in won; 0 until the buy order fills
    pub average_price: i64,
    pub target_price: Option<i64>,
    pub stop_price: Option<i64>,
    pub status: PositionStatus,
    /// Price at liquidation, once terminal
    pub exit_price: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub opened_at: Option<DateTime<Utc>>,
    pub liquidated_at: Option<DateTime<Utc>>,
}

/// Fields needed to create a new pending position
#[derive(Debug, Clone)]
pub struct NewPosition {
    pub symbol: String,
    pub name: String,
    pub target_price: Option<i64>,
    pub stop_price: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::PositionStatus::*;

    #[test]
    fn forward_path_is_legal() {
        assert!(Pending.can_transition_to(Buying));
        assert!(Buying.can_transition_to(Open));
        assert!(Open.can_transition_to(Selling));
        assert!(Selling.can_transition_to(Liquidated));
    }

    #[test]
    fn rollback_edges_are_legal() {
        assert!(Buying.can_transition_to(Pending));
        assert!(Selling.can_transition_to(Open));
    }

    #[test]
    fn shortcuts_are_rejected() {
        // No position may skip stages or leave the terminal state.
        assert!(!Pending.can_transition_to(Open));
        assert!(!Pending.can_transition_to(Liquidated));
        assert!(!Buying.can_transition_to(Liquidated));
        assert!(!Buying.can_transition_to(Selling));
        assert!(!Open.can_transition_to(Liquidated));
        assert!(!Open.can_transition_to(Pending));
        assert!(!Selling.can_transition_to(Pending));
        assert!(!Liquidated.can_transition_to(Pending));
        assert!(!Liquidated.can_transition_to(Open));
    }

    #[test]
    fn status_round_trips_through_db_text() {
        for status in [Pending, Buying, Open, Selling, Liquidated] {
            assert_eq!(super::PositionStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(super::PositionStatus::parse("bought").is_err());
    }

    #[test]
    fn only_liquidated_is_terminal() {
        assert!(Liquidated.is_terminal());
        for status in [Pending, Buying, Open, Selling] {
            assert!(!status.is_terminal());
        }
    }
}
