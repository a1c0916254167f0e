//! Position-aware decision state machine.
//!
//! The state (flat/long/short) is read off the position sign; nothing is
//! stored between calls, so identical inputs always produce the same
//! [`Decision`].

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::str::FromStr;

use crate::config::{DecisionConfig, SizingPolicy};
use crate::signals::SignalOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    OpenLong,
    OpenShort,
    Close,
    Hold,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::OpenLong => "open_long",
            Action::OpenShort => "open_short",
            Action::Close => "close",
            Action::Hold => "hold",
        }
    }
}

/// Unrecognized action names parse to `Hold`.
impl FromStr for Action {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "open_long" | "buy" => Action::OpenLong,
            "open_short" | "sell" => Action::OpenShort,
            "close" => Action::Close,
            _ => Action::Hold,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    pub size: f64,
    pub order_type: OrderType,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

impl Decision {
    pub fn hold() -> Self {
        Self::market(Action::Hold, 0.0)
    }

    pub fn market(action: Action, size: f64) -> Self {
        Self { action, size, order_type: OrderType::Market, stop_loss: None, take_profit: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionState {
    Flat,
    Long,
    Short,
}

impl PositionState {
    pub fn of(position: f64) -> Self {
        if position > 0.0 {
            PositionState::Long
        } else if position < 0.0 {
            PositionState::Short
        } else {
            PositionState::Flat
        }
    }
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

#[derive(Debug, Clone)]
pub struct DecisionEngine {
    cfg: DecisionConfig,
}

impl DecisionEngine {
    pub fn new(cfg: DecisionConfig) -> Self {
        Self { cfg }
    }

    pub fn decide(&self, signal: &SignalOutput, position: f64, approved: bool, price: f64) -> Decision {
        if !approved || !signal.edge.is_finite() || signal.edge.abs() < self.cfg.edge_min {
            return Decision::hold();
        }

        match (PositionState::of(position), self.cfg.policy) {
            (PositionState::Flat, SizingPolicy::RiskBudget) => self.open_with_stops(signal, price),
            (PositionState::Flat, SizingPolicy::ConfidenceThreshold) => self.open_on_confidence(signal),
            (PositionState::Long, policy) => {
                let exit = match policy {
                    SizingPolicy::RiskBudget => signal.direction < 0,
                    SizingPolicy::ConfidenceThreshold => signal.p_down >= self.cfg.min_confidence,
                };
                self.close_if(exit, position)
            }
            (PositionState::Short, policy) => {
                let exit = match policy {
                    SizingPolicy::RiskBudget => signal.direction > 0,
                    SizingPolicy::ConfidenceThreshold => signal.p_up >= self.cfg.min_confidence,
                };
                self.close_if(exit, position)
            }
        }
    }

    fn close_if(&self, exit: bool, position: f64) -> Decision {
        if exit {
            Decision::market(Action::Close, position.abs())
        } else {
            Decision::hold()
        }
    }

    /// Size so that a stop at `fixed_stop_fraction` risks `risk_fraction`
    /// of the (levered) balance.
    fn open_with_stops(&self, signal: &SignalOutput, price: f64) -> Decision {
        let action = match signal.direction {
            d if d > 0 => Action::OpenLong,
            d if d < 0 => Action::OpenShort,
            _ => return Decision::hold(),
        };
        let stop_distance = price * self.cfg.fixed_stop_fraction;
        if !stop_distance.is_finite() || stop_distance <= 0.0 {
            return Decision::hold();
        }
        let size = round3(self.cfg.balance * self.cfg.risk_fraction * self.cfg.leverage / stop_distance);
        if !size.is_finite() || size <= 0.0 {
            return Decision::hold();
        }
        let target = stop_distance * self.cfg.reward_multiple;
        let (stop_loss, take_profit) = match action {
            Action::OpenLong => (price - stop_distance, price + target),
            _ => (price + stop_distance, price - target),
        };
        Decision {
            stop_loss: Some(stop_loss),
            take_profit: Some(take_profit),
            ..Decision::market(action, size)
        }
    }

    fn open_on_confidence(&self, signal: &SignalOutput) -> Decision {
        let size = self.cfg.risk_fraction * self.cfg.leverage;
        if signal.p_up >= self.cfg.min_confidence {
            Decision::market(Action::OpenLong, size)
        } else if signal.p_down >= self.cfg.min_confidence {
            Decision::market(Action::OpenShort, size)
        } else {
            Decision::hold()
        }
    }
}
