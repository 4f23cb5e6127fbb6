//! Paper position ledger and risk-based sizing.
//!
//! Positions are the other half of the paper book: opened at an explicit
//! entry with stop and target attached, closed at an explicit price or at
//! the latest streamed close. PnL is linear in qty with no funding or
//! margin simulation; leverage is carried for display only.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use uuid::Uuid;

use crate::domain::{PositionStatus, TradeDirection};
use crate::engine::REWARD_RISK;
use crate::error::CoreError;
use crate::utils::{now_ms, round_to};

#[derive(Debug, Clone, Serialize)]
pub struct PaperPosition {
    pub id: String,
    pub symbol: String,
    pub side: TradeDirection,
    pub entry: f64,
    pub qty: f64,
    pub sl: f64,
    pub tp: f64,
    pub leverage: f64,
    pub status: PositionStatus,
    pub created_at: i64,
    pub updated_at: i64,
    pub exit: Option<f64>,
    pub closed_at: Option<i64>,
    pub realized_pnl: f64,
}

/// A position plus live mark context for list responses.
#[derive(Debug, Clone, Serialize)]
pub struct PositionView {
    #[serde(flatten)]
    pub position: PaperPosition,
    /// Only open positions with a usable mark price carry this.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unrealized_pnl: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mark: Option<f64>,
}

#[derive(Clone, Default)]
pub struct PositionLedger {
    inner: Arc<Mutex<HashMap<String, PaperPosition>>>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(
        &self,
        symbol: &str,
        side: TradeDirection,
        entry: f64,
        qty: f64,
        sl: f64,
        tp: f64,
        leverage: f64,
    ) -> Result<PaperPosition, CoreError> {
        if symbol.trim().is_empty() || !(entry > 0.0 && qty > 0.0 && sl > 0.0 && tp > 0.0) {
            return Err(CoreError::validation(
                "symbol, entry, qty, sl, tp required and > 0",
            ));
        }
        let now = now_ms();
        let position = PaperPosition {
            id: position_id(),
            symbol: symbol.trim().to_string(),
            side,
            entry,
            qty,
            sl,
            tp,
            leverage: if leverage > 0.0 { leverage } else { 1.0 },
            status: PositionStatus::Open,
            created_at: now,
            updated_at: now,
            exit: None,
            closed_at: None,
            realized_pnl: 0.0,
        };
        let mut book = self.inner.lock().unwrap();
        book.insert(position.id.clone(), position.clone());
        log::info!(
            "[positions] opened {} {} {} x{qty} @ {entry} (sl {sl}, tp {tp})",
            position.id,
            side,
            position.symbol
        );
        Ok(position)
    }

    pub fn get(&self, id: &str) -> Result<PaperPosition, CoreError> {
        let book = self.inner.lock().unwrap();
        book.get(id).cloned().ok_or_else(|| CoreError::NotFound {
            kind: "position",
            id: id.to_string(),
        })
    }

    /// Close at `price`. The caller resolves the price (explicit beats
    /// mark); a missing or non-positive one is rejected here.
    pub fn close(&self, id: &str, price: Option<f64>) -> Result<PaperPosition, CoreError> {
        let mut book = self.inner.lock().unwrap();
        let position = book.get_mut(id).ok_or_else(|| CoreError::NotFound {
            kind: "position",
            id: id.to_string(),
        })?;
        if position.status != PositionStatus::Open {
            return Err(CoreError::conflict(format!(
                "position is {}",
                position.status
            )));
        }
        let Some(price) = price.filter(|p| *p > 0.0) else {
            return Err(CoreError::validation("no price available to close"));
        };

        let pnl = match position.side {
            TradeDirection::Long => (price - position.entry) * position.qty,
            TradeDirection::Short => (position.entry - price) * position.qty,
        };
        let now = now_ms();
        position.status = PositionStatus::Closed;
        position.exit = Some(price);
        position.closed_at = Some(now);
        position.updated_at = now;
        position.realized_pnl = round_to(pnl, 8);
        log::info!(
            "[positions] closed {id} @ {price}, pnl {}",
            position.realized_pnl
        );
        Ok(position.clone())
    }

    /// List positions, oldest first, optionally filtered. `mark` supplies
    /// the latest close per symbol (0.0 when nothing is buffered); open
    /// positions report it, plus unrealized PnL when it is usable.
    pub fn list(
        &self,
        status: Option<PositionStatus>,
        symbol: Option<&str>,
        mark: impl Fn(&str) -> f64,
    ) -> Vec<PositionView> {
        let book = self.inner.lock().unwrap();
        let mut positions: Vec<PaperPosition> = book
            .values()
            .filter(|p| status.is_none_or(|s| p.status == s))
            .filter(|p| symbol.is_none_or(|s| p.symbol == s))
            .cloned()
            .collect();
        positions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        positions
            .into_iter()
            .map(|position| {
                if position.status != PositionStatus::Open {
                    return PositionView {
                        position,
                        unrealized_pnl: None,
                        mark: None,
                    };
                }
                let last = mark(&position.symbol);
                let unrealized_pnl = (last > 0.0).then(|| {
                    let pnl = match position.side {
                        TradeDirection::Long => (last - position.entry) * position.qty,
                        TradeDirection::Short => (position.entry - last) * position.qty,
                    };
                    round_to(pnl, 8)
                });
                PositionView {
                    position,
                    unrealized_pnl,
                    mark: Some(last),
                }
            })
            .collect()
    }

    /// Every closed position, for the portfolio report.
    pub fn closed(&self) -> Vec<PaperPosition> {
        let book = self.inner.lock().unwrap();
        book.values()
            .filter(|p| p.status == PositionStatus::Closed)
            .cloned()
            .collect()
    }

    pub fn reset(&self) -> usize {
        let mut book = self.inner.lock().unwrap();
        let removed = book.len();
        book.clear();
        removed
    }
}

// ─── Sizing ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PositionSizing {
    pub qty: f64,
    pub notional: f64,
    pub tp: f64,
    pub risk_amount: f64,
    pub per_unit_risk: f64,
    pub leverage: f64,
}

/// Fixed-fractional sizing: risk `risk_pct` of `balance` between entry
/// and stop, then project the target at the standard reward multiple.
/// The stop side implies the direction: a stop below entry is a long.
pub fn size_by_risk(
    entry: f64,
    sl: f64,
    balance: f64,
    risk_pct: f64,
    leverage: f64,
) -> Result<PositionSizing, CoreError> {
    if !(entry > 0.0 && sl > 0.0 && balance > 0.0 && risk_pct > 0.0) {
        return Err(CoreError::validation(
            "entry, sl, balance, risk_pct required and > 0",
        ));
    }
    let per_unit_risk = (entry - sl).abs();
    if per_unit_risk == 0.0 {
        return Err(CoreError::validation("entry and sl cannot be equal"));
    }
    let risk_amount = balance * risk_pct;
    let qty = risk_amount / per_unit_risk;
    let tp = if entry > sl {
        entry + REWARD_RISK * per_unit_risk
    } else {
        entry - REWARD_RISK * per_unit_risk
    };
    Ok(PositionSizing {
        qty: round_to(qty, 8),
        notional: round_to(qty * entry, 8),
        tp: round_to(tp, 8),
        risk_amount: round_to(risk_amount, 8),
        per_unit_risk: round_to(per_unit_risk, 8),
        leverage: if leverage > 0.0 { leverage } else { 1.0 },
    })
}

// ─── Helper Functions ──────────────────────────────────────────────────────

fn position_id() -> String {
    format!("POS-{}", Uuid::new_v4())
}
