//! Paper order ledger.
//!
//! Market orders fill the moment they are placed; there is no matching
//! engine behind this, the fill is the simulation. Limit orders rest open
//! and a per-order timer cancels them if nothing touches them in time.
//! Every status transition happens under the ledger lock, so the timer
//! and an explicit cancel can never both claim the same order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::domain::{OrderKind, OrderSide, OrderStatus};
use crate::error::CoreError;
use crate::utils::now_ms;

#[derive(Debug, Clone, Serialize)]
pub struct PaperOrder {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: OrderKind,
    pub symbol: String,
    pub side: OrderSide,
    pub qty: f64,
    /// Limit price; market orders carry none.
    pub price: Option<f64>,
    pub status: OrderStatus,
    pub created_at: i64,
    pub updated_at: i64,
    /// Seconds a resting limit order lives before the timer cancels it.
    pub cancel_after: Option<u64>,
}

struct OrderSlot {
    order: PaperOrder,
    /// Handle for the pending auto-cancel timer, if one is still armed.
    cancel_task: Option<AbortHandle>,
}

/// Cheap to clone; all clones share the same book.
#[derive(Clone, Default)]
pub struct OrderLedger {
    inner: Arc<Mutex<HashMap<String, OrderSlot>>>,
}

impl OrderLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Market orders fill synchronously at "the market"; no price is
    /// recorded because none is simulated.
    pub fn place_market(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: f64,
    ) -> Result<PaperOrder, CoreError> {
        validate_qty(qty)?;
        let now = now_ms();
        let order = PaperOrder {
            id: order_id(OrderKind::Market),
            kind: OrderKind::Market,
            symbol: symbol.to_string(),
            side,
            qty,
            price: None,
            status: OrderStatus::Filled,
            created_at: now,
            updated_at: now,
            cancel_after: None,
        };
        let mut book = self.inner.lock().unwrap();
        book.insert(
            order.id.clone(),
            OrderSlot {
                order: order.clone(),
                cancel_task: None,
            },
        );
        log::info!("[orders] filled market {} {} x{qty} {symbol}", order.id, side);
        Ok(order)
    }

    /// Limit orders rest open and arm a cancel timer. The timer fires
    /// after `cancel_after` seconds (floored to 1) and cancels the order
    /// only if it is still open by then.
    pub fn place_limit(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: f64,
        price: f64,
        cancel_after: u64,
    ) -> Result<PaperOrder, CoreError> {
        validate_qty(qty)?;
        if !(price > 0.0) {
            return Err(CoreError::validation("limit orders require a price > 0"));
        }
        let now = now_ms();
        let order = PaperOrder {
            id: order_id(OrderKind::Limit),
            kind: OrderKind::Limit,
            symbol: symbol.to_string(),
            side,
            qty,
            price: Some(price),
            status: OrderStatus::Open,
            created_at: now,
            updated_at: now,
            cancel_after: Some(cancel_after),
        };

        let mut book = self.inner.lock().unwrap();
        book.insert(
            order.id.clone(),
            OrderSlot {
                order: order.clone(),
                cancel_task: None,
            },
        );

        let id = order.id.clone();
        let inner = Arc::clone(&self.inner);
        let delay = Duration::from_secs(cancel_after.max(1));
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut book = inner.lock().unwrap();
            if let Some(slot) = book.get_mut(&id) {
                if slot.order.status == OrderStatus::Open {
                    slot.order.status = OrderStatus::Canceled;
                    slot.order.updated_at = now_ms();
                    log::info!("[orders] auto-canceled {id} after {}s", delay.as_secs());
                }
                slot.cancel_task = None;
            }
        });
        // Slot is still locked, so the timer cannot have looked yet.
        if let Some(slot) = book.get_mut(&order.id) {
            slot.cancel_task = Some(handle.abort_handle());
        }

        log::info!(
            "[orders] resting limit {} {} x{qty} {symbol} @ {price}, cancel after {cancel_after}s",
            order.id,
            side
        );
        Ok(order)
    }

    /// Explicit cancel. Only open orders can transition; anything else is
    /// a state conflict naming the current status.
    pub fn cancel(&self, id: &str) -> Result<PaperOrder, CoreError> {
        let mut book = self.inner.lock().unwrap();
        let slot = book.get_mut(id).ok_or_else(|| CoreError::NotFound {
            kind: "order",
            id: id.to_string(),
        })?;
        if slot.order.status != OrderStatus::Open {
            return Err(CoreError::conflict(format!(
                "order status is {} (not open)",
                slot.order.status
            )));
        }
        slot.order.status = OrderStatus::Canceled;
        slot.order.updated_at = now_ms();
        if let Some(handle) = slot.cancel_task.take() {
            handle.abort();
        }
        Ok(slot.order.clone())
    }

    /// All orders, oldest first.
    pub fn list(&self) -> Vec<PaperOrder> {
        let book = self.inner.lock().unwrap();
        let mut orders: Vec<PaperOrder> = book.values().map(|slot| slot.order.clone()).collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        orders
    }

    /// Drop everything, disarming pending timers. Returns how many
    /// orders were removed.
    pub fn reset(&self) -> usize {
        let mut book = self.inner.lock().unwrap();
        for slot in book.values_mut() {
            if let Some(handle) = slot.cancel_task.take() {
                handle.abort();
            }
        }
        let removed = book.len();
        book.clear();
        removed
    }
}

// ─── Helper Functions ──────────────────────────────────────────────────────

fn order_id(kind: OrderKind) -> String {
    let prefix = match kind {
        OrderKind::Market => "SIM-MKT",
        OrderKind::Limit => "SIM-LMT",
    };
    format!("{prefix}-{}", Uuid::new_v4())
}

fn validate_qty(qty: f64) -> Result<(), CoreError> {
    if !(qty > 0.0) {
        return Err(CoreError::validation("qty must be > 0"));
    }
    Ok(())
}
