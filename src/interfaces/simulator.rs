use super::csv::action_reader::{ActionType, MarketAction};
use crate::application::engine::EscrowEngine;
use crate::application::settlement::BatchReport;
use crate::domain::ids::{ListingId, OrderId, ScoutId, UserId};
use crate::domain::ports::{OrderStore, OrderStoreRef};
use crate::error::{EscrowError, Result};
use crate::infrastructure::gateway::SimulatedGateway;
use crate::infrastructure::in_memory::ManualClock;
use chrono::Duration;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

fn required<T>(value: Option<T>, field: &str, action: ActionType) -> Result<T> {
    value.ok_or_else(|| EscrowError::InvalidOperation(format!("{action:?} needs `{field}`")))
}

/// Replays marketplace actions against an engine running on a manual clock
/// and the simulated gateway.
pub struct Simulator {
    engine: EscrowEngine,
    gateway: SimulatedGateway,
    clock: Arc<ManualClock>,
    /// The refund process lives outside the engine and writes orders directly.
    orders: OrderStoreRef,
    labels: HashMap<String, OrderId>,
    scouts: HashMap<UserId, ScoutId>,
    next_txn: u64,
    reports: Vec<BatchReport>,
}

impl Simulator {
    pub fn new(
        engine: EscrowEngine,
        gateway: SimulatedGateway,
        clock: Arc<ManualClock>,
        orders: OrderStoreRef,
    ) -> Self {
        Self {
            engine,
            gateway,
            clock,
            orders,
            labels: HashMap::new(),
            scouts: HashMap::new(),
            next_txn: 1,
            reports: Vec::new(),
        }
    }

    pub fn engine(&self) -> &EscrowEngine {
        &self.engine
    }

    /// Reports of every `settle` and `process_pending` step, in order.
    pub fn reports(&self) -> &[BatchReport] {
        &self.reports
    }

    fn order(&self, action: &MarketAction) -> Result<OrderId> {
        let label = required(action.target.as_deref(), "target", action.r#type)?;
        self.labels
            .get(label)
            .copied()
            .ok_or_else(|| EscrowError::not_found("order label", label))
    }

    async fn callback(&mut self, order_id: OrderId, success: bool) -> Result<()> {
        let txn = format!("TXN-{:04}", self.next_txn);
        self.next_txn += 1;
        let notification = self.gateway.signed_callback(order_id, &txn, success)?;
        let applied = self.engine.orders.apply_payment_result(&notification).await?;
        debug!(order_id = %order_id, result = ?applied, "Payment callback applied");
        Ok(())
    }

    pub async fn apply(&mut self, action: &MarketAction) -> Result<()> {
        let kind = action.r#type;
        match kind {
            ActionType::Purchase => {
                let buyer = UserId(required(action.user, "user", kind)?);
                let listing = ListingId::new(required(action.target.clone(), "target", kind)?);
                let receipt = self
                    .engine
                    .orders
                    .create_order(&listing, buyer, "Campus gate")
                    .await?;
                self.engine.orders.initiate_payment(receipt.order_id).await?;
                let label = action.label.clone().unwrap_or_else(|| listing.to_string());
                self.labels.insert(label, receipt.order_id);
            }
            ActionType::Pay => {
                let order_id = self.order(action)?;
                self.callback(order_id, true).await?;
            }
            ActionType::Decline => {
                let order_id = self.order(action)?;
                self.callback(order_id, false).await?;
            }
            ActionType::Complete => {
                let order_id = self.order(action)?;
                let buyer = UserId(required(action.user, "user", kind)?);
                self.engine
                    .orders
                    .complete_order(order_id, buyer, None)
                    .await?;
            }
            ActionType::Refund => {
                let order_id = self.order(action)?;
                let mut order = self
                    .orders
                    .get(order_id)
                    .await?
                    .ok_or_else(|| EscrowError::not_found("order", order_id))?;
                order.refund()?;
                self.orders.store(order).await?;
                info!(order_id = %order_id, "Order refunded");
            }
            ActionType::RegisterScout => {
                let user = UserId(required(action.user, "user", kind)?);
                let scout_id = self.engine.scouts.register_scout(user).await?;
                self.scouts.insert(user, scout_id);
            }
            ActionType::RequestPayout => {
                let user = UserId(required(action.user, "user", kind)?);
                let amount = required(action.amount, "amount", kind)?;
                let scout_id = *self
                    .scouts
                    .get(&user)
                    .ok_or_else(|| EscrowError::not_found("scout for user", user))?;
                self.engine
                    .payouts
                    .request_payout(user, scout_id, amount)
                    .await?;
            }
            ActionType::Advance => {
                let days = required(action.amount, "amount", kind)?;
                self.clock.advance(Duration::days(days));
            }
            ActionType::Settle => {
                let report = self.engine.settlement.run_settlement().await?;
                self.reports.push(report);
            }
            ActionType::ProcessPending => {
                let report = self.engine.settlement.process_pending().await?;
                self.reports.push(report);
            }
        }
        Ok(())
    }
}
