use super::orders::OrderLedger;
use super::payouts::{PayoutLedger, PayoutSummary};
use crate::domain::ids::PayoutId;
use crate::domain::payout::{Payout, PayoutStatus, SettlementOutcome};
use crate::domain::ports::{ClockRef, DisbursementStatus, PaymentGatewayRef};
use crate::error::Result;
use futures_util::future::join_all;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Aggregate counts of one settlement run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub selected: usize,
    /// Cancelled because their order was refunded.
    pub cancelled: usize,
    pub completed: usize,
    pub failed: usize,
    /// Still PROCESSING; the gateway could not say what happened.
    pub unresolved: usize,
    /// Could not be processed, e.g. another actor changed them mid-run.
    pub skipped: usize,
    /// Stuck PROCESSING payouts finalized before the batch.
    pub reconciled: usize,
    /// Seller payouts recreated for completed orders that had none.
    pub recovered: usize,
}

enum ItemResult {
    Cancelled,
    Settled(PayoutStatus),
    Skipped,
}

impl BatchReport {
    fn record(&mut self, result: ItemResult) {
        match result {
            ItemResult::Cancelled => self.cancelled += 1,
            ItemResult::Settled(PayoutStatus::Completed) => self.completed += 1,
            ItemResult::Settled(PayoutStatus::Failed) => self.failed += 1,
            ItemResult::Settled(PayoutStatus::Processing) => self.unresolved += 1,
            ItemResult::Settled(_) | ItemResult::Skipped => self.skipped += 1,
        }
    }
}

/// Periodic and on-demand settlement of payouts.
///
/// Every payout is its own unit of work. Nothing is locked across a run, and
/// a failure on one payout is recorded on that payout only.
#[derive(Clone)]
pub struct SettlementScheduler {
    orders: OrderLedger,
    payouts: PayoutLedger,
    gateway: PaymentGatewayRef,
    clock: ClockRef,
    maturation: chrono::Duration,
    stuck_after: chrono::Duration,
    gateway_timeout: Duration,
    batch_size: usize,
}

impl SettlementScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orders: OrderLedger,
        payouts: PayoutLedger,
        gateway: PaymentGatewayRef,
        clock: ClockRef,
        maturation: chrono::Duration,
        stuck_after: chrono::Duration,
        gateway_timeout: Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            orders,
            payouts,
            gateway,
            clock,
            maturation,
            stuck_after,
            gateway_timeout,
            batch_size: batch_size.max(1),
        }
    }

    /// The calendar batch: matured PAYABLE payouts, oldest first.
    pub async fn run_settlement(&self) -> Result<BatchReport> {
        let now = self.clock.now();
        let mut report = BatchReport {
            recovered: self.orders.recover_seller_payouts().await?,
            reconciled: self.reconcile_stuck().await?,
            ..BatchReport::default()
        };

        let cutoff = now - self.maturation;
        let matured: Vec<Payout> = self
            .payouts
            .store()
            .with_status(PayoutStatus::Payable)
            .await?
            .into_iter()
            .filter(|p| p.created_at <= cutoff)
            .collect();
        report.selected = matured.len();

        if matured.is_empty() {
            info!(reconciled = report.reconciled, "No matured payouts to settle");
        }
        for payout in &matured {
            let result = self.process_one(payout.id).await;
            report.record(result);
        }

        self.payouts.prune_locks();
        self.orders.prune_locks();
        info!(
            selected = report.selected,
            completed = report.completed,
            failed = report.failed,
            cancelled = report.cancelled,
            unresolved = report.unresolved,
            skipped = report.skipped,
            reconciled = report.reconciled,
            recovered = report.recovered,
            "Settlement run finished"
        );
        Ok(report)
    }

    /// Explicitly requested or retried payouts, settled outside the calendar
    /// in chunks of `batch_size` concurrent gateway calls.
    pub async fn process_pending(&self) -> Result<BatchReport> {
        let pending = self
            .payouts
            .store()
            .with_status(PayoutStatus::Pending)
            .await?;
        let mut report = BatchReport {
            selected: pending.len(),
            ..BatchReport::default()
        };

        for chunk in pending.chunks(self.batch_size) {
            let results = join_all(chunk.iter().map(|p| self.process_one(p.id))).await;
            for result in results {
                report.record(result);
            }
        }

        self.payouts.prune_locks();
        info!(
            selected = report.selected,
            completed = report.completed,
            failed = report.failed,
            cancelled = report.cancelled,
            unresolved = report.unresolved,
            skipped = report.skipped,
            "Pending payouts processed"
        );
        Ok(report)
    }

    /// Admin path: settles one PAYABLE or PENDING payout right away.
    pub async fn process_payout(&self, id: PayoutId) -> Result<PayoutSummary> {
        self.payouts
            .admin_process_payout(id, |payout| self.attempt(payout))
            .await
    }

    async fn process_one(&self, id: PayoutId) -> ItemResult {
        match self.payouts.cancel_if_refunded(id).await {
            Ok(true) => return ItemResult::Cancelled,
            Ok(false) => {}
            Err(e) => {
                warn!(payout_id = %id, error = %e, "Refund check failed; payout skipped");
                return ItemResult::Skipped;
            }
        }
        match self.payouts.settle_with(id, |payout| self.attempt(payout)).await {
            Ok(payout) => ItemResult::Settled(payout.status),
            Err(e) => {
                warn!(payout_id = %id, error = %e, "Payout skipped");
                ItemResult::Skipped
            }
        }
    }

    /// One bounded gateway call. `None` means the outcome is genuinely unknown.
    async fn attempt(&self, payout: Payout) -> Option<SettlementOutcome> {
        match tokio::time::timeout(self.gateway_timeout, self.gateway.disburse(&payout)).await {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(e)) => Some(SettlementOutcome::Failed {
                reason: e.to_string(),
            }),
            Err(_) => {
                warn!(payout_id = %payout.id, "Disbursement timed out; querying status");
                self.query(payout.id).await
            }
        }
    }

    async fn query(&self, id: PayoutId) -> Option<SettlementOutcome> {
        match tokio::time::timeout(self.gateway_timeout, self.gateway.disbursement_status(id)).await
        {
            Ok(Ok(DisbursementStatus::Resolved(outcome))) => Some(outcome),
            Ok(Ok(DisbursementStatus::Unknown)) => {
                warn!(payout_id = %id, "Disbursement outcome unknown; left processing");
                None
            }
            Ok(Err(e)) => {
                warn!(payout_id = %id, error = %e, "Status query failed; left processing");
                None
            }
            Err(_) => {
                warn!(payout_id = %id, "Status query timed out; left processing");
                None
            }
        }
    }

    /// Finalizes PROCESSING payouts older than `stuck_after` whose outcome
    /// the gateway can now report.
    pub async fn reconcile_stuck(&self) -> Result<usize> {
        let cutoff = self.clock.now() - self.stuck_after;
        let stuck: Vec<Payout> = self
            .payouts
            .store()
            .with_status(PayoutStatus::Processing)
            .await?
            .into_iter()
            .filter(|p| p.processed_at.is_none_or(|at| at <= cutoff))
            .collect();

        let mut reconciled = 0;
        for payout in stuck {
            let Some(outcome) = self.query(payout.id).await else {
                continue;
            };
            match self.payouts.resolve_processing(payout.id, outcome).await {
                Ok(Some(resolved)) => {
                    debug!(payout_id = %payout.id, status = %resolved.status, "Stuck payout reconciled");
                    reconciled += 1;
                }
                Ok(None) => {}
                Err(e) => warn!(payout_id = %payout.id, error = %e, "Reconciliation failed"),
            }
        }
        Ok(reconciled)
    }
}
