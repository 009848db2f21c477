use super::locks::KeyedLocks;
use crate::domain::ids::{OrderId, PayoutId, ScoutId, UserId};
use crate::domain::money::{Amount, MoneyView, Paise};
use crate::domain::payout::{Payout, PayoutStatus, PayoutType, SettlementOutcome};
use crate::domain::ports::{ClockRef, OrderStoreRef, PayoutStoreRef, ScoutStoreRef, UserDirectoryRef};
use crate::domain::scout::{EarningsEntry, Scout};
use crate::error::{EscrowError, Result};
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Parameters of a new payout.
#[derive(Debug, Clone)]
pub struct NewPayout {
    pub user_id: UserId,
    /// Signed so that non-positive requests are rejected rather than unrepresentable.
    pub amount: i64,
    pub payout_type: PayoutType,
    pub scout_id: Option<ScoutId>,
    pub order_id: Option<OrderId>,
    /// `true` creates the payout PENDING so it skips the calendar batch.
    pub immediate: bool,
}

/// Caller-facing view of a payout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayoutSummary {
    pub payout_id: PayoutId,
    pub user_id: UserId,
    pub payout_type: PayoutType,
    pub status: PayoutStatus,
    pub amount: MoneyView,
    pub order_id: Option<OrderId>,
    pub scout_id: Option<ScoutId>,
    pub payment_reference: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Payout> for PayoutSummary {
    fn from(p: &Payout) -> Self {
        Self {
            payout_id: p.id,
            user_id: p.user_id,
            payout_type: p.payout_type,
            status: p.status,
            amount: p.amount.into(),
            order_id: p.order_id,
            scout_id: p.scout_id,
            payment_reference: p.payment_reference.clone(),
            failure_reason: p.failure_reason.clone(),
            created_at: p.created_at,
            completed_at: p.completed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserPayouts {
    pub payouts: Vec<PayoutSummary>,
    pub total: usize,
    pub total_paid: MoneyView,
    /// Waiting for the next settlement date.
    pub payable: MoneyView,
    pub pending: MoneyView,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayoutTotals {
    pub payable: MoneyView,
    pub processing: MoneyView,
    pub completed: MoneyView,
    pub failed: MoneyView,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayoutPage {
    pub payouts: Vec<PayoutSummary>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub total_pages: usize,
    /// Only present for unfiltered listings.
    pub summary: Option<PayoutTotals>,
}

fn sum_with_status(payouts: &[Payout], status: PayoutStatus) -> Paise {
    payouts
        .iter()
        .filter(|p| p.status == status)
        .map(|p| p.amount)
        .sum()
}

/// Owns every payout state transition.
///
/// All transitions on one payout run under that payout's row lock, so a
/// settlement attempt racing an admin action observes the other's result.
#[derive(Clone)]
pub struct PayoutLedger {
    payouts: PayoutStoreRef,
    orders: OrderStoreRef,
    scouts: ScoutStoreRef,
    users: UserDirectoryRef,
    clock: ClockRef,
    payout_locks: Arc<KeyedLocks<PayoutId>>,
    scout_locks: Arc<KeyedLocks<ScoutId>>,
}

impl PayoutLedger {
    pub fn new(
        payouts: PayoutStoreRef,
        orders: OrderStoreRef,
        scouts: ScoutStoreRef,
        users: UserDirectoryRef,
        clock: ClockRef,
    ) -> Self {
        Self {
            payouts,
            orders,
            scouts,
            users,
            clock,
            payout_locks: Arc::new(KeyedLocks::new()),
            scout_locks: Arc::new(KeyedLocks::new()),
        }
    }

    pub fn store(&self) -> &PayoutStoreRef {
        &self.payouts
    }

    async fn load(&self, id: PayoutId) -> Result<Payout> {
        self.payouts
            .get(id)
            .await?
            .ok_or_else(|| EscrowError::not_found("payout", id))
    }

    pub async fn get(&self, id: PayoutId) -> Result<Payout> {
        self.load(id).await
    }

    /// Records a payout request after validating every reference it carries.
    pub async fn create_payout_request(&self, request: NewPayout) -> Result<Payout> {
        if self.users.user(request.user_id).await?.is_none() {
            return Err(EscrowError::not_found("user", request.user_id));
        }
        let amount = Amount::new(request.amount)?;

        if let Some(order_id) = request.order_id
            && self.orders.get(order_id).await?.is_none()
        {
            return Err(EscrowError::not_found("order", order_id));
        }

        let Some(scout_id) = request.scout_id else {
            return self.insert(request, amount).await;
        };

        // Balance check and insert must not interleave with another request
        // drawing on the same earnings.
        let _guard = self.scout_locks.lock(scout_id).await;
        let scout = self
            .scouts
            .get(scout_id)
            .await?
            .ok_or_else(|| EscrowError::not_found("scout", scout_id))?;
        if scout.user_id != request.user_id {
            return Err(EscrowError::InvalidOperation(
                "Scout does not belong to user".to_string(),
            ));
        }
        if request.payout_type != PayoutType::ReferralBounty {
            return self.insert(request, amount).await;
        }

        let available = self.available_for(&scout).await?;
        if amount.value() > available {
            return Err(EscrowError::InvalidOperation(format!(
                "Requested {} exceeds available earnings of {}",
                amount.value().display(),
                available.display()
            )));
        }
        self.insert(request, amount).await
    }

    async fn insert(&self, request: NewPayout, amount: Amount) -> Result<Payout> {
        let payout = Payout::new(
            request.user_id,
            amount,
            request.payout_type,
            request.scout_id,
            request.order_id,
            request.immediate,
            self.clock.now(),
        );
        self.payouts.store(payout.clone()).await?;
        info!(
            payout_id = %payout.id,
            user_id = %payout.user_id,
            payout_type = %payout.payout_type,
            status = %payout.status,
            amount = payout.amount.0,
            "Payout requested"
        );
        Ok(payout)
    }

    /// Earnings not yet claimed by a bounty payout that is still in flight.
    pub async fn available_for(&self, scout: &Scout) -> Result<Paise> {
        let owed: Paise = self
            .payouts
            .for_user(scout.user_id)
            .await?
            .iter()
            .filter(|p| p.is_outstanding_bounty_for(scout.id))
            .map(|p| p.amount)
            .sum();
        Ok(scout.earnings.saturating_sub(owed))
    }

    pub async fn transition_to_processing(&self, id: PayoutId) -> Result<Payout> {
        let _guard = self.payout_locks.lock(id).await;
        self.begin_processing_locked(id).await
    }

    async fn begin_processing_locked(&self, id: PayoutId) -> Result<Payout> {
        let mut payout = self.load(id).await?;
        if let Some(order_id) = payout.order_id
            && let Some(order) = self.orders.get(order_id).await?
            && order.is_refunded()
        {
            return Err(EscrowError::InvalidOperation(format!(
                "Cannot process payout {id}: order {order_id} is refunded"
            )));
        }
        payout.begin_processing(self.clock.now())?;
        self.payouts.store(payout.clone()).await?;
        info!(payout_id = %id, "Payout processing");
        Ok(payout)
    }

    pub async fn finalize(&self, id: PayoutId, outcome: SettlementOutcome) -> Result<Payout> {
        let _guard = self.payout_locks.lock(id).await;
        self.finalize_locked(id, outcome).await
    }

    async fn finalize_locked(&self, id: PayoutId, outcome: SettlementOutcome) -> Result<Payout> {
        let mut payout = self.load(id).await?;
        let now = self.clock.now();
        payout.finalize(outcome, now)?;

        // The debit lands before COMPLETED is stored. A payout left
        // PROCESSING by a failed write replays it as a no-op.
        if payout.status == PayoutStatus::Completed
            && payout.payout_type == PayoutType::ReferralBounty
            && let Some(scout_id) = payout.scout_id
        {
            let entry = EarningsEntry::payout_debit(scout_id, id, payout.amount, now);
            if let Err(e) = self.scouts.apply_earnings(entry).await {
                error!(payout_id = %id, scout_id = %scout_id, error = %e, "Failed to debit scout earnings");
                return Err(e);
            }
        }
        self.payouts.store(payout.clone()).await?;

        match payout.status {
            PayoutStatus::Completed => {
                info!(payout_id = %id, user_id = %payout.user_id, amount = payout.amount.0, "Payout completed");
            }
            _ => warn!(
                payout_id = %id,
                reason = payout.failure_reason.as_deref().unwrap_or_default(),
                "Payout failed"
            ),
        }
        Ok(payout)
    }

    pub async fn retry(&self, id: PayoutId) -> Result<Payout> {
        let _guard = self.payout_locks.lock(id).await;
        let mut payout = self.load(id).await?;
        payout.retry()?;
        self.payouts.store(payout.clone()).await?;
        info!(payout_id = %id, "Payout queued for retry");
        Ok(payout)
    }

    pub async fn cancel(&self, id: PayoutId, reason: Option<String>) -> Result<Payout> {
        let _guard = self.payout_locks.lock(id).await;
        self.cancel_locked(id, reason).await
    }

    async fn cancel_locked(&self, id: PayoutId, reason: Option<String>) -> Result<Payout> {
        let mut payout = self.load(id).await?;
        payout.cancel(reason)?;
        self.payouts.store(payout.clone()).await?;
        info!(payout_id = %id, "Payout cancelled");
        Ok(payout)
    }

    /// Runs one payout through PROCESSING and the gateway to a final state
    /// while holding its row lock. `settle` performs the external call.
    pub(crate) async fn settle_with<F, Fut>(&self, id: PayoutId, settle: F) -> Result<Payout>
    where
        F: FnOnce(Payout) -> Fut,
        Fut: Future<Output = Option<SettlementOutcome>>,
    {
        let _guard = self.payout_locks.lock(id).await;
        let payout = self.begin_processing_locked(id).await?;
        match settle(payout.clone()).await {
            Some(outcome) => self.finalize_locked(id, outcome).await,
            None => Ok(payout),
        }
    }

    /// Cancels a payout whose order was refunded. Returns `false` if another
    /// actor already moved it out of a cancellable state.
    pub(crate) async fn cancel_if_refunded(&self, id: PayoutId) -> Result<bool> {
        let _guard = self.payout_locks.lock(id).await;
        let payout = self.load(id).await?;
        let refunded = match payout.order_id {
            Some(order_id) => self
                .orders
                .get(order_id)
                .await?
                .is_some_and(|o| o.is_refunded()),
            None => false,
        };
        if !refunded || payout.status.is_terminal() {
            return Ok(false);
        }
        warn!(payout_id = %id, order_id = ?payout.order_id, "Order refunded; cancelling payout");

        // Until it is cancelled the payout still claims the credit, so the
        // reversal never leaves it withdrawable.
        if payout.payout_type == PayoutType::ReferralBounty
            && let Some(scout_id) = payout.scout_id
        {
            let _scout_guard = self.scout_locks.lock(scout_id).await;
            let entry = EarningsEntry::reversal(scout_id, id, payout.amount, self.clock.now());
            if self.scouts.apply_earnings(entry).await?.is_some() {
                info!(payout_id = %id, scout_id = %scout_id, amount = payout.amount.0, "Bounty credit reversed");
            }
        }
        self.cancel_locked(id, Some("Order refunded".to_string()))
            .await?;
        Ok(true)
    }

    /// Finalizes a payout stuck in PROCESSING. Skips it when another actor
    /// already resolved it.
    pub(crate) async fn resolve_processing(
        &self,
        id: PayoutId,
        outcome: SettlementOutcome,
    ) -> Result<Option<Payout>> {
        let _guard = self.payout_locks.lock(id).await;
        if self.load(id).await?.status != PayoutStatus::Processing {
            return Ok(None);
        }
        self.finalize_locked(id, outcome).await.map(Some)
    }

    /// A scout withdraws part of their available earnings.
    pub async fn request_payout(
        &self,
        caller: UserId,
        scout_id: ScoutId,
        amount: i64,
    ) -> Result<PayoutSummary> {
        let scout = self
            .scouts
            .get(scout_id)
            .await?
            .ok_or_else(|| EscrowError::not_found("scout", scout_id))?;
        if scout.user_id != caller {
            return Err(EscrowError::Forbidden(
                "You can only request payouts for your own scout account".to_string(),
            ));
        }
        let payout = self
            .create_payout_request(NewPayout {
                user_id: caller,
                amount,
                payout_type: PayoutType::ReferralBounty,
                scout_id: Some(scout_id),
                order_id: None,
                immediate: true,
            })
            .await?;
        Ok(PayoutSummary::from(&payout))
    }

    pub async fn list_payouts_for_user(&self, user: UserId, limit: usize) -> Result<UserPayouts> {
        let all = self.payouts.for_user(user).await?;
        Ok(UserPayouts {
            payouts: all.iter().take(limit).map(PayoutSummary::from).collect(),
            total: all.len(),
            total_paid: sum_with_status(&all, PayoutStatus::Completed).into(),
            payable: sum_with_status(&all, PayoutStatus::Payable).into(),
            pending: sum_with_status(&all, PayoutStatus::Pending).into(),
        })
    }

    /// Settles one PAYABLE or PENDING payout right away through `settle`.
    pub async fn admin_process_payout<F, Fut>(&self, id: PayoutId, settle: F) -> Result<PayoutSummary>
    where
        F: FnOnce(Payout) -> Fut,
        Fut: Future<Output = Option<SettlementOutcome>>,
    {
        let payout = self.settle_with(id, settle).await?;
        Ok(PayoutSummary::from(&payout))
    }

    pub async fn admin_retry_payout(&self, id: PayoutId) -> Result<PayoutSummary> {
        self.retry(id).await.map(|p| PayoutSummary::from(&p))
    }

    pub async fn admin_cancel_payout(&self, id: PayoutId) -> Result<PayoutSummary> {
        self.cancel(id, None).await.map(|p| PayoutSummary::from(&p))
    }

    /// One page of payouts, newest first. `page` is 1-based.
    pub async fn admin_list_payouts(
        &self,
        status: Option<PayoutStatus>,
        page: usize,
        limit: usize,
    ) -> Result<PayoutPage> {
        let page = page.max(1);
        let limit = limit.max(1);
        let all = self.payouts.all().await?;
        let filtered: Vec<&Payout> = all
            .iter()
            .filter(|p| status.is_none_or(|s| p.status == s))
            .collect();

        let summary = status.is_none().then(|| PayoutTotals {
            payable: sum_with_status(&all, PayoutStatus::Payable).into(),
            processing: sum_with_status(&all, PayoutStatus::Processing).into(),
            completed: sum_with_status(&all, PayoutStatus::Completed).into(),
            failed: sum_with_status(&all, PayoutStatus::Failed).into(),
        });

        Ok(PayoutPage {
            payouts: filtered
                .iter()
                .skip((page - 1) * limit)
                .take(limit)
                .map(|p| PayoutSummary::from(*p))
                .collect(),
            total: filtered.len(),
            page,
            limit,
            total_pages: filtered.len().div_ceil(limit),
            summary,
        })
    }

    pub fn prune_locks(&self) {
        self.payout_locks.prune();
        self.scout_locks.prune();
    }
}

/// The next calendar settlement day (the 1st or 16th) strictly after `now`'s date,
/// at midnight UTC.
pub fn next_settlement_date(now: DateTime<Utc>) -> DateTime<Utc> {
    let date = now.date_naive();
    let next = if date.day() < 16 {
        NaiveDate::from_ymd_opt(date.year(), date.month(), 16)
    } else if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    };
    let midnight = next
        .unwrap_or(date)
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default();
    Utc.from_utc_datetime(&midnight)
}
