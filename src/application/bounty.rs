use super::payouts::{NewPayout, PayoutLedger};
use crate::domain::ids::{OrderId, PayoutId, ScoutId, UserId};
use crate::domain::money::Paise;
use crate::domain::payout::PayoutType;
use crate::domain::ports::{ClockRef, ScoutStoreRef, UserDirectoryRef};
use crate::domain::scout::EarningsEntry;
use crate::error::{EscrowError, Result};
use tracing::{debug, info};

/// A sale that just reached COMPLETED.
///
/// `seller_completed_sales` must be counted while the seller's lock is held,
/// including this sale, so that exactly one completion can observe `1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedSale {
    pub order_id: OrderId,
    pub seller_id: UserId,
    pub sale_amount: Paise,
    pub seller_completed_sales: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BountyOutcome {
    NotFirstSale,
    NoReferrer,
    ReferrerNotScout,
    /// The scout was already credited for this recruit.
    AlreadyCredited,
    Credited {
        scout_id: ScoutId,
        payout_id: PayoutId,
    },
}

/// Pays a referring scout a fixed bounty on a recruit's first sale.
#[derive(Clone)]
pub struct ReferralBountyTrigger {
    users: UserDirectoryRef,
    scouts: ScoutStoreRef,
    payouts: PayoutLedger,
    clock: ClockRef,
    bounty: Paise,
}

impl ReferralBountyTrigger {
    pub fn new(
        users: UserDirectoryRef,
        scouts: ScoutStoreRef,
        payouts: PayoutLedger,
        clock: ClockRef,
        bounty: Paise,
    ) -> Self {
        Self {
            users,
            scouts,
            payouts,
            clock,
            bounty,
        }
    }

    pub fn bounty(&self) -> Paise {
        self.bounty
    }

    pub async fn on_order_completed(&self, sale: &CompletedSale) -> Result<BountyOutcome> {
        if sale.seller_completed_sales != 1 {
            return Ok(BountyOutcome::NotFirstSale);
        }
        let Some(referrer) = self.users.referrer_of(sale.seller_id).await? else {
            debug!(seller_id = %sale.seller_id, "First sale without referrer");
            return Ok(BountyOutcome::NoReferrer);
        };
        let Some(scout) = self.scouts.by_user(referrer).await? else {
            debug!(seller_id = %sale.seller_id, referrer = %referrer, "Referrer is not a scout");
            return Ok(BountyOutcome::ReferrerNotScout);
        };

        let entry = EarningsEntry::bounty(scout.id, sale.seller_id, self.bounty, self.clock.now());
        if self.scouts.apply_earnings(entry).await?.is_none() {
            return Ok(BountyOutcome::AlreadyCredited);
        }

        let amount = i64::try_from(self.bounty.0).map_err(|_| {
            EscrowError::InvalidOperation(format!("Bounty {} out of range", self.bounty))
        })?;
        let payout = self
            .payouts
            .create_payout_request(NewPayout {
                user_id: scout.user_id,
                amount,
                payout_type: PayoutType::ReferralBounty,
                scout_id: Some(scout.id),
                order_id: Some(sale.order_id),
                immediate: false,
            })
            .await?;

        info!(
            scout_id = %scout.id,
            recruit = %sale.seller_id,
            bounty = self.bounty.0,
            sale_amount = %sale.sale_amount,
            "Referral bounty credited"
        );
        Ok(BountyOutcome::Credited {
            scout_id: scout.id,
            payout_id: payout.id,
        })
    }
}
