use super::payouts::PayoutLedger;
use crate::domain::ids::{ScoutId, UserId};
use crate::domain::money::{MoneyView, Paise};
use crate::domain::ports::{ClockRef, OrderStoreRef, Party, ScoutStoreRef, UserDirectoryRef};
use crate::domain::scout::{EarningsEntry, Scout, ScoutStatus};
use crate::error::{EscrowError, Result};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoutEarnings {
    pub scout_id: ScoutId,
    pub earnings: MoneyView,
    /// Earnings minus bounty payouts already requested but not yet settled.
    pub available: MoneyView,
    pub recruits_count: u64,
    pub bounty_per_recruit: MoneyView,
    pub entries: Vec<EarningsEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub scout_id: ScoutId,
    pub user_id: UserId,
    pub user_name: String,
    pub recruits_count: u64,
    pub earnings: MoneyView,
}

/// Enrollment and reporting for referral scouts.
#[derive(Clone)]
pub struct ScoutRegistry {
    scouts: ScoutStoreRef,
    orders: OrderStoreRef,
    users: UserDirectoryRef,
    payouts: PayoutLedger,
    clock: ClockRef,
    bounty: Paise,
}

impl ScoutRegistry {
    pub fn new(
        scouts: ScoutStoreRef,
        orders: OrderStoreRef,
        users: UserDirectoryRef,
        payouts: PayoutLedger,
        clock: ClockRef,
        bounty: Paise,
    ) -> Self {
        Self {
            scouts,
            orders,
            users,
            payouts,
            clock,
            bounty,
        }
    }

    /// Enrolls a user who has completed at least one order on either side.
    pub async fn register_scout(&self, user: UserId) -> Result<ScoutId> {
        if self.users.user(user).await?.is_none() {
            return Err(EscrowError::not_found("user", user));
        }
        if self.scouts.by_user(user).await?.is_some() {
            return Err(EscrowError::InvalidOperation(
                "User is already registered as a scout".to_string(),
            ));
        }
        if self.orders.count_completed(user, Party::Either).await? < 1 {
            return Err(EscrowError::InvalidOperation(
                "At least one completed order is required to become a scout".to_string(),
            ));
        }

        let scout = Scout::new(user, self.clock.now());
        let scout_id = scout.id;
        // A concurrent registration may have won between the check and here.
        if !self.scouts.insert(scout).await? {
            return Err(EscrowError::InvalidOperation(
                "User is already registered as a scout".to_string(),
            ));
        }
        info!(scout_id = %scout_id, user_id = %user, "Scout registered");
        Ok(scout_id)
    }

    pub async fn scout_earnings(&self, scout_id: ScoutId, caller: UserId) -> Result<ScoutEarnings> {
        let scout = self
            .scouts
            .get(scout_id)
            .await?
            .ok_or_else(|| EscrowError::not_found("scout", scout_id))?;
        if scout.user_id != caller {
            return Err(EscrowError::Forbidden(
                "You can only view your own scout earnings".to_string(),
            ));
        }
        let available = self.payouts.available_for(&scout).await?;
        Ok(ScoutEarnings {
            scout_id,
            earnings: scout.earnings.into(),
            available: available.into(),
            recruits_count: scout.recruits_count,
            bounty_per_recruit: self.bounty.into(),
            entries: self.scouts.entries(scout_id).await?,
        })
    }

    /// Active scouts by earnings, highest first. Ties go to the scout with
    /// more recruits, then to the earlier enrollment.
    pub async fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>> {
        let mut scouts: Vec<Scout> = self
            .scouts
            .all()
            .await?
            .into_iter()
            .filter(|s| s.status == ScoutStatus::Active)
            .collect();
        scouts.sort_by(|a, b| {
            b.earnings
                .cmp(&a.earnings)
                .then(b.recruits_count.cmp(&a.recruits_count))
                .then(a.created_at.cmp(&b.created_at))
        });

        let mut board = Vec::with_capacity(limit.min(scouts.len()));
        for (index, scout) in scouts.into_iter().take(limit).enumerate() {
            let user_name = self
                .users
                .user(scout.user_id)
                .await?
                .map(|u| u.name)
                .unwrap_or_default();
            board.push(LeaderboardEntry {
                rank: index + 1,
                scout_id: scout.id,
                user_id: scout.user_id,
                user_name,
                recruits_count: scout.recruits_count,
                earnings: scout.earnings.into(),
            });
        }
        Ok(board)
    }
}
