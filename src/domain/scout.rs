use super::ids::{PayoutId, ScoutId, UserId};
use super::money::Paise;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoutStatus {
    Active,
    Inactive,
}

/// A user enrolled to earn bounties for recruits' first sales.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scout {
    pub id: ScoutId,
    pub user_id: UserId,
    pub status: ScoutStatus,
    pub recruits_count: u64,
    /// Materialized balance of the earnings ledger.
    pub earnings: Paise,
    pub created_at: DateTime<Utc>,
}

impl Scout {
    pub fn new(user_id: UserId, created_at: DateTime<Utc>) -> Self {
        Self {
            id: ScoutId::new(),
            user_id,
            status: ScoutStatus::Active,
            recruits_count: 0,
            earnings: Paise::ZERO,
            created_at,
        }
    }

    /// Folds one ledger entry into the materialized balance.
    ///
    /// Debits floor at zero.
    pub fn apply(&mut self, entry: &EarningsEntry) {
        match entry.kind {
            EarningsKind::Bounty { .. } => {
                self.earnings += entry.amount;
                self.recruits_count += 1;
            }
            EarningsKind::PayoutDebit { .. } | EarningsKind::Reversal { .. } => {
                self.earnings = self.earnings.saturating_sub(entry.amount);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EarningsKind {
    /// Credit for a recruit's first completed sale.
    Bounty { recruit: UserId },
    /// Debit when a REFERRAL_BOUNTY payout completes.
    PayoutDebit { payout: PayoutId },
    /// Takes back the credit of a bounty payout cancelled because the
    /// recruit's order was refunded. The recruit still counts.
    Reversal { payout: PayoutId },
}

/// Append-only record of a change to a scout's earnings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarningsEntry {
    pub scout_id: ScoutId,
    #[serde(flatten)]
    pub kind: EarningsKind,
    pub amount: Paise,
    pub recorded_at: DateTime<Utc>,
}

impl EarningsEntry {
    pub fn bounty(scout_id: ScoutId, recruit: UserId, amount: Paise, at: DateTime<Utc>) -> Self {
        Self {
            scout_id,
            kind: EarningsKind::Bounty { recruit },
            amount,
            recorded_at: at,
        }
    }

    pub fn payout_debit(
        scout_id: ScoutId,
        payout: PayoutId,
        amount: Paise,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            scout_id,
            kind: EarningsKind::PayoutDebit { payout },
            amount,
            recorded_at: at,
        }
    }

    pub fn reversal(scout_id: ScoutId, payout: PayoutId, amount: Paise, at: DateTime<Utc>) -> Self {
        Self {
            scout_id,
            kind: EarningsKind::Reversal { payout },
            amount,
            recorded_at: at,
        }
    }

    /// Idempotency key: a recruit earns one bounty per lifetime and a payout
    /// debits once.
    pub fn key(&self) -> String {
        match &self.kind {
            EarningsKind::Bounty { recruit } => format!("{}:bounty:{}", self.scout_id, recruit),
            EarningsKind::PayoutDebit { payout } => format!("{}:payout:{}", self.scout_id, payout),
            EarningsKind::Reversal { payout } => format!("{}:reversal:{}", self.scout_id, payout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_and_floored_debit() {
        let mut scout = Scout::new(UserId(1), Utc::now());
        let now = Utc::now();

        scout.apply(&EarningsEntry::bounty(scout.id, UserId(2), Paise::new(1_000), now));
        assert_eq!(scout.earnings, Paise::new(1_000));
        assert_eq!(scout.recruits_count, 1);

        scout.apply(&EarningsEntry::payout_debit(
            scout.id,
            PayoutId::new(),
            Paise::new(2_500),
            now,
        ));
        assert_eq!(scout.earnings, Paise::ZERO);
        assert_eq!(scout.recruits_count, 1);
    }

    #[test]
    fn test_reversal_keeps_recruit_and_floors() {
        let mut scout = Scout::new(UserId(1), Utc::now());
        let now = Utc::now();
        let payout = PayoutId::new();

        scout.apply(&EarningsEntry::bounty(scout.id, UserId(2), Paise::new(1_000), now));
        scout.apply(&EarningsEntry::reversal(scout.id, payout, Paise::new(1_000), now));
        assert_eq!(scout.earnings, Paise::ZERO);
        assert_eq!(scout.recruits_count, 1);

        scout.apply(&EarningsEntry::reversal(scout.id, payout, Paise::new(1_000), now));
        assert_eq!(scout.earnings, Paise::ZERO);

        let debit = EarningsEntry::payout_debit(scout.id, payout, Paise::new(1_000), now);
        let reversal = EarningsEntry::reversal(scout.id, payout, Paise::new(1_000), now);
        assert_ne!(debit.key(), reversal.key());
    }

    #[test]
    fn test_entry_keys_are_stable_per_subject() {
        let scout = ScoutId::new();
        let now = Utc::now();
        let a = EarningsEntry::bounty(scout, UserId(9), Paise::new(1), now);
        let b = EarningsEntry::bounty(scout, UserId(9), Paise::new(5), now);
        let c = EarningsEntry::bounty(scout, UserId(10), Paise::new(1), now);
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
    }
}
