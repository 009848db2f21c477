use super::ids::{OrderId, PayoutId, ScoutId, UserId};
use super::money::{Amount, Paise};
use crate::error::{EscrowError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutType {
    ReferralBounty,
    SellerPayout,
}

impl fmt::Display for PayoutType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayoutType::ReferralBounty => f.write_str("referral_bounty"),
            PayoutType::SellerPayout => f.write_str("seller_payout"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    /// Waiting for the maturation window and the next calendar batch.
    Payable,
    /// Explicitly requested or retried; processed outside the calendar.
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl PayoutStatus {
    pub const ALL: [PayoutStatus; 6] = [
        PayoutStatus::Payable,
        PayoutStatus::Pending,
        PayoutStatus::Processing,
        PayoutStatus::Completed,
        PayoutStatus::Failed,
        PayoutStatus::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, PayoutStatus::Completed | PayoutStatus::Cancelled)
    }

    /// Transition table. Any pair not listed is rejected.
    pub fn next(self, event: PayoutEvent) -> Option<PayoutStatus> {
        use PayoutEvent as E;
        use PayoutStatus as S;
        match (self, event) {
            (S::Payable | S::Pending, E::BeginProcessing) => Some(S::Processing),
            (S::Processing, E::Settled) => Some(S::Completed),
            (S::Processing, E::Failed) => Some(S::Failed),
            (S::Failed, E::Retry) => Some(S::Pending),
            (S::Payable | S::Pending | S::Processing | S::Failed, E::Cancel) => Some(S::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PayoutStatus::Payable => "payable",
            PayoutStatus::Pending => "pending",
            PayoutStatus::Processing => "processing",
            PayoutStatus::Completed => "completed",
            PayoutStatus::Failed => "failed",
            PayoutStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for PayoutStatus {
    type Err = EscrowError;

    fn from_str(s: &str) -> Result<Self> {
        PayoutStatus::ALL
            .into_iter()
            .find(|status| status.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| EscrowError::InvalidOperation(format!("Unknown payout status: {s}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayoutEvent {
    BeginProcessing,
    Settled,
    Failed,
    Retry,
    Cancel,
}

/// How a settlement attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    Paid { reference: String },
    Failed { reason: String },
}

/// One scheduled disbursement to one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub id: PayoutId,
    pub user_id: UserId,
    pub payout_type: PayoutType,
    pub status: PayoutStatus,
    pub amount: Paise,
    pub order_id: Option<OrderId>,
    pub scout_id: Option<ScoutId>,
    pub payment_reference: Option<String>,
    pub failure_reason: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Payout {
    pub fn new(
        user_id: UserId,
        amount: Amount,
        payout_type: PayoutType,
        scout_id: Option<ScoutId>,
        order_id: Option<OrderId>,
        immediate: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PayoutId::new(),
            user_id,
            payout_type,
            status: if immediate {
                PayoutStatus::Pending
            } else {
                PayoutStatus::Payable
            },
            amount: amount.into(),
            order_id,
            scout_id,
            payment_reference: None,
            failure_reason: None,
            processed_at: None,
            completed_at: None,
            created_at,
        }
    }

    fn apply(&mut self, event: PayoutEvent, action: &'static str) -> Result<()> {
        match self.status.next(event) {
            Some(next) => {
                self.status = next;
                Ok(())
            }
            None => Err(EscrowError::invalid_state(
                "payout",
                self.id,
                self.status,
                action,
            )),
        }
    }

    pub fn begin_processing(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.apply(PayoutEvent::BeginProcessing, "begin processing")?;
        self.processed_at = Some(at);
        Ok(())
    }

    pub fn finalize(&mut self, outcome: SettlementOutcome, at: DateTime<Utc>) -> Result<()> {
        match outcome {
            SettlementOutcome::Paid { reference } => {
                self.apply(PayoutEvent::Settled, "complete payout")?;
                self.completed_at = Some(at);
                self.payment_reference = Some(reference);
                self.failure_reason = None;
            }
            SettlementOutcome::Failed { reason } => {
                self.apply(PayoutEvent::Failed, "fail payout")?;
                self.failure_reason = Some(reason);
            }
        }
        Ok(())
    }

    pub fn retry(&mut self) -> Result<()> {
        self.apply(PayoutEvent::Retry, "retry payout")?;
        self.failure_reason = None;
        self.processed_at = None;
        self.completed_at = None;
        Ok(())
    }

    pub fn cancel(&mut self, reason: Option<String>) -> Result<()> {
        self.apply(PayoutEvent::Cancel, "cancel payout")?;
        if reason.is_some() {
            self.failure_reason = reason;
        }
        Ok(())
    }

    /// A REFERRAL_BOUNTY payout still owed against its scout's earnings.
    pub fn is_outstanding_bounty_for(&self, scout_id: ScoutId) -> bool {
        self.payout_type == PayoutType::ReferralBounty
            && self.scout_id == Some(scout_id)
            && !self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payout(immediate: bool) -> Payout {
        Payout::new(
            UserId(3),
            Amount::new(1_000).unwrap(),
            PayoutType::SellerPayout,
            None,
            None,
            immediate,
            Utc::now(),
        )
    }

    #[test]
    fn test_initial_status() {
        assert_eq!(payout(false).status, PayoutStatus::Payable);
        assert_eq!(payout(true).status, PayoutStatus::Pending);
    }

    #[test]
    fn test_success_path() {
        let mut p = payout(false);
        let at = Utc::now();
        p.begin_processing(at).unwrap();
        assert_eq!(p.processed_at, Some(at));
        p.finalize(
            SettlementOutcome::Paid {
                reference: "PAY-1".into(),
            },
            at,
        )
        .unwrap();
        assert_eq!(p.status, PayoutStatus::Completed);
        assert_eq!(p.payment_reference.as_deref(), Some("PAY-1"));
        assert_eq!(p.completed_at, Some(at));
    }

    #[test]
    fn test_failure_then_retry_clears_state() {
        let mut p = payout(false);
        p.begin_processing(Utc::now()).unwrap();
        p.finalize(
            SettlementOutcome::Failed {
                reason: "declined".into(),
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(p.status, PayoutStatus::Failed);
        assert_eq!(p.failure_reason.as_deref(), Some("declined"));

        p.retry().unwrap();
        assert_eq!(p.status, PayoutStatus::Pending);
        assert!(p.failure_reason.is_none());
        assert!(p.processed_at.is_none());
    }

    #[test]
    fn test_finalize_requires_processing() {
        let mut p = payout(false);
        let err = p
            .finalize(
                SettlementOutcome::Paid {
                    reference: "x".into(),
                },
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, EscrowError::InvalidState { .. }));
        assert_eq!(p.status, PayoutStatus::Payable);
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        let events = [
            PayoutEvent::BeginProcessing,
            PayoutEvent::Settled,
            PayoutEvent::Failed,
            PayoutEvent::Retry,
            PayoutEvent::Cancel,
        ];
        for terminal in [PayoutStatus::Completed, PayoutStatus::Cancelled] {
            for event in events {
                assert_eq!(terminal.next(event), None, "{terminal} accepted {event:?}");
            }
        }
    }

    #[test]
    fn test_only_failed_can_retry() {
        for status in PayoutStatus::ALL {
            let expected = (status == PayoutStatus::Failed).then_some(PayoutStatus::Pending);
            assert_eq!(status.next(PayoutEvent::Retry), expected);
        }
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("FAILED".parse::<PayoutStatus>().unwrap(), PayoutStatus::Failed);
        assert!("lost".parse::<PayoutStatus>().is_err());
    }
}
