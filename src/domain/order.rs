use super::fees::FeeBreakdown;
use super::ids::{ListingId, OrderId, UserId};
use super::money::Paise;
use crate::error::{EscrowError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Escrowed,
    Completed,
    /// Set by the refund process outside this engine. Terminal and non-payable.
    Refunded,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Escrowed => "escrowed",
            OrderStatus::Completed => "completed",
            OrderStatus::Refunded => "refunded",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderEvent {
    PaymentConfirmed,
    BuyerConfirmed,
    Refunded,
}

impl OrderStatus {
    /// Transition table. Any pair not listed is rejected.
    pub fn next(self, event: OrderEvent) -> Option<OrderStatus> {
        use OrderEvent as E;
        use OrderStatus as S;
        match (self, event) {
            (S::Pending, E::PaymentConfirmed) => Some(S::Escrowed),
            (S::Escrowed, E::BuyerConfirmed) => Some(S::Completed),
            (S::Escrowed | S::Completed, E::Refunded) => Some(S::Refunded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meeting {
    pub location: String,
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// One purchase attempt against one listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub listing_id: ListingId,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub item_price: Paise,
    pub platform_fee: Paise,
    pub gateway_fee: Paise,
    pub total: Paise,
    pub status: OrderStatus,
    /// Gateway transaction id, recorded once the gateway reports on the order.
    pub payment_reference: Option<String>,
    pub meeting: Meeting,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new(
        listing_id: ListingId,
        buyer_id: UserId,
        seller_id: UserId,
        fees: FeeBreakdown,
        meeting_location: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        if buyer_id == seller_id {
            return Err(EscrowError::InvalidOperation(
                "You cannot buy your own listing".to_string(),
            ));
        }

        Ok(Self {
            id: OrderId::new(),
            listing_id,
            buyer_id,
            seller_id,
            item_price: fees.item_price,
            platform_fee: fees.platform_fee,
            gateway_fee: fees.gateway_fee,
            total: fees.total,
            status: OrderStatus::Pending,
            payment_reference: None,
            meeting: Meeting {
                location: meeting_location.into(),
                scheduled_at: None,
            },
            created_at,
            completed_at: None,
        })
    }

    fn apply(&mut self, event: OrderEvent, action: &'static str) -> Result<()> {
        match self.status.next(event) {
            Some(next) => {
                self.status = next;
                Ok(())
            }
            None => Err(EscrowError::invalid_state(
                "order",
                self.id,
                self.status,
                action,
            )),
        }
    }

    /// PENDING -> ESCROWED once the gateway confirms the payment.
    pub fn escrow(&mut self, payment_reference: Option<String>) -> Result<()> {
        self.apply(OrderEvent::PaymentConfirmed, "escrow payment")?;
        if payment_reference.is_some() {
            self.payment_reference = payment_reference;
        }
        Ok(())
    }

    /// ESCROWED -> COMPLETED once the buyer confirms the handover.
    pub fn complete(&mut self, at: DateTime<Utc>, meeting_time: Option<DateTime<Utc>>) -> Result<()> {
        self.apply(OrderEvent::BuyerConfirmed, "complete order")?;
        self.completed_at = Some(at);
        if meeting_time.is_some() {
            self.meeting.scheduled_at = meeting_time;
        }
        Ok(())
    }

    pub fn refund(&mut self) -> Result<()> {
        self.apply(OrderEvent::Refunded, "refund order")
    }

    pub fn is_party(&self, user: UserId) -> bool {
        self.buyer_id == user || self.seller_id == user
    }

    /// What the seller receives. Fees were carried by the buyer.
    pub fn seller_payout(&self) -> Paise {
        self.item_price
    }

    pub fn is_refunded(&self) -> bool {
        self.status == OrderStatus::Refunded
    }
}
