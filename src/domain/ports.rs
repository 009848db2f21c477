//! Boundaries between the escrow engine and everything it does not own:
//! persistence, the listing/user directories, the payment gateway and time.

use super::ids::{ListingId, OrderId, PayoutId, ScoutId, UserId};
use super::money::Paise;
use super::order::{Order, OrderStatus};
use super::payout::{Payout, PayoutStatus, SettlementOutcome};
use super::scout::{EarningsEntry, Scout};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Which side of an order a user is counted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Buyer,
    Seller,
    Either,
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn store(&self, order: Order) -> Result<()>;
    async fn get(&self, id: OrderId) -> Result<Option<Order>>;
    /// Orders where the user is buyer or seller, newest first.
    async fn for_user(&self, user: UserId) -> Result<Vec<Order>>;
    /// Orders in the given status, oldest first.
    async fn by_status(&self, status: OrderStatus) -> Result<Vec<Order>>;
    async fn count_completed(&self, user: UserId, party: Party) -> Result<u64>;
}

#[async_trait]
pub trait PayoutStore: Send + Sync {
    async fn store(&self, payout: Payout) -> Result<()>;
    async fn get(&self, id: PayoutId) -> Result<Option<Payout>>;
    /// Payouts in the given status, oldest first.
    async fn with_status(&self, status: PayoutStatus) -> Result<Vec<Payout>>;
    /// Payouts owed to the user, newest first.
    async fn for_user(&self, user: UserId) -> Result<Vec<Payout>>;
    /// Every payout, newest first.
    async fn all(&self) -> Result<Vec<Payout>>;
}

#[async_trait]
pub trait ScoutStore: Send + Sync {
    /// Inserts a new scout unless the user is already enrolled.
    /// Returns `false` when a scout already exists for the user.
    async fn insert(&self, scout: Scout) -> Result<bool>;
    async fn get(&self, id: ScoutId) -> Result<Option<Scout>>;
    async fn by_user(&self, user: UserId) -> Result<Option<Scout>>;
    async fn all(&self) -> Result<Vec<Scout>>;
    /// Appends an earnings entry and updates the balance in one step.
    ///
    /// Returns the updated scout, or `None` when an entry with the same key
    /// was already recorded. Fails with `NotFound` for an unknown scout.
    async fn apply_earnings(&self, entry: EarningsEntry) -> Result<Option<Scout>>;
    async fn entries(&self, id: ScoutId) -> Result<Vec<EarningsEntry>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Active,
    Sold,
    Inactive,
}

impl fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListingStatus::Active => f.write_str("active"),
            ListingStatus::Sold => f.write_str("sold"),
            ListingStatus::Inactive => f.write_str("inactive"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    #[serde(rename = "seller")]
    pub seller_id: UserId,
    pub price: Paise,
    pub status: ListingStatus,
}

impl Listing {
    pub fn is_purchasable(&self) -> bool {
        self.status == ListingStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    /// The user who recruited this one, if any.
    #[serde(default)]
    pub referrer: Option<UserId>,
}

#[async_trait]
pub trait ListingDirectory: Send + Sync {
    async fn listing(&self, id: &ListingId) -> Result<Option<Listing>>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn user(&self, id: UserId) -> Result<Option<User>>;

    async fn referrer_of(&self, id: UserId) -> Result<Option<UserId>> {
        Ok(self.user(id).await?.and_then(|u| u.referrer))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub order_id: OrderId,
    pub amount: Paise,
    pub return_url: String,
}

/// An inbound gateway callback exactly as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    pub authorization: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Succeeded,
    Failed { code: String },
}

/// A notification the gateway adapter has authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedEvent {
    /// Our order id as echoed back by the gateway.
    pub merchant_reference: Option<String>,
    pub transaction_id: Option<String>,
    pub outcome: PaymentOutcome,
}

/// What the gateway knows about an earlier disbursement attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisbursementStatus {
    Resolved(SettlementOutcome),
    Unknown,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Starts a collection and returns the URL to send the buyer to.
    async fn initiate(&self, request: PaymentRequest) -> Result<String>;

    /// Fails with `Authentication` unless the notification is genuine.
    fn authenticate_notification(&self, notification: &RawNotification) -> Result<VerifiedEvent>;

    /// Attempts to pay out. `Err(Gateway)` means the provider failed outright.
    async fn disburse(&self, payout: &Payout) -> Result<SettlementOutcome>;

    async fn disbursement_status(&self, payout_id: PayoutId) -> Result<DisbursementStatus>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub type OrderStoreRef = Arc<dyn OrderStore>;
pub type PayoutStoreRef = Arc<dyn PayoutStore>;
pub type ScoutStoreRef = Arc<dyn ScoutStore>;
pub type ListingDirectoryRef = Arc<dyn ListingDirectory>;
pub type UserDirectoryRef = Arc<dyn UserDirectory>;
pub type PaymentGatewayRef = Arc<dyn PaymentGateway>;
pub type ClockRef = Arc<dyn Clock>;
