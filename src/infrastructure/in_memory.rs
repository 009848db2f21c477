use crate::domain::ids::{ListingId, OrderId, PayoutId, ScoutId, UserId};
use crate::domain::order::{Order, OrderStatus};
use crate::domain::payout::{Payout, PayoutStatus};
use crate::domain::ports::{
    Clock, Listing, ListingDirectory, OrderStore, Party, PayoutStore, ScoutStore, User,
    UserDirectory,
};
use crate::domain::scout::{EarningsEntry, Scout};
use crate::error::{EscrowError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

/// A thread-safe in-memory store for orders.
///
/// Uses `Arc<RwLock<HashMap<OrderId, Order>>>` to allow shared concurrent access.
#[derive(Default, Clone)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn store(&self, order: Order) -> Result<()> {
        let mut orders = self.orders.write().await;
        orders.insert(order.id, order);
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        let orders = self.orders.read().await;
        Ok(orders.get(&id).cloned())
    }

    async fn for_user(&self, user: UserId) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        let mut matching: Vec<Order> = orders
            .values()
            .filter(|o| o.is_party(user))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }

    async fn by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        let mut matching: Vec<Order> = orders
            .values()
            .filter(|o| o.status == status)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }

    async fn count_completed(&self, user: UserId, party: Party) -> Result<u64> {
        let orders = self.orders.read().await;
        let count = orders
            .values()
            .filter(|o| o.status == OrderStatus::Completed)
            .filter(|o| match party {
                Party::Buyer => o.buyer_id == user,
                Party::Seller => o.seller_id == user,
                Party::Either => o.is_party(user),
            })
            .count();
        Ok(count as u64)
    }
}

/// A thread-safe in-memory store for payouts.
#[derive(Default, Clone)]
pub struct InMemoryPayoutStore {
    payouts: Arc<RwLock<HashMap<PayoutId, Payout>>>,
}

impl InMemoryPayoutStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PayoutStore for InMemoryPayoutStore {
    async fn store(&self, payout: Payout) -> Result<()> {
        let mut payouts = self.payouts.write().await;
        payouts.insert(payout.id, payout);
        Ok(())
    }

    async fn get(&self, id: PayoutId) -> Result<Option<Payout>> {
        let payouts = self.payouts.read().await;
        Ok(payouts.get(&id).cloned())
    }

    async fn with_status(&self, status: PayoutStatus) -> Result<Vec<Payout>> {
        let payouts = self.payouts.read().await;
        let mut matching: Vec<Payout> = payouts
            .values()
            .filter(|p| p.status == status)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }

    async fn for_user(&self, user: UserId) -> Result<Vec<Payout>> {
        let payouts = self.payouts.read().await;
        let mut matching: Vec<Payout> = payouts
            .values()
            .filter(|p| p.user_id == user)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }

    async fn all(&self) -> Result<Vec<Payout>> {
        let payouts = self.payouts.read().await;
        let mut all: Vec<Payout> = payouts.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }
}

#[derive(Default)]
struct ScoutState {
    scouts: HashMap<ScoutId, Scout>,
    entries: Vec<EarningsEntry>,
    entry_keys: HashSet<String>,
}

/// In-memory scouts and their earnings ledger.
///
/// A single lock covers both, so an entry and its balance change land together.
#[derive(Default, Clone)]
pub struct InMemoryScoutStore {
    state: Arc<RwLock<ScoutState>>,
}

impl InMemoryScoutStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScoutStore for InMemoryScoutStore {
    async fn insert(&self, scout: Scout) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.scouts.values().any(|s| s.user_id == scout.user_id) {
            return Ok(false);
        }
        state.scouts.insert(scout.id, scout);
        Ok(true)
    }

    async fn get(&self, id: ScoutId) -> Result<Option<Scout>> {
        let state = self.state.read().await;
        Ok(state.scouts.get(&id).cloned())
    }

    async fn by_user(&self, user: UserId) -> Result<Option<Scout>> {
        let state = self.state.read().await;
        Ok(state.scouts.values().find(|s| s.user_id == user).cloned())
    }

    async fn all(&self) -> Result<Vec<Scout>> {
        let state = self.state.read().await;
        Ok(state.scouts.values().cloned().collect())
    }

    async fn apply_earnings(&self, entry: EarningsEntry) -> Result<Option<Scout>> {
        let mut state = self.state.write().await;
        let key = entry.key();
        if state.entry_keys.contains(&key) {
            return Ok(None);
        }
        let scout = state
            .scouts
            .get_mut(&entry.scout_id)
            .ok_or_else(|| EscrowError::not_found("scout", entry.scout_id))?;
        scout.apply(&entry);
        let updated = scout.clone();
        state.entry_keys.insert(key);
        state.entries.push(entry);
        Ok(Some(updated))
    }

    async fn entries(&self, id: ScoutId) -> Result<Vec<EarningsEntry>> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .iter()
            .filter(|e| e.scout_id == id)
            .cloned()
            .collect())
    }
}

/// Snapshot of the external user and listing directories.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectorySnapshot {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub listings: Vec<Listing>,
}

/// Serves listing and user lookups from memory.
#[derive(Default, Clone)]
pub struct InMemoryDirectory {
    users: Arc<RwLock<HashMap<UserId, User>>>,
    listings: Arc<RwLock<HashMap<ListingId, Listing>>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: DirectorySnapshot) -> Self {
        let users = snapshot.users.into_iter().map(|u| (u.id, u)).collect();
        let listings = snapshot
            .listings
            .into_iter()
            .map(|l| (l.id.clone(), l))
            .collect();
        Self {
            users: Arc::new(RwLock::new(users)),
            listings: Arc::new(RwLock::new(listings)),
        }
    }

    /// Loads a JSON directory (`{"users": [...], "listings": [...]}`).
    pub fn from_json_reader<R: Read>(reader: R) -> Result<Self> {
        let snapshot: DirectorySnapshot = serde_json::from_reader(reader)?;
        Ok(Self::from_snapshot(snapshot))
    }

    pub async fn add_user(&self, user: User) {
        self.users.write().await.insert(user.id, user);
    }

    pub async fn add_listing(&self, listing: Listing) {
        self.listings.write().await.insert(listing.id.clone(), listing);
    }
}

#[async_trait]
impl ListingDirectory for InMemoryDirectory {
    async fn listing(&self, id: &ListingId) -> Result<Option<Listing>> {
        Ok(self.listings.read().await.get(id).cloned())
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }
}

/// A clock that only moves when told to.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
