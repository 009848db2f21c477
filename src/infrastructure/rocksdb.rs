use crate::domain::ids::{OrderId, PayoutId, ScoutId, UserId};
use crate::domain::order::{Order, OrderStatus};
use crate::domain::payout::{Payout, PayoutStatus};
use crate::domain::ports::{OrderStore, Party, PayoutStore, ScoutStore};
use crate::domain::scout::{EarningsEntry, Scout};
use crate::error::{EscrowError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const CF_ORDERS: &str = "orders";
pub const CF_PAYOUTS: &str = "payouts";
pub const CF_SCOUTS: &str = "scouts";
/// Earnings ledger entries keyed by their idempotency key.
pub const CF_EARNINGS: &str = "earnings";

/// A persistent store backed by RocksDB, one column family per entity.
///
/// Values are JSON. `Clone` shares the underlying `Arc<DB>`.
#[derive(Clone)]
pub struct RocksDbStore {
    db: Arc<DB>,
    /// Serializes scout writes so a balance and its ledger entry land together.
    scout_writes: Arc<Mutex<()>>,
}

impl RocksDbStore {
    /// Opens or creates the database at `path`, creating missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = [CF_ORDERS, CF_PAYOUTS, CF_SCOUTS, CF_EARNINGS]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));
        let db = DB::open_cf_descriptors(&opts, path, families)?;

        Ok(Self {
            db: Arc::new(db),
            scout_writes: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &'static str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            EscrowError::InternalError(Box::new(std::io::Error::other(format!(
                "column family {name} not found"
            ))))
        })
    }

    fn put<T: Serialize>(&self, cf: &'static str, key: &[u8], value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.db.put_cf(self.cf(cf)?, key, bytes)?;
        Ok(())
    }

    fn fetch<T: DeserializeOwned>(&self, cf: &'static str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_pinned_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, cf: &'static str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        for item in self.db.iterator_cf(self.cf(cf)?, IteratorMode::Start) {
            let (_key, value) = item?;
            items.push(serde_json::from_slice(&value)?);
        }
        Ok(items)
    }
}

#[async_trait]
impl OrderStore for RocksDbStore {
    async fn store(&self, order: Order) -> Result<()> {
        self.put(CF_ORDERS, order.id.0.as_bytes(), &order)
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        self.fetch(CF_ORDERS, id.0.as_bytes())
    }

    async fn for_user(&self, user: UserId) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .scan::<Order>(CF_ORDERS)?
            .into_iter()
            .filter(|o| o.is_party(user))
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .scan::<Order>(CF_ORDERS)?
            .into_iter()
            .filter(|o| o.status == status)
            .collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(orders)
    }

    async fn count_completed(&self, user: UserId, party: Party) -> Result<u64> {
        let count = self
            .scan::<Order>(CF_ORDERS)?
            .iter()
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

#[async_trait]
impl PayoutStore for RocksDbStore {
    async fn store(&self, payout: Payout) -> Result<()> {
        self.put(CF_PAYOUTS, payout.id.0.as_bytes(), &payout)
    }

    async fn get(&self, id: PayoutId) -> Result<Option<Payout>> {
        self.fetch(CF_PAYOUTS, id.0.as_bytes())
    }

    async fn with_status(&self, status: PayoutStatus) -> Result<Vec<Payout>> {
        let mut payouts: Vec<Payout> = self
            .scan::<Payout>(CF_PAYOUTS)?
            .into_iter()
            .filter(|p| p.status == status)
            .collect();
        payouts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(payouts)
    }

    async fn for_user(&self, user: UserId) -> Result<Vec<Payout>> {
        let mut payouts: Vec<Payout> = self
            .scan::<Payout>(CF_PAYOUTS)?
            .into_iter()
            .filter(|p| p.user_id == user)
            .collect();
        payouts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payouts)
    }

    async fn all(&self) -> Result<Vec<Payout>> {
        let mut payouts = self.scan::<Payout>(CF_PAYOUTS)?;
        payouts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payouts)
    }
}

#[async_trait]
impl ScoutStore for RocksDbStore {
    async fn insert(&self, scout: Scout) -> Result<bool> {
        let _guard = self.scout_writes.lock().await;
        if ScoutStore::by_user(self, scout.user_id).await?.is_some() {
            return Ok(false);
        }
        self.put(CF_SCOUTS, scout.id.0.as_bytes(), &scout)?;
        Ok(true)
    }

    async fn get(&self, id: ScoutId) -> Result<Option<Scout>> {
        self.fetch(CF_SCOUTS, id.0.as_bytes())
    }

    async fn by_user(&self, user: UserId) -> Result<Option<Scout>> {
        Ok(self
            .scan::<Scout>(CF_SCOUTS)?
            .into_iter()
            .find(|s| s.user_id == user))
    }

    async fn all(&self) -> Result<Vec<Scout>> {
        self.scan(CF_SCOUTS)
    }

    async fn apply_earnings(&self, entry: EarningsEntry) -> Result<Option<Scout>> {
        let _guard = self.scout_writes.lock().await;
        let key = entry.key();
        if self
            .db
            .get_pinned_cf(self.cf(CF_EARNINGS)?, key.as_bytes())?
            .is_some()
        {
            return Ok(None);
        }
        let mut scout: Scout = self
            .fetch(CF_SCOUTS, entry.scout_id.0.as_bytes())?
            .ok_or_else(|| EscrowError::not_found("scout", entry.scout_id))?;
        scout.apply(&entry);

        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_SCOUTS)?,
            scout.id.0.as_bytes(),
            serde_json::to_vec(&scout)?,
        );
        batch.put_cf(
            self.cf(CF_EARNINGS)?,
            key.as_bytes(),
            serde_json::to_vec(&entry)?,
        );
        self.db.write(batch)?;
        Ok(Some(scout))
    }

    async fn entries(&self, id: ScoutId) -> Result<Vec<EarningsEntry>> {
        let mut entries: Vec<EarningsEntry> = self
            .scan::<EarningsEntry>(CF_EARNINGS)?
            .into_iter()
            .filter(|e| e.scout_id == id)
            .collect();
        entries.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));
        Ok(entries)
    }
}
