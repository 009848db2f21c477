#![allow(dead_code)]

use campus_escrow::application::engine::{EngineParts, EscrowEngine};
use campus_escrow::application::orders::PaymentApplication;
use campus_escrow::config::EngineConfig;
use campus_escrow::domain::ids::{ListingId, OrderId, PayoutId, ScoutId, UserId};
use campus_escrow::domain::money::Paise;
use campus_escrow::domain::payout::{Payout, PayoutStatus, PayoutType};
use campus_escrow::domain::ports::{
    Clock, Listing, ListingStatus, OrderStore, PayoutStore, PayoutStoreRef, ScoutStore,
    ScoutStoreRef, User,
};
use campus_escrow::domain::scout::{EarningsEntry, EarningsKind, Scout};
use campus_escrow::error::{EscrowError, Result};
use campus_escrow::infrastructure::gateway::SimulatedGateway;
use campus_escrow::infrastructure::in_memory::{
    InMemoryDirectory, InMemoryOrderStore, InMemoryPayoutStore, InMemoryScoutStore, ManualClock,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub const SCOUT: UserId = UserId(1);
/// Recruited by `SCOUT`; sells desk, chair and lamp.
pub const SELLER: UserId = UserId(2);
pub const BUYER: UserId = UserId(3);
pub const OTHER_BUYER: UserId = UserId(4);
/// Recruited by `OTHER_BUYER`, who never becomes a scout.
pub const UNSCOUTED_SELLER: UserId = UserId(5);

pub const DESK_PRICE: u64 = 50_000;

/// An engine over in-memory stores, a manual clock and the simulated gateway.
pub struct Harness {
    pub engine: EscrowEngine,
    pub gateway: SimulatedGateway,
    pub clock: Arc<ManualClock>,
    pub orders: Arc<InMemoryOrderStore>,
    pub payouts: Arc<InMemoryPayoutStore>,
    pub directory: Arc<InMemoryDirectory>,
    next_txn: std::sync::atomic::AtomicU64,
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        gateway_timeout_ms: 200,
        ..EngineConfig::default()
    }
}

pub async fn harness() -> Harness {
    harness_with(test_config()).await
}

pub async fn harness_with(config: EngineConfig) -> Harness {
    harness_wrapping(
        config,
        |payouts| payouts as PayoutStoreRef,
        |scouts| scouts as ScoutStoreRef,
    )
    .await
}

/// Like [`harness_with`], but the engine sees the stores through the given
/// wrappers. The harness helpers keep reading the stores directly.
pub async fn harness_wrapping(
    config: EngineConfig,
    wrap_payouts: impl FnOnce(Arc<InMemoryPayoutStore>) -> PayoutStoreRef,
    wrap_scouts: impl FnOnce(Arc<InMemoryScoutStore>) -> ScoutStoreRef,
) -> Harness {
    let directory = Arc::new(InMemoryDirectory::new());
    let users = [
        (SCOUT, "Asha", None),
        (SELLER, "Ravi", Some(SCOUT)),
        (BUYER, "Meera", None),
        (OTHER_BUYER, "Kabir", None),
        (UNSCOUTED_SELLER, "Noor", Some(OTHER_BUYER)),
    ];
    for (id, name, referrer) in users {
        directory
            .add_user(User {
                id,
                name: name.to_string(),
                referrer,
            })
            .await;
    }
    let listings = [
        ("desk", SELLER, DESK_PRICE, ListingStatus::Active),
        ("chair", SELLER, 20_000, ListingStatus::Active),
        ("lamp", SELLER, 8_000, ListingStatus::Active),
        ("kettle", SCOUT, 10_000, ListingStatus::Active),
        ("books", UNSCOUTED_SELLER, 30_000, ListingStatus::Active),
        ("bike", BUYER, 400_000, ListingStatus::Sold),
    ];
    for (id, seller_id, price, status) in listings {
        directory
            .add_listing(Listing {
                id: ListingId::new(id),
                seller_id,
                price: Paise::new(price),
                status,
            })
            .await;
    }

    let orders = Arc::new(InMemoryOrderStore::new());
    let payouts = Arc::new(InMemoryPayoutStore::new());
    let gateway = SimulatedGateway::new(config.gateway.clone());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
    ));
    let engine = EscrowEngine::new(
        &config,
        EngineParts {
            orders: orders.clone(),
            payouts: wrap_payouts(payouts.clone()),
            scouts: wrap_scouts(Arc::new(InMemoryScoutStore::new())),
            listings: directory.clone(),
            users: directory.clone(),
            gateway: Arc::new(gateway.clone()),
            clock: clock.clone(),
        },
    );

    Harness {
        engine,
        gateway,
        clock,
        orders,
        payouts,
        directory,
        next_txn: std::sync::atomic::AtomicU64::new(1),
    }
}

impl Harness {
    pub fn txn(&self) -> String {
        let n = self
            .next_txn
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        format!("TXN-{n}")
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn place(&self, listing: &str, buyer: UserId) -> OrderId {
        self.engine
            .orders
            .create_order(&ListingId::new(listing), buyer, "Library steps")
            .await
            .unwrap()
            .order_id
    }

    pub async fn pay(&self, order_id: OrderId) -> PaymentApplication {
        let callback = self
            .gateway
            .signed_callback(order_id, &self.txn(), true)
            .unwrap();
        self.engine
            .orders
            .apply_payment_result(&callback)
            .await
            .unwrap()
    }

    pub async fn escrowed(&self, listing: &str, buyer: UserId) -> OrderId {
        let order_id = self.place(listing, buyer).await;
        assert_eq!(self.pay(order_id).await, PaymentApplication::Escrowed);
        order_id
    }

    pub async fn sold(&self, listing: &str, buyer: UserId) -> OrderId {
        let order_id = self.escrowed(listing, buyer).await;
        self.engine
            .orders
            .complete_order(order_id, buyer, None)
            .await
            .unwrap();
        order_id
    }

    /// `SCOUT` sells the kettle so they qualify, then enrolls.
    pub async fn enroll_scout(&self) -> ScoutId {
        self.sold("kettle", BUYER).await;
        self.engine.scouts.register_scout(SCOUT).await.unwrap()
    }

    /// What the out-of-band refund process does.
    pub async fn refund(&self, order_id: OrderId) {
        let mut order = self.orders.get(order_id).await.unwrap().unwrap();
        order.refund().unwrap();
        self.orders.store(order).await.unwrap();
    }

    pub async fn payouts_of(&self, user: UserId) -> Vec<Payout> {
        self.payouts.for_user(user).await.unwrap()
    }

    pub async fn bounties_of(&self, user: UserId) -> Vec<Payout> {
        self.payouts_of(user)
            .await
            .into_iter()
            .filter(|p| p.payout_type == PayoutType::ReferralBounty)
            .collect()
    }

    pub async fn payout_for_order(&self, order_id: OrderId, kind: PayoutType) -> Payout {
        self.payouts
            .all()
            .await
            .unwrap()
            .into_iter()
            .find(|p| p.order_id == Some(order_id) && p.payout_type == kind)
            .unwrap()
    }
}

fn disk_error(what: &str) -> EscrowError {
    EscrowError::Io(io::Error::other(format!("simulated disk failure: {what}")))
}

/// Fails the first seller payout write, then stores normally.
pub struct FailFirstSellerPayout {
    inner: Arc<InMemoryPayoutStore>,
    tripped: AtomicBool,
}

impl FailFirstSellerPayout {
    pub fn wrap(inner: Arc<InMemoryPayoutStore>) -> PayoutStoreRef {
        Arc::new(Self {
            inner,
            tripped: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl PayoutStore for FailFirstSellerPayout {
    async fn store(&self, payout: Payout) -> Result<()> {
        if payout.payout_type == PayoutType::SellerPayout && !self.tripped.swap(true, Ordering::SeqCst) {
            return Err(disk_error("payout insert"));
        }
        self.inner.store(payout).await
    }

    async fn get(&self, id: PayoutId) -> Result<Option<Payout>> {
        self.inner.get(id).await
    }

    async fn with_status(&self, status: PayoutStatus) -> Result<Vec<Payout>> {
        self.inner.with_status(status).await
    }

    async fn for_user(&self, user: UserId) -> Result<Vec<Payout>> {
        self.inner.for_user(user).await
    }

    async fn all(&self) -> Result<Vec<Payout>> {
        self.inner.all().await
    }
}

/// Fails the first payout debit, then applies entries normally.
pub struct FailFirstDebit {
    inner: Arc<InMemoryScoutStore>,
    tripped: AtomicBool,
}

impl FailFirstDebit {
    pub fn wrap(inner: Arc<InMemoryScoutStore>) -> ScoutStoreRef {
        Arc::new(Self {
            inner,
            tripped: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl ScoutStore for FailFirstDebit {
    async fn insert(&self, scout: Scout) -> Result<bool> {
        self.inner.insert(scout).await
    }

    async fn get(&self, id: ScoutId) -> Result<Option<Scout>> {
        self.inner.get(id).await
    }

    async fn by_user(&self, user: UserId) -> Result<Option<Scout>> {
        self.inner.by_user(user).await
    }

    async fn all(&self) -> Result<Vec<Scout>> {
        self.inner.all().await
    }

    async fn apply_earnings(&self, entry: EarningsEntry) -> Result<Option<Scout>> {
        if matches!(entry.kind, EarningsKind::PayoutDebit { .. })
            && !self.tripped.swap(true, Ordering::SeqCst)
        {
            return Err(disk_error("earnings write"));
        }
        self.inner.apply_earnings(entry).await
    }

    async fn entries(&self, id: ScoutId) -> Result<Vec<EarningsEntry>> {
        self.inner.entries(id).await
    }
}
