use super::bounty::{CompletedSale, ReferralBountyTrigger};
use super::locks::KeyedLocks;
use super::payouts::{NewPayout, PayoutLedger};
use crate::domain::fees::FeeSchedule;
use crate::domain::ids::{ListingId, OrderId, UserId};
use crate::domain::money::MoneyView;
use crate::domain::order::{Meeting, Order, OrderStatus};
use crate::domain::payout::PayoutType;
use crate::domain::ports::{
    ClockRef, ListingDirectoryRef, OrderStoreRef, Party, PaymentGatewayRef, PaymentOutcome,
    PaymentRequest, RawNotification,
};
use crate::error::{EscrowError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderReceipt {
    pub order_id: OrderId,
    pub total: MoneyView,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentRedirect {
    pub order_id: OrderId,
    pub payment_url: String,
}

/// Result of applying an authenticated payment callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentApplication {
    Escrowed,
    /// The order had already moved past PENDING; nothing changed.
    Duplicate,
    /// The gateway reported a failed payment. The order stays PENDING.
    Declined { code: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionReceipt {
    pub order_id: OrderId,
    pub seller_payout: MoneyView,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderView {
    pub order_id: OrderId,
    pub listing_id: ListingId,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub status: OrderStatus,
    pub item_price: MoneyView,
    pub platform_fee: MoneyView,
    pub gateway_fee: MoneyView,
    pub total: MoneyView,
    pub payment_reference: Option<String>,
    pub meeting: Meeting,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Order> for OrderView {
    fn from(o: &Order) -> Self {
        Self {
            order_id: o.id,
            listing_id: o.listing_id.clone(),
            buyer_id: o.buyer_id,
            seller_id: o.seller_id,
            status: o.status,
            item_price: o.item_price.into(),
            platform_fee: o.platform_fee.into(),
            gateway_fee: o.gateway_fee.into(),
            total: o.total.into(),
            payment_reference: o.payment_reference.clone(),
            meeting: o.meeting.clone(),
            created_at: o.created_at,
            completed_at: o.completed_at,
        }
    }
}

/// Owns orders and their state machine.
///
/// Transitions on one order are serialized by its row lock. Completion also
/// takes the seller's lock (always after the order's) so the first-sale
/// check sees a stable count.
#[derive(Clone)]
pub struct OrderLedger {
    orders: OrderStoreRef,
    listings: ListingDirectoryRef,
    gateway: PaymentGatewayRef,
    payouts: PayoutLedger,
    bounty: ReferralBountyTrigger,
    clock: ClockRef,
    fees: FeeSchedule,
    return_url: String,
    gateway_timeout: Duration,
    order_locks: Arc<KeyedLocks<OrderId>>,
    seller_locks: Arc<KeyedLocks<UserId>>,
}

impl OrderLedger {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orders: OrderStoreRef,
        listings: ListingDirectoryRef,
        gateway: PaymentGatewayRef,
        payouts: PayoutLedger,
        bounty: ReferralBountyTrigger,
        clock: ClockRef,
        fees: FeeSchedule,
        return_url: String,
        gateway_timeout: Duration,
    ) -> Self {
        Self {
            orders,
            listings,
            gateway,
            payouts,
            bounty,
            clock,
            fees,
            return_url,
            gateway_timeout,
            order_locks: Arc::new(KeyedLocks::new()),
            seller_locks: Arc::new(KeyedLocks::new()),
        }
    }

    async fn load(&self, id: OrderId) -> Result<Order> {
        self.orders
            .get(id)
            .await?
            .ok_or_else(|| EscrowError::not_found("order", id))
    }

    pub async fn create_order(
        &self,
        listing_id: &ListingId,
        buyer_id: UserId,
        meeting_location: &str,
    ) -> Result<OrderReceipt> {
        let listing = self
            .listings
            .listing(listing_id)
            .await?
            .ok_or_else(|| EscrowError::not_found("listing", listing_id))?;
        if !listing.is_purchasable() {
            return Err(EscrowError::invalid_state(
                "listing",
                listing_id,
                listing.status,
                "purchase",
            ));
        }

        let fees = self.fees.compute(listing.price)?;
        let order = Order::new(
            listing.id,
            buyer_id,
            listing.seller_id,
            fees,
            meeting_location,
            self.clock.now(),
        )?;
        self.orders.store(order.clone()).await?;

        info!(
            order_id = %order.id,
            listing_id = %order.listing_id,
            buyer_id = %buyer_id,
            total = order.total.0,
            "Order created"
        );
        Ok(OrderReceipt {
            order_id: order.id,
            total: order.total.into(),
        })
    }

    /// Asks the gateway for a checkout URL. The order is not modified, so a
    /// failed or timed-out attempt can simply be repeated.
    pub async fn initiate_payment(&self, order_id: OrderId) -> Result<PaymentRedirect> {
        let order = self.load(order_id).await?;
        if order.status != OrderStatus::Pending {
            return Err(EscrowError::invalid_state(
                "order",
                order_id,
                order.status,
                "initiate payment",
            ));
        }

        let request = PaymentRequest {
            order_id,
            amount: order.total,
            return_url: format!("{}?order_id={}", self.return_url, order_id),
        };
        let payment_url = tokio::time::timeout(self.gateway_timeout, self.gateway.initiate(request))
            .await
            .map_err(|_| {
                warn!(order_id = %order_id, "Payment initiation timed out");
                EscrowError::Gateway(format!(
                    "payment initiation timed out after {:?}",
                    self.gateway_timeout
                ))
            })??;

        info!(order_id = %order_id, "Payment initiated");
        Ok(PaymentRedirect {
            order_id,
            payment_url,
        })
    }

    /// Applies a gateway callback. Safe to call any number of times with the
    /// same notification.
    pub async fn apply_payment_result(
        &self,
        notification: &RawNotification,
    ) -> Result<PaymentApplication> {
        let event = self.gateway.authenticate_notification(notification)?;
        let reference = event.merchant_reference.ok_or_else(|| {
            EscrowError::InvalidOperation("Missing merchantTransactionId".to_string())
        })?;
        let order_id: OrderId = reference
            .parse()
            .map_err(|_| EscrowError::not_found("order", &reference))?;

        let _guard = self.order_locks.lock(order_id).await;
        let mut order = self.load(order_id).await?;

        match event.outcome {
            PaymentOutcome::Succeeded if order.status != OrderStatus::Pending => {
                info!(order_id = %order_id, status = %order.status, "Duplicate payment notification ignored");
                Ok(PaymentApplication::Duplicate)
            }
            PaymentOutcome::Succeeded => {
                order.escrow(event.transaction_id)?;
                self.orders.store(order).await?;
                info!(order_id = %order_id, "Payment escrowed");
                Ok(PaymentApplication::Escrowed)
            }
            PaymentOutcome::Failed { code } => {
                if order.status == OrderStatus::Pending && event.transaction_id.is_some() {
                    order.payment_reference = event.transaction_id;
                    self.orders.store(order).await?;
                }
                warn!(order_id = %order_id, code = %code, "Payment declined");
                Ok(PaymentApplication::Declined { code })
            }
        }
    }

    /// The buyer confirms the handover. Completion is committed first; the
    /// referral bounty and the seller payout follow as separate steps whose
    /// failures are logged and never undo it. A seller payout lost here is
    /// recreated by [`OrderLedger::recover_seller_payouts`].
    pub async fn complete_order(
        &self,
        order_id: OrderId,
        caller: UserId,
        meeting_time: Option<DateTime<Utc>>,
    ) -> Result<CompletionReceipt> {
        let _order_guard = self.order_locks.lock(order_id).await;
        let mut order = self.load(order_id).await?;
        if order.buyer_id != caller {
            return Err(EscrowError::Forbidden(
                "You can only complete your own orders".to_string(),
            ));
        }

        let seller_guard = self.seller_locks.lock(order.seller_id).await;
        order.complete(self.clock.now(), meeting_time)?;
        self.orders.store(order.clone()).await?;
        let seller_payout = order.seller_payout();
        info!(
            order_id = %order_id,
            seller_id = %order.seller_id,
            seller_payout = seller_payout.0,
            "Order completed"
        );

        match self
            .orders
            .count_completed(order.seller_id, Party::Seller)
            .await
        {
            Ok(count) => {
                let sale = CompletedSale {
                    order_id,
                    seller_id: order.seller_id,
                    sale_amount: order.item_price,
                    seller_completed_sales: count,
                };
                if let Err(e) = self.bounty.on_order_completed(&sale).await {
                    error!(order_id = %order_id, seller_id = %order.seller_id, error = %e, "Referral bounty failed");
                }
            }
            Err(e) => {
                error!(order_id = %order_id, error = %e, "Could not count seller sales; bounty skipped");
            }
        }
        drop(seller_guard);

        if let Err(e) = self.request_seller_payout(&order).await {
            error!(order_id = %order_id, seller_id = %order.seller_id, error = %e, "Seller payout request failed; left for recovery");
        }

        Ok(CompletionReceipt {
            order_id,
            seller_payout: seller_payout.into(),
        })
    }

    /// Creates the order's seller payout unless one exists. Callers hold the
    /// order lock. Returns `false` when there was nothing to do.
    async fn request_seller_payout(&self, order: &Order) -> Result<bool> {
        let already_owed = self
            .payouts
            .store()
            .for_user(order.seller_id)
            .await?
            .iter()
            .any(|p| p.order_id == Some(order.id) && p.payout_type == PayoutType::SellerPayout);
        if already_owed {
            return Ok(false);
        }

        let amount = i64::try_from(order.seller_payout().0)
            .map_err(|_| EscrowError::InvalidOperation("Seller payout out of range".to_string()))?;
        self.payouts
            .create_payout_request(NewPayout {
                user_id: order.seller_id,
                amount,
                payout_type: PayoutType::SellerPayout,
                scout_id: None,
                order_id: Some(order.id),
                immediate: false,
            })
            .await?;
        Ok(true)
    }

    /// Creates the seller payout of every COMPLETED order that has none.
    /// Running it again finds nothing new.
    pub async fn recover_seller_payouts(&self) -> Result<usize> {
        let mut recovered = 0;
        for order in self.orders.by_status(OrderStatus::Completed).await? {
            let _guard = self.order_locks.lock(order.id).await;
            match self.request_seller_payout(&order).await {
                Ok(true) => {
                    warn!(order_id = %order.id, seller_id = %order.seller_id, "Missing seller payout recreated");
                    recovered += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    error!(order_id = %order.id, error = %e, "Seller payout recovery failed");
                }
            }
        }
        Ok(recovered)
    }

    /// Full order details for a party to the order.
    pub async fn get_order(&self, order_id: OrderId, caller: UserId) -> Result<OrderView> {
        let order = self.load(order_id).await?;
        if !order.is_party(caller) {
            return Err(EscrowError::Forbidden(
                "You can only view your own orders".to_string(),
            ));
        }
        Ok(OrderView::from(&order))
    }

    pub async fn list_orders_for_user(&self, user: UserId) -> Result<Vec<OrderView>> {
        let orders = self.orders.for_user(user).await?;
        Ok(orders.iter().map(OrderView::from).collect())
    }

    /// Status check for the payment return page. Reveals nothing but the state.
    pub async fn order_status(&self, order_id: OrderId) -> Result<OrderStatus> {
        Ok(self.load(order_id).await?.status)
    }

    pub fn prune_locks(&self) {
        self.order_locks.prune();
        self.seller_locks.prune();
    }
}
