use super::bounty::ReferralBountyTrigger;
use super::orders::OrderLedger;
use super::payouts::PayoutLedger;
use super::scouts::ScoutRegistry;
use super::settlement::SettlementScheduler;
use crate::config::EngineConfig;
use crate::domain::ports::{
    ClockRef, ListingDirectoryRef, OrderStoreRef, PaymentGatewayRef, PayoutStoreRef,
    ScoutStoreRef, UserDirectoryRef,
};

/// The collaborators the engine is built from.
#[derive(Clone)]
pub struct EngineParts {
    pub orders: OrderStoreRef,
    pub payouts: PayoutStoreRef,
    pub scouts: ScoutStoreRef,
    pub listings: ListingDirectoryRef,
    pub users: UserDirectoryRef,
    pub gateway: PaymentGatewayRef,
    pub clock: ClockRef,
}

/// The escrow and settlement engine.
///
/// `EscrowEngine` wires the ledgers, the bounty trigger and the scheduler to
/// one set of stores, so every entry point shares the same row locks.
#[derive(Clone)]
pub struct EscrowEngine {
    pub orders: OrderLedger,
    pub payouts: PayoutLedger,
    pub scouts: ScoutRegistry,
    pub settlement: SettlementScheduler,
}

impl EscrowEngine {
    pub fn new(config: &EngineConfig, parts: EngineParts) -> Self {
        let payouts = PayoutLedger::new(
            parts.payouts,
            parts.orders.clone(),
            parts.scouts.clone(),
            parts.users.clone(),
            parts.clock.clone(),
        );
        let bounty = ReferralBountyTrigger::new(
            parts.users.clone(),
            parts.scouts.clone(),
            payouts.clone(),
            parts.clock.clone(),
            config.referral_bounty(),
        );
        let orders = OrderLedger::new(
            parts.orders.clone(),
            parts.listings,
            parts.gateway.clone(),
            payouts.clone(),
            bounty,
            parts.clock.clone(),
            config.fee_schedule(),
            config.return_url.clone(),
            config.gateway_timeout(),
        );
        let scouts = ScoutRegistry::new(
            parts.scouts,
            parts.orders,
            parts.users,
            payouts.clone(),
            parts.clock.clone(),
            config.referral_bounty(),
        );
        let settlement = SettlementScheduler::new(
            orders.clone(),
            payouts.clone(),
            parts.gateway,
            parts.clock,
            config.maturation_window(),
            config.stuck_processing_after(),
            config.gateway_timeout(),
            config.pending_batch_size,
        );

        Self {
            orders,
            payouts,
            scouts,
            settlement,
        }
    }
}
