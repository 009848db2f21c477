//! Application layer: the ledgers and processes that drive orders and payouts.
//!
//! `EscrowEngine` wires an `OrderLedger`, a `PayoutLedger`, the referral
//! bounty trigger, the scout registry and the settlement scheduler to one set
//! of stores. State transitions are serialized per row with `KeyedLocks`.

pub mod bounty;
pub mod engine;
pub mod locks;
pub mod orders;
pub mod payouts;
pub mod scouts;
pub mod settlement;
