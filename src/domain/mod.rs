//! Entities, value objects and the ports the engine talks through.

pub mod fees;
pub mod ids;
pub mod money;
pub mod order;
pub mod payout;
pub mod ports;
pub mod scout;
