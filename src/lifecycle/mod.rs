//! Pure state machines for orders, deliveries and refund requests.
//!
//! Nothing in here touches storage; services consult these tables before
//! issuing the compare-and-set write that makes a transition durable.

pub mod delivery;
pub mod order;
pub mod refund;
