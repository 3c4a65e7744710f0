pub mod orders;
pub mod refunds;
