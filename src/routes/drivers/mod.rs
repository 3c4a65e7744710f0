pub mod deliveries;
pub mod profile;
