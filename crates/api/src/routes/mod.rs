pub mod health;
pub mod metrics;
pub mod payments;
pub mod proposals;
pub mod requests;
pub mod sessions;
