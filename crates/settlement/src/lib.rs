//! Payment settlement for tutoring sessions.
//!
//! A checkout records an `initialized` transaction and hands the student to
//! the gateway's hosted page. The outcome comes back through any of three
//! paths (signed webhook, user verification, reconciliation sweep), and all
//! of them funnel into [`SettlementEngine::settle`], which moves the
//! transaction out of `initialized` at most once and then marks the session
//! and request paid.

pub mod checkout;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod notification;
pub mod signature;
pub mod sweeper;
pub mod watcher;

pub use checkout::{CheckoutConfig, CheckoutHandle, CheckoutService};
pub use coordinator::{CoordinatorConfig, NotificationOutcome, PaymentCoordinator};
pub use engine::{CascadeReport, ReviewReason, SettleOutcome, Settlement, SettlementEngine};
pub use error::{Result, SettlementError};
pub use gateway::{
    Authorization, ChargeRequest, GatewayError, InMemoryGateway, PaymentGateway, PaystackClient,
    PaystackConfig, RemoteStatus, SharedGateway, VerifiedCharge,
};
pub use notification::Notification;
pub use signature::{SIGNATURE_HEADER, SignatureError, SignatureVerifier};
pub use sweeper::{SweepConfig, SweepReport, Sweeper};
pub use watcher::{
    HttpStatusSource, LocalStatusSource, StatusSnapshot, StatusSource, StatusWatcher,
    WatchConfig, WatchOutcome,
};
