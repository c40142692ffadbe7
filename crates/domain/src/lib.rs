//! Order lifecycle for the tutoring marketplace.
//!
//! This crate provides:
//! - Request, proposal and session entities with their state machines
//! - The `OrderRepository` trait with in-memory and PostgreSQL backends
//! - `OrderService`, which applies ownership checks on top of the repository

pub mod error;
pub mod memory;
pub mod order;
pub mod postgres;
pub mod repository;

pub use error::{DomainError, Result};
pub use memory::InMemoryOrderRepository;
pub use order::{
    CascadeWrite, InviteTeachers, MIN_SESSION_MINUTES, OpenRequest, OrderError, OrderService,
    PaymentStatus, ProposalStatus, Quote, RequestStatus, ScheduleSession, Session,
    StudentRequest, SubmitQuote, TeacherProposal,
};
pub use postgres::PostgresOrderRepository;
pub use repository::{Acceptance, OrderRepository};
