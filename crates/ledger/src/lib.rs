pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod store;
pub mod transaction;

pub use common::{Currency, Money, TransactionId};
pub use error::{LedgerError, Result};
pub use memory::InMemoryLedger;
pub use postgres::PostgresLedger;
pub use query::UnresolvedQuery;
pub use store::{TransactionLedger, TransactionLedgerExt};
pub use transaction::{
    NewTransaction, Provider, Reference, ReferenceError, Transaction, TransactionLinks,
    TransactionStatus,
};
