pub mod error;
pub mod manager;
pub mod model;

pub use error::{LedgerError, QuotaError};
pub use manager::{LedgerManager, LedgerSummary, ServerUserEntry};
pub use model::{first_instant_of_next_month, BlacklistEntry, Ledger, Server, User};
