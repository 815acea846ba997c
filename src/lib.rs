pub mod api;
pub mod config;
pub mod ledger;
pub mod storage;

pub use api::{create_router, ApiState};
pub use config::LedgerConfig;
pub use ledger::{LedgerError, LedgerManager, QuotaError};
pub use storage::{LedgerStore, StorageError};
