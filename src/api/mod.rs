use std::sync::Arc;

pub mod handlers;
pub mod router;
pub mod types;

pub use router::create_router;
pub use types::*;

use crate::config::LedgerConfig;
use crate::ledger::LedgerManager;

pub struct ApiState {
    pub ledger: LedgerManager,
    pub config: Arc<LedgerConfig>,
}

impl ApiState {
    pub fn new(ledger: LedgerManager, config: LedgerConfig) -> Self {
        Self {
            ledger,
            config: Arc::new(config),
        }
    }
}
