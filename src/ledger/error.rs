use chrono::{DateTime, Utc};
use thiserror::Error;

/// Reasons the evaluator denies a chargeable operation. Unknown entities fail
/// closed: nothing ever granted them quota.
#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("server {0} is not tracked")]
    UnknownServer(u64),
    #[error("user {user_id} is not tracked in server {server_id}")]
    UnknownUser { server_id: u64, user_id: u64 },
    #[error("user {user_id} is banned until {until}")]
    Banned { user_id: u64, until: DateTime<Utc> },
    #[error("daily quota exhausted for user {user_id}: limit={limit}, accrued={accrued}")]
    DailyLimitExceeded { user_id: u64, limit: u32, accrued: u32 },
    #[error("monthly quota exhausted for user {user_id}: limit={limit}, accrued={accrued}")]
    MonthlyLimitExceeded { user_id: u64, limit: u32, accrued: u32 },
}

impl QuotaError {
    pub fn code(&self) -> &'static str {
        match self {
            QuotaError::UnknownServer(_) => "unknown_server",
            QuotaError::UnknownUser { .. } => "unknown_user",
            QuotaError::Banned { .. } => "banned",
            QuotaError::DailyLimitExceeded { .. } => "daily_limit_exceeded",
            QuotaError::MonthlyLimitExceeded { .. } => "monthly_limit_exceeded",
        }
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("server {0} is not registered")]
    UnregisteredServer(u64),
}
