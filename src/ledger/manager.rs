use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::LedgerConfig;
use crate::storage::{LedgerStore, StorageError};

use super::error::{LedgerError, QuotaError};
use super::model::{add_one_month, first_instant_of_next_month, BlacklistEntry, Ledger, User};

#[derive(Debug, Clone, Copy)]
struct QuotaDefaults {
    daily: u32,
    monthly: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerUserEntry {
    pub username: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerSummary {
    pub symbols_processed: u64,
    pub symbols_monthly_cap: u64,
    pub reset_epoch: DateTime<Utc>,
    pub servers: usize,
    pub users: usize,
}

/// Shared handle over the process-wide ledger. All reads take the read guard,
/// every mutation holds the write guard for its entire sequence, so the sorted
/// membership indices stay consistent under concurrent request handling.
#[derive(Clone)]
pub struct LedgerManager {
    ledger: Arc<RwLock<Ledger>>,
    store: Arc<LedgerStore>,
    dirty: Arc<AtomicBool>,
    defaults: QuotaDefaults,
    ban_window: chrono::Duration,
    flush_interval: Duration,
}

impl LedgerManager {
    /// Loads the persisted ledger, or starts a fresh one when nothing usable
    /// is stored. A malformed record is treated the same as an absent one so
    /// a corrupt row can never wedge startup.
    pub fn new(store: Arc<LedgerStore>, config: &LedgerConfig) -> Self {
        let ledger = match store.load() {
            Ok(Some(ledger)) => {
                info!(
                    servers = ledger.servers.len(),
                    users = ledger.user_count(),
                    symbols_processed = ledger.symbols_processed,
                    "restored ledger from storage"
                );
                ledger
            }
            Ok(None) => {
                info!("no persisted ledger found, starting fresh");
                Ledger::new(
                    first_instant_of_next_month(Utc::now()),
                    config.symbols_monthly_cap,
                )
            }
            Err(err) => {
                warn!(error = %err, "failed to restore ledger, starting fresh");
                Ledger::new(
                    first_instant_of_next_month(Utc::now()),
                    config.symbols_monthly_cap,
                )
            }
        };

        Self {
            ledger: Arc::new(RwLock::new(ledger)),
            store,
            dirty: Arc::new(AtomicBool::new(false)),
            defaults: QuotaDefaults {
                daily: config.default_daily_quota,
                monthly: config.default_monthly_quota,
            },
            ban_window: chrono::Duration::days(config.ban_window_days as i64),
            flush_interval: Duration::from_secs(config.flush_interval_secs),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Ledger> {
        self.ledger.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Ledger> {
        self.ledger.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Registers a server on first observed activity. No-op when it already
    /// exists.
    pub fn ensure_server(&self, server_id: u64, name: &str) {
        let mut ledger = self.write();
        if ledger.ensure_server(server_id, name, Utc::now()) {
            drop(ledger);
            self.mark_dirty();
            info!(server_id, name, "registered server");
        }
    }

    /// Decides whether a chargeable operation may proceed. Pure read over a
    /// consistent snapshot; lapsed accrual windows read as zero without being
    /// mutated here.
    pub fn evaluate(&self, server_id: u64, user_id: u64) -> Result<(), QuotaError> {
        let now = Utc::now();
        let ledger = self.read();
        let server = ledger
            .server(server_id)
            .ok_or(QuotaError::UnknownServer(server_id))?;
        let user = server
            .member(user_id)
            .ok_or(QuotaError::UnknownUser { server_id, user_id })?;

        if let Some(entry) = ledger.ban_entry(user_id) {
            if entry.is_active(now) {
                return Err(QuotaError::Banned {
                    user_id,
                    until: entry.ban_end,
                });
            }
        }

        let monthly = user.effective_monthly_accrued(now);
        if monthly >= user.monthly_quota {
            return Err(QuotaError::MonthlyLimitExceeded {
                user_id,
                limit: user.monthly_quota,
                accrued: monthly,
            });
        }

        let daily = user.effective_daily_accrued(now);
        if daily >= user.daily_quota {
            return Err(QuotaError::DailyLimitExceeded {
                user_id,
                limit: user.daily_quota,
                accrued: daily,
            });
        }

        Ok(())
    }

    pub fn exceeds_quota_or_banned(&self, server_id: u64, user_id: u64) -> bool {
        self.evaluate(server_id, user_id).is_err()
    }

    /// Records one completed chargeable operation. The sole write path into
    /// per-user state: creates the user on first use, rolls lapsed accrual
    /// windows, then bumps counters and the global symbol total. The server
    /// must already be registered.
    pub fn record_operation(
        &self,
        server_id: u64,
        user_id: u64,
        username: &str,
        from_lang: &str,
        to_lang: &str,
        symbol_count: u64,
    ) -> Result<User, LedgerError> {
        let now = Utc::now();
        let defaults = self.defaults;
        let mut ledger = self.write();

        let server = ledger
            .server_mut(server_id)
            .ok_or(LedgerError::UnregisteredServer(server_id))?;
        let user = server.member_or_insert_with(user_id, || {
            User::new(user_id, username, defaults.daily, defaults.monthly, now)
        });

        user.roll_stale_windows(now);
        user.langs_from.insert(from_lang.to_string());
        user.langs_to.insert(to_lang.to_string());
        user.last_operation_at = now;
        user.total_operations = user.total_operations.saturating_add(1);
        user.daily_accrued = user.daily_accrued.saturating_add(1);
        user.monthly_accrued = user.monthly_accrued.saturating_add(1);
        let snapshot = user.clone();

        ledger.symbols_processed = ledger.symbols_processed.saturating_add(symbol_count);
        drop(ledger);

        self.mark_dirty();
        debug!(server_id, user_id, symbol_count, "recorded operation");
        Ok(snapshot)
    }

    pub fn ban_user(&self, user_id: u64) -> BlacklistEntry {
        let now = Utc::now();
        let entry = self.write().ban(user_id, now, self.ban_window);
        self.mark_dirty();
        info!(user_id, until = %entry.ban_end, "banned user");
        entry
    }

    pub fn unban_user(&self, user_id: u64) -> bool {
        let removed = self.write().unban(user_id);
        if removed {
            self.mark_dirty();
            info!(user_id, "unbanned user");
        }
        removed
    }

    pub fn prune_expired_bans(&self) -> usize {
        let pruned = self.write().prune_expired_bans(Utc::now());
        if pruned > 0 {
            self.mark_dirty();
            debug!(pruned, "pruned expired blacklist entries");
        }
        pruned
    }

    pub fn user_stats(&self, user_id: u64) -> Option<String> {
        self.read().find_user(user_id).map(User::stats_text)
    }

    /// Members of a server in id order, for the reporting surface.
    pub fn server_users(&self, server_id: u64) -> Option<Vec<ServerUserEntry>> {
        let ledger = self.read();
        let server = ledger.server(server_id)?;
        Some(
            server
                .members
                .iter()
                .map(|u| ServerUserEntry {
                    username: u.username.clone(),
                    created_at: u.created_at,
                })
                .collect(),
        )
    }

    pub fn summary(&self) -> LedgerSummary {
        let ledger = self.read();
        LedgerSummary {
            symbols_processed: ledger.symbols_processed,
            symbols_monthly_cap: ledger.symbols_monthly_cap,
            reset_epoch: ledger.reset_epoch,
            servers: ledger.servers.len(),
            users: ledger.user_count(),
        }
    }

    pub fn reset_epoch(&self) -> DateTime<Utc> {
        self.read().reset_epoch
    }

    /// Zeroes the global symbol counter and advances the reset epoch by one
    /// calendar month from its previous value, looping past any boundaries
    /// slept through while the process was down. Returns None when the epoch
    /// is still in the future (spurious wake).
    pub fn roll_monthly_window(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        let now = Utc::now();
        let mut ledger = self.write();
        if now < ledger.reset_epoch {
            return Ok(None);
        }
        while ledger.reset_epoch <= now {
            ledger.reset_epoch = add_one_month(ledger.reset_epoch);
        }
        ledger.symbols_processed = 0;
        let epoch = ledger.reset_epoch;
        let cap = ledger.symbols_monthly_cap;
        drop(ledger);

        if let Err(err) = self.store.save_meta(epoch, 0, cap) {
            // in-memory reset already took effect; the flush loop retries
            self.mark_dirty();
            return Err(err);
        }
        Ok(Some(epoch))
    }

    /// Flushes the ledger iff something changed since the last write. A failed
    /// flush re-marks the ledger dirty so the next interval retries.
    pub fn flush_if_dirty(&self) -> Result<bool, StorageError> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        if let Err(err) = self.flush_now() {
            self.mark_dirty();
            return Err(err);
        }
        Ok(true)
    }

    /// Unconditional flush of a consistent snapshot. The ledger lock is not
    /// held across the storage write.
    pub fn flush_now(&self) -> Result<(), StorageError> {
        let snapshot = self.read().clone();
        self.store.save(&snapshot)
    }

    /// Periodic flush loop: prune expired bans, write the ledger when dirty,
    /// and on shutdown perform one final unconditional flush.
    pub fn spawn_flush_task(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(manager.flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                manager.prune_expired_bans();
                match manager.flush_if_dirty() {
                    Ok(true) => debug!("flushed ledger to storage"),
                    Ok(false) => debug!("ledger unchanged, skipping flush"),
                    Err(err) => error!(error = %err, "failed to flush ledger"),
                }
            }

            match manager.flush_now() {
                Ok(()) => info!("final ledger flush complete"),
                Err(err) => error!(error = %err, "final ledger flush failed"),
            }
        })
    }

    /// Monthly reset loop: sleep until the reset epoch, zero the global
    /// counter, persist the delta, go back to waiting. Interruptible by the
    /// shutdown signal.
    pub fn spawn_reset_task(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                let wake_at = manager.reset_epoch();
                let until = (wake_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::select! {
                    _ = sleep(until) => {}
                    _ = shutdown.changed() => return,
                }
                match manager.roll_monthly_window() {
                    Ok(Some(epoch)) => {
                        info!(next_reset = %epoch, "zeroed global symbol counter")
                    }
                    Ok(None) => {}
                    Err(err) => error!(error = %err, "failed to persist monthly reset"),
                }
            }
        })
    }
}
