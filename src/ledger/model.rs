use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, Months, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Root aggregate of all accounting state for the process. One instance is
/// constructed at startup and owned by the composition root; every read and
/// write goes through the manager's lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    pub reset_epoch: DateTime<Utc>,
    pub symbols_processed: u64,
    pub symbols_monthly_cap: u64,
    pub servers: Vec<Server>,
    pub blacklist: Vec<BlacklistEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub id: u64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub members: Vec<User>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub daily_quota: u32,
    pub daily_accrued: u32,
    pub monthly_quota: u32,
    pub monthly_accrued: u32,
    pub total_operations: u64,
    pub last_operation_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub langs_from: BTreeSet<String>,
    pub langs_to: BTreeSet<String>,
}

/// A ban is active while `ban_start <= now < ban_end`. Expired entries may
/// linger until pruned; their presence alone never counts as an active ban.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub user_id: u64,
    pub ban_start: DateTime<Utc>,
    pub ban_end: DateTime<Utc>,
}

impl Ledger {
    pub fn new(reset_epoch: DateTime<Utc>, symbols_monthly_cap: u64) -> Self {
        Self {
            reset_epoch,
            symbols_processed: 0,
            symbols_monthly_cap,
            servers: Vec::new(),
            blacklist: Vec::new(),
        }
    }

    pub fn server(&self, server_id: u64) -> Option<&Server> {
        self.servers
            .binary_search_by_key(&server_id, |s| s.id)
            .ok()
            .map(|idx| &self.servers[idx])
    }

    pub fn server_mut(&mut self, server_id: u64) -> Option<&mut Server> {
        self.servers
            .binary_search_by_key(&server_id, |s| s.id)
            .ok()
            .map(|idx| &mut self.servers[idx])
    }

    /// Inserts the server at its sorted position if absent. Returns whether a
    /// new entry was created.
    pub fn ensure_server(&mut self, server_id: u64, name: &str, now: DateTime<Utc>) -> bool {
        match self.servers.binary_search_by_key(&server_id, |s| s.id) {
            Ok(_) => false,
            Err(idx) => {
                self.servers.insert(
                    idx,
                    Server {
                        id: server_id,
                        name: name.to_string(),
                        created_at: now,
                        members: Vec::new(),
                    },
                );
                true
            }
        }
    }

    pub fn find_user(&self, user_id: u64) -> Option<&User> {
        self.servers.iter().find_map(|s| s.member(user_id))
    }

    pub fn user_count(&self) -> usize {
        self.servers.iter().map(|s| s.members.len()).sum()
    }

    pub fn ban_entry(&self, user_id: u64) -> Option<&BlacklistEntry> {
        self.blacklist.iter().find(|e| e.user_id == user_id)
    }

    pub fn is_banned(&self, user_id: u64, now: DateTime<Utc>) -> bool {
        self.ban_entry(user_id).is_some_and(|e| e.is_active(now))
    }

    /// Inserts or replaces the blacklist entry for `user_id`, keeping user ids
    /// unique across the set.
    pub fn ban(&mut self, user_id: u64, now: DateTime<Utc>, window: Duration) -> BlacklistEntry {
        let entry = BlacklistEntry {
            user_id,
            ban_start: now,
            ban_end: now + window,
        };
        match self.blacklist.iter_mut().find(|e| e.user_id == user_id) {
            Some(existing) => *existing = entry.clone(),
            None => self.blacklist.push(entry.clone()),
        }
        entry
    }

    pub fn unban(&mut self, user_id: u64) -> bool {
        let before = self.blacklist.len();
        self.blacklist.retain(|e| e.user_id != user_id);
        self.blacklist.len() != before
    }

    pub fn prune_expired_bans(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.blacklist.len();
        self.blacklist.retain(|e| now < e.ban_end);
        before - self.blacklist.len()
    }
}

impl Server {
    pub fn member(&self, user_id: u64) -> Option<&User> {
        self.members
            .binary_search_by_key(&user_id, |u| u.id)
            .ok()
            .map(|idx| &self.members[idx])
    }

    /// Looks the member up by id, inserting a freshly created one at its
    /// sorted position when absent.
    pub fn member_or_insert_with(
        &mut self,
        user_id: u64,
        create: impl FnOnce() -> User,
    ) -> &mut User {
        let idx = match self.members.binary_search_by_key(&user_id, |u| u.id) {
            Ok(idx) => idx,
            Err(idx) => {
                self.members.insert(idx, create());
                idx
            }
        };
        &mut self.members[idx]
    }
}

impl User {
    pub fn new(
        id: u64,
        username: &str,
        daily_quota: u32,
        monthly_quota: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            username: username.to_string(),
            daily_quota,
            daily_accrued: 0,
            monthly_quota,
            monthly_accrued: 0,
            total_operations: 0,
            last_operation_at: now,
            created_at: now,
            langs_from: BTreeSet::new(),
            langs_to: BTreeSet::new(),
        }
    }

    /// Daily accrual as the evaluator sees it: a counter whose last operation
    /// fell on an earlier UTC date has lapsed and reads as zero.
    pub fn effective_daily_accrued(&self, now: DateTime<Utc>) -> u32 {
        if same_utc_day(self.last_operation_at, now) {
            self.daily_accrued
        } else {
            0
        }
    }

    pub fn effective_monthly_accrued(&self, now: DateTime<Utc>) -> u32 {
        if same_utc_month(self.last_operation_at, now) {
            self.monthly_accrued
        } else {
            0
        }
    }

    /// Zeroes any accrual counter whose window has lapsed since the last
    /// recorded operation. Called by the recorder before incrementing.
    pub fn roll_stale_windows(&mut self, now: DateTime<Utc>) {
        if !same_utc_day(self.last_operation_at, now) {
            self.daily_accrued = 0;
        }
        if !same_utc_month(self.last_operation_at, now) {
            self.monthly_accrued = 0;
        }
    }

    /// One line per field, in reporting order.
    pub fn stats_text(&self) -> String {
        let langs_from = self.langs_from.iter().cloned().collect::<Vec<_>>().join(", ");
        let langs_to = self.langs_to.iter().cloned().collect::<Vec<_>>().join(", ");
        format!(
            "User: {}\n\
             Daily Quota: {}\n\
             Daily Accrued: {}\n\
             Monthly Quota: {}\n\
             Monthly Accrued: {}\n\
             Total Operations: {}\n\
             Last Operation: {}\n\
             Source Languages: {}\n\
             Target Languages: {}\n",
            self.username,
            self.daily_quota,
            self.daily_accrued,
            self.monthly_quota,
            self.monthly_accrued,
            self.total_operations,
            self.last_operation_at.to_rfc2822(),
            langs_from,
            langs_to,
        )
    }
}

impl BlacklistEntry {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.ban_start <= now && now < self.ban_end
    }
}

pub(crate) fn same_utc_day(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.date_naive() == b.date_naive()
}

pub(crate) fn same_utc_month(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.year() == b.year() && a.month() == b.month()
}

pub fn first_instant_of_next_month(now: DateTime<Utc>) -> DateTime<Utc> {
    let first = now
        .date_naive()
        .with_day(1)
        .expect("day 1 exists in every month");
    let next = first
        .checked_add_months(Months::new(1))
        .expect("calendar month addition in range");
    Utc.from_utc_datetime(&next.and_time(NaiveTime::MIN))
}

pub fn add_one_month(at: DateTime<Utc>) -> DateTime<Utc> {
    at.checked_add_months(Months::new(1))
        .expect("calendar month addition in range")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, 0, 0).unwrap()
    }

    #[test]
    fn ensure_server_inserts_sorted_and_is_idempotent() {
        let now = at(2026, 8, 5, 10);
        let mut ledger = Ledger::new(first_instant_of_next_month(now), 500_000);

        assert!(ledger.ensure_server(30, "c", now));
        assert!(ledger.ensure_server(10, "a", now));
        assert!(ledger.ensure_server(20, "b", now));
        assert!(!ledger.ensure_server(20, "b again", now));

        let ids: Vec<u64> = ledger.servers.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![10, 20, 30]);
        assert_eq!(ledger.server(20).unwrap().name, "b");
    }

    #[test]
    fn member_or_insert_with_keeps_members_sorted() {
        let now = at(2026, 8, 5, 10);
        let mut server = Server {
            id: 1,
            name: "guild".into(),
            created_at: now,
            members: Vec::new(),
        };

        for id in [9, 3, 7, 3, 1] {
            server.member_or_insert_with(id, || User::new(id, "u", 30, 1000, now));
        }

        let ids: Vec<u64> = server.members.iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![1, 3, 7, 9]);
    }

    #[test]
    fn ban_window_start_inclusive_end_exclusive() {
        let start = at(2026, 8, 1, 0);
        let entry = BlacklistEntry {
            user_id: 7,
            ban_start: start,
            ban_end: start + Duration::days(7),
        };

        assert!(entry.is_active(start));
        assert!(entry.is_active(start + Duration::days(6)));
        assert!(!entry.is_active(start + Duration::days(7)));
        assert!(!entry.is_active(start - Duration::seconds(1)));
    }

    #[test]
    fn ban_replaces_existing_entry_for_same_user() {
        let now = at(2026, 8, 5, 10);
        let mut ledger = Ledger::new(first_instant_of_next_month(now), 500_000);

        ledger.ban(7, now, Duration::days(7));
        ledger.ban(7, now + Duration::days(1), Duration::days(7));

        assert_eq!(ledger.blacklist.len(), 1);
        assert_eq!(ledger.blacklist[0].ban_start, now + Duration::days(1));
    }

    #[test]
    fn prune_drops_only_expired_entries() {
        let now = at(2026, 8, 5, 10);
        let mut ledger = Ledger::new(first_instant_of_next_month(now), 500_000);
        ledger.ban(1, now - Duration::days(10), Duration::days(7));
        ledger.ban(2, now, Duration::days(7));

        assert_eq!(ledger.prune_expired_bans(now), 1);
        assert!(ledger.ban_entry(1).is_none());
        assert!(ledger.is_banned(2, now));
    }

    #[test]
    fn same_day_of_month_across_months_is_a_different_day() {
        assert!(!same_utc_day(at(2026, 7, 5, 10), at(2026, 8, 5, 10)));
        assert!(same_utc_day(at(2026, 8, 5, 1), at(2026, 8, 5, 23)));
        assert!(!same_utc_month(at(2025, 8, 5, 10), at(2026, 8, 5, 10)));
    }

    #[test]
    fn stale_windows_read_as_zero_and_roll_on_mutation() {
        let earlier = at(2026, 7, 31, 23);
        let now = at(2026, 8, 1, 0);
        let mut user = User::new(7, "alice", 30, 1000, earlier);
        user.daily_accrued = 30;
        user.monthly_accrued = 500;

        assert_eq!(user.effective_daily_accrued(now), 0);
        assert_eq!(user.effective_monthly_accrued(now), 0);
        assert_eq!(user.effective_daily_accrued(earlier), 30);

        user.roll_stale_windows(now);
        assert_eq!(user.daily_accrued, 0);
        assert_eq!(user.monthly_accrued, 0);
    }

    #[test]
    fn daily_roll_within_a_month_preserves_monthly_accrual() {
        let earlier = at(2026, 8, 3, 12);
        let now = at(2026, 8, 5, 10);
        let mut user = User::new(7, "alice", 30, 1000, earlier);
        user.daily_accrued = 12;
        user.monthly_accrued = 40;

        user.roll_stale_windows(now);
        assert_eq!(user.daily_accrued, 0);
        assert_eq!(user.monthly_accrued, 40);
    }

    #[test]
    fn next_month_boundary_is_first_instant() {
        assert_eq!(
            first_instant_of_next_month(at(2026, 8, 5, 10)),
            at(2026, 9, 1, 0)
        );
        assert_eq!(
            first_instant_of_next_month(at(2026, 12, 31, 23)),
            at(2027, 1, 1, 0)
        );
        assert_eq!(add_one_month(at(2026, 8, 1, 0)), at(2026, 9, 1, 0));
    }

    #[test]
    fn stats_text_lists_fields_in_reporting_order() {
        let now = at(2026, 8, 5, 10);
        let mut user = User::new(7, "alice", 30, 1000, now);
        user.langs_from.insert("ja".into());
        user.langs_from.insert("en".into());
        user.langs_to.insert("en".into());
        user.total_operations = 2;
        user.daily_accrued = 2;
        user.monthly_accrued = 2;

        let text = user.stats_text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "User: alice");
        assert_eq!(lines[1], "Daily Quota: 30");
        assert_eq!(lines[2], "Daily Accrued: 2");
        assert_eq!(lines[3], "Monthly Quota: 1000");
        assert_eq!(lines[4], "Monthly Accrued: 2");
        assert_eq!(lines[5], "Total Operations: 2");
        assert!(lines[6].starts_with("Last Operation: "));
        assert_eq!(lines[7], "Source Languages: en, ja");
        assert_eq!(lines[8], "Target Languages: en");
    }
}
