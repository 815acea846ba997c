use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::ledger::{BlacklistEntry, Ledger, Server, User};

use super::error::StorageError;
use super::schema::init_database;
use super::LEDGER_DB_FILENAME;

/// Durable backing store: one SQLite file holding the singleton ledger row
/// plus per-server, per-user, and blacklist rows, so one user's counters can
/// be updated without touching siblings.
pub struct LedgerStore {
    conn: Mutex<Connection>,
}

impl LedgerStore {
    pub fn new(data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)?;
        let db_path = data_dir.join(LEDGER_DB_FILENAME);
        let is_new = !db_path.exists();
        let conn = Connection::open(&db_path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;

        if is_new {
            init_database(&conn)?;
            info!(path = %db_path.display(), "initialized ledger database");
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::ConnectionPoisoned)
    }

    /// Loads the full ledger graph, or None when no singleton row exists. A
    /// malformed row surfaces as `StorageError::Decode`; the caller treats
    /// that the same as not-found.
    pub fn load(&self) -> Result<Option<Ledger>, StorageError> {
        let conn = self.conn()?;

        let meta = conn
            .query_row(
                "SELECT reset_epoch, symbols_processed, symbols_monthly_cap FROM ledger WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((epoch_raw, symbols, cap)) = meta else {
            return Ok(None);
        };

        let mut ledger = Ledger {
            reset_epoch: parse_timestamp(&epoch_raw)?,
            symbols_processed: symbols as u64,
            symbols_monthly_cap: cap as u64,
            servers: Vec::new(),
            blacklist: Vec::new(),
        };

        let mut stmt = conn.prepare("SELECT id, name, created_at FROM servers ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        for row in rows {
            let (id, name, created_raw) = row?;
            ledger.servers.push(Server {
                id: id as u64,
                name,
                created_at: parse_timestamp(&created_raw)?,
                members: Vec::new(),
            });
        }

        let mut stmt = conn.prepare(
            "SELECT server_id, id, username, daily_quota, daily_accrued, monthly_quota, \
             monthly_accrued, total_operations, last_operation_at, langs_from, langs_to, \
             created_at FROM users ORDER BY server_id, id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, i64>(6)?,
                row.get::<_, i64>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, String>(9)?,
                row.get::<_, String>(10)?,
                row.get::<_, String>(11)?,
            ))
        })?;
        for row in rows {
            let (
                server_id,
                id,
                username,
                daily_quota,
                daily_accrued,
                monthly_quota,
                monthly_accrued,
                total_operations,
                last_op_raw,
                langs_from_raw,
                langs_to_raw,
                created_raw,
            ) = row?;
            let user = User {
                id: id as u64,
                username,
                daily_quota: daily_quota as u32,
                daily_accrued: daily_accrued as u32,
                monthly_quota: monthly_quota as u32,
                monthly_accrued: monthly_accrued as u32,
                total_operations: total_operations as u64,
                last_operation_at: parse_timestamp(&last_op_raw)?,
                created_at: parse_timestamp(&created_raw)?,
                langs_from: parse_lang_set(&langs_from_raw)?,
                langs_to: parse_lang_set(&langs_to_raw)?,
            };
            let server = ledger.server_mut(server_id as u64).ok_or_else(|| {
                StorageError::Decode(format!(
                    "user {id} references unknown server {server_id}"
                ))
            })?;
            server.members.push(user);
        }

        let mut stmt =
            conn.prepare("SELECT user_id, ban_start, ban_end FROM blacklist ORDER BY user_id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        for row in rows {
            let (user_id, start_raw, end_raw) = row?;
            ledger.blacklist.push(BlacklistEntry {
                user_id: user_id as u64,
                ban_start: parse_timestamp(&start_raw)?,
                ban_end: parse_timestamp(&end_raw)?,
            });
        }

        Ok(Some(ledger))
    }

    /// Writes the whole ledger graph in one transaction. Rows are upserted;
    /// blacklist rows absent from the ledger are removed.
    pub fn save(&self, ledger: &Ledger) -> Result<(), StorageError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        upsert_meta(
            &tx,
            ledger.reset_epoch,
            ledger.symbols_processed,
            ledger.symbols_monthly_cap,
            &now,
        )?;

        for server in &ledger.servers {
            tx.execute(
                r#"
                INSERT INTO servers (id, name, created_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name
                "#,
                params![
                    server.id as i64,
                    server.name,
                    server.created_at.to_rfc3339()
                ],
            )?;

            for user in &server.members {
                let langs_from = encode_lang_set(&user.langs_from)?;
                let langs_to = encode_lang_set(&user.langs_to)?;
                tx.execute(
                    r#"
                    INSERT INTO users (server_id, id, username, daily_quota, daily_accrued,
                        monthly_quota, monthly_accrued, total_operations, last_operation_at,
                        langs_from, langs_to, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                    ON CONFLICT(server_id, id) DO UPDATE SET
                        username = excluded.username,
                        daily_quota = excluded.daily_quota,
                        daily_accrued = excluded.daily_accrued,
                        monthly_quota = excluded.monthly_quota,
                        monthly_accrued = excluded.monthly_accrued,
                        total_operations = excluded.total_operations,
                        last_operation_at = excluded.last_operation_at,
                        langs_from = excluded.langs_from,
                        langs_to = excluded.langs_to
                    "#,
                    params![
                        server.id as i64,
                        user.id as i64,
                        user.username,
                        user.daily_quota as i64,
                        user.daily_accrued as i64,
                        user.monthly_quota as i64,
                        user.monthly_accrued as i64,
                        user.total_operations as i64,
                        user.last_operation_at.to_rfc3339(),
                        langs_from,
                        langs_to,
                        user.created_at.to_rfc3339()
                    ],
                )?;
            }
        }

        tx.execute("DELETE FROM blacklist", [])?;
        for entry in &ledger.blacklist {
            tx.execute(
                "INSERT INTO blacklist (user_id, ban_start, ban_end) VALUES (?1, ?2, ?3)",
                params![
                    entry.user_id as i64,
                    entry.ban_start.to_rfc3339(),
                    entry.ban_end.to_rfc3339()
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Targeted update of the singleton row only, for the monthly reset delta.
    pub fn save_meta(
        &self,
        reset_epoch: DateTime<Utc>,
        symbols_processed: u64,
        symbols_monthly_cap: u64,
    ) -> Result<(), StorageError> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();
        upsert_meta(&conn, reset_epoch, symbols_processed, symbols_monthly_cap, &now)
    }
}

fn upsert_meta(
    conn: &Connection,
    reset_epoch: DateTime<Utc>,
    symbols_processed: u64,
    symbols_monthly_cap: u64,
    now: &str,
) -> Result<(), StorageError> {
    conn.execute(
        r#"
        INSERT INTO ledger (id, reset_epoch, symbols_processed, symbols_monthly_cap, updated_at)
        VALUES (1, ?1, ?2, ?3, ?4)
        ON CONFLICT(id) DO UPDATE SET
            reset_epoch = excluded.reset_epoch,
            symbols_processed = excluded.symbols_processed,
            symbols_monthly_cap = excluded.symbols_monthly_cap,
            updated_at = excluded.updated_at
        "#,
        params![
            reset_epoch.to_rfc3339(),
            symbols_processed as i64,
            symbols_monthly_cap as i64,
            now
        ],
    )?;
    Ok(())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| StorageError::Decode(format!("bad timestamp {raw:?}: {err}")))
}

fn parse_lang_set(raw: &str) -> Result<BTreeSet<String>, StorageError> {
    serde_json::from_str(raw)
        .map_err(|err| StorageError::Decode(format!("bad language set {raw:?}: {err}")))
}

fn encode_lang_set(langs: &BTreeSet<String>) -> Result<String, StorageError> {
    serde_json::to_string(langs)
        .map_err(|err| StorageError::Decode(format!("unencodable language set: {err}")))
}
