use anyhow::Result;
use rusqlite::Connection;

pub const LEDGER_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS ledger (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    reset_epoch TEXT NOT NULL,
    symbols_processed INTEGER NOT NULL,
    symbols_monthly_cap INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

pub const SERVERS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS servers (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;

pub const USERS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    server_id INTEGER NOT NULL,
    id INTEGER NOT NULL,
    username TEXT NOT NULL,
    daily_quota INTEGER NOT NULL,
    daily_accrued INTEGER NOT NULL,
    monthly_quota INTEGER NOT NULL,
    monthly_accrued INTEGER NOT NULL,
    total_operations INTEGER NOT NULL,
    last_operation_at TEXT NOT NULL,
    langs_from TEXT NOT NULL,
    langs_to TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (server_id, id),
    FOREIGN KEY (server_id) REFERENCES servers(id)
);
"#;

pub const BLACKLIST_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS blacklist (
    user_id INTEGER PRIMARY KEY,
    ban_start TEXT NOT NULL,
    ban_end TEXT NOT NULL
);
"#;

pub const LEDGER_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_users_server ON users(server_id);
"#;

pub fn init_database(conn: &Connection) -> Result<()> {
    conn.execute_batch(LEDGER_TABLE_SCHEMA)?;
    conn.execute_batch(SERVERS_TABLE_SCHEMA)?;
    conn.execute_batch(USERS_TABLE_SCHEMA)?;
    conn.execute_batch(BLACKLIST_TABLE_SCHEMA)?;
    conn.execute_batch(LEDGER_INDEXES)?;
    Ok(())
}
