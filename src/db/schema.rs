//! SQL DDL for initializing the balance store.
//! SQLite-first design; timestamps are RFC3339 TEXT, booleans INTEGER 0/1.

/// SQLite schema with one table per collection:
/// - `balance_sources`: airlines and suppliers
/// - `api_connections`: partner endpoints and their last sync outcome
/// - `balances`: tracked balances; `api_source` is NULL unless `is_auto_sync = 1`
/// - `balance_history`: append-only audit trail (no foreign key, rows outlive deletes)
/// - `sync_settings`: singleton global sync configuration (`id = 1`)
pub const SQLITE_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS balance_sources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    source_type TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS api_connections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    api_url TEXT NOT NULL,
    api_method TEXT NOT NULL,
    email TEXT NULL,
    password TEXT NULL,
    auth_token TEXT NULL,
    currency TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    auto_sync INTEGER NOT NULL DEFAULT 1,
    sync_interval_seconds INTEGER NOT NULL DEFAULT 60,
    last_sync TEXT NULL,
    last_sync_status TEXT NULL,
    last_sync_error TEXT NULL
);

CREATE INDEX IF NOT EXISTS idx_api_connections_source_active ON api_connections(source_id, is_active);

CREATE TABLE IF NOT EXISTS balances (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id INTEGER NOT NULL,
    source_name TEXT NOT NULL,
    amount REAL NOT NULL,
    currency TEXT NOT NULL,
    balance_type TEXT NOT NULL,
    limit_red REAL NULL,
    limit_yellow REAL NULL,
    limit_green REAL NULL,
    is_auto_sync INTEGER NOT NULL DEFAULT 0,
    api_source TEXT NULL,
    notes TEXT NULL,
    last_updated TEXT NOT NULL,
    last_updated_by_email TEXT NOT NULL,
    last_updated_by_name TEXT NOT NULL,
    CHECK ((is_auto_sync = 1) = (api_source IS NOT NULL))
);

CREATE INDEX IF NOT EXISTS idx_balances_source_id ON balances(source_id);

CREATE TABLE IF NOT EXISTS balance_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    balance_id INTEGER NOT NULL,
    source_name TEXT NOT NULL,
    action TEXT NOT NULL,
    old_amount REAL NULL,
    new_amount REAL NULL,
    old_currency TEXT NULL,
    new_currency TEXT NULL,
    old_notes TEXT NULL,
    new_notes TEXT NULL,
    changes TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    updated_by_email TEXT NOT NULL,
    updated_by_name TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_balance_history_balance_id ON balance_history(balance_id);

CREATE TABLE IF NOT EXISTS sync_settings (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    enabled INTEGER NOT NULL,
    frequency INTEGER NOT NULL
);
"#;
