use crate::db::feed::{ChangeFeed, Collection};
use crate::db::models::{DbBalance, DbConnection, DbHistory, DbSource};
use crate::db::schema::SQLITE_INIT;
use crate::error::RasidError;
use crate::types::{
    ApiConnection, Balance, BalanceHistory, BalanceId, BalanceSource, ConnectionId,
    ConnectionInput, HistoryEntry, NewSource, SourceId, SyncConfig,
};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt, future};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, SqliteConnection};
use std::str::FromStr;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

pub type SqlitePool = Pool<Sqlite>;

const SOURCE_COLUMNS: &str = "id, name, source_type";

const CONNECTION_COLUMNS: &str = "id, source_id, name, api_url, api_method, email, password, \
     auth_token, currency, is_active, auto_sync, sync_interval_seconds, last_sync, \
     last_sync_status, last_sync_error";

const BALANCE_COLUMNS: &str = "id, source_id, source_name, amount, currency, balance_type, \
     limit_red, limit_yellow, limit_green, is_auto_sync, api_source, notes, last_updated, \
     last_updated_by_email, last_updated_by_name";

const HISTORY_COLUMNS: &str = "id, balance_id, source_name, action, old_amount, new_amount, \
     old_currency, new_currency, old_notes, new_notes, changes, timestamp, updated_by_email, \
     updated_by_name";

/// New state of a balance plus the audit row describing the change.
/// Both are written in one transaction.
#[derive(Debug, Clone)]
pub struct BalanceWrite {
    pub balance: Balance,
    pub history: HistoryEntry,
}

/// Keyed record store for all collections, with a change feed.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
    feed: ChangeFeed,
}

impl Storage {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            feed: ChangeFeed::new(256),
        }
    }

    /// Open (creating if missing) the database at `database_url` and apply the schema.
    pub async fn connect(database_url: &str) -> Result<Self, RasidError> {
        let connect_opts = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // One connection: read-modify-write transactions never race for the write lock.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_opts)
            .await?;
        let storage = Self::new(pool);
        storage.init_schema().await?;
        Ok(storage)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Initialize the schema by executing the bundled DDL.
    pub async fn init_schema(&self) -> Result<(), RasidError> {
        // execute multiple statements safely (SQLite supports multi-commands but sqlx::query doesn't)
        for stmt in SQLITE_INIT.split(';') {
            let s = stmt.trim();
            if s.is_empty() {
                continue;
            }
            sqlx::query(s).execute(&self.pool).await?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // change feed
    // ---------------------------------------------------------------------

    pub fn subscribe(&self) -> broadcast::Receiver<Collection> {
        self.feed.subscribe()
    }

    /// Full snapshot of `api_connections` after every change to that collection.
    pub fn watch_connections(&self) -> impl Stream<Item = Vec<ApiConnection>> + Send + use<> {
        let storage = self.clone();
        self.changes_of(Collection::ApiConnections)
            .filter_map(move |()| {
                let storage = storage.clone();
                async move {
                    storage
                        .list_connections()
                        .await
                        .inspect_err(|e| warn!(error = %e, "failed to reload api_connections"))
                        .ok()
                }
            })
    }

    /// Current sync configuration after every change to `sync_settings`.
    pub fn watch_sync_config(&self) -> impl Stream<Item = SyncConfig> + Send + use<> {
        let storage = self.clone();
        self.changes_of(Collection::SyncSettings).filter_map(move |()| {
            let storage = storage.clone();
            async move {
                storage
                    .get_sync_config()
                    .await
                    .inspect_err(|e| warn!(error = %e, "failed to reload sync_settings"))
                    .ok()
                    .flatten()
            }
        })
    }

    fn changes_of(&self, collection: Collection) -> impl Stream<Item = ()> + Send + use<> {
        BroadcastStream::new(self.feed.subscribe()).filter_map(move |change| {
            future::ready(match change {
                Ok(c) if c == collection => Some(()),
                Ok(_) => None,
                // Lagged: snapshots are full, so one reload catches up.
                Err(_) => Some(()),
            })
        })
    }

    // ---------------------------------------------------------------------
    // balance_sources
    // ---------------------------------------------------------------------

    pub async fn insert_source(&self, source: &NewSource) -> Result<BalanceSource, RasidError> {
        let id = sqlx::query("INSERT INTO balance_sources (name, source_type) VALUES (?, ?)")
            .bind(source.name.trim())
            .bind(source.source_type.as_str())
            .execute(&self.pool)
            .await?
            .last_insert_rowid();
        self.feed.notify(Collection::BalanceSources);
        Ok(BalanceSource {
            id,
            name: source.name.trim().to_string(),
            source_type: source.source_type,
        })
    }

    pub async fn list_sources(&self) -> Result<Vec<BalanceSource>, RasidError> {
        let rows: Vec<DbSource> = sqlx::query_as(&format!(
            "SELECT {SOURCE_COLUMNS} FROM balance_sources ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(BalanceSource::try_from).collect()
    }

    pub async fn get_source(&self, id: SourceId) -> Result<Option<BalanceSource>, RasidError> {
        let row: Option<DbSource> = sqlx::query_as(&format!(
            "SELECT {SOURCE_COLUMNS} FROM balance_sources WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(BalanceSource::try_from).transpose()
    }

    // ---------------------------------------------------------------------
    // api_connections
    // ---------------------------------------------------------------------

    pub async fn list_connections(&self) -> Result<Vec<ApiConnection>, RasidError> {
        let rows: Vec<DbConnection> = sqlx::query_as(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM api_connections ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ApiConnection::try_from).collect()
    }

    pub async fn list_active_connections(&self) -> Result<Vec<ApiConnection>, RasidError> {
        let rows: Vec<DbConnection> = sqlx::query_as(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM api_connections WHERE is_active = 1 ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ApiConnection::try_from).collect()
    }

    pub async fn get_connection(&self, id: ConnectionId) -> Result<ApiConnection, RasidError> {
        let row: Option<DbConnection> = sqlx::query_as(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM api_connections WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or(RasidError::NotFound {
            collection: Collection::ApiConnections.as_str(),
            id,
        })
        .and_then(ApiConnection::try_from)
    }

    /// Insert a connection. When it is active, the source must not already be
    /// claimed by another active connection; the check and the insert share a transaction.
    pub async fn insert_connection(
        &self,
        input: &ConnectionInput,
    ) -> Result<ApiConnection, RasidError> {
        let mut tx = self.pool.begin().await?;
        if input.is_active {
            ensure_source_unclaimed(&mut tx, input.source_id, None).await?;
        }
        let id = sqlx::query(
            r#"
            INSERT INTO api_connections (
                source_id, name, api_url, api_method, email, password, auth_token,
                currency, is_active, auto_sync, sync_interval_seconds
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(input.source_id)
        .bind(input.name.trim())
        .bind(input.api_url.trim())
        .bind(input.api_method.as_str())
        .bind(input.email.as_deref())
        .bind(input.password.as_deref())
        .bind(input.auth_token.as_deref())
        .bind(input.currency.as_str())
        .bind(input.is_active)
        .bind(input.auto_sync)
        .bind(i64::try_from(input.sync_interval_seconds).unwrap_or(i64::MAX))
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
        tx.commit().await?;
        self.feed.notify(Collection::ApiConnections);
        self.get_connection(id).await
    }

    /// Replace a connection's configuration. `None` secrets keep their stored value;
    /// sync bookkeeping (`last_sync*`) is untouched.
    pub async fn update_connection(
        &self,
        id: ConnectionId,
        input: &ConnectionInput,
    ) -> Result<ApiConnection, RasidError> {
        let mut tx = self.pool.begin().await?;
        if input.is_active {
            ensure_source_unclaimed(&mut tx, input.source_id, Some(id)).await?;
        }
        let affected = sqlx::query(
            r#"UPDATE api_connections SET
                source_id = ?,
                name = ?,
                api_url = ?,
                api_method = ?,
                email = ?,
                password = COALESCE(?, password),
                auth_token = COALESCE(?, auth_token),
                currency = ?,
                is_active = ?,
                auto_sync = ?,
                sync_interval_seconds = ?
              WHERE id = ?"#,
        )
        .bind(input.source_id)
        .bind(input.name.trim())
        .bind(input.api_url.trim())
        .bind(input.api_method.as_str())
        .bind(input.email.as_deref())
        .bind(input.password.as_deref())
        .bind(input.auth_token.as_deref())
        .bind(input.currency.as_str())
        .bind(input.is_active)
        .bind(input.auto_sync)
        .bind(i64::try_from(input.sync_interval_seconds).unwrap_or(i64::MAX))
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if affected == 0 {
            return Err(RasidError::NotFound {
                collection: Collection::ApiConnections.as_str(),
                id,
            });
        }
        tx.commit().await?;
        self.feed.notify(Collection::ApiConnections);
        self.get_connection(id).await
    }

    pub async fn delete_connection(&self, id: ConnectionId) -> Result<(), RasidError> {
        let affected = sqlx::query("DELETE FROM api_connections WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(RasidError::NotFound {
                collection: Collection::ApiConnections.as_str(),
                id,
            });
        }
        self.feed.notify(Collection::ApiConnections);
        Ok(())
    }

    /// Persist the outcome of one fetch attempt. `Err` carries the rendered failure.
    pub async fn record_sync_result(
        &self,
        id: ConnectionId,
        at: DateTime<Utc>,
        result: Result<(), String>,
    ) -> Result<(), RasidError> {
        let (status, error) = match result {
            Ok(()) => ("success", None),
            Err(msg) => ("error", Some(msg)),
        };
        sqlx::query(
            "UPDATE api_connections SET last_sync = ?, last_sync_status = ?, last_sync_error = ? WHERE id = ?",
        )
        .bind(at.to_rfc3339())
        .bind(status)
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.feed.notify(Collection::ApiConnections);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // balances
    // ---------------------------------------------------------------------

    pub async fn list_balances(&self) -> Result<Vec<Balance>, RasidError> {
        let rows: Vec<DbBalance> = sqlx::query_as(&format!(
            "SELECT {BALANCE_COLUMNS} FROM balances ORDER BY source_name, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Balance::try_from).collect()
    }

    pub async fn balances_for_source(
        &self,
        source_id: SourceId,
    ) -> Result<Vec<Balance>, RasidError> {
        let rows: Vec<DbBalance> = sqlx::query_as(&format!(
            "SELECT {BALANCE_COLUMNS} FROM balances WHERE source_id = ? ORDER BY id"
        ))
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Balance::try_from).collect()
    }

    pub async fn get_balance(&self, id: BalanceId) -> Result<Balance, RasidError> {
        let mut conn = self.pool.acquire().await?;
        fetch_balance(&mut conn, id)
            .await?
            .ok_or(RasidError::NotFound {
                collection: Collection::Balances.as_str(),
                id,
            })
    }

    /// Insert `balance` (its `id` is ignored) and the history row built from the
    /// stored record, in one transaction.
    pub async fn insert_balance<F>(
        &self,
        balance: Balance,
        history: F,
    ) -> Result<Balance, RasidError>
    where
        F: FnOnce(&Balance) -> HistoryEntry + Send,
    {
        let mut tx = self.pool.begin().await?;
        let limits = balance.limits;
        let id = sqlx::query(
            r#"
            INSERT INTO balances (
                source_id, source_name, amount, currency, balance_type,
                limit_red, limit_yellow, limit_green, is_auto_sync, api_source, notes,
                last_updated, last_updated_by_email, last_updated_by_name
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(balance.source_id)
        .bind(&balance.source_name)
        .bind(balance.amount)
        .bind(balance.currency.as_str())
        .bind(balance.balance_type.as_str())
        .bind(limits.map(|l| l.red))
        .bind(limits.map(|l| l.yellow))
        .bind(limits.map(|l| l.green))
        .bind(balance.ownership.is_auto_sync())
        .bind(balance.ownership.api_source())
        .bind(balance.notes.as_deref())
        .bind(balance.last_updated.to_rfc3339())
        .bind(&balance.last_updated_by.email)
        .bind(&balance.last_updated_by.name)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        let stored = Balance { id, ..balance };
        insert_history(&mut tx, &history(&stored)).await?;
        tx.commit().await?;
        self.notify_balance_write();
        Ok(stored)
    }

    /// Atomic read-modify-write of one balance.
    ///
    /// `f` sees the current record inside the transaction and returns the new state
    /// with its audit row, or `None` to leave the record alone. Returns the written
    /// balance, or `None` when `f` declined.
    pub async fn modify_balance<F>(
        &self,
        id: BalanceId,
        f: F,
    ) -> Result<Option<Balance>, RasidError>
    where
        F: FnOnce(&Balance) -> Result<Option<BalanceWrite>, RasidError> + Send,
    {
        let mut tx = self.pool.begin().await?;
        let current = fetch_balance(&mut tx, id).await?.ok_or(RasidError::NotFound {
            collection: Collection::Balances.as_str(),
            id,
        })?;
        let Some(write) = f(&current)? else {
            return Ok(None);
        };
        update_balance_row(&mut tx, id, &write.balance).await?;
        insert_history(&mut tx, &write.history).await?;
        tx.commit().await?;
        self.notify_balance_write();
        Ok(Some(Balance { id, ..write.balance }))
    }

    /// Refresh `last_updated` without an audit row (value unchanged).
    pub async fn touch_balance(
        &self,
        id: BalanceId,
        at: DateTime<Utc>,
    ) -> Result<(), RasidError> {
        sqlx::query("UPDATE balances SET last_updated = ? WHERE id = ?")
            .bind(at.to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.feed.notify(Collection::Balances);
        Ok(())
    }

    /// Delete a balance after `f` approves it and produces the audit row.
    pub async fn delete_balance<F>(&self, id: BalanceId, f: F) -> Result<Balance, RasidError>
    where
        F: FnOnce(&Balance) -> Result<HistoryEntry, RasidError> + Send,
    {
        let mut tx = self.pool.begin().await?;
        let current = fetch_balance(&mut tx, id).await?.ok_or(RasidError::NotFound {
            collection: Collection::Balances.as_str(),
            id,
        })?;
        let entry = f(&current)?;
        sqlx::query("DELETE FROM balances WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        insert_history(&mut tx, &entry).await?;
        tx.commit().await?;
        self.notify_balance_write();
        Ok(current)
    }

    fn notify_balance_write(&self) {
        self.feed.notify(Collection::Balances);
        self.feed.notify(Collection::BalanceHistory);
    }

    // ---------------------------------------------------------------------
    // balance_history
    // ---------------------------------------------------------------------

    pub async fn list_history(&self, limit: i64) -> Result<Vec<BalanceHistory>, RasidError> {
        let rows: Vec<DbHistory> = sqlx::query_as(&format!(
            "SELECT {HISTORY_COLUMNS} FROM balance_history ORDER BY id DESC LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(BalanceHistory::try_from).collect()
    }

    pub async fn history_for_balance(
        &self,
        balance_id: BalanceId,
    ) -> Result<Vec<BalanceHistory>, RasidError> {
        let rows: Vec<DbHistory> = sqlx::query_as(&format!(
            "SELECT {HISTORY_COLUMNS} FROM balance_history WHERE balance_id = ? ORDER BY id"
        ))
        .bind(balance_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(BalanceHistory::try_from).collect()
    }

    /// Bulk delete of the audit trail. Administrative only.
    pub async fn clear_history(&self) -> Result<u64, RasidError> {
        let removed = sqlx::query("DELETE FROM balance_history")
            .execute(&self.pool)
            .await?
            .rows_affected();
        self.feed.notify(Collection::BalanceHistory);
        Ok(removed)
    }

    // ---------------------------------------------------------------------
    // sync_settings
    // ---------------------------------------------------------------------

    pub async fn get_sync_config(&self) -> Result<Option<SyncConfig>, RasidError> {
        let row: Option<(bool, i64)> =
            sqlx::query_as("SELECT enabled, frequency FROM sync_settings WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(enabled, frequency)| SyncConfig {
            enabled,
            frequency: frequency.max(0) as u64,
        }))
    }

    /// Stored configuration, seeding `default` on first use.
    pub async fn load_sync_config(&self, default: SyncConfig) -> Result<SyncConfig, RasidError> {
        sqlx::query("INSERT OR IGNORE INTO sync_settings (id, enabled, frequency) VALUES (1, ?, ?)")
            .bind(default.enabled)
            .bind(default.frequency as i64)
            .execute(&self.pool)
            .await?;
        Ok(self.get_sync_config().await?.unwrap_or(default))
    }

    pub async fn save_sync_config(&self, cfg: SyncConfig) -> Result<(), RasidError> {
        sqlx::query(
            r#"
            INSERT INTO sync_settings (id, enabled, frequency) VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                enabled = excluded.enabled,
                frequency = excluded.frequency
            "#,
        )
        .bind(cfg.enabled)
        .bind(cfg.frequency as i64)
        .execute(&self.pool)
        .await?;
        self.feed.notify(Collection::SyncSettings);
        Ok(())
    }
}

async fn ensure_source_unclaimed(
    conn: &mut SqliteConnection,
    source_id: SourceId,
    excluding: Option<ConnectionId>,
) -> Result<(), RasidError> {
    let owner: Option<(i64, String)> = sqlx::query_as(
        "SELECT id, name FROM api_connections WHERE source_id = ? AND is_active = 1 AND id != ? LIMIT 1",
    )
    .bind(source_id)
    .bind(excluding.unwrap_or(-1))
    .fetch_optional(&mut *conn)
    .await?;
    match owner {
        Some((id, name)) => Err(RasidError::Configuration(format!(
            "source {source_id} is already claimed by active connection `{name}` (id {id})"
        ))),
        None => Ok(()),
    }
}

async fn fetch_balance(
    conn: &mut SqliteConnection,
    id: BalanceId,
) -> Result<Option<Balance>, RasidError> {
    let row: Option<DbBalance> = sqlx::query_as(&format!(
        "SELECT {BALANCE_COLUMNS} FROM balances WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(Balance::try_from).transpose()
}

async fn update_balance_row(
    conn: &mut SqliteConnection,
    id: BalanceId,
    b: &Balance,
) -> Result<(), RasidError> {
    let limits = b.limits;
    sqlx::query(
        r#"UPDATE balances SET
            source_id = ?,
            source_name = ?,
            amount = ?,
            currency = ?,
            balance_type = ?,
            limit_red = ?,
            limit_yellow = ?,
            limit_green = ?,
            is_auto_sync = ?,
            api_source = ?,
            notes = ?,
            last_updated = ?,
            last_updated_by_email = ?,
            last_updated_by_name = ?
          WHERE id = ?"#,
    )
    .bind(b.source_id)
    .bind(&b.source_name)
    .bind(b.amount)
    .bind(b.currency.as_str())
    .bind(b.balance_type.as_str())
    .bind(limits.map(|l| l.red))
    .bind(limits.map(|l| l.yellow))
    .bind(limits.map(|l| l.green))
    .bind(b.ownership.is_auto_sync())
    .bind(b.ownership.api_source())
    .bind(b.notes.as_deref())
    .bind(b.last_updated.to_rfc3339())
    .bind(&b.last_updated_by.email)
    .bind(&b.last_updated_by.name)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_history(
    conn: &mut SqliteConnection,
    h: &HistoryEntry,
) -> Result<i64, RasidError> {
    let id = sqlx::query(
        r#"
        INSERT INTO balance_history (
            balance_id, source_name, action, old_amount, new_amount, old_currency,
            new_currency, old_notes, new_notes, changes, timestamp, updated_by_email,
            updated_by_name
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(h.balance_id)
    .bind(&h.source_name)
    .bind(h.action.as_str())
    .bind(h.old_amount)
    .bind(h.new_amount)
    .bind(h.old_currency.map(|c| c.as_str()))
    .bind(h.new_currency.map(|c| c.as_str()))
    .bind(h.old_notes.as_deref())
    .bind(h.new_notes.as_deref())
    .bind(&h.changes)
    .bind(h.timestamp.to_rfc3339())
    .bind(&h.updated_by.email)
    .bind(&h.updated_by.name)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    Ok(id)
}
