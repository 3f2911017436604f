//! Database module: SQLite storage behind every collection.
//!
//! Layout:
//! - `models.rs`: Rust structs mirroring DB rows and conversions
//! - `schema.rs`: SQL DDL for initializing the database (SQLite-first)
//! - `sqlite.rs`: keyed reads, single-record writes, atomic read-modify-write
//! - `feed.rs`: change notifications behind the snapshot streams

pub mod feed;
pub mod models;
pub mod schema;
pub mod sqlite;

pub use feed::{ChangeFeed, Collection};
pub use models::{DbBalance, DbConnection, DbHistory, DbSource};
pub use schema::SQLITE_INIT;
pub use sqlite::{BalanceWrite, SqlitePool, Storage};
