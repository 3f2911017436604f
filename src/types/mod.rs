//! Domain records shared by the store, the sync engine and the HTTP surface.

pub mod balance;
pub mod connection;
pub mod currency;
pub mod history;
pub mod status;

pub use balance::{
    Balance, BalanceId, BalancePatch, BalanceSource, BalanceType, BalanceView, Editor, Limits,
    NewBalance, NewSource, Ownership, SourceId, Tier,
};
pub use connection::{ApiConnection, ApiMethod, ConnectionId, ConnectionInput, LastSyncStatus};
pub use currency::Currency;
pub use history::{BalanceHistory, HistoryAction, HistoryEntry, HistoryId};
pub use status::{
    ConnectionOutcome, ConnectionResult, PassReport, PassTrigger, SyncConfig, SyncNowOutcome,
    SyncStatus,
};
