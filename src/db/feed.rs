//! Change-subscription feed: every committed write announces which collection changed.

use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    ApiConnections,
    Balances,
    BalanceHistory,
    BalanceSources,
    SyncSettings,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::ApiConnections => "api_connections",
            Collection::Balances => "balances",
            Collection::BalanceHistory => "balance_history",
            Collection::BalanceSources => "balance_sources",
            Collection::SyncSettings => "sync_settings",
        }
    }
}

#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<Collection>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Announce a committed change. Having no subscribers is not an error.
    pub fn notify(&self, collection: Collection) {
        let _ = self.tx.send(collection);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Collection> {
        self.tx.subscribe()
    }
}
