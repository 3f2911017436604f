use axum::{
    Router,
    routing::{get, post, put},
};
use std::sync::Arc;

use crate::api::Discovery;
use crate::db::Storage;
use crate::handlers::{balances, connections, discovery, history, sources, sync};
use crate::service::{BalanceOps, ConnectionRegistry, SchedulerHandle};

#[derive(Clone)]
pub struct RasidState {
    pub storage: Storage,
    pub ops: BalanceOps,
    pub registry: ConnectionRegistry,
    pub scheduler: SchedulerHandle,
    pub discovery: Discovery,
    pub system_email: Arc<str>,
}

impl RasidState {
    pub fn new(
        storage: Storage,
        ops: BalanceOps,
        scheduler: SchedulerHandle,
        discovery: Discovery,
    ) -> Self {
        let system_email = Arc::from(ops.system_editor().email.as_str());
        Self {
            registry: ConnectionRegistry::new(storage.clone()),
            storage,
            ops,
            scheduler,
            discovery,
            system_email,
        }
    }
}

pub fn rasid_router(state: RasidState) -> Router {
    Router::new()
        .route(
            "/sources",
            get(sources::list_sources).post(sources::create_source),
        )
        .route(
            "/connections",
            get(connections::list_connections).post(connections::create_connection),
        )
        .route(
            "/connections/{id}",
            get(connections::get_connection)
                .put(connections::update_connection)
                .delete(connections::delete_connection),
        )
        .route(
            "/connections/{id}/active",
            put(connections::set_connection_active),
        )
        .route(
            "/balances",
            get(balances::list_balances).post(balances::create_balance),
        )
        .route(
            "/balances/{id}",
            get(balances::get_balance)
                .patch(balances::update_balance)
                .delete(balances::delete_balance),
        )
        .route("/balances/{id}/limits", put(balances::set_limits))
        .route("/balances/{id}/history", get(balances::balance_history))
        .route(
            "/history",
            get(history::list_history).delete(history::clear_history),
        )
        .route("/sync/status", get(sync::sync_status))
        .route(
            "/sync/config",
            get(sync::get_sync_config).put(sync::update_sync_config),
        )
        .route("/sync/now", post(sync::sync_now))
        .route("/sync/events", get(sync::sync_events))
        .route("/discovery/probe", post(discovery::probe))
        .with_state(state)
}
