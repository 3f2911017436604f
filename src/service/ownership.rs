//! Which balances are owned by an active connection.
//!
//! Planning is a pure function of (active connections, balances); applying a
//! plan re-checks each record inside its own transaction, so running it any
//! number of times converges to the same state.

use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use crate::db::{BalanceWrite, Storage};
use crate::error::RasidError;
use crate::service::audit;
use crate::types::{ApiConnection, Balance, BalanceId, Editor, Ownership, SourceId};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnershipChange {
    pub balance_id: BalanceId,
    pub source_id: SourceId,
    pub from: Ownership,
    pub to: Ownership,
}

/// Owner per source: the active connection with the lowest id.
fn owners(connections: &[ApiConnection]) -> HashMap<SourceId, &ApiConnection> {
    let mut owners: HashMap<SourceId, &ApiConnection> = HashMap::new();
    for conn in connections.iter().filter(|c| c.is_active) {
        owners
            .entry(conn.source_id)
            .and_modify(|current| {
                if conn.id < current.id {
                    *current = conn;
                }
            })
            .or_insert(conn);
    }
    owners
}

/// Owner name per source. Two connection snapshots with equal claims produce
/// the same plan, so a write that leaves this unchanged (a recorded sync
/// result, a new token) needs no reassignment.
pub fn claims(connections: &[ApiConnection]) -> BTreeMap<SourceId, String> {
    owners(connections)
        .into_iter()
        .map(|(source_id, conn)| (source_id, conn.name.clone()))
        .collect()
}

/// Transitions needed so that every balance is owned exactly by the active
/// connection for its source, or is manual when there is none.
pub fn plan_ownership(connections: &[ApiConnection], balances: &[Balance]) -> Vec<OwnershipChange> {
    let owners = owners(connections);
    balances
        .iter()
        .filter_map(|balance| {
            let desired = match owners.get(&balance.source_id) {
                Some(conn) => Ownership::Auto {
                    api_source: conn.name.clone(),
                },
                None => Ownership::Manual,
            };
            (desired != balance.ownership).then(|| OwnershipChange {
                balance_id: balance.id,
                source_id: balance.source_id,
                from: balance.ownership.clone(),
                to: desired,
            })
        })
        .collect()
}

/// Load both collections, plan, and apply. Returns the number of balances changed.
pub async fn assign(storage: &Storage, system: &Editor) -> Result<usize, RasidError> {
    let connections = storage.list_active_connections().await?;
    let balances = storage.list_balances().await?;
    let plan = plan_ownership(&connections, &balances);
    if plan.is_empty() {
        debug!("ownership already converged");
        return Ok(0);
    }

    let mut applied = 0;
    for change in plan {
        let target = change.to.clone();
        let written = storage
            .modify_balance(change.balance_id, |current| {
                if current.ownership == target {
                    return Ok(None);
                }
                let now = Utc::now();
                let after = Balance {
                    ownership: target,
                    last_updated: now,
                    last_updated_by: system.clone(),
                    ..current.clone()
                };
                let history = audit::updated(current, &after, system, now);
                Ok(Some(BalanceWrite {
                    balance: after,
                    history,
                }))
            })
            .await;
        match written {
            Ok(Some(_)) => {
                info!(
                    balance_id = change.balance_id,
                    source_id = change.source_id,
                    from = %change.from,
                    to = %change.to,
                    "balance ownership transferred"
                );
                applied += 1;
            }
            Ok(None) => {}
            // Deleted between planning and applying.
            Err(RasidError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ApiMethod, BalanceType, Currency};

    fn conn(id: i64, source_id: i64, name: &str, active: bool) -> ApiConnection {
        ApiConnection {
            id,
            source_id,
            name: name.to_string(),
            api_url: "https://partner.example/balance".to_string(),
            api_method: ApiMethod::Get,
            email: None,
            password: None,
            auth_token: Some("t".to_string()),
            currency: Currency::Usd,
            is_active: active,
            auto_sync: true,
            sync_interval_seconds: 60,
            last_sync: None,
            last_sync_status: None,
            last_sync_error: None,
        }
    }

    fn balance(id: i64, source_id: i64, ownership: Ownership) -> Balance {
        Balance {
            id,
            source_id,
            source_name: format!("source-{source_id}"),
            amount: 0.0,
            currency: Currency::Usd,
            balance_type: BalanceType::Supplier,
            limits: None,
            ownership,
            notes: None,
            last_updated: Utc::now(),
            last_updated_by: Editor {
                email: "desk@agency.example".to_string(),
                name: "Desk".to_string(),
            },
        }
    }

    fn apply(balances: &mut [Balance], plan: &[OwnershipChange]) {
        for change in plan {
            if let Some(b) = balances.iter_mut().find(|b| b.id == change.balance_id) {
                b.ownership = change.to.clone();
            }
        }
    }

    fn auto(name: &str) -> Ownership {
        Ownership::Auto {
            api_source: name.to_string(),
        }
    }

    #[test]
    fn claims_and_releases() {
        let connections = vec![conn(1, 10, "alpha", true), conn(2, 20, "beta", false)];
        let balances = vec![
            balance(100, 10, Ownership::Manual),
            balance(200, 20, auto("beta")),
            balance(300, 30, Ownership::Manual),
        ];
        let plan = plan_ownership(&connections, &balances);
        assert_eq!(
            plan,
            vec![
                OwnershipChange {
                    balance_id: 100,
                    source_id: 10,
                    from: Ownership::Manual,
                    to: auto("alpha"),
                },
                OwnershipChange {
                    balance_id: 200,
                    source_id: 20,
                    from: auto("beta"),
                    to: Ownership::Manual,
                },
            ]
        );
    }

    #[test]
    fn planning_is_idempotent() {
        let connections = vec![
            conn(1, 10, "alpha", true),
            conn(2, 20, "beta", true),
            conn(3, 30, "gamma", false),
        ];
        let mut balances = vec![
            balance(100, 10, Ownership::Manual),
            balance(101, 10, auto("stale-name")),
            balance(200, 20, auto("beta")),
            balance(300, 30, auto("gamma")),
            balance(400, 40, Ownership::Manual),
        ];
        let first = plan_ownership(&connections, &balances);
        assert_eq!(first.len(), 3);
        apply(&mut balances, &first);
        assert!(plan_ownership(&connections, &balances).is_empty());

        for b in &balances {
            let ownership_json = serde_json::to_value(&b.ownership).unwrap();
            assert_eq!(
                ownership_json["isAutoSync"].as_bool().unwrap(),
                ownership_json.get("apiSource").is_some()
            );
        }
    }

    #[test]
    fn claims_ignore_sync_bookkeeping() {
        let before = vec![conn(1, 10, "alpha", true), conn(2, 20, "beta", false)];
        let mut after = before.clone();
        after[0].last_sync = Some(Utc::now());
        after[0].last_sync_error = Some("client: request timed out".to_string());
        after[0].auth_token = Some("rotated".to_string());
        assert_eq!(claims(&before), claims(&after));
        assert_eq!(claims(&before).len(), 1);

        after[0].name = "alpha-v2".to_string();
        assert_ne!(claims(&before), claims(&after));

        let mut activated = before.clone();
        activated[1].is_active = true;
        assert_ne!(claims(&before), claims(&activated));
    }

    #[test]
    fn lowest_id_wins_duplicate_claims() {
        let connections = vec![conn(9, 10, "newer", true), conn(4, 10, "older", true)];
        let balances = vec![balance(100, 10, Ownership::Manual)];
        let plan = plan_ownership(&connections, &balances);
        assert_eq!(plan[0].to, auto("older"));
    }
}
