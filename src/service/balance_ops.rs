use crate::api::Amount;
use crate::db::{BalanceWrite, Storage};
use crate::error::RasidError;
use crate::service::audit;
use crate::types::{
    ApiConnection, Balance, BalanceId, BalancePatch, Editor, Limits, NewBalance, Ownership,
};
use chrono::Utc;
use tracing::{debug, info, warn};

/// Every write path for balances. Each mutation and its audit row are committed together.
#[derive(Clone)]
pub struct BalanceOps {
    storage: Storage,
    system: Editor,
}

impl BalanceOps {
    pub fn new(storage: Storage, system: Editor) -> Self {
        Self { storage, system }
    }

    pub fn system_editor(&self) -> &Editor {
        &self.system
    }

    /// Manual creation. Ownership follows the current active connection for the source.
    pub async fn create(&self, new: NewBalance, editor: &Editor) -> Result<Balance, RasidError> {
        ensure_finite(new.amount)?;
        if let Some(limits) = new.limits.as_ref() {
            limits.validate()?;
        }
        let source = self
            .storage
            .get_source(new.source_id)
            .await?
            .ok_or_else(|| {
                RasidError::Configuration(format!("unknown source {}", new.source_id))
            })?;
        let ownership = self
            .storage
            .list_active_connections()
            .await?
            .into_iter()
            .filter(|c| c.source_id == source.id)
            .min_by_key(|c| c.id)
            .map_or(Ownership::Manual, |c| Ownership::Auto { api_source: c.name });

        let now = Utc::now();
        let draft = Balance {
            id: 0,
            source_id: source.id,
            source_name: source.name,
            amount: new.amount,
            currency: new.currency,
            balance_type: source.source_type,
            limits: new.limits,
            ownership,
            notes: normalize_notes(new.notes),
            last_updated: now,
            last_updated_by: editor.clone(),
        };
        let created = self
            .storage
            .insert_balance(draft, |stored| audit::created(stored, editor, now))
            .await?;
        info!(balance_id = created.id, source = %created.source_name, editor = %editor.email, "balance created");
        Ok(created)
    }

    /// Human edit. Changing the amount or currency of an auto-owned balance is an
    /// ownership conflict; notes stay editable.
    pub async fn manual_update(
        &self,
        id: BalanceId,
        patch: BalancePatch,
        editor: &Editor,
    ) -> Result<Balance, RasidError> {
        if let Some(amount) = patch.amount {
            ensure_finite(amount)?;
        }
        let written = self
            .storage
            .modify_balance(id, |current| {
                if let Ownership::Auto { api_source } = &current.ownership
                    && patch.touches_value(current)
                {
                    return Err(RasidError::OwnershipConflict {
                        balance_id: current.id,
                        api_source: api_source.clone(),
                    });
                }
                let now = Utc::now();
                let after = Balance {
                    amount: patch.amount.unwrap_or(current.amount),
                    currency: patch.currency.unwrap_or(current.currency),
                    notes: match patch.notes {
                        Some(notes) => normalize_notes(Some(notes)),
                        None => current.notes.clone(),
                    },
                    last_updated: now,
                    last_updated_by: editor.clone(),
                    ..current.clone()
                };
                if same_content(current, &after) {
                    return Ok(None);
                }
                let history = audit::updated(current, &after, editor, now);
                Ok(Some(BalanceWrite {
                    balance: after,
                    history,
                }))
            })
            .await;

        match written {
            Ok(Some(balance)) => {
                info!(balance_id = id, editor = %editor.email, "balance edited manually");
                Ok(balance)
            }
            Ok(None) => self.storage.get_balance(id).await,
            Err(e @ RasidError::OwnershipConflict { .. }) => {
                warn!(balance_id = id, editor = %editor.email, "manual edit rejected: {e}");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Configure or clear the alert thresholds. Invalid orderings never reach the store.
    pub async fn set_limits(
        &self,
        id: BalanceId,
        limits: Option<Limits>,
        editor: &Editor,
    ) -> Result<Balance, RasidError> {
        if let Some(limits) = limits.as_ref() {
            limits.validate()?;
        }
        let written = self
            .storage
            .modify_balance(id, |current| {
                if current.limits == limits {
                    return Ok(None);
                }
                let now = Utc::now();
                let after = Balance {
                    limits,
                    last_updated: now,
                    last_updated_by: editor.clone(),
                    ..current.clone()
                };
                let history = audit::updated(current, &after, editor, now);
                Ok(Some(BalanceWrite {
                    balance: after,
                    history,
                }))
            })
            .await?;
        match written {
            Some(balance) => Ok(balance),
            None => self.storage.get_balance(id).await,
        }
    }

    /// Delete a manual balance. Auto-owned balances must be detached first.
    pub async fn delete(&self, id: BalanceId, editor: &Editor) -> Result<Balance, RasidError> {
        let removed = self
            .storage
            .delete_balance(id, |current| {
                if let Ownership::Auto { api_source } = &current.ownership {
                    return Err(RasidError::OwnershipConflict {
                        balance_id: current.id,
                        api_source: api_source.clone(),
                    });
                }
                Ok(audit::deleted(current, editor, Utc::now()))
            })
            .await?;
        info!(balance_id = id, editor = %editor.email, "balance deleted");
        Ok(removed)
    }

    /// Write a freshly fetched value into every balance `conn` owns.
    ///
    /// Creates the balance when the source has none yet. Balances whose owner
    /// changed since the pass started are left alone. Returns how many balances
    /// now hold the fetched value.
    pub async fn apply_synced_amount(
        &self,
        conn: &ApiConnection,
        amount: &Amount,
    ) -> Result<usize, RasidError> {
        let existing = self.storage.balances_for_source(conn.source_id).await?;
        if existing.is_empty() {
            self.create_synced(conn, amount).await?;
            return Ok(1);
        }

        let mut reconciled = 0;
        for balance in existing
            .iter()
            .filter(|b| b.ownership.is_owned_by(&conn.name))
        {
            let now = Utc::now();
            let written = self
                .storage
                .modify_balance(balance.id, |current| {
                    if !current.ownership.is_owned_by(&conn.name)
                        || (current.amount == amount.value && current.currency == amount.currency)
                    {
                        return Ok(None);
                    }
                    let after = Balance {
                        amount: amount.value,
                        currency: amount.currency,
                        last_updated: now,
                        last_updated_by: self.system.clone(),
                        ..current.clone()
                    };
                    let history = audit::updated(current, &after, &self.system, now);
                    Ok(Some(BalanceWrite {
                        balance: after,
                        history,
                    }))
                })
                .await?;

            match written {
                Some(updated) => {
                    info!(
                        balance_id = updated.id,
                        connection = %conn.name,
                        old = balance.amount,
                        new = updated.amount,
                        currency = %updated.currency,
                        "balance reconciled"
                    );
                    reconciled += 1;
                }
                None => {
                    let current = self.storage.get_balance(balance.id).await?;
                    if current.ownership.is_owned_by(&conn.name) {
                        debug!(balance_id = balance.id, connection = %conn.name, "balance unchanged");
                        self.storage.touch_balance(balance.id, now).await?;
                        reconciled += 1;
                    }
                }
            }
        }

        Ok(reconciled)
    }

    async fn create_synced(&self, conn: &ApiConnection, amount: &Amount) -> Result<Balance, RasidError> {
        let source = self
            .storage
            .get_source(conn.source_id)
            .await?
            .ok_or_else(|| {
                RasidError::Configuration(format!(
                    "connection `{}` refers to unknown source {}",
                    conn.name, conn.source_id
                ))
            })?;
        let now = Utc::now();
        let draft = Balance {
            id: 0,
            source_id: source.id,
            source_name: source.name,
            amount: amount.value,
            currency: amount.currency,
            balance_type: source.source_type,
            limits: None,
            ownership: Ownership::Auto {
                api_source: conn.name.clone(),
            },
            notes: None,
            last_updated: now,
            last_updated_by: self.system.clone(),
        };
        let created = self
            .storage
            .insert_balance(draft, |stored| audit::created(stored, &self.system, now))
            .await?;
        info!(balance_id = created.id, connection = %conn.name, "balance created from sync");
        Ok(created)
    }
}

fn ensure_finite(amount: f64) -> Result<(), RasidError> {
    if amount.is_finite() {
        Ok(())
    } else {
        Err(RasidError::Configuration(
            "amount must be a finite number".to_string(),
        ))
    }
}

fn normalize_notes(notes: Option<String>) -> Option<String> {
    notes
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
}

fn same_content(a: &Balance, b: &Balance) -> bool {
    a.amount == b.amount && a.currency == b.currency && a.notes == b.notes
}
