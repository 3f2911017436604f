//! One sequential sweep over the active connections.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::api::{Amount, PartnerClient, normalize, parse_payload};
use crate::config::SyncSettings;
use crate::db::Storage;
use crate::error::{RasidError, SyncFailure};
use crate::service::balance_ops::BalanceOps;
use crate::service::ownership;
use crate::types::{
    ApiConnection, ConnectionOutcome, ConnectionResult, Editor, PassReport, PassTrigger,
    SyncStatus,
};

/// What started a pass, and for timer passes how far away the next tick is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Manual,
    Timer { period: Duration },
}

impl Schedule {
    pub fn trigger(&self) -> PassTrigger {
        match self {
            Schedule::Manual => PassTrigger::Manual,
            Schedule::Timer { .. } => PassTrigger::Timer,
        }
    }
}

#[derive(Clone)]
pub struct SyncEngine {
    storage: Storage,
    client: PartnerClient,
    ops: BalanceOps,
    request_timeout: Duration,
    pacing: Duration,
    system: Editor,
}

impl SyncEngine {
    pub fn new(
        storage: Storage,
        client: PartnerClient,
        ops: BalanceOps,
        settings: &SyncSettings,
    ) -> Self {
        Self {
            storage,
            client,
            ops,
            request_timeout: settings.request_timeout(),
            pacing: settings.pacing(),
            system: settings.system_editor(),
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Run a full pass. `publish` receives the status at pass start, after each
    /// connection, and at the end. Per-connection failures are recorded on the
    /// connection and never stop the pass.
    pub async fn run_pass<F>(
        &self,
        schedule: Schedule,
        last_sync_time: Option<DateTime<Utc>>,
        mut publish: F,
    ) -> Result<PassReport, RasidError>
    where
        F: FnMut(SyncStatus) + Send,
    {
        let trigger = schedule.trigger();
        let started_at = Utc::now();
        let mut status = SyncStatus {
            is_running: true,
            synced_count: 0,
            total_connections: 0,
            current_connection: None,
            last_sync_time,
        };
        publish(status.clone());

        let ownership_changes = match ownership::assign(&self.storage, &self.system).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "ownership assignment failed; continuing with stored owners");
                0
            }
        };

        let connections = match self.storage.list_active_connections().await {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "cannot load active connections; pass aborted");
                status.is_running = false;
                publish(status);
                return Err(e);
            }
        };

        let mut results = Vec::with_capacity(connections.len());
        let mut due = Vec::with_capacity(connections.len());
        for conn in connections {
            match skip_reason(schedule, &conn, started_at) {
                Some(reason) => {
                    debug!(connection = %conn.name, reason, "connection skipped");
                    results.push(ConnectionResult {
                        connection_id: conn.id,
                        name: conn.name,
                        outcome: ConnectionOutcome::Skipped {
                            reason: reason.to_string(),
                        },
                    });
                }
                None => due.push(conn),
            }
        }

        info!(?trigger, total = due.len(), ownership_changes, "sync pass started");
        status.total_connections = due.len();
        publish(status.clone());

        for (idx, conn) in due.iter().enumerate() {
            if idx > 0 {
                tokio::time::sleep(self.pacing).await;
            }
            status.current_connection = Some(conn.name.clone());
            publish(status.clone());

            let outcome = match self.sync_one(conn).await {
                Ok((amount, balances_updated)) => {
                    self.record(conn, Ok(())).await;
                    ConnectionOutcome::Synced {
                        amount: amount.value,
                        currency: amount.currency,
                        balances_updated,
                    }
                }
                Err(failure) => {
                    let message = failure.to_string();
                    warn!(connection = %conn.name, error = %message, "connection sync failed");
                    self.record(conn, Err(message.clone())).await;
                    ConnectionOutcome::Failed { error: message }
                }
            };
            results.push(ConnectionResult {
                connection_id: conn.id,
                name: conn.name.clone(),
                outcome,
            });

            status.synced_count += 1;
            publish(status.clone());
        }

        let finished_at = Utc::now();
        let report = PassReport {
            trigger,
            started_at,
            finished_at,
            ownership_changes,
            results,
        };
        info!(
            ?trigger,
            synced = report.synced(),
            failed = report.failed(),
            elapsed_ms = (finished_at - started_at).num_milliseconds(),
            "sync pass finished"
        );

        status.is_running = false;
        status.current_connection = None;
        status.last_sync_time = Some(finished_at);
        publish(status);
        Ok(report)
    }

    /// Validate, fetch, normalize, reconcile.
    async fn sync_one(&self, conn: &ApiConnection) -> Result<(Amount, usize), SyncFailure> {
        conn.preflight()?;
        let body = self.client.fetch_balance(conn, self.request_timeout).await?;
        let raw = parse_payload(&body)?;
        let amount = normalize(&raw, conn.currency)?;
        debug!(
            connection = %conn.name,
            value = amount.value,
            strategy = ?amount.strategy,
            "balance extracted"
        );
        let updated = self.ops.apply_synced_amount(conn, &amount).await?;
        if updated == 0 {
            // Ownership moved away mid-pass (rename, deactivation, new owner).
            return Err(SyncFailure::Ownership(format!(
                "no balance of source {} is owned by `{}`; value not applied",
                conn.source_id, conn.name
            )));
        }
        Ok((amount, updated))
    }

    async fn record(&self, conn: &ApiConnection, result: Result<(), String>) {
        if let Err(e) = self
            .storage
            .record_sync_result(conn.id, Utc::now(), result)
            .await
        {
            warn!(connection = %conn.name, error = %e, "failed to persist sync result");
        }
    }
}

fn skip_reason(
    schedule: Schedule,
    conn: &ApiConnection,
    now: DateTime<Utc>,
) -> Option<&'static str> {
    let Schedule::Timer { period } = schedule else {
        return None;
    };
    if !conn.auto_sync {
        Some("auto sync disabled")
    } else if !conn.is_due(now, period) {
        Some("not due yet")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ApiMethod, Currency};
    use chrono::TimeDelta;

    const TIMER: Schedule = Schedule::Timer {
        period: Duration::from_secs(60),
    };

    fn conn(auto_sync: bool, last_sync: Option<DateTime<Utc>>) -> ApiConnection {
        ApiConnection {
            id: 1,
            source_id: 1,
            name: "partner".to_string(),
            api_url: "https://partner.example/balance".to_string(),
            api_method: ApiMethod::Get,
            email: None,
            password: None,
            auth_token: None,
            currency: Currency::Usd,
            is_active: true,
            auto_sync,
            sync_interval_seconds: 300,
            last_sync,
            last_sync_status: None,
            last_sync_error: None,
        }
    }

    #[test]
    fn manual_pass_polls_everything() {
        let now = Utc::now();
        assert_eq!(skip_reason(Schedule::Manual, &conn(false, Some(now)), now), None);
    }

    #[test]
    fn timer_pass_respects_connection_schedule() {
        let now = Utc::now();
        assert_eq!(
            skip_reason(TIMER, &conn(false, None), now),
            Some("auto sync disabled")
        );
        let recent = Some(now - TimeDelta::seconds(30));
        assert_eq!(skip_reason(TIMER, &conn(true, recent), now), Some("not due yet"));
        let stale = Some(now - TimeDelta::seconds(301));
        assert_eq!(skip_reason(TIMER, &conn(true, stale), now), None);
    }

    #[test]
    fn timer_pass_polls_at_the_nearest_tick() {
        let now = Utc::now();
        // 300s interval, polled 2s into a tick 240s ago: closer to this tick than the next.
        let drifted = Some(now - TimeDelta::seconds(238));
        assert_eq!(skip_reason(TIMER, &conn(true, drifted), now), Some("not due yet"));
        let drifted = Some(now - TimeDelta::seconds(272));
        assert_eq!(skip_reason(TIMER, &conn(true, drifted), now), None);
    }
}
