use crate::db::Storage;
use crate::error::RasidError;
use crate::service::ownership;
use crate::service::sync_pass::{Schedule, SyncEngine};
use crate::types::{Editor, PassReport, SyncConfig, SyncNowOutcome, SyncStatus};

use futures::{FutureExt, StreamExt};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub type ListenerId = u64;

/// Callback receiving every published [`SyncStatus`].
#[derive(Clone)]
pub struct StatusListener(Arc<dyn Fn(&SyncStatus) + Send + Sync>);

impl StatusListener {
    pub fn new(f: impl Fn(&SyncStatus) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }
}

impl fmt::Debug for StatusListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StatusListener")
    }
}

/// Public messages handled by the scheduler actor.
#[derive(Debug)]
pub enum SchedulerMessage {
    /// Arm the timer if sync is enabled.
    Start,
    /// Run an immediate pass unless one is in flight.
    SyncNow(RpcReplyPort<Result<SyncNowOutcome, RasidError>>),
    /// Validate, persist and apply a new configuration.
    UpdateConfig(SyncConfig, RpcReplyPort<Result<SyncConfig, RasidError>>),
    GetStatus(RpcReplyPort<SyncStatus>),
    GetConfig(RpcReplyPort<SyncConfig>),
    AddListener(StatusListener, RpcReplyPort<ListenerId>),
    RemoveListener(ListenerId),

    // Internal messages (sent by the actor's own tasks)
    /// Timer fired.
    Tick,
    /// `sync_settings` changed in the store.
    ConfigChanged(SyncConfig),
    /// `api_connections` changed in the store.
    ConnectionsChanged,
    /// Progress published by the running pass.
    Progress(SyncStatus),
    /// The running pass ended.
    PassFinished(Result<PassReport, RasidError>),
}

/// Handle for interacting with the scheduler actor.
#[derive(Clone)]
pub struct SchedulerHandle {
    actor: ActorRef<SchedulerMessage>,
}

impl SchedulerHandle {
    pub fn start(&self) -> Result<(), RasidError> {
        ractor::cast!(self.actor, SchedulerMessage::Start)
            .map_err(|e| RasidError::RactorError(format!("Start cast failed: {e}")))
    }

    /// Poll every active connection now. Resolves when the pass ends, or at once
    /// with [`SyncNowOutcome::AlreadyRunning`] if another pass is in flight.
    pub async fn sync_now(&self) -> Result<SyncNowOutcome, RasidError> {
        ractor::call!(self.actor, SchedulerMessage::SyncNow)
            .map_err(|e| RasidError::RactorError(format!("SyncNow RPC failed: {e}")))?
    }

    pub async fn update_config(&self, cfg: SyncConfig) -> Result<SyncConfig, RasidError> {
        ractor::call!(self.actor, SchedulerMessage::UpdateConfig, cfg)
            .map_err(|e| RasidError::RactorError(format!("UpdateConfig RPC failed: {e}")))?
    }

    pub async fn config(&self) -> Result<SyncConfig, RasidError> {
        ractor::call!(self.actor, SchedulerMessage::GetConfig)
            .map_err(|e| RasidError::RactorError(format!("GetConfig RPC failed: {e}")))
    }

    pub async fn status(&self) -> Result<SyncStatus, RasidError> {
        ractor::call!(self.actor, SchedulerMessage::GetStatus)
            .map_err(|e| RasidError::RactorError(format!("GetStatus RPC failed: {e}")))
    }

    /// Register a status callback. It is called right away with the current status.
    pub async fn add_listener(&self, listener: StatusListener) -> Result<ListenerId, RasidError> {
        ractor::call!(self.actor, SchedulerMessage::AddListener, listener)
            .map_err(|e| RasidError::RactorError(format!("AddListener RPC failed: {e}")))
    }

    pub fn remove_listener(&self, id: ListenerId) {
        let _ = ractor::cast!(self.actor, SchedulerMessage::RemoveListener(id));
    }

    /// Stop the timer and abandon any in-flight pass.
    pub async fn shutdown(&self) -> Result<(), RasidError> {
        self.actor
            .stop_and_wait(Some("shutdown".to_string()), Some(Duration::from_secs(5)))
            .await
            .map_err(|e| RasidError::RactorError(format!("scheduler stop failed: {e}")))
    }
}

pub struct SchedulerArgs {
    pub engine: SyncEngine,
    pub system: Editor,
    /// Used only when no configuration has been persisted yet.
    pub defaults: SyncConfig,
}

/// Internal state held by the scheduler actor
struct SchedulerState {
    engine: SyncEngine,
    storage: Storage,
    system: Editor,
    config: SyncConfig,
    started: bool,
    timer: Option<JoinHandle<()>>,
    pass: Option<JoinHandle<()>>,
    pending: Option<RpcReplyPort<Result<SyncNowOutcome, RasidError>>>,
    status: SyncStatus,
    listeners: BTreeMap<ListenerId, StatusListener>,
    next_listener: ListenerId,
    watchers: Vec<JoinHandle<()>>,
}

impl SchedulerState {
    fn running(&self) -> bool {
        self.pass.is_some()
    }

    fn publish(&self) {
        for listener in self.listeners.values() {
            (listener.0)(&self.status);
        }
    }
}

/// ractor-based sync scheduler
struct SyncScheduler;

#[ractor::async_trait]
impl Actor for SyncScheduler {
    type Msg = SchedulerMessage;
    type State = SchedulerState;
    type Arguments = SchedulerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let storage = args.engine.storage().clone();
        let config = storage
            .load_sync_config(args.defaults)
            .await
            .map_err(|e| ActorProcessingErr::from(format!("load sync config failed: {e}")))?;

        let watchers = vec![
            spawn_connection_watcher(&storage, myself.clone()),
            spawn_config_watcher(&storage, myself),
        ];

        info!(
            enabled = config.enabled,
            frequency = config.frequency,
            "SyncScheduler initialized"
        );

        Ok(SchedulerState {
            engine: args.engine,
            storage,
            system: args.system,
            config,
            started: false,
            timer: None,
            pass: None,
            pending: None,
            status: SyncStatus::default(),
            listeners: BTreeMap::new(),
            next_listener: 0,
            watchers,
        })
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if let Some(pass) = state.pass.take() {
            warn!("scheduler stopping with a pass in flight; abandoning it");
            pass.abort();
        }
        for watcher in state.watchers.drain(..) {
            watcher.abort();
        }
        info!("SyncScheduler stopped");
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SchedulerMessage::Start => {
                state.started = true;
                self.reschedule(state, &myself);
                let _ = ractor::cast!(myself, SchedulerMessage::ConnectionsChanged);
            }
            SchedulerMessage::Tick => {
                if state.running() {
                    debug!("tick skipped, a pass is still running");
                } else {
                    let period = Duration::from_secs(state.config.frequency);
                    self.start_pass(state, &myself, Schedule::Timer { period });
                }
            }
            SchedulerMessage::SyncNow(reply) => {
                if state.running() {
                    info!("sync now requested while a pass is running");
                    let _ = reply.send(Ok(SyncNowOutcome::AlreadyRunning));
                } else {
                    state.pending = Some(reply);
                    self.start_pass(state, &myself, Schedule::Manual);
                }
            }
            SchedulerMessage::UpdateConfig(cfg, reply) => {
                let result = self.handle_update_config(state, &myself, cfg).await;
                let _ = reply.send(result);
            }
            SchedulerMessage::ConfigChanged(cfg) => {
                if cfg != state.config {
                    info!(
                        enabled = cfg.enabled,
                        frequency = cfg.frequency,
                        "sync config changed in store"
                    );
                    self.apply_config(state, &myself, cfg);
                }
            }
            SchedulerMessage::ConnectionsChanged => {
                if let Err(e) = ownership::assign(&state.storage, &state.system).await {
                    warn!(error = %e, "ownership assignment after connection change failed");
                }
            }
            SchedulerMessage::GetStatus(reply) => {
                let _ = reply.send(state.status.clone());
            }
            SchedulerMessage::GetConfig(reply) => {
                let _ = reply.send(state.config);
            }
            SchedulerMessage::AddListener(listener, reply) => {
                let id = state.next_listener;
                state.next_listener += 1;
                (listener.0)(&state.status);
                state.listeners.insert(id, listener);
                debug!(id, total = state.listeners.len(), "status listener added");
                let _ = reply.send(id);
            }
            SchedulerMessage::RemoveListener(id) => {
                if state.listeners.remove(&id).is_some() {
                    debug!(id, total = state.listeners.len(), "status listener removed");
                }
            }
            SchedulerMessage::Progress(status) => {
                state.status = status;
                state.publish();
            }
            SchedulerMessage::PassFinished(result) => {
                state.pass = None;
                if state.status.is_running {
                    state.status.is_running = false;
                    state.status.current_connection = None;
                    state.publish();
                }
                if let Err(e) = &result {
                    error!(error = %e, "sync pass failed");
                }
                if let Some(reply) = state.pending.take() {
                    let _ = reply.send(result.map(SyncNowOutcome::Completed));
                }
            }
        }
        Ok(())
    }
}

impl SyncScheduler {
    fn start_pass(
        &self,
        state: &mut SchedulerState,
        myself: &ActorRef<SchedulerMessage>,
        schedule: Schedule,
    ) {
        state.status.is_running = true;
        state.status.synced_count = 0;
        state.status.current_connection = None;

        let engine = state.engine.clone();
        let last_sync_time = state.status.last_sync_time;
        let me = myself.clone();
        state.pass = Some(tokio::spawn(async move {
            let progress = me.clone();
            let result = supervised(engine.run_pass(schedule, last_sync_time, move |status| {
                let _ = ractor::cast!(progress, SchedulerMessage::Progress(status));
            }))
            .await;
            let _ = ractor::cast!(me, SchedulerMessage::PassFinished(result));
        }));
    }

    async fn handle_update_config(
        &self,
        state: &mut SchedulerState,
        myself: &ActorRef<SchedulerMessage>,
        cfg: SyncConfig,
    ) -> Result<SyncConfig, RasidError> {
        cfg.validate()?;
        state.storage.save_sync_config(cfg).await?;
        info!(
            enabled = cfg.enabled,
            frequency = cfg.frequency,
            "sync config updated"
        );
        self.apply_config(state, myself, cfg);
        Ok(cfg)
    }

    fn apply_config(
        &self,
        state: &mut SchedulerState,
        myself: &ActorRef<SchedulerMessage>,
        cfg: SyncConfig,
    ) {
        let frequency_changed = cfg.frequency != state.config.frequency;
        state.config = cfg;
        if frequency_changed && let Some(timer) = state.timer.take() {
            timer.abort();
        }
        self.reschedule(state, myself);
    }

    /// Bring the timer in line with the configuration. Never touches a running pass.
    fn reschedule(&self, state: &mut SchedulerState, myself: &ActorRef<SchedulerMessage>) {
        if !state.started {
            return;
        }
        match (state.config.enabled, state.timer.is_some()) {
            (true, false) => {
                info!(frequency = state.config.frequency, "sync timer armed");
                state.timer = Some(spawn_timer(myself.clone(), state.config.frequency));
            }
            (false, true) => {
                info!("sync timer disarmed");
                if let Some(timer) = state.timer.take() {
                    timer.abort();
                }
            }
            _ => {}
        }
    }
}

/// Run a pass, turning a panic into an error so that `PassFinished` is always
/// sent and the scheduler never stays marked as running.
async fn supervised<F>(pass: F) -> Result<PassReport, RasidError>
where
    F: Future<Output = Result<PassReport, RasidError>>,
{
    match AssertUnwindSafe(pass).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(RasidError::PassAborted(format!(
            "pass panicked: {}",
            panic_message(panic.as_ref())
        ))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        *msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic"
    }
}

fn spawn_timer(myself: ActorRef<SchedulerMessage>, frequency: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_secs(frequency);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if ractor::cast!(myself, SchedulerMessage::Tick).is_err() {
                break;
            }
        }
    })
}

fn spawn_connection_watcher(
    storage: &Storage,
    myself: ActorRef<SchedulerMessage>,
) -> JoinHandle<()> {
    let mut changes = Box::pin(storage.watch_connections());
    tokio::spawn(async move {
        // Recorded sync results land here too; only a change of owner needs a reassignment.
        let mut last_claims = None;
        while let Some(connections) = changes.next().await {
            let claims = ownership::claims(&connections);
            if last_claims.as_ref() == Some(&claims) {
                continue;
            }
            debug!(
                count = connections.len(),
                owners = claims.len(),
                "connection ownership claims changed"
            );
            last_claims = Some(claims);
            if ractor::cast!(myself, SchedulerMessage::ConnectionsChanged).is_err() {
                break;
            }
        }
    })
}

fn spawn_config_watcher(storage: &Storage, myself: ActorRef<SchedulerMessage>) -> JoinHandle<()> {
    let mut changes = Box::pin(storage.watch_sync_config());
    tokio::spawn(async move {
        while let Some(cfg) = changes.next().await {
            if ractor::cast!(myself, SchedulerMessage::ConfigChanged(cfg)).is_err() {
                break;
            }
        }
    })
}

/// Spawn the scheduler actor and return a handle. The timer is armed by [`SchedulerHandle::start`].
pub async fn spawn(args: SchedulerArgs) -> Result<SchedulerHandle, RasidError> {
    let (actor, _jh) = Actor::spawn(None, SyncScheduler, args)
        .await
        .map_err(|e| RasidError::RactorError(format!("failed to spawn SyncScheduler: {e}")))?;
    Ok(SchedulerHandle { actor })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    async fn exploding_pass() -> Result<PassReport, RasidError> {
        panic!("interval overflow")
    }

    #[tokio::test]
    async fn panicking_pass_is_reported_as_aborted() {
        match supervised(exploding_pass()).await {
            Err(RasidError::PassAborted(msg)) => {
                assert_eq!(msg, "pass panicked: interval overflow");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn finished_pass_passes_through() {
        let now = Utc::now();
        let report = PassReport {
            trigger: crate::types::PassTrigger::Timer,
            started_at: now,
            finished_at: now,
            ownership_changes: 0,
            results: Vec::new(),
        };
        let result = supervised(async { Ok::<_, RasidError>(report.clone()) })
            .await
            .unwrap();
        assert_eq!(result, report);

        let failed = async { Err::<PassReport, _>(RasidError::RactorError("gone".to_string())) };
        let result = supervised(failed).await;
        assert!(matches!(result, Err(RasidError::RactorError(_))));
    }

    #[test]
    fn formatted_panics_keep_their_message() {
        let owned: Box<dyn Any + Send> = Box::new(format!("overflow at {}", 3));
        assert_eq!(panic_message(owned.as_ref()), "overflow at 3");
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }
}
