use axum::{
    Json,
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info};

use crate::RasidError;
use crate::middleware::HumanEditor;
use crate::router::RasidState;
use crate::service::{ListenerId, SchedulerHandle, StatusListener};
use crate::types::{SyncConfig, SyncNowOutcome, SyncStatus};

pub async fn sync_status(State(state): State<RasidState>) -> Result<Json<SyncStatus>, RasidError> {
    Ok(Json(state.scheduler.status().await?))
}

pub async fn get_sync_config(
    State(state): State<RasidState>,
) -> Result<Json<SyncConfig>, RasidError> {
    Ok(Json(state.scheduler.config().await?))
}

pub async fn update_sync_config(
    State(state): State<RasidState>,
    HumanEditor(editor): HumanEditor,
    Json(cfg): Json<SyncConfig>,
) -> Result<Json<SyncConfig>, RasidError> {
    let applied = state.scheduler.update_config(cfg).await?;
    info!(
        editor = %editor.email,
        enabled = applied.enabled,
        frequency = applied.frequency,
        "sync config changed over http"
    );
    Ok(Json(applied))
}

pub async fn sync_now(State(state): State<RasidState>) -> Result<Json<SyncNowOutcome>, RasidError> {
    Ok(Json(state.scheduler.sync_now().await?))
}

/// Unregisters the listener when the client goes away.
struct ListenerGuard {
    scheduler: SchedulerHandle,
    id: ListenerId,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        debug!(id = self.id, "sse client disconnected");
        self.scheduler.remove_listener(self.id);
    }
}

/// Server-sent `status` events, starting with the current status.
pub async fn sync_events(
    State(state): State<RasidState>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, RasidError> {
    let (tx, rx) = mpsc::unbounded_channel::<SyncStatus>();
    let listener = StatusListener::new(move |status| {
        let _ = tx.send(status.clone());
    });
    let id = state.scheduler.add_listener(listener).await?;
    let guard = ListenerGuard {
        scheduler: state.scheduler.clone(),
        id,
    };

    let stream = UnboundedReceiverStream::new(rx).map(move |status| {
        let _guard = &guard;
        Event::default().event("status").json_data(status)
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
