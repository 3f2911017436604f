#![allow(dead_code)]

use axum::{Json, Router, http::StatusCode, routing::{get, post}};
use rasid::api::{Discovery, PartnerClient};
use rasid::config::SyncSettings;
use rasid::db::Storage;
use rasid::router::RasidState;
use rasid::service::{BalanceOps, SchedulerArgs, SchedulerHandle, SyncEngine, scheduler_actor};
use rasid::types::{
    ApiMethod, BalanceSource, BalanceType, ConnectionInput, Currency, Editor, NewSource,
    SyncConfig,
};
use serde_json::{Value, json};
use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tokio::net::TcpListener;

pub struct TempDb {
    pub storage: Storage,
    path: PathBuf,
}

impl Drop for TempDb {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

pub async fn temp_db(tag: &str) -> TempDb {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX_EPOCH")
        .as_nanos();
    let mut path = std::env::temp_dir();
    path.push(format!("rasid-{tag}-{}-{}.sqlite", std::process::id(), nanos));
    let database_url = format!("sqlite:{}", path.display());
    let storage = Storage::connect(&database_url)
        .await
        .expect("failed to open temp database");
    TempDb { storage, path }
}

/// Fast settings: no retries, minimum pacing, short timeout.
pub fn settings() -> SyncSettings {
    SyncSettings {
        request_timeout_secs: 1,
        discovery_timeout_secs: 1,
        pacing_ms: 0,
        retry_max_times: 0,
        ..SyncSettings::default()
    }
}

pub fn desk() -> Editor {
    Editor {
        email: "desk@agency.example".to_string(),
        name: "Front Desk".to_string(),
    }
}

/// A partner API with one route per response shape.
pub async fn spawn_partner() -> SocketAddr {
    let app = Router::new()
        .route(
            "/wallets",
            get(|| async {
                Json(json!({
                    "status": "ok",
                    "data": {
                        "wallets": [
                            {"currency": "USD", "balance": 1250.5},
                            {"currency": "IQD", "balance": 900000}
                        ]
                    }
                }))
            }),
        )
        .route(
            "/login",
            post(|Json(body): Json<Value>| async move {
                if body["type"] == "login" && body["password"] == "secret" {
                    (StatusCode::OK, Json(json!({"balance": 4200})))
                } else {
                    (StatusCode::UNAUTHORIZED, Json(json!({"error": "bad login"})))
                }
            }),
        )
        .route(
            "/broken",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "upstream down") }),
        )
        .route(
            "/empty",
            get(|| async { Json(json!({"wallets": [{"currency": "AED", "balance": 5}]})) }),
        )
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(700)).await;
                Json(json!({"amount": 10}))
            }),
        )
        .route(
            "/maintenance",
            get(|| async {
                (
                    StatusCode::OK,
                    [("content-type", "text/html")],
                    "<html><body>Scheduled maintenance</body></html>",
                )
            }),
        );
    serve(app).await
}

/// A partner answering `/balance` with `{"balance": 42}` after `delay`,
/// counting every call.
pub async fn spawn_counting_partner(delay: Duration) -> (SocketAddr, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new().route(
        "/balance",
        get({
            let hits = hits.clone();
            move || {
                hits.fetch_add(1, Ordering::SeqCst);
                async move {
                    tokio::time::sleep(delay).await;
                    Json(json!({"balance": 42}))
                }
            }
        }),
    );
    (serve(app).await, hits)
}

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind partner listener");
    let addr = listener.local_addr().expect("no local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

pub async fn source(storage: &Storage, name: &str) -> BalanceSource {
    storage
        .insert_source(&NewSource {
            name: name.to_string(),
            source_type: BalanceType::Supplier,
        })
        .await
        .expect("failed to insert source")
}

pub fn get_connection(source_id: i64, name: &str, url: String, currency: Currency) -> ConnectionInput {
    ConnectionInput {
        source_id,
        name: name.to_string(),
        api_url: url,
        api_method: ApiMethod::Get,
        email: None,
        password: None,
        auth_token: Some("token".to_string()),
        currency,
        is_active: true,
        auto_sync: true,
        sync_interval_seconds: 60,
    }
}

pub fn engine(storage: &Storage) -> SyncEngine {
    engine_with(storage, &settings())
}

pub fn engine_with(storage: &Storage, settings: &SyncSettings) -> SyncEngine {
    let client = PartnerClient::new(settings, None).expect("failed to build client");
    let ops = BalanceOps::new(storage.clone(), settings.system_editor());
    SyncEngine::new(storage.clone(), client, ops, settings)
}

pub async fn scheduler(storage: &Storage, defaults: SyncConfig) -> SchedulerHandle {
    scheduler_with(storage, defaults, &settings()).await
}

pub async fn scheduler_with(
    storage: &Storage,
    defaults: SyncConfig,
    settings: &SyncSettings,
) -> SchedulerHandle {
    scheduler_actor::spawn(SchedulerArgs {
        engine: engine_with(storage, settings),
        system: settings.system_editor(),
        defaults,
    })
    .await
    .expect("failed to spawn scheduler")
}

pub async fn app_state(storage: &Storage) -> RasidState {
    let settings = settings();
    let client = PartnerClient::new(&settings, None).expect("failed to build client");
    let ops = BalanceOps::new(storage.clone(), settings.system_editor());
    let scheduler = scheduler(
        storage,
        SyncConfig {
            enabled: false,
            frequency: 60,
        },
    )
    .await;
    let discovery = Discovery::new(client, &settings);
    RasidState::new(storage.clone(), ops, scheduler, discovery)
}
