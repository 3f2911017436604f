use mimalloc::MiMalloc;
use rasid::api::{Discovery, PartnerClient};
use rasid::db::Storage;
use rasid::service::{BalanceOps, SchedulerArgs, SyncEngine, scheduler_actor};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = &rasid::config::CONFIG;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.basic.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    info!(
        listen_addr = %cfg.basic.listen_addr,
        database_url = %cfg.basic.database_url,
        proxy = %cfg.basic.proxy.as_ref().map(|u| u.as_str()).unwrap_or("<none>"),
        loglevel = %cfg.basic.loglevel,
        pacing_ms = cfg.sync.pacing().as_millis() as u64,
        request_timeout_secs = cfg.sync.request_timeout_secs
    );

    let storage = Storage::connect(&cfg.basic.database_url).await?;
    let client = PartnerClient::new(&cfg.sync, cfg.basic.proxy.as_ref())?;
    let system = cfg.sync.system_editor();
    let ops = BalanceOps::new(storage.clone(), system.clone());
    let engine = SyncEngine::new(storage.clone(), client.clone(), ops.clone(), &cfg.sync);

    let scheduler = scheduler_actor::spawn(SchedulerArgs {
        engine,
        system,
        defaults: cfg.sync.default_sync_config(),
    })
    .await?;
    scheduler.start()?;

    let discovery = Discovery::new(client, &cfg.sync);
    let state = rasid::router::RasidState::new(storage, ops, scheduler.clone(), discovery);
    let app = rasid::router::rasid_router(state);

    let listener = TcpListener::bind(&cfg.basic.listen_addr).await?;
    info!("HTTP server listening on {}", cfg.basic.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutdown signal received");
        })
        .await?;

    if let Err(e) = scheduler.shutdown().await {
        warn!(error = %e, "scheduler did not stop cleanly");
    }
    Ok(())
}
