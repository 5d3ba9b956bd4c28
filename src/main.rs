use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::signal;
use tracing::{error, info, warn};

use resto_incentives as app;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = app::config::load_config()?;
    app::config::init_tracing(&cfg.log_level, cfg.log_json);

    // Init DB
    let db_pool = app::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        app::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Init events
    let (event_sender, event_rx) = app::events::EventSender::channel(cfg.event_channel_capacity);
    tokio::spawn(app::events::process_events(event_rx));

    let catalog = Arc::new(app::catalog::DbCatalog::new(db_arc.clone()));
    let sessions = Arc::new(app::session::InMemorySessionStore::new());
    let state = app::AppState::new(db_arc, cfg.clone(), catalog, sessions, event_sender);

    if cfg.maintenance_interval_secs > 0 {
        tokio::spawn(run_maintenance(
            state.pipeline.clone(),
            Duration::from_secs(cfg.maintenance_interval_secs),
        ));
    }

    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;
    info!("resto-incentives listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Periodic voucher expiry and referral reconciliation.
async fn run_maintenance(pipeline: app::services::pricing::PricingPipeline, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        if let Err(e) = pipeline.expire_vouchers().await {
            warn!("voucher expiry sweep failed: {}", e);
        }
        if let Err(e) = pipeline.reconcile_referrals().await {
            warn!("referral reconciliation failed: {}", e);
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
