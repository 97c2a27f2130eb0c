use std::{sync::Arc, time::Duration};

use tokio::{net::TcpListener, signal, sync::mpsc};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};

use campus_connect_api as api;
use campus_connect_api::notifications::{
    InMemoryNotificationService, NotificationService, Notifier, RedisNotificationService,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Init events
    let (event_tx, event_rx) = mpsc::channel(1024);
    let event_sender = api::events::EventSender::new(event_tx);
    tokio::spawn(api::events::process_events(event_rx));

    // Notification delivery: redis when enabled, in-memory otherwise.
    // Client construction does not connect; failures surface per publish and
    // are swallowed by the best-effort wrapper.
    let notification_service: Arc<dyn NotificationService> = if cfg.notifications_enabled {
        let redis_client = Arc::new(redis::Client::open(cfg.redis_url.clone())?);
        Arc::new(RedisNotificationService::new(redis_client))
    } else {
        info!("Notifications disabled; using in-memory delivery");
        Arc::new(InMemoryNotificationService::new())
    };
    let notifier = Notifier::new(notification_service);

    // Aggregate app services used by HTTP handlers
    let services = api::handlers::AppServices::new(
        db_arc.clone(),
        Arc::new(event_sender.clone()),
        notifier,
        &cfg,
    );

    // Cutoff enforcement: lock open batches whose cutoff has passed.
    if cfg.cutoff_sweep_interval_secs > 0 {
        let sweeper = api::services::sweeper::CutoffSweeper::new(
            db_arc.clone(),
            services.batches.clone(),
            Duration::from_secs(cfg.cutoff_sweep_interval_secs),
        );
        tokio::spawn(sweeper.run());
    } else {
        info!("Cutoff sweeper disabled");
    }

    // Compose shared app state
    let app_state = api::AppState {
        db: db_arc,
        config: cfg.clone(),
        event_sender,
        services,
    };

    let app = api::app_router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr = format!("{}:{}", cfg.host, cfg.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Campus Connect API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
