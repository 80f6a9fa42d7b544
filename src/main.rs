use anyhow::Context;
use autoprice::datasource::HttpStorefront;
use autoprice::db::init_db_with;
use autoprice::orchestration::RunnerSettings;
use autoprice::{
    api, config::Config, CycleGate, PriceEvents, Repository, RevenueSource, Runner, StoreId,
    Storefront, ToggleCoordinator,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = serve(config).await {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    // Room for every cycle worker plus the HTTP handlers.
    let max_connections = (config.worker_concurrency + 2) as u32;
    let pool = init_db_with(&config.database_path, max_connections)
        .await
        .context("Failed to initialize database")?;

    let repo = Arc::new(Repository::new(pool));
    let call_timeout = Duration::from_millis(config.call_timeout_ms);
    let http = Arc::new(
        HttpStorefront::new(config.storefront_api_url.clone()).with_max_elapsed(call_timeout),
    );
    let revenue: Arc<dyn RevenueSource> = http.clone();
    let storefront: Arc<dyn Storefront> = http;

    let store_id = StoreId::new(config.store_id.clone());
    let events = PriceEvents::new(repo.clone());
    let gate = Arc::new(CycleGate::new());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let runner = Runner::new(
        repo.clone(),
        revenue,
        storefront.clone(),
        events.clone(),
        gate.clone(),
        store_id.clone(),
        config.policy.clone(),
        RunnerSettings {
            concurrency: config.worker_concurrency,
            call_timeout,
        },
    )
    .with_shutdown(shutdown_rx);

    let coordinator = ToggleCoordinator::new(
        repo.clone(),
        storefront,
        events,
        gate,
        store_id,
        config.policy.period_ms,
        config.undo_window_ms,
        call_timeout,
    );

    let app = api::create_router(api::AppState::new(
        repo,
        Arc::new(runner),
        Arc::new(coordinator),
    ));

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!("Server listening on {}", addr);

    // Ctrl-C stops new cycle items and drains in-flight requests.
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Could not listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;
    Ok(())
}
