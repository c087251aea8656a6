use std::sync::Arc;

use escrow_coordinator::chat::telegram::{TelegramApi, UpdatePoller};
use escrow_coordinator::chat::{ChatApi, ChatEvent};
use escrow_coordinator::config::Config;
use escrow_coordinator::escrow::EscrowService;
use escrow_coordinator::handlers::EventRouter;
use escrow_coordinator::registry::ContractRegistry;
use escrow_coordinator::rooms::RoomPool;
use escrow_coordinator::scheduler::Scheduler;
use escrow_coordinator::watcher::DepositWatcher;
use escrow_coordinator::{api, chain, db};

fn main() -> eyre::Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    // Run the async main
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    tracing::info!("Starting escrow coordinator");

    let config = Arc::new(Config::load()?);
    tracing::info!(
        evm_chains = config.evm.chains.len(),
        main_group = config.telegram.main_group_id,
        fee_bps = config.trade.fee_bps,
        "Configuration loaded"
    );

    // Connect to database and run migrations
    let pool = db::create_pool(&config.database.url).await?;
    tracing::info!("Database connected");
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    // Load the vault catalogue; a registry that fails its consistency
    // checks refuses to start the coordinator.
    let registry = Arc::new(ContractRegistry::load(&pool).await?);

    let gateway = Arc::new(chain::ChainGateway::new(&config)?);
    let chat: Arc<dyn ChatApi> = Arc::new(TelegramApi::new(&config.telegram.bot_token));
    let rooms = Arc::new(RoomPool::new(pool.clone(), Arc::clone(&chat)));
    let (scheduler, mut timer_rx) = Scheduler::new(config.timers.clone());

    let service = Arc::new(EscrowService::new(
        pool.clone(),
        Arc::clone(&gateway),
        Arc::clone(&registry),
        Arc::clone(&rooms),
        Arc::clone(&chat),
        Arc::clone(&scheduler),
        Arc::clone(&config),
    )?);

    // Rebuild timers and in-flight releases from persisted state.
    service.reconstruct_timers().await?;
    service.resume_pending_releases().await?;

    // Create shutdown channels
    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    let (shutdown_tx2, shutdown_rx2) = tokio::sync::mpsc::channel::<()>(1);

    // Setup signal handlers
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(()).await;
        let _ = shutdown_tx2.send(()).await;
    });

    // Start metrics/API server
    let api_addr = std::net::SocketAddr::from(([0, 0, 0, 0], 9090));
    let api_db = pool.clone();
    tokio::spawn(async move {
        if let Err(e) = api::start_api_server(api_addr, api_db).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    // Timer dispatch loop
    let timer_service = Arc::clone(&service);
    tokio::spawn(async move {
        while let Some(fired) = timer_rx.recv().await {
            timer_service.handle_timer(fired).await;
        }
    });

    // Inbound event dispatch loop
    let (event_tx, mut event_rx) = tokio::sync::mpsc::channel::<ChatEvent>(256);
    let router = Arc::new(EventRouter::new(Arc::clone(&service), Arc::clone(&chat)));
    let dispatch_router = Arc::clone(&router);
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            dispatch_router.handle(event).await;
        }
    });

    let poller = UpdatePoller::new(&config.telegram.bot_token);
    let watcher = DepositWatcher::new(pool.clone(), Arc::clone(&service), &config.watcher);

    tracing::info!("Coordinator initialized, entering run loops");

    // Run the poller and watcher concurrently until shutdown
    tokio::select! {
        result = poller.run(event_tx, shutdown_rx) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Update poller error");
            }
        }
        result = watcher.run(shutdown_rx2) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Deposit watcher error");
            }
        }
    }

    tracing::info!("Escrow coordinator stopped");
    Ok(())
}

/// Initialize tracing/logging with structured output
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,escrow_coordinator=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(filter)
        .init();
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
