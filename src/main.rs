use recon_core::traits::{CheckpointStore, JobQueue, LedgerStore, RegistrySource, TransferClient};
use recon_core::types::ChainKind;
use recon_core::ReconConfig;
use recon_db::{DatabaseConfig, DatabasePool, PgCheckpointStore, PgLedger};
use recon_metrics::{MetricsConfig, MetricsServer};
use recon_processor::EventProcessor;
use recon_redis::{RedisCheckpointStore, RedisConfig, RedisConnection, RedisJobQueue};
use recon_settlement::{
    EvmTransferClient, HandlerRegistry, SettlementDispatcher, TransferClients, TronTransferClient,
};
use recon_store::{MemoryCheckpointStore, MemoryJobQueue, MemoryLedger};
use recon_sync::{CachedRegistry, SyncEngine};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file (ignore if not found)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(Level::INFO.into())
                .add_directive("recon_sync=info".parse()?)
                .add_directive("recon_settlement=info".parse()?),
        )
        .init();

    info!("Reconciler starting...");

    // Load configuration (networks file plus env tuning)
    let config = match ReconConfig::load() {
        Ok(config) => {
            info!(
                networks = config.networks.len(),
                min_chunk = config.scanner.min_chunk,
                max_chunk = config.scanner.max_chunk,
                settlement_workers = config.settlement.workers,
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    // Initialize database (optional - only if DATABASE_URL is set)
    let db_pool = match DatabaseConfig::from_env() {
        Some(db_config) => match DatabasePool::new(&db_config).await {
            Ok(pool) => {
                if let Err(e) = pool.migrate().await {
                    error!(error = %e, "Failed to run database migrations");
                    std::process::exit(1);
                }
                if let Err(e) = pool.sync_networks(&config.networks).await {
                    error!(error = %e, "Failed to register networks in database");
                    std::process::exit(1);
                }
                info!("Database connected and migrations applied");
                Some(Arc::new(pool))
            }
            Err(e) => {
                error!(error = %e, "Failed to connect to database");
                std::process::exit(1);
            }
        },
        None => {
            warn!("DATABASE_URL not set, running with an in-memory ledger");
            None
        }
    };

    // Initialize Redis (optional - only if REDIS_URL is set)
    let redis = match RedisConfig::from_env() {
        Some(redis_config) => match RedisConnection::new(redis_config).await {
            Ok(conn) => {
                info!("Redis connected for checkpoints and settlement jobs");
                Some(Arc::new(conn))
            }
            Err(e) => {
                error!(error = %e, "Failed to connect to Redis");
                std::process::exit(1);
            }
        },
        None => {
            warn!("REDIS_URL not set, checkpoints and jobs will not survive a restart");
            None
        }
    };

    // Ledger and registry
    let (ledger, registry_source): (Arc<dyn LedgerStore>, Arc<dyn RegistrySource>) =
        match db_pool.as_ref() {
            Some(db) => {
                let ledger = Arc::new(PgLedger::new(db.inner().clone()));
                (ledger.clone(), ledger)
            }
            None => {
                let ledger = Arc::new(MemoryLedger::new());
                for (_, currencies) in &config.networks {
                    for currency in currencies {
                        ledger.add_currency(currency.clone());
                    }
                }
                for wallet in &config.wallets {
                    ledger.add_wallet(wallet.clone());
                }
                if config.wallets.is_empty() {
                    warn!("No wallets in the networks file, scanning stays idle until one is added");
                } else {
                    info!(wallets = config.wallets.len(), "Seeded in-memory wallets");
                }
                (ledger.clone(), ledger)
            }
        };
    if db_pool.is_some() && !config.wallets.is_empty() {
        warn!(
            wallets = config.wallets.len(),
            "Ignoring wallets from the networks file, the database is authoritative"
        );
    }

    // Checkpoints live in Redis when available, then Postgres, then memory
    let checkpoints: Arc<dyn CheckpointStore> = match (redis.as_ref(), db_pool.as_ref()) {
        (Some(conn), _) => Arc::new(RedisCheckpointStore::new(conn.clone())),
        (None, Some(db)) => Arc::new(PgCheckpointStore::new(db.inner().clone())),
        (None, None) => Arc::new(MemoryCheckpointStore::new()),
    };

    let queue: Arc<dyn JobQueue> = match redis.as_ref() {
        Some(conn) => Arc::new(RedisJobQueue::new(conn.clone())),
        None => Arc::new(MemoryJobQueue::new(Duration::from_secs(
            config.settlement.lease_secs,
        ))),
    };

    // Create sync engine
    let registry = Arc::new(CachedRegistry::new(
        registry_source,
        config.scanner.registry_ttl(),
    ));
    let processor = Arc::new(EventProcessor::new(ledger.clone()));
    let mut engine = SyncEngine::new(
        config.scanner.clone(),
        checkpoints,
        registry,
        processor.clone(),
    );

    let platform_key = config.settlement.platform_private_key.as_deref();
    if platform_key.is_none() {
        warn!("SETTLEMENT_PRIVATE_KEY not set, payouts will be canceled");
    }
    let tron_api_key = std::env::var("TRON_API_KEY")
        .ok()
        .filter(|key| !key.trim().is_empty());
    let mut clients = TransferClients::new();
    for (network, _) in &config.networks {
        if let Err(e) = engine.connect_network(network.clone()) {
            error!(network = %network.label, error = %e, "Failed to create RPC provider");
            std::process::exit(1);
        }

        let client: recon_core::Result<Arc<dyn TransferClient>> = match network.chain_kind {
            ChainKind::Evm => EvmTransferClient::new(
                &network.label,
                &network.rpc_url,
                platform_key,
                config.scanner.rpc_timeout(),
            )
            .map(|c| Arc::new(c) as Arc<dyn TransferClient>),
            ChainKind::Tron => TronTransferClient::new(
                &network.label,
                network.http_api_url(),
                platform_key,
                tron_api_key.as_deref(),
                config.scanner.rpc_timeout(),
            )
            .map(|c| Arc::new(c) as Arc<dyn TransferClient>),
        };
        match client {
            Ok(client) => clients.insert(network.id, client),
            Err(e) => {
                error!(network = %network.label, error = %e, "Failed to create transfer client");
                std::process::exit(1);
            }
        }
    }
    let engine = Arc::new(engine);
    if clients.is_empty() {
        warn!("No networks configured, settlement jobs will retry until reviewed");
    } else {
        info!(networks = clients.len(), "Transfer clients ready");
    }

    // Settlement handlers are resolved once, here
    let handlers = HandlerRegistry::with_transfer_executors(
        ledger.clone(),
        Arc::new(clients),
        &config.settlement,
    );
    let dispatcher = Arc::new(SettlementDispatcher::new(
        queue,
        ledger.clone(),
        Arc::new(handlers),
        config.settlement.clone(),
    ));

    // Setup shutdown signal
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

    // Handle Ctrl+C
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received (Ctrl+C)");
        shutdown_tx_clone.send(()).ok();
    });

    // Start Metrics server (if enabled)
    let metrics_config = MetricsConfig::from_env();
    if metrics_config.enabled {
        let address = metrics_config.address();
        match MetricsServer::install(metrics_config) {
            Ok(server) => {
                let rx = shutdown_tx.subscribe();
                tokio::spawn(async move {
                    if let Err(e) = server.run(rx).await {
                        error!(error = %e, "Metrics server error");
                    }
                });
                info!(address = %address, "Metrics server started");
            }
            Err(e) => warn!(error = %e, "Metrics disabled"),
        }
    }

    // Spawn status printer
    let engine_for_status = engine.clone();
    let processor_for_status = processor.clone();
    let ledger_for_status = ledger.clone();
    let db_for_status = db_pool.clone();
    let redis_for_status = redis.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            engine_for_status.print_status().await;

            let stats = processor_for_status.stats().await;
            info!(
                events = stats.total_events_processed,
                deposits = stats.deposits_applied,
                duplicates = stats.duplicates_ignored,
                unresolved = stats.unresolved_address + stats.unresolved_currency,
                rejected = stats.rejected,
                failures = stats.failures,
                "Ingest status"
            );

            match ledger_for_status.entries_for_review().await {
                Ok(entries) if !entries.is_empty() => {
                    warn!(count = entries.len(), "Settlements awaiting manual review");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Failed to list entries for review"),
            }

            if let Some(db) = &db_for_status {
                if let Err(e) = db.health_check().await {
                    error!(error = %e, "Database health check failed");
                }
            }
            if let Some(conn) = &redis_for_status {
                if let Err(e) = conn.health_check().await {
                    error!(error = %e, "Redis health check failed");
                }
            }
        }
    });

    // Run settlement workers alongside the scanners
    let settlement_rx = shutdown_rx.resubscribe();
    let settlement = tokio::spawn(async move {
        if let Err(e) = dispatcher.run(settlement_rx).await {
            error!(error = %e, "Settlement dispatcher error");
        }
    });

    // Run sync engine
    if let Err(e) = engine.run(shutdown_rx).await {
        error!(error = %e, "Sync engine error");
        std::process::exit(1);
    }

    // Graceful shutdown
    info!("Shutting down...");
    if let Err(e) = settlement.await {
        error!(error = %e, "Settlement task panicked");
    }

    // Close database connections
    if let Some(db) = db_pool {
        db.close().await;
        info!("Database connections closed");
    }

    info!("Reconciler shutdown complete");
    Ok(())
}
