use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use revive_clients::{GatewayClient, OpenAiClient};
use revive_core::business_hours::BusinessHours;
use revive_core::config::Config;
use revive_core::credits::CreditGate;
use revive_core::driver::ExecutionDriver;
use revive_core::guard::Guard;
use revive_core::notify::Notifier;
use revive_core::orphans::OrphanDetector;
use revive_core::personalize::Personalizer;
use revive_core::retry::PollPolicy;
use revive_core::scheduler::{spawn_scheduler, PollScheduler, SchedulerSettings};
use revive_core::stats::RunStats;
use revive_core::status::{router, StatusState};
use revive_core::store::{PgStore, Store};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "revive=debug,revive_core=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Revive starting up...");

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    info!("Configuration loaded");
    info!("  OpenAI API: {}", config.openai_api_url);
    info!("  Default model: {}", config.openai_default_model);
    info!("  Gateway API: {}", config.gateway_api_url);
    info!("  Timezone: {}", config.default_timezone);

    // Run database migrations first
    {
        use diesel::prelude::*;
        use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
        pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

        let mut conn = diesel::PgConnection::establish(&config.database_url)?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;
        info!("Database migrations applied");
    }

    if config.openai_api_key.is_none() {
        warn!("OPENAI_API_KEY not set - messages will fall back to templates");
    }

    let store: Arc<dyn Store> = Arc::new(PgStore::connect(&config.database_url)?);

    let llm = Arc::new(
        OpenAiClient::with_timeout(
            &config.openai_api_url,
            config.openai_api_key.clone(),
            config.openai_fallback_api_key.clone(),
            Duration::from_secs(config.llm_timeout_secs),
        )
        .context("Failed to build OpenAI client")?,
    );
    let messenger = Arc::new(
        GatewayClient::with_timeout(
            &config.gateway_api_url,
            config.gateway_api_key.clone(),
            Duration::from_secs(config.gateway_timeout_secs),
        )
        .context("Failed to build gateway client")?,
    );

    let notifier = Arc::new(Notifier::new(
        store.clone(),
        chrono::Duration::minutes(config.notification_cooldown_mins),
    ));
    let credits = Arc::new(CreditGate::new(
        store.clone(),
        notifier.clone(),
        config.low_credit_alert_threshold,
    ));
    let hours: Arc<dyn BusinessHours> = Arc::new(config.business_window()?);

    let guard = Arc::new(Guard::new(
        store.clone(),
        credits.clone(),
        hours,
        config.default_timezone,
        config.min_operational_credits,
    ));
    let personalizer = Arc::new(Personalizer::new(
        llm,
        store.clone(),
        credits,
        notifier,
        config.openai_default_model.clone(),
        PollPolicy::fixed(config.run_poll_max_attempts, Duration::from_secs(1)),
    ));
    let driver = Arc::new(ExecutionDriver::new(
        store.clone(),
        guard,
        personalizer,
        messenger,
        chrono::Duration::seconds(config.claim_lease_secs),
        config.default_timezone,
    ));
    let orphans = Arc::new(OrphanDetector::new(
        store.clone(),
        chrono::Duration::hours(config.stale_item_hours),
        chrono::Duration::hours(config.orphan_lookback_hours),
    ));
    let stats = Arc::new(RunStats::new());

    // Start HTTP status server
    let status_router = router(StatusState {
        store: store.clone(),
        stats: stats.clone(),
    });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port)).await?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, status_router).await {
            error!("Status server error: {}", e);
        }
    });
    info!("Status server listening on port {}", config.http_port);

    let scheduler = Arc::new(PollScheduler::new(
        store,
        driver,
        orphans,
        stats,
        SchedulerSettings {
            interval: Duration::from_secs(config.poll_interval_secs),
            max_items_per_tick: config.max_items_per_tick,
            item_pause: Duration::from_millis(config.item_pause_ms),
        },
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let handle = spawn_scheduler(scheduler, async move {
        let _ = shutdown_rx.await;
    });
    info!(
        "Scheduler started (polling every {}s, up to {} items per tick)",
        config.poll_interval_secs, config.max_items_per_tick
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    let _ = shutdown_tx.send(());
    if let Err(e) = handle.await {
        error!("Scheduler task ended abnormally: {}", e);
    }

    info!("Revive has shut down.");
    Ok(())
}
