use chrono::Utc;
use prebuild_automation::build::BuildGateway;
use prebuild_automation::db::{self, PrebuildStore, SqlBuildStore, SqlPrebuildStore};
use prebuild_automation::error::PrebuildError;
use prebuild_automation::gitprovider::{GitProviderGateway, HttpGitProviderGateway};
use prebuild_automation::service::{GitEventProcessor, PrebuildConfigManager, RetentionEnforcer};
use prebuild_automation::{AppConfig, AppState, SharedState, api, load_config, logging};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATH: &str = "prebuild_config.toml";

/// Periodically retire surplus prebuild builds until shutdown
fn spawn_retention_sweep(state: SharedState, interval_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let cancel = state.shutdown.child_token();
            match state.retention.enforce_retention_policy(None, &cancel).await {
                Ok(()) => info!("Retention sweep finished"),
                Err(PrebuildError::Cancelled(_)) => break,
                Err(e) => warn!("Retention sweep finished with errors: {}", e),
            }
        }
        info!("Retention sweep stopped");
    });
}

async fn build_state(config: AppConfig) -> Result<SharedState, PrebuildError> {
    let pool = db::init_db(&config.database.path).await?;
    let store: Arc<dyn PrebuildStore> = Arc::new(SqlPrebuildStore::new(pool.clone()));
    let builds: Arc<dyn BuildGateway> = Arc::new(SqlBuildStore::new(pool));

    for template in &config.templates {
        store.save_template(template).await?;
    }
    info!("Loaded {} workspace template(s)", config.templates.len());

    if config.server.webhook_endpoint.is_empty() {
        warn!("server.webhook_endpoint is not set, webhook registration will fail");
    }
    let git: Arc<dyn GitProviderGateway> = Arc::new(HttpGitProviderGateway::new(
        config.git_providers.clone(),
        config.server.webhook_endpoint.clone(),
        config.server.webhook_secret.clone(),
    )?);

    let timeout = config.gateway_timeout();
    Ok(Arc::new(AppState {
        manager: PrebuildConfigManager::new(store.clone(), git.clone(), builds.clone(), timeout),
        processor: GitEventProcessor::new(store.clone(), git, builds.clone(), timeout),
        retention: RetentionEnforcer::new(store, builds, timeout),
        config,
        started_at: Utc::now(),
        shutdown: CancellationToken::new(),
    }))
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let config_path =
        std::env::var("PREBUILD_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let config = match load_config(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let _log_guard = logging::setup_logging(&config.logging);
    info!("Using config at {:?}", config_path);

    let bind_address = config.server.bind_address.clone();
    let sweep_interval = config.retention.sweep_interval_secs;

    let state = match build_state(config).await {
        Ok(state) => state,
        Err(e) => {
            error!("Startup failed: {}", e);
            std::process::exit(1);
        }
    };

    if sweep_interval > 0 {
        info!("Retention sweep every {}s", sweep_interval);
        spawn_retention_sweep(state.clone(), sweep_interval);
    }

    let app = api::router(state.clone());
    let listener = match tokio::net::TcpListener::bind(&bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", bind_address, e);
            std::process::exit(1);
        }
    };
    info!("Listening on {}", bind_address);

    let shutdown = state.shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutting down");
            }
            shutdown.cancel();
        })
        .await;

    if let Err(e) = served {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
