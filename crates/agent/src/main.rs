//! Crop advisor agent
//!
//! Loads the trained model once at startup and serves predictions and the
//! prediction history over HTTP until interrupted.

use advisor_agent::{api, config::AgentConfig, config::CONFIG_FILE_ENV};
use advisor_lib::{
    health::{components, HealthRegistry},
    history::HistoryStore,
    observability::{AdvisorMetrics, StructuredLogger},
    training::ModelMetrics,
    PredictionService,
};
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting crop-advisor-agent");

    let config_file = std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from);
    let config = AgentConfig::load(config_file.as_deref())?;
    let paths = &config.advisor;
    info!(
        model = %paths.model_path.display(),
        history = %paths.history_path.display(),
        port = config.api_port,
        "Agent configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::MODEL).await;
    health_registry.register(components::HISTORY).await;

    let metrics = AdvisorMetrics::new();
    let logger = StructuredLogger::new("agent");

    // An unavailable model is reported, not fatal: history review still works
    let service = PredictionService::load(&paths.model_path);
    let availability = service.availability();
    health_registry.record_model(&availability).await;
    let model_path = paths.model_path.display().to_string();
    match (&availability, service.model_version(), service.classes()) {
        (Ok(()), Some(version), Some(classes)) => {
            metrics.set_model(version, classes);
            logger.log_model_loaded(&model_path, version, classes);
        }
        (Err(e), _, _) => {
            metrics.clear_model();
            logger.log_model_unavailable(&model_path, e.kind(), &e.to_string());
        }
        _ => {}
    }

    let model_metrics = match ModelMetrics::load(&paths.metrics_path) {
        Ok(m) => m,
        Err(e) => {
            warn!(path = %paths.metrics_path.display(), error = %e, "Ignoring unreadable metrics");
            None
        }
    };

    let history = HistoryStore::open(&paths.history_path);
    let existing = history.len();
    health_registry.record_history(&existing).await;
    if let Ok(count) = existing {
        metrics.set_history_records(count);
    }

    logger.log_startup(AGENT_VERSION, service.model_version());

    let app_state = Arc::new(api::AppState::new(
        service,
        history,
        model_metrics,
        health_registry.clone(),
        metrics,
        logger.clone(),
    ));

    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            logger.log_shutdown("SIGINT received");
        }
        joined = api_handle => {
            logger.log_shutdown("API server exited");
            joined??;
        }
    }

    info!("Shutting down");
    Ok(())
}
