//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{
        DbAdapter, LocalObjectStorage, OpenAiCorrectionAdapter, OpenAiOcrAdapter,
        OpenAiSolverAdapter,
    },
    config::Config,
    error::ApiError,
    web::{build_router, state::AppState},
};
use async_openai::{config::OpenAIConfig, Client};
use equation_ace_core::{
    history::HistoryRecorder,
    pipeline::SolvePipeline,
    ports::DatabaseService,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Builds the three model adapters, or `None` when no API key is set.
fn build_pipeline(config: &Config) -> Option<Arc<SolvePipeline>> {
    let api_key = match config.openai_api_key() {
        Ok(key) => key,
        Err(e) => {
            warn!("{}. Solving is disabled.", e);
            return None;
        }
    };
    let mut openai_config = OpenAIConfig::new().with_api_key(api_key);
    if let Some(api_base) = &config.openai_api_base {
        openai_config = openai_config.with_api_base(api_base);
    }
    let openai_client = Client::with_config(openai_config);

    let solver = Arc::new(OpenAiSolverAdapter::new(
        openai_client.clone(),
        config.solve_model.clone(),
    ));
    let extractor = Arc::new(OpenAiOcrAdapter::new(
        openai_client.clone(),
        config.ocr_model.clone(),
    ));
    let corrector = Arc::new(OpenAiCorrectionAdapter::new(
        openai_client,
        config.correction_model.clone(),
    ));
    Some(Arc::new(SolvePipeline::new(solver, extractor, corrector)))
}

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Initialize the Model Adapters ---
    let pipeline = build_pipeline(&config);

    // --- 3. Connect to Database & Run Migrations ---
    let (accounts, history) = match config.database_url() {
        Ok(database_url) => {
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?;
            let db_adapter = Arc::new(DbAdapter::new(db_pool));
            info!("Running database migrations...");
            db_adapter.run_migrations().await?;
            info!("Database migrations complete.");

            tokio::fs::create_dir_all(&config.storage_root).await?;
            let storage = Arc::new(LocalObjectStorage::new(
                config.storage_root.clone(),
                &config.public_base_url,
            ));
            let history = Arc::new(HistoryRecorder::new(db_adapter.clone(), storage));
            let accounts: Arc<dyn DatabaseService> = db_adapter;
            (Some(accounts), Some(history))
        }
        Err(e) => {
            warn!("{}. Sign-in and history are disabled.", e);
            (None, None)
        }
    };

    // --- 4. Build the Shared AppState and Router ---
    let app_state = Arc::new(AppState {
        config: config.clone(),
        pipeline,
        accounts,
        history,
    });
    let app = build_router(app_state);

    // --- 5. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
