use axum::{http::Method, routing::get, Router};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod auth;
mod automations;
mod config;
mod database;
mod error;
mod handlers;
mod jobs;
mod pagination;
mod services;

pub use error::{ApiError, ApiResult, AppError};
pub use pagination::{PaginatedResponse, PaginationMeta, PaginationParams};

#[cfg(test)]
mod tests;

use automations::store::AutomationRepo;
use automations::{Collaborators, PgAutomationRepo, PgCollaborators, TriggerDispatcher, WorkflowExecutor};

pub struct AppState {
    pub db_pool: sqlx::PgPool,
    pub config: config::Config,
    pub repo: Arc<dyn AutomationRepo>,
    pub executor: Arc<WorkflowExecutor>,
    pub dispatcher: Arc<TriggerDispatcher>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;
    let db_pool = database::create_pool(&config.database_url).await?;

    database::migrate(&db_pool).await?;

    let email_service = if config.smtp.is_configured() {
        match services::email::EmailService::new(&config.smtp) {
            Ok(service) => Some(service),
            Err(e) => {
                tracing::warn!("SMTP transport not available, emails disabled: {}", e);
                None
            }
        }
    } else {
        tracing::info!("SMTP not configured, email actions will fail as non-fatal steps");
        None
    };

    let repo: Arc<dyn AutomationRepo> = Arc::new(PgAutomationRepo::new(db_pool.clone()));
    let collaborators: Arc<dyn Collaborators> = Arc::new(PgCollaborators::new(
        db_pool.clone(),
        email_service,
        Duration::from_secs(config.engine.webhook_timeout_secs),
    ));
    let executor = Arc::new(WorkflowExecutor::new(Arc::clone(&repo), collaborators));
    let dispatcher = Arc::new(TriggerDispatcher::new(
        Arc::clone(&repo),
        Arc::clone(&executor),
    ));

    let scheduler = jobs::AutomationScheduler::new(
        Arc::clone(&repo),
        Arc::clone(&dispatcher),
        Arc::clone(&executor),
        config.engine.execution_retention_days,
    )
    .await?;
    scheduler.start().await?;

    let app_state = Arc::new(AppState {
        db_pool,
        config: config.clone(),
        repo,
        executor,
        dispatcher,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(|| async { "SponsorHub API v1.0.0" }))
        .merge(handlers::health_routes())
        .nest("/club/automations", handlers::automation_routes())
        .layer(ServiceBuilder::new().layer(cors))
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    tracing::info!("Server running on {}", config.server_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
