use axum::{extract::State, response::Json, routing::get, Router};
use serde_json::json;
use std::sync::Arc;

use crate::AppState;

pub mod automations;

pub use automations::automation_routes;

pub fn health_routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let db_healthy = crate::database::health_check(&state.db_pool).await;
    let stats = crate::database::get_pool_stats(&state.db_pool);

    Json(json!({
        "status": if db_healthy { "ok" } else { "degraded" },
        "database": db_healthy,
        "pool": stats,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
