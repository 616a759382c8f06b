use axum::{extract::State, routing::get, Json, Router};

use super::AppState;
use crate::alerts::{Alert, AlertSummary};
use crate::error::Result;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/alerts", get(list))
        .route("/alerts/summary", get(summary))
}

async fn list(State(pipeline): State<AppState>) -> Result<Json<Vec<Alert>>> {
    Ok(Json(pipeline.alerts().await?))
}

async fn summary(State(pipeline): State<AppState>) -> Result<Json<AlertSummary>> {
    Ok(Json(pipeline.alert_summary().await?))
}
