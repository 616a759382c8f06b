// src/routes/health.rs
//! Liveness endpoint.
//!
//! `GET /health` answers as long as the HTTP server is up. It reports the
//! MQTT link state but never queries the database, so a database outage does
//! not make orchestrators restart the service.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use super::AppState;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    mqtt: &'static str,
}

/// Handle `GET /health`.
async fn health(State(pipeline): State<AppState>) -> Json<HealthResponse> {
    // ---
    let mqtt = if pipeline.mqtt_connected() {
        "online"
    } else {
        "offline"
    };
    Json(HealthResponse { status: "ok", mqtt })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
