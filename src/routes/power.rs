//! Live buffer endpoints (status, HTTP ingestion, manual flush) and the
//! meter's relay and reboot commands.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::AppState;
use crate::error::Result;
use crate::models::{AveragedSample, HourlyRecord, Sample};
use crate::mqtt::RelayState;

// ---

#[derive(Serialize)]
struct StatusResponse {
    size: usize,
    latest_sample: Option<Sample>,
    mqtt_connected: bool,
    flush_interval_secs: u64,
}

#[derive(Serialize)]
struct IngestResponse {
    buffered: bool,
    size: usize,
}

#[derive(Serialize)]
struct FlushResponse {
    flushed: bool,
    sample: Option<AveragedSample>,
    record: Option<HourlyRecord>,
}

#[derive(Deserialize)]
struct ControlRequest {
    status: String,
}

#[derive(Serialize)]
struct CommandResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<RelayState>,
    timestamp: DateTime<Utc>,
}

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/power/status", get(status))
        .route("/power/ingest", post(ingest))
        .route("/power/flush", post(flush))
        .route("/power/control", post(control))
        .route("/power/reboot", post(reboot))
}

async fn status(State(pipeline): State<AppState>) -> Json<StatusResponse> {
    // ---
    let buffer = pipeline.buffer_status();
    Json(StatusResponse {
        size: buffer.size,
        latest_sample: buffer.latest_sample,
        mqtt_connected: pipeline.mqtt_connected(),
        flush_interval_secs: pipeline.flush_interval().as_secs(),
    })
}

/// Same decoding and defaults as an MQTT message, but a malformed body is
/// reported to the caller as 400.
async fn ingest(
    State(pipeline): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<IngestResponse>)> {
    // ---
    pipeline.try_ingest(&body)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            buffered: true,
            size: pipeline.buffer_status().size,
        }),
    ))
}

async fn flush(State(pipeline): State<AppState>) -> Result<Json<FlushResponse>> {
    // ---
    info!("POST /power/flush");
    let response = match pipeline.flush_now().await? {
        Some(outcome) => FlushResponse {
            flushed: true,
            sample: Some(outcome.sample),
            record: Some(outcome.record),
        },
        None => FlushResponse {
            flushed: false,
            sample: None,
            record: None,
        },
    };
    Ok(Json(response))
}

/// Body `{"status": "on" | "off"}`; anything else is a 400.
async fn control(State(pipeline): State<AppState>, body: Bytes) -> Result<Json<CommandResponse>> {
    // ---
    let request: ControlRequest = serde_json::from_slice(&body)?;
    let state: RelayState = request.status.parse()?;
    info!("POST /power/control status={}", state);

    pipeline.send_relay(state).await?;
    Ok(Json(CommandResponse {
        success: true,
        message: format!("Power control command sent: {state}"),
        status: Some(state),
        timestamp: Utc::now(),
    }))
}

async fn reboot(State(pipeline): State<AppState>) -> Result<Json<CommandResponse>> {
    // ---
    info!("POST /power/reboot");
    pipeline.send_reboot().await?;
    Ok(Json(CommandResponse {
        success: true,
        message: "Reboot command sent".into(),
        status: None,
        timestamp: Utc::now(),
    }))
}
