//! Read and maintenance access to the persisted tiers.

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::Result;
use crate::models::Tier;
use crate::pipeline::EnergyStats;

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

// ---

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<i64>,
}

#[derive(Serialize)]
struct ClearResponse {
    tier: Tier,
    deleted: u64,
}

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/energy/stats", get(stats))
        .route("/energy/{tier}", get(recent).delete(clear))
}

/// Most recent rows of one tier, oldest first.
async fn recent(
    State(pipeline): State<AppState>,
    Path(tier): Path<String>,
    Query(q): Query<LimitQuery>,
) -> Result<Response> {
    // ---
    let limit = q.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let response = match tier.parse::<Tier>()? {
        Tier::Hourly => Json(pipeline.recent_hourly(limit).await?).into_response(),
        Tier::Daily => Json(pipeline.recent_daily(limit).await?).into_response(),
        Tier::Weekly => Json(pipeline.recent_weekly(limit).await?).into_response(),
        Tier::Monthly => Json(pipeline.recent_monthly(limit).await?).into_response(),
    };
    Ok(response)
}

async fn stats(State(pipeline): State<AppState>) -> Result<Json<EnergyStats>> {
    Ok(Json(pipeline.stats().await?))
}

async fn clear(
    State(pipeline): State<AppState>,
    Path(tier): Path<String>,
) -> Result<Json<ClearResponse>> {
    // ---
    let tier = tier.parse::<Tier>()?;
    let deleted = pipeline.clear(tier).await?;
    Ok(Json(ClearResponse { tier, deleted }))
}
