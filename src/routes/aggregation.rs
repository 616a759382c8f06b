//! Manual rollup triggers.
//!
//! Without parameters each endpoint rolls up the period the scheduler would
//! (yesterday, last ISO week, last month). `all=true` runs the bulk catch-up
//! variant instead.

use axum::{extract::Query, extract::State, routing::post, Json, Router};
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::info;

use super::AppState;
use crate::error::{AppError, Result};
use crate::period::{MonthKey, WeekKey};
use crate::rollup::RollupSummary;

// ---

#[derive(Debug, Deserialize)]
struct DailyQuery {
    date: Option<NaiveDate>,
    #[serde(default)]
    all: bool,
}

#[derive(Debug, Deserialize)]
struct WeeklyQuery {
    year: Option<i32>,
    week: Option<i32>,
    #[serde(default)]
    all: bool,
}

#[derive(Debug, Deserialize)]
struct MonthlyQuery {
    year: Option<i32>,
    month: Option<i32>,
    #[serde(default)]
    from_weekly: bool,
    #[serde(default)]
    all: bool,
}

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/aggregation/daily", post(daily))
        .route("/aggregation/weekly", post(weekly))
        .route("/aggregation/monthly", post(monthly))
        .route("/aggregation/all", post(all))
}

/// Both halves of a period key, or neither.
fn pair(a: Option<i32>, b: Option<i32>, what: &str) -> Result<Option<(i32, i32)>> {
    // ---
    match (a, b) {
        (Some(a), Some(b)) => Ok(Some((a, b))),
        (None, None) => Ok(None),
        _ => Err(AppError::InvalidInput(format!(
            "year and {what} must be given together"
        ))),
    }
}

async fn daily(
    State(pipeline): State<AppState>,
    Query(q): Query<DailyQuery>,
) -> Result<Json<RollupSummary>> {
    // ---
    info!("POST /aggregation/daily {:?}", q);
    let summary = if q.all {
        pipeline.run_daily_catch_up().await?
    } else {
        pipeline.run_daily_rollup(q.date).await?
    };
    Ok(Json(summary))
}

async fn weekly(
    State(pipeline): State<AppState>,
    Query(q): Query<WeeklyQuery>,
) -> Result<Json<RollupSummary>> {
    // ---
    info!("POST /aggregation/weekly {:?}", q);
    if q.all {
        return Ok(Json(pipeline.run_weekly_all().await?));
    }
    let week = pair(q.year, q.week, "week")?
        .map(|(y, w)| WeekKey::new(y, w))
        .transpose()?;
    Ok(Json(pipeline.run_weekly_rollup(week).await?))
}

async fn monthly(
    State(pipeline): State<AppState>,
    Query(q): Query<MonthlyQuery>,
) -> Result<Json<RollupSummary>> {
    // ---
    info!("POST /aggregation/monthly {:?}", q);
    if q.all {
        return Ok(Json(pipeline.run_monthly_all(q.from_weekly).await?));
    }
    let month = pair(q.year, q.month, "month")?
        .map(|(y, m)| MonthKey::new(y, m))
        .transpose()?;
    Ok(Json(pipeline.run_monthly_rollup(month, q.from_weekly).await?))
}

async fn all(State(pipeline): State<AppState>) -> Result<Json<Vec<RollupSummary>>> {
    // ---
    info!("POST /aggregation/all");
    Ok(Json(pipeline.run_all().await?))
}
