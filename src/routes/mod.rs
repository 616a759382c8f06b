//! HTTP gateway: merges the per-area subrouters and attaches the shared
//! pipeline as state. `main.rs` and the integration tests only see
//! [`router`].

use std::sync::Arc;

use axum::Router;

use crate::EnergyPipeline;

mod aggregation;
mod alerts;
mod energy;
mod health;
mod power;

/// State shared by every handler.
pub type AppState = Arc<EnergyPipeline>;

// ---

pub fn router(pipeline: AppState) -> Router {
    // ---
    Router::new()
        .merge(health::router())
        .merge(power::router())
        .merge(aggregation::router())
        .merge(energy::router())
        .merge(alerts::router())
        .with_state(pipeline)
}
