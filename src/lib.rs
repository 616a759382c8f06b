//! Power-meter telemetry buffering and energy rollups.
//!
//! Samples arrive over MQTT (or `POST /power/ingest`), are averaged into one
//! hourly row per flush window, and cascade into daily, weekly (ISO-8601) and
//! monthly rows. The binary in `main.rs` wires these modules together; the
//! library target exists so integration tests can drive the same pipeline
//! in-process.

pub mod alerts;
pub mod buffer;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod flush;
pub mod models;
pub mod mqtt;
pub mod period;
pub mod pipeline;
pub mod rollup;
pub mod routes;
pub mod schema;
pub mod store;

pub use config::Config;
pub use error::{AppError, Result};
pub use pipeline::EnergyPipeline;
