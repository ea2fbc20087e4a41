//! Telemetry event ingestion and the trending, ranking, health and metrics reports built from
//! the stored events.

pub mod app;
pub mod cache;
pub mod cli;
pub mod clock;
pub mod config;
pub mod discovery;
pub mod health;
pub mod ingest;
pub mod normalize;
pub mod pipeline;
pub mod ranker;
pub mod report;
pub mod store;
pub mod timeseries;
