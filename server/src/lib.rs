//! Telemetry ingestion, hazard alerting and real-time fan-out for field sensing devices.

pub mod actuation;
pub mod config;
pub mod errors;
pub mod hazard;
pub mod hub;
pub mod metrics;
pub mod model;
pub mod mqtt;
pub mod normalize;
pub mod pipeline;
pub mod rest;
pub mod store;
pub mod ws;
