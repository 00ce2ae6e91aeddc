//! Runtime glue: executor configuration and tracing/metrics telemetry.

pub mod config;
pub mod telemetry;
