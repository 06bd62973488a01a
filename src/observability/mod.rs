//! # Observability
//!
//! Prometheus metrics for both controllers. Logging goes through `tracing` and is
//! configured in process bootstrap.

pub mod metrics;
