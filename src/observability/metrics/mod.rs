//! # Metrics
//!
//! Prometheus metrics exposed on `/metrics`.
//!
//! - **controller**: reconcile counts, errors, durations, requeues, state transitions
//! - **runtime**: per-Runtime state, per-binding state and kubeconfig expiry

pub mod controller_metrics;
pub mod registry;
pub mod runtime_metrics;

pub use controller_metrics::*;
pub use registry::*;
pub use runtime_metrics::*;
