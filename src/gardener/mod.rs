//! # Gardener
//!
//! Typed subset of the Gardener API and the rate-limited client used to reach it.

pub mod client;
pub mod rate_limit;
pub mod types;

pub use client::{GardenerClient, KubeconfigProvider, ShootClient};
pub use rate_limit::RateLimiter;
pub use types::{LastOperationState, LastOperationType, OpenIDConnect, OpenIDConnectSpec, Shoot};
