//! # Controllers
//!
//! - **runtime**: provisions a Gardener shoot per `Runtime` and bootstraps it
//! - **gardener_cluster**: keeps the admin kubeconfig secret of each cluster fresh
//! - **custom_config**: reflects registry-cache configuration into the Runtime

pub mod custom_config;
pub mod gardener_cluster;
pub mod runtime;
