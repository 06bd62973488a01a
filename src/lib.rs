//! # Runtime Provisioner
//!
//! A Kubernetes control plane that turns `Runtime` resources into Gardener shoot
//! clusters and keeps an admin kubeconfig secret for each of them.
//!
//! ## Overview
//!
//! Two controllers run side by side:
//!
//! 1. **Runtime controller** - drives each `Runtime` through a state machine that
//!    creates, patches, waits for and deletes its shoot, then bootstraps the new
//!    cluster (OIDC, admin bindings, provisioning info)
//! 2. **GardenerCluster controller** - creates and periodically rotates the
//!    kubeconfig secret named by each `GardenerCluster` binding
//!
//! Shoots are synthesised from a `Runtime` by the extender pipeline in
//! [`converter`]. Progress is reported through typed conditions on both CRDs.

pub mod config;
pub mod constants;
pub mod controller;
pub mod converter;
pub mod crd;
pub mod error;
pub mod gardener;
pub mod observability;
pub mod runtime;
pub mod server;
