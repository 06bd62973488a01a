//! # Custom Resource Definitions
//!
//! CRD types owned by the controller: `Runtime` (desired cluster) and
//! `GardenerCluster` (kubeconfig secret binding), plus the shared condition model.

mod gardener_cluster;
mod runtime;
mod status;

pub use gardener_cluster::*;
pub use runtime::*;
pub use status::*;

use schemars::{Schema, SchemaGenerator};

/// Schema for free-form provider blobs.
///
/// Structural CRD schemas reject untyped objects unless they opt out of pruning.
pub(crate) fn preserve_unknown_fields(_gen: &mut SchemaGenerator) -> Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}
