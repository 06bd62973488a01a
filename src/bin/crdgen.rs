//! Prints the CRD manifests owned by the controller as a multi-document YAML stream.
//!
//! Usage:
//!   cargo run --bin crdgen > config/crd/crds.yaml

use kube::CustomResourceExt;
use runtime_provisioner::crd::{GardenerCluster, Runtime};

fn main() -> anyhow::Result<()> {
    for crd in [Runtime::crd(), GardenerCluster::crd()] {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
