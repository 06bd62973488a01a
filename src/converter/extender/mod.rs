//! # Extenders
//!
//! Each extender enriches a shoot with one concern. Extenders are pure and
//! idempotent: applying one to an already extended shoot yields the same shoot,
//! which lets the create and patch paths share the pipeline.

mod annotations;
mod audit_log;
mod aws;
mod dns;
mod kubernetes;
mod labels;
mod oidc;
mod provider;
mod resources;

pub use annotations::AnnotationsExtender;
pub use audit_log::AuditLogExtender;
pub use aws::{generate_infrastructure_config, InstanceMetadataOptions};
pub use dns::DnsExtender;
pub use kubernetes::KubernetesVersionExtender;
pub use labels::LabelsExtender;
pub use oidc::OidcExtender;
pub use provider::ProviderExtender;
pub use resources::ResourcesExtender;

use crate::crd::Runtime;
use crate::error::Error;
use crate::gardener::types::Shoot;

pub trait Extender: Send + Sync {
    /// Stable name used in errors and logs
    fn name(&self) -> &'static str;

    fn extend(&self, runtime: &Runtime, shoot: &mut Shoot) -> Result<(), Error>;
}

#[cfg(test)]
pub(crate) mod testutils {
    use crate::crd::{Networking, Provider, Runtime, RuntimeShoot, RuntimeSpec};
    use crate::gardener::types::{Machine, Shoot, ShootSpec, Worker};
    use std::collections::BTreeMap;

    pub(crate) fn worker(name: &str, zones: &[&str]) -> Worker {
        Worker {
            name: name.to_string(),
            machine: Machine {
                r#type: "m6i.large".to_string(),
                image: None,
            },
            minimum: 1,
            maximum: 3,
            zones: zones.iter().map(|z| (*z).to_string()).collect(),
            ..Worker::default()
        }
    }

    pub(crate) fn runtime() -> Runtime {
        let mut runtime = Runtime::new(
            "059dbc39",
            RuntimeSpec {
                shoot: RuntimeShoot {
                    name: "c-6ea9b9b".to_string(),
                    purpose: "production".to_string(),
                    region: "eu-central-1".to_string(),
                    secret_binding_name: "aws-binding".to_string(),
                    provider: Provider {
                        r#type: "aws".to_string(),
                        workers: vec![worker("cpu-worker-0", &["eu-central-1a", "eu-central-1b"])],
                        ..Provider::default()
                    },
                    networking: Networking {
                        r#type: Some("calico".to_string()),
                        nodes: "10.250.0.0/16".to_string(),
                        pods: "100.64.0.0/12".to_string(),
                        services: "100.104.0.0/13".to_string(),
                    },
                    ..RuntimeShoot::default()
                },
                ..RuntimeSpec::default()
            },
        );
        runtime.metadata.namespace = Some("kcp-system".to_string());
        runtime.metadata.generation = Some(5);
        runtime.metadata.labels = Some(BTreeMap::from([
            (crate::constants::LABEL_RUNTIME_ID.to_string(), "059dbc39".to_string()),
            (crate::constants::LABEL_GLOBAL_ACCOUNT_ID.to_string(), "ga-1".to_string()),
            (crate::constants::LABEL_SUBACCOUNT_ID.to_string(), "sa-1".to_string()),
        ]));
        runtime
    }

    pub(crate) fn empty_shoot() -> Shoot {
        let mut shoot = Shoot::new("c-6ea9b9b", ShootSpec::default());
        shoot.metadata.namespace = Some("garden-kyma-dev".to_string());
        shoot
    }
}
