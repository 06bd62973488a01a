use super::aws::{self, InstanceMetadataOptions};
use super::Extender;
use crate::crd::Runtime;
use crate::error::Error;
use crate::gardener::types::{MachineImage, Shoot, Worker};

const PROVIDER_AWS: &str = "aws";

/// Worker pools, machine image defaulting and provider config blobs
#[derive(Debug)]
pub struct ProviderExtender {
    enable_imds_v2: bool,
    default_machine_image_version: String,
}

impl ProviderExtender {
    pub fn new(enable_imds_v2: bool, default_machine_image_version: impl Into<String>) -> Self {
        Self {
            enable_imds_v2,
            default_machine_image_version: default_machine_image_version.into(),
        }
    }

    fn prepare_worker(&self, provider_type: &str, worker: &Worker) -> Worker {
        let mut worker = worker.clone();

        let image = worker.machine.image.get_or_insert_with(MachineImage::default);
        if image.version.as_deref().is_none_or(str::is_empty) {
            image.version = Some(self.default_machine_image_version.clone());
        }

        if provider_type == PROVIDER_AWS && self.enable_imds_v2 && worker.provider_config.is_none() {
            worker.provider_config = Some(aws::worker_config(InstanceMetadataOptions::imds_v2()));
        }
        worker
    }
}

impl Extender for ProviderExtender {
    fn name(&self) -> &'static str {
        "provider"
    }

    fn extend(&self, runtime: &Runtime, shoot: &mut Shoot) -> Result<(), Error> {
        let provider = &runtime.spec.shoot.provider;
        if provider.r#type.is_empty() {
            return Err(Error::conversion(self.name(), "provider type is empty"));
        }
        if provider.workers.is_empty() {
            return Err(Error::conversion(self.name(), "at least one worker pool is required"));
        }

        let workers: Vec<Worker> = provider
            .workers
            .iter()
            .chain(provider.additional_workers.iter().flatten())
            .map(|w| self.prepare_worker(&provider.r#type, w))
            .collect();

        let mut infrastructure_config = provider.infrastructure_config.clone();
        let mut control_plane_config = provider.control_plane_config.clone();

        if provider.r#type == PROVIDER_AWS {
            if infrastructure_config.is_none() {
                let mut zones: Vec<String> = Vec::new();
                for zone in provider.workers.iter().flat_map(|w| &w.zones) {
                    if !zones.contains(zone) {
                        zones.push(zone.clone());
                    }
                }
                infrastructure_config = Some(aws::generate_infrastructure_config(
                    &runtime.spec.shoot.networking.nodes,
                    &zones,
                )?);
            }
            control_plane_config.get_or_insert_with(aws::control_plane_config);
        }

        shoot.spec.provider.r#type.clone_from(&provider.r#type);
        shoot.spec.provider.workers = workers;
        shoot.spec.provider.infrastructure_config = infrastructure_config;
        shoot.spec.provider.control_plane_config = control_plane_config;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::extender::testutils::{empty_shoot, runtime, worker};
    use crate::gardener::types::MachineImage;

    #[test]
    fn test_machine_image_defaulting() {
        let mut rt = runtime();
        rt.spec.shoot.provider.additional_workers = Some(vec![{
            let mut w = worker("pinned", &["eu-central-1a"]);
            w.machine.image = Some(MachineImage {
                name: Some("gardenlinux".to_string()),
                version: Some("1443.3.0".to_string()),
            });
            w
        }]);
        let mut shoot = empty_shoot();
        ProviderExtender::new(false, "1592.1.0").extend(&rt, &mut shoot).unwrap();

        let workers = &shoot.spec.provider.workers;
        assert_eq!(workers.len(), 2);
        assert_eq!(workers[0].machine.image.as_ref().unwrap().version.as_deref(), Some("1592.1.0"));
        assert_eq!(workers[1].machine.image.as_ref().unwrap().version.as_deref(), Some("1443.3.0"));
        assert!(workers[0].provider_config.is_none());
    }

    #[test]
    fn test_aws_imds_v2_and_generated_configs() {
        let mut shoot = empty_shoot();
        ProviderExtender::new(true, "1592.1.0").extend(&runtime(), &mut shoot).unwrap();

        let worker = &shoot.spec.provider.workers[0];
        let options = &worker.provider_config.as_ref().unwrap()["instanceMetadataOptions"];
        assert_eq!(options["httpTokens"], "required");

        let infra = shoot.spec.provider.infrastructure_config.as_ref().unwrap();
        assert_eq!(infra["networks"]["zones"].as_array().unwrap().len(), 2);
        assert_eq!(
            shoot.spec.provider.control_plane_config.as_ref().unwrap()["kind"],
            "ControlPlaneConfig"
        );
    }

    #[test]
    fn test_explicit_infrastructure_config_is_kept() {
        let mut rt = runtime();
        rt.spec.shoot.provider.r#type = "gcp".to_string();
        rt.spec.shoot.provider.infrastructure_config = Some(serde_json::json!({"kind": "InfrastructureConfig", "networks": {"workers": "10.250.0.0/16"}}));
        let mut shoot = empty_shoot();
        ProviderExtender::new(true, "1").extend(&rt, &mut shoot).unwrap();

        assert_eq!(shoot.spec.provider.r#type, "gcp");
        assert_eq!(
            shoot.spec.provider.infrastructure_config.as_ref().unwrap()["networks"]["workers"],
            "10.250.0.0/16"
        );
        assert!(shoot.spec.provider.control_plane_config.is_none());
        assert!(shoot.spec.provider.workers[0].provider_config.is_none());
    }

    #[test]
    fn test_no_workers_is_rejected() {
        let mut rt = runtime();
        rt.spec.shoot.provider.workers.clear();
        assert!(ProviderExtender::new(false, "1").extend(&rt, &mut empty_shoot()).is_err());
    }
}
