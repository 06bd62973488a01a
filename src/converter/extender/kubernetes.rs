use super::Extender;
use crate::crd::Runtime;
use crate::error::Error;
use crate::gardener::types::Shoot;

/// Uses the pinned Kubernetes version, or the configured default verbatim
#[derive(Debug)]
pub struct KubernetesVersionExtender {
    default_version: String,
}

impl KubernetesVersionExtender {
    pub fn new(default_version: impl Into<String>) -> Self {
        Self {
            default_version: default_version.into(),
        }
    }
}

impl Extender for KubernetesVersionExtender {
    fn name(&self) -> &'static str {
        "kubernetes-version"
    }

    fn extend(&self, runtime: &Runtime, shoot: &mut Shoot) -> Result<(), Error> {
        let version = runtime
            .spec
            .shoot
            .kubernetes
            .version
            .as_deref()
            .filter(|v| !v.is_empty())
            .unwrap_or(&self.default_version);
        shoot.spec.kubernetes.version = version.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::extender::testutils::{empty_shoot, runtime};

    #[test]
    fn test_default_version() {
        let mut shoot = empty_shoot();
        KubernetesVersionExtender::new("1.30").extend(&runtime(), &mut shoot).unwrap();
        assert_eq!(shoot.spec.kubernetes.version, "1.30");
    }

    #[test]
    fn test_pinned_version_wins() {
        let mut rt = runtime();
        rt.spec.shoot.kubernetes.version = Some("1.29".to_string());
        let mut shoot = empty_shoot();
        KubernetesVersionExtender::new("1.30").extend(&rt, &mut shoot).unwrap();
        assert_eq!(shoot.spec.kubernetes.version, "1.29");
    }
}
