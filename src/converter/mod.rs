//! # Converter
//!
//! Compiles a `Runtime` into the Gardener `Shoot` that provisions it.
//!
//! A base shoot (identity, region, networking, control plane) is built first, then an
//! ordered list of extenders fills in one concern each. The order is fixed:
//!
//! 1. annotations
//! 2. labels
//! 3. Kubernetes version
//! 4. provider and workers
//! 5. DNS
//! 6. OIDC
//! 7. live resource references (patch only)
//! 8. audit log
//!
//! The first failing extender aborts the conversion. Conversion never performs I/O.

pub mod extender;

use std::sync::Arc;

use kube::api::ObjectMeta;

use crate::config::{AuditLogConfig, ConverterConfig};
use crate::crd::Runtime;
use crate::error::Error;
use crate::gardener::types::{NamedResourceReference, Shoot, ShootNetworking, ShootSpec};
use extender::{
    AnnotationsExtender, AuditLogExtender, DnsExtender, Extender, KubernetesVersionExtender,
    LabelsExtender, OidcExtender, ProviderExtender, ResourcesExtender,
};

/// Everything the converter needs that is fixed for the process lifetime
#[derive(Debug, Clone)]
pub struct ConverterContext {
    pub config: ConverterConfig,
    pub audit_tenants: Arc<AuditLogConfig>,
    pub audit_mandatory: bool,
    /// Gardener project namespace the shoots live in
    pub namespace: String,
}

impl ConverterContext {
    pub fn new(
        config: ConverterConfig,
        audit_tenants: AuditLogConfig,
        audit_mandatory: bool,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            config,
            audit_tenants: Arc::new(audit_tenants),
            audit_mandatory,
            namespace: namespace.into(),
        }
    }

    pub fn for_create(&self) -> Converter {
        let mut extenders = self.base_extenders();
        extenders.push(self.audit_log_extender());
        Converter {
            namespace: self.namespace.clone(),
            extenders,
        }
    }

    /// Patch conversion keeps the resource references already present on the live shoot
    pub fn for_patch(&self, live_resources: Vec<NamedResourceReference>) -> Converter {
        let mut extenders = self.base_extenders();
        extenders.push(Box::new(ResourcesExtender::new(live_resources)));
        extenders.push(self.audit_log_extender());
        Converter {
            namespace: self.namespace.clone(),
            extenders,
        }
    }

    fn base_extenders(&self) -> Vec<Box<dyn Extender>> {
        let config = &self.config;
        vec![
            Box::new(AnnotationsExtender),
            Box::new(LabelsExtender),
            Box::new(KubernetesVersionExtender::new(
                config.kubernetes.default_version.clone(),
            )),
            Box::new(ProviderExtender::new(
                config.provider.aws.enable_imds_v2,
                config.machine_image.default_version.clone(),
            )),
            Box::new(DnsExtender::new(
                config.dns.secret_name.clone(),
                config.dns.domain_prefix.clone(),
                config.dns.provider_type.clone(),
            )),
            Box::new(OidcExtender),
        ]
    }

    fn audit_log_extender(&self) -> Box<dyn Extender> {
        Box::new(AuditLogExtender::new(
            self.config.audit_logging.policy_config_map_name.clone(),
            Arc::clone(&self.audit_tenants),
            self.audit_mandatory,
        ))
    }
}

/// An ordered extender pipeline bound to one Gardener namespace
pub struct Converter {
    namespace: String,
    extenders: Vec<Box<dyn Extender>>,
}

impl std::fmt::Debug for Converter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Converter")
            .field("namespace", &self.namespace)
            .field("extenders", &self.extender_names())
            .finish()
    }
}

impl Converter {
    pub fn extender_names(&self) -> Vec<&'static str> {
        self.extenders.iter().map(|e| e.name()).collect()
    }

    pub fn to_shoot(&self, runtime: &Runtime) -> Result<Shoot, Error> {
        let mut shoot = self.base_shoot(runtime);
        self.extend(runtime, &mut shoot)?;
        Ok(shoot)
    }

    /// Run every extender over an existing shoot, stopping at the first error
    pub fn extend(&self, runtime: &Runtime, shoot: &mut Shoot) -> Result<(), Error> {
        for extender in &self.extenders {
            extender.extend(runtime, shoot)?;
        }
        Ok(())
    }

    fn base_shoot(&self, runtime: &Runtime) -> Shoot {
        let source = &runtime.spec.shoot;
        let networking = &source.networking;
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());

        Shoot {
            metadata: ObjectMeta {
                name: Some(source.name.clone()),
                namespace: Some(self.namespace.clone()),
                ..ObjectMeta::default()
            },
            spec: ShootSpec {
                purpose: non_empty(&source.purpose),
                region: source.region.clone(),
                secret_binding_name: non_empty(&source.secret_binding_name),
                networking: Some(ShootNetworking {
                    r#type: networking.r#type.clone(),
                    nodes: non_empty(&networking.nodes),
                    pods: non_empty(&networking.pods),
                    services: non_empty(&networking.services),
                }),
                control_plane: source
                    .control_plane
                    .high_availability
                    .is_some()
                    .then(|| source.control_plane.clone()),
                ..ShootSpec::default()
            },
            status: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::converter_config_fixture;
    use crate::converter::extender::testutils::runtime;
    use crate::gardener::types::CrossVersionObjectReference;

    fn context() -> ConverterContext {
        let tenants = AuditLogConfig::from_json(
            r#"{"aws": {"eu-central-1": {"tenantID": "t", "serviceURL": "https://audit.example", "secretName": "audit-secret"}}}"#,
        )
        .unwrap();
        ConverterContext::new(converter_config_fixture(), tenants, true, "garden-kyma-dev")
    }

    #[test]
    fn test_extender_order() {
        let ctx = context();
        assert_eq!(
            ctx.for_create().extender_names(),
            vec!["annotations", "labels", "kubernetes-version", "provider", "dns", "oidc", "audit-log"]
        );
        assert_eq!(
            ctx.for_patch(Vec::new()).extender_names(),
            vec!["annotations", "labels", "kubernetes-version", "provider", "dns", "oidc", "resources", "audit-log"]
        );
    }

    #[test]
    fn test_base_shoot() {
        let shoot = context().for_create().to_shoot(&runtime()).unwrap();
        assert_eq!(shoot.metadata.name.as_deref(), Some("c-6ea9b9b"));
        assert_eq!(shoot.metadata.namespace.as_deref(), Some("garden-kyma-dev"));
        assert_eq!(shoot.spec.region, "eu-central-1");
        assert_eq!(shoot.spec.secret_binding_name.as_deref(), Some("aws-binding"));
        assert_eq!(shoot.spec.purpose.as_deref(), Some("production"));
        assert_eq!(
            shoot.spec.networking.as_ref().unwrap().nodes.as_deref(),
            Some("10.250.0.0/16")
        );
        assert!(shoot.spec.control_plane.is_none());
        assert_eq!(shoot.spec.kubernetes.version, "1.30");
        assert_eq!(shoot.dns_domain(), Some("c-6ea9b9b.dev.kyma.ondemand.com"));
    }

    #[test]
    fn test_extending_twice_is_idempotent() {
        let converter = context().for_patch(vec![NamedResourceReference {
            name: "other".to_string(),
            resource_ref: CrossVersionObjectReference {
                api_version: "v1".to_string(),
                kind: "Secret".to_string(),
                name: "other-secret".to_string(),
            },
        }]);
        let rt = runtime();
        let once = converter.to_shoot(&rt).unwrap();
        let mut twice = once.clone();
        converter.extend(&rt, &mut twice).unwrap();

        assert_eq!(
            serde_json::to_string(&once).unwrap(),
            serde_json::to_string(&twice).unwrap()
        );
        assert_eq!(once.spec.resources.len(), 2);
    }

    #[test]
    fn test_first_error_aborts() {
        let mut rt = runtime();
        rt.metadata.labels = None;
        let err = context().for_create().to_shoot(&rt).unwrap_err();
        assert!(matches!(err, Error::Conversion { extender: "annotations", .. }));
    }
}
