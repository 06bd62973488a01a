use std::sync::Arc;

use tracing::warn;

use super::Extender;
use crate::config::{AuditLogConfig, AuditLogData};
use crate::constants::{AUDIT_LOG_EXTENSION_TYPE, AUDIT_LOG_SECRET_REFERENCE};
use crate::crd::Runtime;
use crate::error::Error;
use crate::gardener::types::{
    AuditConfig, AuditPolicy, CrossVersionObjectReference, Extension, KubeApiServerConfig,
    NamedResourceReference, ObjectRef, Shoot,
};

const AUDIT_LOG_API_VERSION: &str = "service.auditlog.extensions.gardener.cloud/v1alpha1";

/// Wires the shoot to the audit log tenant of its provider and region.
///
/// In strict mode a missing tenant is a conversion error; otherwise the shoot
/// is left without audit logging.
#[derive(Debug)]
pub struct AuditLogExtender {
    policy_config_map_name: String,
    tenants: Arc<AuditLogConfig>,
    mandatory: bool,
}

impl AuditLogExtender {
    pub fn new(
        policy_config_map_name: impl Into<String>,
        tenants: Arc<AuditLogConfig>,
        mandatory: bool,
    ) -> Self {
        Self {
            policy_config_map_name: policy_config_map_name.into(),
            tenants,
            mandatory,
        }
    }

    fn apply(&self, data: &AuditLogData, shoot: &mut Shoot) {
        let extension = Extension {
            r#type: AUDIT_LOG_EXTENSION_TYPE.to_string(),
            provider_config: Some(serde_json::json!({
                "apiVersion": AUDIT_LOG_API_VERSION,
                "kind": "AuditlogConfig",
                "type": "standard",
                "tenantID": data.tenant_id,
                "serviceURL": data.service_url,
                "secretReferenceName": AUDIT_LOG_SECRET_REFERENCE,
            })),
            disabled: None,
        };
        let extensions = &mut shoot.spec.extensions;
        match extensions.iter_mut().find(|e| e.r#type == AUDIT_LOG_EXTENSION_TYPE) {
            Some(existing) => *existing = extension,
            None => extensions.push(extension),
        }

        let reference = NamedResourceReference {
            name: AUDIT_LOG_SECRET_REFERENCE.to_string(),
            resource_ref: CrossVersionObjectReference {
                api_version: "v1".to_string(),
                kind: "Secret".to_string(),
                name: data.secret_name.clone(),
            },
        };
        let resources = &mut shoot.spec.resources;
        match resources.iter_mut().find(|r| r.name == AUDIT_LOG_SECRET_REFERENCE) {
            Some(existing) => *existing = reference,
            None => resources.push(reference),
        }

        if !self.policy_config_map_name.is_empty() {
            shoot
                .spec
                .kubernetes
                .kube_api_server
                .get_or_insert_with(KubeApiServerConfig::default)
                .audit_config = Some(AuditConfig {
                audit_policy: AuditPolicy {
                    config_map_ref: ObjectRef {
                        name: self.policy_config_map_name.clone(),
                    },
                },
            });
        }
    }
}

impl Extender for AuditLogExtender {
    fn name(&self) -> &'static str {
        "audit-log"
    }

    fn extend(&self, runtime: &Runtime, shoot: &mut Shoot) -> Result<(), Error> {
        let provider = &runtime.spec.shoot.provider.r#type;
        let region = &runtime.spec.shoot.region;

        match self.tenants.lookup(provider, region) {
            Some(data) => {
                self.apply(data, shoot);
                Ok(())
            }
            None if self.mandatory => Err(Error::conversion(
                self.name(),
                format!("no audit log tenant configured for {provider}/{region}"),
            )),
            None => {
                warn!(provider, region, "no audit log tenant configured, skipping");
                Ok(())
            }
        }
    }
}
