//! # Converter Configuration
//!
//! Defaults the extender pipeline substitutes when a Runtime leaves a field open.
//! Loaded once at startup from a JSON file; any missing required field aborts startup.

use crate::crd::OidcConfig;
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverterConfig {
    pub kubernetes: KubernetesConfig,
    pub dns: DnsConfig,
    pub provider: ProviderConfig,
    pub machine_image: MachineImageConfig,
    #[serde(default)]
    pub audit_logging: AuditLoggingConfig,
    pub cluster: ClusterConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesConfig {
    pub default_version: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsConfig {
    pub secret_name: String,
    pub domain_prefix: String,
    pub provider_type: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(default)]
    pub aws: AwsConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsConfig {
    #[serde(default, rename = "enableIMDSv2")]
    pub enable_imds_v2: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineImageConfig {
    pub default_version: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLoggingConfig {
    /// Config map holding the audit policy, referenced from every shoot
    #[serde(default)]
    pub policy_config_map_name: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    #[serde(rename = "defaultSharedIASTenant")]
    pub default_shared_ias_tenant: OidcProviderDefaults,
}

/// Fallback OIDC issuer used when a Runtime declares no additional issuers
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OidcProviderDefaults {
    #[serde(rename = "clientID")]
    pub client_id: String,
    #[serde(rename = "issuerURL")]
    pub issuer_url: String,
    #[serde(default)]
    pub groups_claim: String,
    #[serde(default)]
    pub signing_algs: Vec<String>,
    #[serde(default)]
    pub username_claim: String,
    #[serde(default)]
    pub username_prefix: String,
}

impl OidcProviderDefaults {
    pub fn to_oidc_config(&self) -> OidcConfig {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        OidcConfig {
            client_id: Some(self.client_id.clone()),
            issuer_url: Some(self.issuer_url.clone()),
            groups_claim: non_empty(&self.groups_claim),
            signing_algs: self.signing_algs.clone(),
            username_claim: non_empty(&self.username_claim),
            username_prefix: non_empty(&self.username_prefix),
            ..OidcConfig::default()
        }
    }
}

impl ConverterConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::validation(format!(
                "cannot read converter config {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Collects every missing field so one startup attempt reports them all
    pub fn validate(&self) -> Result<(), Error> {
        let required = [
            ("kubernetes.defaultVersion", &self.kubernetes.default_version),
            ("dns.secretName", &self.dns.secret_name),
            ("dns.domainPrefix", &self.dns.domain_prefix),
            ("dns.providerType", &self.dns.provider_type),
            ("machineImage.defaultVersion", &self.machine_image.default_version),
            (
                "cluster.defaultSharedIASTenant.clientID",
                &self.cluster.default_shared_ias_tenant.client_id,
            ),
            (
                "cluster.defaultSharedIASTenant.issuerURL",
                &self.cluster.default_shared_ias_tenant.issuer_url,
            ),
        ];

        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(field, _)| *field)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::validation(format!(
                "converter config is missing required fields: {}",
                missing.join(", ")
            )))
        }
    }
}
