//! # Audit Log Tenants
//!
//! Per provider and region audit log tenant records, loaded from JSON at startup:
//!
//! ```json
//! { "aws": { "eu-central-1": { "tenantID": "...", "serviceURL": "https://...", "secretName": "..." } } }
//! ```
//!
//! Each record is validated on its own; a single bad record aborts startup.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogData {
    #[serde(rename = "tenantID")]
    pub tenant_id: String,
    #[serde(rename = "serviceURL")]
    pub service_url: String,
    pub secret_name: String,
}

impl AuditLogData {
    fn validate(&self, key: &str) -> Result<(), Error> {
        if self.tenant_id.trim().is_empty() {
            return Err(Error::validation(format!("{key}: tenantID is required")));
        }
        if self.secret_name.trim().is_empty() {
            return Err(Error::validation(format!("{key}: secretName is required")));
        }
        if !(self.service_url.starts_with("https://") || self.service_url.starts_with("http://")) {
            return Err(Error::validation(format!(
                "{key}: serviceURL '{}' must be an http(s) URL",
                self.service_url
            )));
        }
        Ok(())
    }
}

/// provider type -> region -> tenant
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct AuditLogConfig(BTreeMap<String, BTreeMap<String, AuditLogData>>);

impl AuditLogConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::validation(format!(
                "cannot read audit log config {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(raw)?;
        for (provider, regions) in &config.0 {
            for (region, data) in regions {
                data.validate(&format!("{provider}/{region}"))?;
            }
        }
        Ok(config)
    }

    pub fn lookup(&self, provider: &str, region: &str) -> Option<&AuditLogData> {
        self.0.get(provider).and_then(|regions| regions.get(region))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_provider_and_region() {
        let config = AuditLogConfig::from_json(
            r#"{"aws": {"eu-central-1": {"tenantID": "t1", "serviceURL": "https://auditlog.example", "secretName": "auditlog-secret"}}}"#,
        )
        .unwrap();
        assert_eq!(config.lookup("aws", "eu-central-1").unwrap().tenant_id, "t1");
        assert!(config.lookup("aws", "us-east-1").is_none());
        assert!(config.lookup("gcp", "eu-central-1").is_none());
    }

    #[test]
    fn test_single_invalid_record_rejects_file() {
        let err = AuditLogConfig::from_json(
            r#"{
                "aws": {"eu-central-1": {"tenantID": "t1", "serviceURL": "https://a", "secretName": "s"}},
                "gcp": {"europe-west3": {"tenantID": "", "serviceURL": "https://b", "secretName": "s"}}
            }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("gcp/europe-west3"));
    }

    #[test]
    fn test_rejects_non_url_service() {
        let err = AuditLogConfig::from_json(
            r#"{"aws": {"eu-central-1": {"tenantID": "t", "serviceURL": "ftp://x", "secretName": "s"}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
