//! # Runtime
//!
//! Declarative desired state of one managed cluster.
//!
//! # Example
//!
//! ```yaml
//! apiVersion: infrastructuremanager.kyma-project.io/v1
//! kind: Runtime
//! metadata:
//!   name: 059dbc39-fd2b-4186-b0e5-8a1bc8ede5b8
//!   namespace: kcp-system
//!   labels:
//!     kyma-project.io/runtime-id: 059dbc39-fd2b-4186-b0e5-8a1bc8ede5b8
//! spec:
//!   shoot:
//!     name: c-6ea9b9b
//!     purpose: production
//!     region: eu-central-1
//!     secretBindingName: aws-binding
//!     provider:
//!       type: aws
//!       workers:
//!         - name: cpu-worker-0
//!           machine: { type: m6i.large }
//!           minimum: 1
//!           maximum: 3
//!           zones: [eu-central-1a]
//!     networking:
//!       nodes: 10.250.0.0/16
//!       pods: 100.64.0.0/12
//!       services: 100.104.0.0/13
//!     kubernetes:
//!       kubeAPIServer:
//!         oidcConfig:
//!           clientID: 12b13a26-d993-4d0c-aa08-5f5852bbdff6
//!           issuerURL: https://kyma.accounts.ondemand.com
//!   security:
//!     administrators: [admin@example.com]
//! ```

use super::status::{ConditionStatus, Conditions};
use super::preserve_unknown_fields;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::gardener::types::{ControlPlane, Worker};

#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "Runtime",
    group = "infrastructuremanager.kyma-project.io",
    version = "v1",
    namespaced,
    status = "RuntimeStatus",
    shortname = "rt",
    printcolumn = r#"{"name":"Shoot", "type":"string", "jsonPath":".spec.shoot.name"}, {"name":"State", "type":"string", "jsonPath":".status.state"}, {"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSpec {
    pub shoot: RuntimeShoot,
    #[serde(default)]
    pub security: Security,
    /// Image registry cache toggle, owned by the custom config reconciler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caching: Option<ImageRegistryCache>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeShoot {
    pub name: String,
    #[serde(default)]
    pub purpose: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub licence_type: Option<String>,
    pub secret_binding_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enforce_seed_location: Option<bool>,
    #[serde(default)]
    pub kubernetes: Kubernetes,
    pub provider: Provider,
    pub networking: Networking,
    #[serde(default)]
    pub control_plane: ControlPlane,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Kubernetes {
    /// Pinned version; the configured default is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, rename = "kubeAPIServer")]
    pub kube_api_server: ApiServer,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiServer {
    #[serde(default)]
    pub oidc_config: OidcConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_oidc_config: Option<Vec<OidcConfig>>,
}

/// OpenID Connect issuer trusted by the cluster API server
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OidcConfig {
    #[serde(default, rename = "clientID", skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, rename = "issuerURL", skip_serializing_if = "Option::is_none")]
    pub issuer_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups_claim: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signing_algs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_claim: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_claims: Option<BTreeMap<String, String>>,
    /// Inline JWKS document used instead of issuer discovery
    #[serde(default, rename = "jwks", skip_serializing_if = "Option::is_none")]
    pub jwks: Option<String>,
}

impl OidcConfig {
    /// An issuer is usable only when both client and issuer are set
    pub fn is_complete(&self) -> bool {
        self.client_id.is_some() && self.issuer_url.is_some()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    pub r#type: String,
    pub workers: Vec<Worker>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_workers: Option<Vec<Worker>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub control_plane_config: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub infrastructure_config: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Networking {
    /// CNI type, e.g. `calico` or `cilium`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    pub nodes: String,
    pub pods: String,
    pub services: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Security {
    #[serde(default)]
    pub administrators: Vec<String>,
    #[serde(default)]
    pub networking: NetworkingSecurity,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkingSecurity {
    #[serde(default)]
    pub filter: Filter,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<Ingress>,
    #[serde(default)]
    pub egress: Egress,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Ingress {
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Egress {
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageRegistryCache {
    pub enabled: bool,
}

/// Coarse lifecycle state, always derived from conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum RuntimeState {
    Pending,
    Ready,
    Error,
    Terminating,
    Unknown,
}

impl RuntimeState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Ready => "Ready",
            Self::Error => "Error",
            Self::Terminating => "Terminating",
            Self::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<RuntimeState>,
    #[serde(default)]
    pub conditions: Conditions,
}

/// Condition types recorded on a Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeConditionType {
    Provisioned,
    OidcAndCMsConfigured,
    Deprovisioned,
}

impl RuntimeConditionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Provisioned => "Provisioned",
            Self::OidcAndCMsConfigured => "OidcAndCMsConfigured",
            Self::Deprovisioned => "Deprovisioned",
        }
    }
}

/// What a reason contributes to the derived state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasonEffect {
    Progress,
    Ready,
    Error,
    Unknown,
}

/// Condition reasons recorded on a Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeConditionReason {
    ShootCreationPending,
    ShootCreationCompleted,
    ShootUpdatePending,
    ShootStateUnknown,
    ConversionError,
    CreationError,
    ProcessingError,
    GardenerError,
    OidcAndCMsConfigured,
    OidcError,
    KubernetesApiError,
    ConfigurationCompleted,
    ConfigurationError,
    Deletion,
    DeletionError,
}

impl RuntimeConditionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ShootCreationPending => "ShootCreationPending",
            Self::ShootCreationCompleted => "ShootCreationCompleted",
            Self::ShootUpdatePending => "ShootUpdatePending",
            Self::ShootStateUnknown => "ShootStateUnknown",
            Self::ConversionError => "ConversionErr",
            Self::CreationError => "CreationErr",
            Self::ProcessingError => "ProcessingErr",
            Self::GardenerError => "GardenerErr",
            Self::OidcAndCMsConfigured => "OidcAndConfigMapConfigured",
            Self::OidcError => "OidcError",
            Self::KubernetesApiError => "KubernetesErr",
            Self::ConfigurationCompleted => "ConfigurationCompleted",
            Self::ConfigurationError => "ConfigurationErr",
            Self::Deletion => "Deletion",
            Self::DeletionError => "DeletionErr",
        }
    }

    pub fn parse(reason: &str) -> Option<Self> {
        const ALL: [RuntimeConditionReason; 15] = [
            RuntimeConditionReason::ShootCreationPending,
            RuntimeConditionReason::ShootCreationCompleted,
            RuntimeConditionReason::ShootUpdatePending,
            RuntimeConditionReason::ShootStateUnknown,
            RuntimeConditionReason::ConversionError,
            RuntimeConditionReason::CreationError,
            RuntimeConditionReason::ProcessingError,
            RuntimeConditionReason::GardenerError,
            RuntimeConditionReason::OidcAndCMsConfigured,
            RuntimeConditionReason::OidcError,
            RuntimeConditionReason::KubernetesApiError,
            RuntimeConditionReason::ConfigurationCompleted,
            RuntimeConditionReason::ConfigurationError,
            RuntimeConditionReason::Deletion,
            RuntimeConditionReason::DeletionError,
        ];
        ALL.into_iter().find(|r| r.as_str() == reason)
    }

    /// Transient failures (managed cluster unreachable, OIDC resources) self-heal,
    /// so they keep the Runtime Pending instead of Error.
    pub fn effect(self) -> ReasonEffect {
        match self {
            Self::ConfigurationCompleted => ReasonEffect::Ready,
            Self::ShootStateUnknown => ReasonEffect::Unknown,
            Self::ConversionError
            | Self::CreationError
            | Self::ProcessingError
            | Self::GardenerError
            | Self::ConfigurationError
            | Self::DeletionError => ReasonEffect::Error,
            Self::ShootCreationPending
            | Self::ShootCreationCompleted
            | Self::ShootUpdatePending
            | Self::OidcAndCMsConfigured
            | Self::OidcError
            | Self::KubernetesApiError
            | Self::Deletion => ReasonEffect::Progress,
        }
    }
}

impl RuntimeStatus {
    /// Derive the coarse state by a priority-ordered scan of the conditions.
    ///
    /// Terminating beats Error, Error beats Unknown, and Ready requires a completed
    /// `Provisioned` condition with nothing else pending.
    pub fn derive_state(&self, deleting: bool) -> Option<RuntimeState> {
        if deleting {
            return Some(RuntimeState::Terminating);
        }
        if self.conditions.is_empty() {
            return None;
        }

        let effect_of =
            |reason: &str| RuntimeConditionReason::parse(reason).map(RuntimeConditionReason::effect);

        let failed = self.conditions.iter().any(|c| {
            c.status == ConditionStatus::False && effect_of(&c.reason) == Some(ReasonEffect::Error)
        });
        if failed {
            return Some(RuntimeState::Error);
        }

        if self
            .conditions
            .iter()
            .any(|c| effect_of(&c.reason) == Some(ReasonEffect::Unknown))
        {
            return Some(RuntimeState::Unknown);
        }

        let provisioned = self
            .conditions
            .get(RuntimeConditionType::Provisioned.as_str())
            .is_some_and(|c| {
                c.status == ConditionStatus::True
                    && effect_of(&c.reason) == Some(ReasonEffect::Ready)
            });
        let all_true = self
            .conditions
            .iter()
            .all(|c| c.status == ConditionStatus::True);

        if provisioned && all_true {
            Some(RuntimeState::Ready)
        } else {
            Some(RuntimeState::Pending)
        }
    }
}

impl Runtime {
    pub fn runtime_id(&self) -> Option<&str> {
        self.labels().get(crate::constants::LABEL_RUNTIME_ID).map(String::as_str)
    }

    pub fn generation(&self) -> i64 {
        self.metadata.generation.unwrap_or(0)
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn state(&self) -> Option<RuntimeState> {
        self.status.as_ref().and_then(|s| s.state)
    }

    /// Record a condition and refresh the derived state.
    ///
    /// Returns `true` when the condition changed.
    pub fn update_condition(
        &mut self,
        condition_type: RuntimeConditionType,
        reason: RuntimeConditionReason,
        status: ConditionStatus,
        message: &str,
    ) -> bool {
        let deleting = self.is_deleting();
        let runtime_status = self.status.get_or_insert_with(RuntimeStatus::default);
        let changed = runtime_status.conditions.upsert(
            condition_type.as_str(),
            reason.as_str(),
            status,
            message,
        );
        runtime_status.state = runtime_status.derive_state(deleting);
        changed
    }

    /// Forget what earlier passes recorded about bootstrapping the managed cluster.
    ///
    /// Called once a new generation reaches the shoot, so a failure caused by an
    /// older spec cannot pin the derived state to Error.
    pub fn reset_bootstrap_conditions(&mut self) -> bool {
        let deleting = self.is_deleting();
        let Some(runtime_status) = self.status.as_mut() else {
            return false;
        };
        let provisioned = RuntimeConditionType::Provisioned.as_str();
        let dropped = runtime_status.conditions.retain_types(|t| t == provisioned);
        runtime_status.state = runtime_status.derive_state(deleting);
        dropped
    }

    /// Every OIDC issuer that must be mirrored onto the managed cluster
    pub fn additional_oidc(&self) -> &[OidcConfig] {
        self.spec
            .shoot
            .kubernetes
            .kube_api_server
            .additional_oidc_config
            .as_deref()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> Runtime {
        Runtime::new("rt", RuntimeSpec::default())
    }

    #[test]
    fn test_no_conditions_has_no_state() {
        assert_eq!(RuntimeStatus::default().derive_state(false), None);
    }

    #[test]
    fn test_deleting_is_terminating() {
        let mut rt = runtime();
        rt.update_condition(
            RuntimeConditionType::Provisioned,
            RuntimeConditionReason::ConfigurationCompleted,
            ConditionStatus::True,
            "done",
        );
        assert_eq!(rt.status.unwrap().derive_state(true), Some(RuntimeState::Terminating));
    }

    #[test]
    fn test_completed_provisioning_is_ready() {
        let mut rt = runtime();
        rt.update_condition(
            RuntimeConditionType::OidcAndCMsConfigured,
            RuntimeConditionReason::OidcAndCMsConfigured,
            ConditionStatus::True,
            "OIDC extension disabled",
        );
        rt.update_condition(
            RuntimeConditionType::Provisioned,
            RuntimeConditionReason::ConfigurationCompleted,
            ConditionStatus::True,
            "Runtime processing completed successfully",
        );
        assert_eq!(rt.state(), Some(RuntimeState::Ready));
    }

    #[test]
    fn test_oidc_failure_keeps_runtime_pending() {
        let mut rt = runtime();
        rt.update_condition(
            RuntimeConditionType::Provisioned,
            RuntimeConditionReason::ConfigurationCompleted,
            ConditionStatus::True,
            "",
        );
        rt.update_condition(
            RuntimeConditionType::OidcAndCMsConfigured,
            RuntimeConditionReason::OidcError,
            ConditionStatus::False,
            "Failed to create OpenIDConnect resource. Scheduling for retry",
        );
        assert_eq!(rt.state(), Some(RuntimeState::Pending));
    }

    #[test]
    fn test_error_reason_with_false_status_is_error() {
        let mut rt = runtime();
        rt.update_condition(
            RuntimeConditionType::Provisioned,
            RuntimeConditionReason::CreationError,
            ConditionStatus::False,
            "shoot creation failed",
        );
        assert_eq!(rt.state(), Some(RuntimeState::Error));
    }

    #[test]
    fn test_unknown_shoot_state() {
        let mut rt = runtime();
        rt.update_condition(
            RuntimeConditionType::Provisioned,
            RuntimeConditionReason::ShootStateUnknown,
            ConditionStatus::Unknown,
            "unexpected last operation state",
        );
        assert_eq!(rt.state(), Some(RuntimeState::Unknown));
    }

    #[test]
    fn test_reset_bootstrap_conditions_clears_stale_error() {
        let mut rt = runtime();
        rt.update_condition(
            RuntimeConditionType::Provisioned,
            RuntimeConditionReason::ShootUpdatePending,
            ConditionStatus::Unknown,
            "Shoot is pending for update",
        );
        rt.update_condition(
            RuntimeConditionType::OidcAndCMsConfigured,
            RuntimeConditionReason::ConfigurationError,
            ConditionStatus::False,
            "additional OIDC config #0 requires both clientID and issuerURL",
        );
        assert_eq!(rt.state(), Some(RuntimeState::Error));

        assert!(rt.reset_bootstrap_conditions());
        assert_eq!(rt.state(), Some(RuntimeState::Pending));
        let status = rt.status.as_ref().unwrap();
        assert_eq!(status.conditions.len(), 1);
        assert!(status.conditions.get("Provisioned").is_some());
    }

    #[test]
    fn test_reason_round_trip_through_strings() {
        for reason in [
            RuntimeConditionReason::OidcError,
            RuntimeConditionReason::ConfigurationCompleted,
            RuntimeConditionReason::DeletionError,
        ] {
            assert_eq!(RuntimeConditionReason::parse(reason.as_str()), Some(reason));
        }
        assert_eq!(RuntimeConditionReason::parse("Nope"), None);
    }
}
